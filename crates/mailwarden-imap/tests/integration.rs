//! Scripted end-to-end sessions against a mock stream.
//!
//! Each test drives the type-state client through a full command sequence
//! and checks both the parsed results and the bytes the client sent.

#![allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailwarden_imap::{
    Client, Error, FetchAttribute, FetchItem, Mailbox, SearchKey, SeqSet, UidSet,
};

/// Serves a scripted response stream and records everything written to it.
struct MockStream {
    responses: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    fn new(script: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            responses: Cursor::new(script.to_vec()),
            sent: Arc::clone(&sent),
        };
        (stream, sent)
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let pos = usize::try_from(self.responses.position()).unwrap();
        let data = self.responses.get_ref();
        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }
        let n = (data.len() - pos).min(buf.remaining());
        buf.put_slice(&data[pos..pos + n]);
        self.responses.set_position((pos + n) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn sent_text(sent: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(sent.lock().unwrap().clone()).unwrap()
}

#[tokio::test]
async fn test_full_polling_session() {
    let script = b"* OK ready\r\n\
W0000 OK LOGIN completed\r\n\
* 3 EXISTS\r\n\
* 0 RECENT\r\n\
* OK [UIDVALIDITY 42] UIDs valid\r\n\
* OK [UIDNEXT 104] predicted\r\n\
W0001 OK [READ-ONLY] EXAMINE completed\r\n\
* SEARCH 101 103\r\n\
W0002 OK UID SEARCH completed\r\n\
* 2 FETCH (UID 101 ENVELOPE (\"Mon, 1 Jan 2024 00:00:00 +0000\" \"Team update\" \
((\"Ana\" NIL \"ana\" \"example.com\")) NIL NIL ((NIL NIL \"bob\" \"example.com\")) \
NIL NIL NIL \"<x1@example.com>\") \
BODYSTRUCTURE (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" 11 1))\r\n\
* 3 FETCH (UID 103 BODY[1] {11}\r\nhello world)\r\n\
W0003 OK UID FETCH completed\r\n\
* BYE logging out\r\n\
W0004 OK LOGOUT completed\r\n";

    let (stream, sent) = MockStream::new(script);

    let client = Client::from_stream(stream).await.unwrap();
    let client = client.login("user@example.com", "secret").await.unwrap();

    let (mut client, snapshot) = client.examine(&Mailbox::inbox()).await.unwrap();
    assert_eq!(snapshot.exists, 3);
    assert_eq!(snapshot.uid_validity.unwrap().get(), 42);
    assert_eq!(snapshot.uid_next.unwrap().get(), 104);

    let uids = client
        .uid_search(&SearchKey::UidIn(UidSet::from_values(&[101, 103])))
        .await
        .unwrap();
    assert_eq!(uids.iter().map(|u| u.get()).collect::<Vec<_>>(), [101, 103]);

    let raw: Vec<u32> = uids.iter().map(|u| u.get()).collect();
    let fetched = client
        .uid_fetch(
            &UidSet::from_values(&raw),
            &[
                FetchAttribute::Uid,
                FetchAttribute::Envelope,
                FetchAttribute::BodyStructure,
                FetchAttribute::BodyPeek {
                    section: Some("1".to_string()),
                    partial: None,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(fetched.len(), 2);

    let envelope = fetched[0]
        .1
        .iter()
        .find_map(|item| match item {
            FetchItem::Envelope(e) => Some(e),
            _ => None,
        })
        .unwrap();
    assert_eq!(envelope.subject.as_deref(), Some("Team update"));
    assert_eq!(envelope.from[0].email(), Some("ana@example.com".to_string()));

    let body = fetched[1]
        .1
        .iter()
        .find_map(|item| match item {
            FetchItem::Body { data, .. } => data.as_deref(),
            _ => None,
        })
        .unwrap();
    assert_eq!(body, b"hello world");

    client.logout().await.unwrap();

    let sent = sent_text(&sent);
    assert!(sent.contains("W0000 LOGIN user@example.com secret\r\n"));
    assert!(sent.contains("W0001 EXAMINE INBOX\r\n"));
    assert!(sent.contains("W0002 UID SEARCH UID 101,103\r\n"));
    assert!(
        sent.contains("W0003 UID FETCH 101,103 (UID ENVELOPE BODYSTRUCTURE BODY.PEEK[1])\r\n")
    );
    assert!(sent.contains("W0004 LOGOUT\r\n"));
}

#[tokio::test]
async fn test_login_rejected_with_auth_code() {
    let script = b"* OK ready\r\n\
W0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n";

    let (stream, _) = MockStream::new(script);
    let client = Client::from_stream(stream).await.unwrap();
    let err = client.login("user@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::Auth(t) if t.contains("Invalid credentials")));
}

#[tokio::test]
async fn test_login_rejected_without_code_is_still_auth() {
    let script = b"* OK ready\r\n\
W0000 NO LOGIN failed\r\n";

    let (stream, _) = MockStream::new(script);
    let client = Client::from_stream(stream).await.unwrap();
    let err = client.login("user@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn test_examine_unknown_mailbox() {
    let script = b"* OK ready\r\n\
W0000 OK LOGIN completed\r\n\
W0001 NO [NONEXISTENT] Unknown Mailbox: Zzz\r\n";

    let (stream, _) = MockStream::new(script);
    let client = Client::from_stream(stream).await.unwrap();
    let client = client.login("user@example.com", "secret").await.unwrap();
    let err = client
        .examine(&Mailbox::new("Zzz"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::No(t) if t.contains("Unknown Mailbox")));
}

#[tokio::test]
async fn test_bye_greeting_is_an_error() {
    let script = b"* BYE server shutting down\r\n";
    let (stream, _) = MockStream::new(script);
    let err = Client::from_stream(stream).await.unwrap_err();
    assert!(matches!(err, Error::Bye(t) if t.contains("shutting down")));
}

#[tokio::test]
async fn test_status_without_select() {
    let script = b"* OK ready\r\n\
W0000 OK LOGIN completed\r\n\
* STATUS INBOX (MESSAGES 231 UNSEEN 5)\r\n\
W0001 OK STATUS completed\r\n";

    let (stream, sent) = MockStream::new(script);
    let client = Client::from_stream(stream).await.unwrap();
    let mut client = client.login("user@example.com", "secret").await.unwrap();

    let items = client
        .status(&Mailbox::inbox(), &["MESSAGES", "UNSEEN"])
        .await
        .unwrap();
    assert_eq!(
        items,
        vec![("MESSAGES".to_string(), 231), ("UNSEEN".to_string(), 5)]
    );
    assert!(sent_text(&sent).contains("W0001 STATUS INBOX (MESSAGES UNSEEN)\r\n"));
}

#[tokio::test]
async fn test_fetch_by_sequence_range() {
    let script = b"* OK ready\r\n\
W0000 OK LOGIN completed\r\n\
* 1 EXISTS\r\n\
W0001 OK EXAMINE completed\r\n\
* 1 FETCH (UID 7 RFC822.SIZE 512)\r\n\
W0002 OK FETCH completed\r\n";

    let (stream, sent) = MockStream::new(script);
    let client = Client::from_stream(stream).await.unwrap();
    let client = client.login("user@example.com", "secret").await.unwrap();
    let (mut client, _) = client.examine(&Mailbox::inbox()).await.unwrap();

    let fetched = client
        .fetch(
            &SeqSet::range(1, 1).unwrap(),
            &[FetchAttribute::Uid, FetchAttribute::Rfc822Size],
        )
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].0.get(), 1);
    assert!(sent_text(&sent).contains("W0002 FETCH 1:1 (UID RFC822.SIZE)\r\n"));
}

#[tokio::test]
async fn test_unexpected_greeting_is_protocol_error() {
    let script = b"* 5 EXISTS\r\n";
    let (stream, _) = MockStream::new(script);
    let err = Client::from_stream(stream).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}
