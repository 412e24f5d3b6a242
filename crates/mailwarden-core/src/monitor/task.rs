//! The per-account polling loop.
//!
//! A monitor task is spawned by the registry and owns one account's poll
//! cycle: fetch new messages, classify them, persist violations, push
//! events. The first tick runs immediately; later ticks follow the
//! configured interval. Ticks never overlap because the loop is a single
//! task that awaits each cycle to completion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::account::{Account, AccountId, CredentialStore};
use crate::classify::Classifier;
use crate::findings::{Finding, ViolationStore};
use crate::mailbox::MailFetcher;
use crate::monitor::config::MonitoringConfig;
use crate::monitor::state::{MonitorState, StatusCell};
use crate::notify::{MonitorEvent, NotificationHub};

/// Most messages pulled in one tick. An interrupted backlog resumes on
/// the next tick because the checkpoint only covers what was processed.
pub(crate) const FETCH_BATCH_LIMIT: usize = 50;

/// Shared services a monitor needs. Cheap to clone, safe to share.
#[derive(Clone)]
pub struct MonitorDeps {
    /// Mailbox access.
    pub fetcher: Arc<dyn MailFetcher>,
    /// Secret lookup, queried fresh each tick so rotations take effect.
    pub credentials: Arc<dyn CredentialStore>,
    /// Violation persistence.
    pub store: Arc<dyn ViolationStore>,
    /// Message screening.
    pub classifier: Arc<Classifier>,
    /// Event delivery.
    pub hub: Arc<NotificationHub>,
}

/// Why a monitor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    /// Stop was requested through the registry.
    Stopped,
    /// The account is unusable (bad credentials, missing mailbox). The
    /// registry entry should be removed.
    Fatal,
}

/// Outcome of one poll cycle.
enum TickOutcome {
    Completed,
    Transient(String),
    Fatal(String),
}

/// Runs the poll loop until stopped or a fatal error disables the
/// account.
pub(crate) async fn run_monitor(
    account: Account,
    config: MonitoringConfig,
    deps: MonitorDeps,
    status: StatusCell,
    mut stop: watch::Receiver<bool>,
) -> ExitReason {
    let account_id = config.account_id;
    let interval = config.interval();

    info!(account = %account.email, ?interval, "monitor started");
    status.set_state(MonitorState::Running);
    deps.hub.push(
        account_id,
        MonitorEvent::Status {
            account_id,
            state: MonitorState::Running,
        },
    );

    loop {
        match tick(&account, &config, &deps, &status).await {
            TickOutcome::Completed => {
                status.update(|s| {
                    s.state = MonitorState::Running;
                    s.error_count = 0;
                });
            }
            TickOutcome::Transient(message) => {
                warn!(account = %account.email, "poll cycle failed: {message}");
                status.update(|s| {
                    s.state = MonitorState::Error;
                    s.error_count += 1;
                });
                deps.hub.push(
                    account_id,
                    MonitorEvent::Error {
                        account_id,
                        message,
                    },
                );
            }
            TickOutcome::Fatal(message) => {
                error!(account = %account.email, "monitor disabled: {message}");
                deps.hub.push(
                    account_id,
                    MonitorEvent::Error {
                        account_id,
                        message,
                    },
                );
                finish(&deps, account_id, &status);
                return ExitReason::Fatal;
            }
        }

        tokio::select! {
            _ = stop.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!(account = %account.email, "monitor stopped");
    finish(&deps, account_id, &status);
    ExitReason::Stopped
}

fn finish(deps: &MonitorDeps, account_id: AccountId, status: &StatusCell) {
    status.set_state(MonitorState::Stopped);
    deps.hub.push(
        account_id,
        MonitorEvent::Status {
            account_id,
            state: MonitorState::Stopped,
        },
    );
}

/// One fetch/classify/persist cycle.
///
/// The checkpoint moves only after the whole cycle succeeds, so a
/// failure anywhere leaves the batch to be refetched. Re-saving a
/// violation is harmless, the store keys findings by message.
async fn tick(
    account: &Account,
    config: &MonitoringConfig,
    deps: &MonitorDeps,
    status: &StatusCell,
) -> TickOutcome {
    let account_id = config.account_id;

    let credential = match deps.credentials.get(account_id) {
        Ok(Some(credential)) => credential,
        Ok(None) => {
            return TickOutcome::Fatal(format!("no credential stored for {}", account.email));
        }
        Err(e) => return TickOutcome::Transient(format!("credential lookup failed: {e}")),
    };

    status.set_state(MonitorState::Fetching);
    let checkpoint = status.snapshot().checkpoint;
    let messages = match deps
        .fetcher
        .fetch_unseen(&account.imap, &credential, &checkpoint, FETCH_BATCH_LIMIT)
        .await
    {
        Ok(messages) => messages,
        Err(e) if e.is_fatal() => return TickOutcome::Fatal(e.to_string()),
        Err(e) => return TickOutcome::Transient(e.to_string()),
    };

    if messages.is_empty() {
        debug!(account = %account.email, "no new messages");
        return TickOutcome::Completed;
    }
    debug!(account = %account.email, count = messages.len(), "classifying batch");

    status.set_state(MonitorState::Classifying);
    let mut findings = Vec::new();
    let mut max_uid = 0u32;
    let mut max_seen: Option<DateTime<Utc>> = None;
    for message in &messages {
        let assessment = deps.classifier.analyze(message, config).await;
        if let Some(finding) = Finding::from_assessment(account_id, message, &assessment) {
            findings.push(finding);
        }
        max_uid = max_uid.max(message.uid);
        if let Some(date) = message.date {
            max_seen = Some(max_seen.map_or(date, |prev| prev.max(date)));
        }
    }

    status.set_state(MonitorState::Persisting);
    for mut finding in findings {
        match deps.store.save(&finding).await {
            Ok(id) => {
                finding.id = Some(id);
                deps.hub
                    .push(account_id, MonitorEvent::Violation { finding });
            }
            Err(e) => return TickOutcome::Transient(format!("could not persist finding: {e}")),
        }
    }

    let seen = max_seen.unwrap_or_else(Utc::now);
    status.update(|s| s.checkpoint.advance(max_uid, seen));
    TickOutcome::Completed
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;
    use crate::account::{Credential, ImapEndpoint, MemoryCredentialStore};
    use crate::findings::MemoryViolationStore;
    use crate::mailbox::{MailboxError, MailboxProbe, RawMessage};
    use crate::monitor::config::{Category, ChannelKind, PollFrequency, Sensitivity};
    use crate::monitor::state::Checkpoint;

    type FetchResult = Result<Vec<RawMessage>, MailboxError>;

    /// Replays a scripted sequence of fetch results, then empty batches.
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<FetchResult>>,
        seen_checkpoints: Mutex<Vec<Checkpoint>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<FetchResult>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                seen_checkpoints: Mutex::new(Vec::new()),
            }
        }

        fn checkpoints(&self) -> Vec<Checkpoint> {
            self.seen_checkpoints.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailFetcher for ScriptedFetcher {
        async fn test_connection(
            &self,
            _endpoint: &ImapEndpoint,
            _credential: &Credential,
        ) -> Result<MailboxProbe, MailboxError> {
            Ok(MailboxProbe::default())
        }

        async fn fetch_unseen(
            &self,
            _endpoint: &ImapEndpoint,
            _credential: &Credential,
            checkpoint: &Checkpoint,
            _limit: usize,
        ) -> FetchResult {
            self.seen_checkpoints.lock().unwrap().push(*checkpoint);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn fetch_recent(
            &self,
            _endpoint: &ImapEndpoint,
            _credential: &Credential,
            _limit: usize,
        ) -> FetchResult {
            Ok(Vec::new())
        }
    }

    struct Harness {
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<MemoryViolationStore>,
        events: UnboundedReceiver<MonitorEvent>,
        status: StatusCell,
        stop: watch::Sender<bool>,
        task: tokio::task::JoinHandle<ExitReason>,
    }

    fn account() -> Account {
        let mut account = Account::with_email("owner@example.com");
        account.id = Some(AccountId::new(1));
        account
    }

    fn config() -> MonitoringConfig {
        MonitoringConfig::new(
            AccountId::new(1),
            Sensitivity::Medium,
            Category::ALL.to_vec(),
            PollFrequency::OneMinute,
            vec![ChannelKind::Dashboard],
        )
    }

    fn message(uid: u32, subject: &str, body: &str) -> RawMessage {
        RawMessage {
            uid,
            message_id: format!("<msg-{uid}@example.com>"),
            subject: subject.to_string(),
            from: "sender@example.com".to_string(),
            to: "owner@example.com".to_string(),
            date: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
            body: body.to_string(),
            images: Vec::new(),
        }
    }

    fn spawn(responses: Vec<FetchResult>) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::new(responses));
        let store = Arc::new(MemoryViolationStore::new());
        let hub = Arc::new(NotificationHub::new());
        let (sender, events) = unbounded_channel();
        hub.register(AccountId::new(1), sender);

        let deps = MonitorDeps {
            fetcher: fetcher.clone(),
            credentials: Arc::new(MemoryCredentialStore::with_credential(
                AccountId::new(1),
                Credential::new("hunter2"),
            )),
            store: store.clone(),
            classifier: Arc::new(Classifier::new().unwrap()),
            hub,
        };

        let status = StatusCell::default();
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_monitor(
            account(),
            config(),
            deps,
            status.clone(),
            stop_rx,
        ));

        Harness {
            fetcher,
            store,
            events,
            status,
            stop,
            task,
        }
    }

    fn drain(events: &mut UnboundedReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_benign_batch_persists_and_pushes_nothing() {
        let mut harness = spawn(vec![Ok(vec![message(
            5,
            "Team update",
            "Let's circle back Monday.",
        )])]);

        harness.stop.send(true).unwrap();
        let exit = harness.task.await.unwrap();

        assert_eq!(exit, ExitReason::Stopped);
        assert_eq!(harness.fetcher.checkpoints().len(), 1);
        let stored = harness
            .store
            .list_by_account(AccountId::new(1), 10)
            .await
            .unwrap();
        assert!(stored.is_empty());

        let events = drain(&mut harness.events);
        assert!(
            events
                .iter()
                .all(|e| matches!(e, MonitorEvent::Status { .. })),
            "expected only lifecycle events, got {events:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_threat_persisted_and_pushed_in_one_tick() {
        let mut harness = spawn(vec![Ok(vec![message(
            9,
            "Final warning",
            "I will kill you if you don't listen.",
        )])]);

        harness.stop.send(true).unwrap();
        harness.task.await.unwrap();

        let stored = harness
            .store
            .list_by_account(AccountId::new(1), 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_id, "<msg-9@example.com>");

        let events = drain(&mut harness.events);
        let violation = events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::Violation { finding } => Some(finding),
                _ => None,
            })
            .expect("violation event");
        assert!(violation.id.is_some());
        assert_eq!(violation.account_id, AccountId::new(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_stops_with_error_event() {
        let mut harness = spawn(vec![Err(MailboxError::AuthFailure(
            "invalid credentials".to_string(),
        ))]);

        let exit = harness.task.await.unwrap();
        assert_eq!(exit, ExitReason::Fatal);
        assert_eq!(harness.status.snapshot().state, MonitorState::Stopped);

        let events = drain(&mut harness.events);
        let error = events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::Error { message, .. } => Some(message.clone()),
                _ => None,
            })
            .expect("error event");
        assert!(error.contains("authentication failed"));
        assert!(matches!(
            events.last(),
            Some(MonitorEvent::Status {
                state: MonitorState::Stopped,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credential_is_fatal() {
        let fetcher = Arc::new(ScriptedFetcher::new(Vec::new()));
        let hub = Arc::new(NotificationHub::new());
        let deps = MonitorDeps {
            fetcher: fetcher.clone(),
            credentials: Arc::new(MemoryCredentialStore::new()),
            store: Arc::new(MemoryViolationStore::new()),
            classifier: Arc::new(Classifier::new().unwrap()),
            hub,
        };
        let (_stop, stop_rx) = watch::channel(false);

        let exit = run_monitor(account(), config(), deps, StatusCell::default(), stop_rx).await;

        assert_eq!(exit, ExitReason::Fatal);
        assert!(fetcher.checkpoints().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_keeps_running_and_recovers() {
        let mut harness = spawn(vec![
            Err(MailboxError::Timeout(Duration::from_secs(30))),
            Ok(vec![message(3, "Lunch", "Pizza at noon?")]),
        ]);

        // Let the retry tick fire, then stop.
        tokio::time::sleep(Duration::from_secs(61)).await;
        harness.stop.send(true).unwrap();
        let exit = harness.task.await.unwrap();

        assert_eq!(exit, ExitReason::Stopped);
        assert_eq!(harness.fetcher.checkpoints().len(), 2);
        let status = harness.status.snapshot();
        assert_eq!(status.error_count, 0);

        let events = drain(&mut harness.events);
        let errors = events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::Error { .. }))
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_advances_after_full_cycle() {
        let date = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let harness = spawn(vec![Ok(vec![
            message(11, "One", "hello"),
            message(14, "Two", "world"),
        ])]);

        tokio::time::sleep(Duration::from_secs(61)).await;
        harness.stop.send(true).unwrap();
        harness.task.await.unwrap();

        let checkpoints = harness.fetcher.checkpoints();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0], Checkpoint::default());
        assert_eq!(checkpoints[1].last_uid, Some(14));
        assert_eq!(checkpoints[1].last_seen, Some(date));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_leaves_checkpoint_alone() {
        let harness = spawn(vec![Ok(Vec::new())]);

        harness.stop.send(true).unwrap();
        harness.task.await.unwrap();

        assert_eq!(harness.status.snapshot().checkpoint, Checkpoint::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetched_message_stored_once() {
        // A fetcher that ignores the checkpoint and serves the same
        // threat twice, as a day-granular date fallback can.
        let threat = message(21, "Watch out", "I will hurt you.");
        let harness = spawn(vec![Ok(vec![threat.clone()]), Ok(vec![threat])]);

        tokio::time::sleep(Duration::from_secs(61)).await;
        harness.stop.send(true).unwrap();
        harness.task.await.unwrap();

        assert_eq!(harness.fetcher.checkpoints().len(), 2);
        let stored = harness
            .store
            .list_by_account(AccountId::new(1), 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_runs_before_any_sleep() {
        let harness = spawn(vec![Ok(Vec::new())]);

        // Stop was never signalled yet; the first cycle must still have
        // happened without advancing the clock.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(harness.fetcher.checkpoints().len(), 1);

        harness.stop.send(true).unwrap();
        harness.task.await.unwrap();
    }
}
