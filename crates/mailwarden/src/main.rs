//! `MailWarden` - headless mailbox monitoring daemon.
//!
//! Polls configured accounts over IMAP, classifies new mail for policy
//! violations, persists findings, and logs pushed monitor events.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Arg, Command};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailwarden_core::{
    Classifier, Credential, CredentialStore, HttpVisionClassifier, ImapMailboxClient,
    KeyringCredentialStore, MailFetcher, MailboxProbe, MonitorDeps, MonitorEvent, MonitorRegistry,
    NotificationHub, SqliteViolationStore,
};

use config::{AccountEntry, DaemonConfig};

/// Messages shown by `--recent`.
const RECENT_COUNT: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailwarden=debug,mailwarden_core=debug,mailwarden_imap=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = Command::new("mailwarden")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Mailbox monitoring daemon that detects policy-violating messages")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("probe")
                .long("probe")
                .value_name("EMAIL")
                .help("Test one account's mailbox connectivity, then exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("recent")
                .long("recent")
                .value_name("EMAIL")
                .help("Print one account's newest messages, then exit")
                .action(clap::ArgAction::Set),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map_or_else(config::default_path, PathBuf::from);
    let config = config::load(&config_path).await?;
    info!(path = %config_path.display(), accounts = config.accounts.len(), "config loaded");

    if let Some(email) = matches.get_one::<String>("probe") {
        return probe(&config, email).await;
    }
    if let Some(email) = matches.get_one::<String>("recent") {
        return show_recent(&config, email).await;
    }
    run(config).await
}

/// Starts a monitor per active account and runs until interrupted.
async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let database = config
        .database
        .clone()
        .unwrap_or_else(config::default_database_path);
    if let Some(parent) = database.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let database = database
        .to_str()
        .context("database path is not valid UTF-8")?;
    let store = SqliteViolationStore::new(database).await?;

    let credentials = seeded_credentials(&config)?;
    let classifier = match &config.vision {
        Some(vision) => {
            info!(endpoint = %vision.endpoint, "vision classifier enabled");
            let client = HttpVisionClassifier::new(&vision.endpoint, vision.api_key.clone())?;
            Classifier::with_vision(Arc::new(client))?
        }
        None => Classifier::new()?,
    };

    let hub = Arc::new(NotificationHub::new());
    let registry = MonitorRegistry::new(MonitorDeps {
        fetcher: Arc::new(ImapMailboxClient::new()),
        credentials,
        store: Arc::new(store),
        classifier: Arc::new(classifier),
        hub: Arc::clone(&hub),
    });

    let mut started = 0usize;
    for entry in &config.accounts {
        if !entry.monitoring.active {
            info!(email = %entry.email, "monitoring disabled");
            continue;
        }
        let (sender, events) = unbounded_channel();
        hub.register(entry.account_id(), sender);
        tokio::spawn(log_events(entry.email.clone(), events));
        registry
            .start(entry.to_account(), entry.monitoring.to_config(entry.account_id()))
            .await;
        started += 1;
    }
    if started == 0 {
        warn!("no active accounts configured");
    }
    info!(monitors = started, "mailwarden running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutting down");
    registry.stop_all().await;
    Ok(())
}

/// Logs every event one account's monitor pushes.
async fn log_events(email: String, mut events: UnboundedReceiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            MonitorEvent::Violation { finding } => {
                warn!(
                    account = %email,
                    severity = finding.severity.as_str(),
                    confidence = finding.confidence,
                    sender = %finding.sender,
                    subject = %finding.subject,
                    "violation detected"
                );
            }
            MonitorEvent::Error { message, .. } => {
                error!(account = %email, "{message}");
            }
            MonitorEvent::Status { state, .. } => {
                info!(account = %email, state = %state, "monitor state");
            }
        }
    }
}

/// Tests connectivity for one configured account. Exits non-zero when
/// the mailbox is unreachable.
async fn probe(config: &DaemonConfig, email: &str) -> anyhow::Result<()> {
    let entry = find_account(config, email)?;
    let credential = credential_for(config, entry)?;

    let fetcher = ImapMailboxClient::new();
    let result = match fetcher.test_connection(&entry.imap, &credential).await {
        Ok(result) => result,
        Err(e) => {
            warn!(account = %entry.email, "probe failed: {e}");
            MailboxProbe::unreachable()
        }
    };

    if result.reachable {
        println!(
            "{}: reachable, {} messages ({} unseen)",
            entry.email, result.total_count, result.unseen_count
        );
        Ok(())
    } else {
        anyhow::bail!("{} is unreachable", entry.email)
    }
}

/// Prints the newest messages for one configured account.
async fn show_recent(config: &DaemonConfig, email: &str) -> anyhow::Result<()> {
    let entry = find_account(config, email)?;
    let credential = credential_for(config, entry)?;

    let fetcher = ImapMailboxClient::new();
    let messages = fetcher
        .fetch_recent(&entry.imap, &credential, RECENT_COUNT)
        .await?;

    if messages.is_empty() {
        println!("{}: no messages", entry.email);
        return Ok(());
    }
    for message in messages {
        let date = message
            .date
            .map_or_else(|| "unknown date".to_string(), |d| d.to_rfc2822());
        println!("{:>6}  {}  {}  {}", message.uid, date, message.from, message.subject);
    }
    Ok(())
}

/// Keyring-backed store with any inline config passwords seeded in.
fn seeded_credentials(config: &DaemonConfig) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let store = KeyringCredentialStore::new();
    for entry in &config.accounts {
        if let Some(password) = &entry.password {
            store
                .put(entry.account_id(), &Credential::new(password.clone()))
                .with_context(|| format!("storing credential for {}", entry.email))?;
        }
    }
    Ok(Arc::new(store))
}

/// Resolves one account's credential for the one-shot modes.
fn credential_for(config: &DaemonConfig, entry: &AccountEntry) -> anyhow::Result<Credential> {
    if let Some(password) = &entry.password {
        return Ok(Credential::new(password.clone()));
    }
    KeyringCredentialStore::new()
        .get(entry.account_id())?
        .with_context(|| format!("no credential stored for {}", entry.email))
}

/// Looks up a configured account by address.
fn find_account<'a>(config: &'a DaemonConfig, email: &str) -> anyhow::Result<&'a AccountEntry> {
    config
        .accounts
        .iter()
        .find(|entry| entry.email.eq_ignore_ascii_case(email))
        .with_context(|| format!("no account {email} in config"))
}
