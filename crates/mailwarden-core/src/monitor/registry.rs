//! Monitor lifecycle management.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::account::{Account, AccountId};
use crate::monitor::config::MonitoringConfig;
use crate::monitor::state::{MonitorState, MonitorStatus, StatusCell};
use crate::monitor::task::{ExitReason, MonitorDeps, run_monitor};

/// How long `stop` waits for an in-flight tick before aborting the
/// task. Slightly above the per-step mailbox timeout so a hung fetch
/// surfaces there first.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(35);

struct MonitorEntry {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    status: StatusCell,
    /// Identifies this spawn generation, so a stale self-removal cannot
    /// evict a replacement monitor.
    generation: Arc<()>,
}

type MonitorMap = Arc<Mutex<HashMap<AccountId, MonitorEntry>>>;

/// Spawns and supervises one monitor task per account.
///
/// A single async mutex serializes `start` and `stop`, so concurrent
/// calls for the same account settle on exactly one live monitor
/// running the most recent config.
pub struct MonitorRegistry {
    deps: MonitorDeps,
    monitors: MonitorMap,
}

impl MonitorRegistry {
    /// Creates an empty registry over the shared services.
    #[must_use]
    pub fn new(deps: MonitorDeps) -> Self {
        Self {
            deps,
            monitors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts monitoring an account, first stopping any monitor already
    /// registered for it. Returns once the new task is registered; the
    /// first poll cycle runs on that task immediately.
    pub async fn start(&self, account: Account, config: MonitoringConfig) {
        let account_id = config.account_id;
        let mut monitors = self.monitors.lock().await;
        if let Some(entry) = monitors.remove(&account_id) {
            debug!(%account_id, "replacing existing monitor");
            drain(account_id, entry).await;
        }

        let status = StatusCell::default();
        let (stop, stop_rx) = watch::channel(false);
        let generation = Arc::new(());
        let task = tokio::spawn(supervise(
            account,
            config,
            self.deps.clone(),
            status.clone(),
            stop_rx,
            Arc::clone(&self.monitors),
            Arc::clone(&generation),
        ));
        monitors.insert(
            account_id,
            MonitorEntry {
                stop,
                task,
                status,
                generation,
            },
        );
    }

    /// Stops and deregisters the monitor for an account, waiting for an
    /// in-flight poll cycle to finish. No-op when the account has no
    /// monitor.
    pub async fn stop(&self, account_id: AccountId) {
        let mut monitors = self.monitors.lock().await;
        if let Some(entry) = monitors.remove(&account_id) {
            drain(account_id, entry).await;
        } else {
            debug!(%account_id, "no monitor to stop");
        }
    }

    /// Stops every registered monitor. Used on shutdown.
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.lock().await;
        for (account_id, entry) in monitors.drain() {
            drain(account_id, entry).await;
        }
    }

    /// Current status of an account's monitor, `None` when it has none.
    pub async fn get(&self, account_id: AccountId) -> Option<MonitorStatus> {
        let monitors = self.monitors.lock().await;
        monitors
            .get(&account_id)
            .map(|entry| entry.status.snapshot())
    }

    /// Number of registered monitors.
    pub async fn active_count(&self) -> usize {
        self.monitors.lock().await.len()
    }
}

/// Runs the monitor and, when it dies of a fatal account error,
/// deregisters it.
async fn supervise(
    account: Account,
    config: MonitoringConfig,
    deps: MonitorDeps,
    status: StatusCell,
    stop: watch::Receiver<bool>,
    monitors: MonitorMap,
    generation: Arc<()>,
) {
    let account_id = config.account_id;
    let exit = run_monitor(account, config, deps, status, stop).await;
    if exit == ExitReason::Fatal {
        // Deregistration gets its own task. A concurrent `stop` may be
        // draining this one while holding the registry lock.
        tokio::spawn(async move {
            let mut monitors = monitors.lock().await;
            let current = monitors
                .get(&account_id)
                .is_some_and(|entry| Arc::ptr_eq(&entry.generation, &generation));
            if current {
                monitors.remove(&account_id);
                info!(%account_id, "removed disabled monitor");
            }
        });
    }
}

/// Signals a monitor to stop and waits for it, bounded by
/// [`STOP_DRAIN_TIMEOUT`].
async fn drain(account_id: AccountId, entry: MonitorEntry) {
    entry.status.set_state(MonitorState::Stopping);
    // The send fails when the task already exited on its own.
    if entry.stop.send(true).is_err() {
        debug!(%account_id, "monitor already exited");
    }

    let mut task = entry.task;
    match tokio::time::timeout(STOP_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(())) => debug!(%account_id, "monitor drained"),
        Ok(Err(e)) => warn!(%account_id, "monitor task failed: {e}"),
        Err(_) => {
            warn!(%account_id, "monitor ignored stop for {STOP_DRAIN_TIMEOUT:?}, aborting");
            task.abort();
        }
    }
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
    use async_trait::async_trait;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;
    use crate::account::{Credential, CredentialStore, ImapEndpoint, MemoryCredentialStore};
    use crate::classify::Classifier;
    use crate::findings::MemoryViolationStore;
    use crate::mailbox::{MailFetcher, MailboxError, MailboxProbe, RawMessage};
    use crate::monitor::config::{Category, ChannelKind, PollFrequency, Sensitivity};
    use crate::monitor::state::Checkpoint;
    use crate::notify::{MonitorEvent, NotificationHub};

    /// Always finds an empty mailbox.
    struct IdleFetcher;

    #[async_trait]
    impl MailFetcher for IdleFetcher {
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
            _checkpoint: &Checkpoint,
            _limit: usize,
        ) -> Result<Vec<RawMessage>, MailboxError> {
            Ok(Vec::new())
        }

        async fn fetch_recent(
            &self,
            _endpoint: &ImapEndpoint,
            _credential: &Credential,
            _limit: usize,
        ) -> Result<Vec<RawMessage>, MailboxError> {
            Ok(Vec::new())
        }
    }

    /// Rejects every login.
    struct RejectingFetcher;

    #[async_trait]
    impl MailFetcher for RejectingFetcher {
        async fn test_connection(
            &self,
            _endpoint: &ImapEndpoint,
            _credential: &Credential,
        ) -> Result<MailboxProbe, MailboxError> {
            Err(MailboxError::AuthFailure("bad password".to_string()))
        }

        async fn fetch_unseen(
            &self,
            _endpoint: &ImapEndpoint,
            _credential: &Credential,
            _checkpoint: &Checkpoint,
            _limit: usize,
        ) -> Result<Vec<RawMessage>, MailboxError> {
            Err(MailboxError::AuthFailure("bad password".to_string()))
        }

        async fn fetch_recent(
            &self,
            _endpoint: &ImapEndpoint,
            _credential: &Credential,
            _limit: usize,
        ) -> Result<Vec<RawMessage>, MailboxError> {
            Err(MailboxError::AuthFailure("bad password".to_string()))
        }
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

    fn registry(
        fetcher: Arc<dyn MailFetcher>,
    ) -> (MonitorRegistry, UnboundedReceiver<MonitorEvent>) {
        let hub = Arc::new(NotificationHub::new());
        let (sender, events) = unbounded_channel();
        hub.register(AccountId::new(1), sender);

        let credentials = MemoryCredentialStore::with_credential(
            AccountId::new(1),
            Credential::new("hunter2"),
        );
        credentials
            .put(AccountId::new(2), &Credential::new("hunter2"))
            .unwrap();

        let deps = MonitorDeps {
            fetcher,
            credentials: Arc::new(credentials),
            store: Arc::new(MemoryViolationStore::new()),
            classifier: Arc::new(Classifier::new().unwrap()),
            hub,
        };
        (MonitorRegistry::new(deps), events)
    }

    /// Lets spawned tasks run to their next await point.
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_registers_and_reports_running() {
        let (registry, _events) = registry(Arc::new(IdleFetcher));

        registry.start(account(), config()).await;
        assert!(registry.get(AccountId::new(1)).await.is_some());
        assert_eq!(registry.active_count().await, 1);

        settle().await;
        let status = registry.get(AccountId::new(1)).await.unwrap();
        assert_eq!(status.state, MonitorState::Running);
        assert_eq!(status.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_deregisters_and_tolerates_absent() {
        let (registry, _events) = registry(Arc::new(IdleFetcher));

        registry.start(account(), config()).await;
        registry.stop(AccountId::new(1)).await;

        assert!(registry.get(AccountId::new(1)).await.is_none());
        assert_eq!(registry.active_count().await, 0);

        // Stopping again must be a quiet no-op.
        registry.stop(AccountId::new(1)).await;
        registry.stop(AccountId::new(99)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_monitor() {
        let (registry, mut events) = registry(Arc::new(IdleFetcher));

        registry.start(account(), config()).await;
        settle().await;
        registry.start(account(), config()).await;
        settle().await;

        assert_eq!(registry.active_count().await, 1);

        let mut started = 0;
        let mut stopped = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                MonitorEvent::Status {
                    state: MonitorState::Running,
                    ..
                } => started += 1,
                MonitorEvent::Status {
                    state: MonitorState::Stopped,
                    ..
                } => stopped += 1,
                _ => {}
            }
        }
        assert_eq!(started, 2);
        assert_eq!(stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_starts_leave_one_monitor() {
        let (registry, _events) = registry(Arc::new(IdleFetcher));

        tokio::join!(
            registry.start(account(), config()),
            registry.start(account(), config()),
        );
        settle().await;

        assert_eq!(registry.active_count().await, 1);
        let status = registry.get(AccountId::new(1)).await.unwrap();
        assert_eq!(status.state, MonitorState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_self_removes() {
        let (registry, mut events) = registry(Arc::new(RejectingFetcher));

        registry.start(account(), config()).await;
        settle().await;

        assert!(registry.get(AccountId::new(1)).await.is_none());
        assert_eq!(registry.active_count().await, 0);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let MonitorEvent::Error { message, .. } = event {
                assert!(message.contains("authentication failed"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_clears_registry() {
        let (registry, _events) = registry(Arc::new(IdleFetcher));

        let mut other = Account::with_email("second@example.com");
        other.id = Some(AccountId::new(2));
        let mut other_config = config();
        other_config.account_id = AccountId::new(2);

        registry.start(account(), config()).await;
        registry.start(other, other_config).await;
        assert_eq!(registry.active_count().await, 2);

        registry.stop_all().await;
        assert_eq!(registry.active_count().await, 0);
    }
}
