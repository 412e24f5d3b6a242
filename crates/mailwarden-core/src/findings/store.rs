//! Finding storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::model::{Finding, FindingId, FindingStatus};
use crate::Result;
use crate::account::AccountId;
use crate::classify::Severity;

/// Where monitors record detected violations.
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Persists a finding, returning its ID. Saving the same
    /// (account, message) pair again returns the existing ID without
    /// creating a second row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn save(&self, finding: &Finding) -> Result<FindingId>;

    /// Returns up to `limit` findings for one account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn list_by_account(&self, account_id: AccountId, limit: usize) -> Result<Vec<Finding>>;
}

/// SQLite-backed [`ViolationStore`].
pub struct SqliteViolationStore {
    pool: SqlitePool,
}

impl SqliteViolationStore {
    /// Create a store at the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                message_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                sender TEXT NOT NULL,
                snippet TEXT NOT NULL,
                severity TEXT NOT NULL,
                confidence REAL NOT NULL,
                matches TEXT NOT NULL,
                annotations TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                detected_at TEXT NOT NULL,
                UNIQUE(account_id, message_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_findings_account_detected
            ON findings(account_id, detected_at DESC)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn existing_id(&self, account_id: AccountId, message_id: &str) -> Result<FindingId> {
        let row = sqlx::query("SELECT id FROM findings WHERE account_id = ? AND message_id = ?")
            .bind(account_id.0)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(FindingId::new(row.get("id")))
    }
}

#[async_trait]
impl ViolationStore for SqliteViolationStore {
    async fn save(&self, finding: &Finding) -> Result<FindingId> {
        let matches = serde_json::to_string(&finding.matches)?;
        let annotations = serde_json::to_string(&finding.annotations)?;

        let result = sqlx::query(
            r"
            INSERT INTO findings (
                account_id, message_id, subject, sender, snippet,
                severity, confidence, matches, annotations, status, detected_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, message_id) DO NOTHING
            ",
        )
        .bind(finding.account_id.0)
        .bind(&finding.message_id)
        .bind(&finding.subject)
        .bind(&finding.sender)
        .bind(&finding.snippet)
        .bind(finding.severity.as_str())
        .bind(finding.confidence)
        .bind(&matches)
        .bind(&annotations)
        .bind(finding.status.as_str())
        .bind(finding.detected_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // The UNIQUE constraint swallowed the insert; hand back the row
            // that already covers this message.
            return self
                .existing_id(finding.account_id, &finding.message_id)
                .await;
        }
        Ok(FindingId::new(result.last_insert_rowid()))
    }

    async fn list_by_account(&self, account_id: AccountId, limit: usize) -> Result<Vec<Finding>> {
        let rows = sqlx::query(
            r"
            SELECT id, account_id, message_id, subject, sender, snippet,
                   severity, confidence, matches, annotations, status, detected_at
            FROM findings
            WHERE account_id = ?
            ORDER BY detected_at DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(account_id.0)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_finding).collect())
    }
}

/// Convert a database row to a Finding. Rows with unreadable JSON or
/// timestamps are dropped rather than failing the whole listing.
fn row_to_finding(row: &sqlx::sqlite::SqliteRow) -> Option<Finding> {
    let detected_at: String = row.get("detected_at");
    let matches: String = row.get("matches");
    let annotations: String = row.get("annotations");

    Some(Finding {
        id: Some(FindingId::new(row.get("id"))),
        account_id: AccountId::new(row.get("account_id")),
        message_id: row.get("message_id"),
        subject: row.get("subject"),
        sender: row.get("sender"),
        snippet: row.get("snippet"),
        severity: Severity::parse(row.get("severity")),
        confidence: row.get("confidence"),
        matches: serde_json::from_str(&matches).ok()?,
        annotations: serde_json::from_str(&annotations).ok()?,
        status: FindingStatus::parse(row.get("status")),
        detected_at: DateTime::parse_from_rfc3339(&detected_at)
            .ok()?
            .with_timezone(&Utc),
    })
}

/// In-memory [`ViolationStore`] for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryViolationStore {
    inner: std::sync::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    rows: Vec<Finding>,
}

impl MemoryViolationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViolationStore for MemoryViolationStore {
    async fn save(&self, finding: &Finding) -> Result<FindingId> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(existing) = inner.rows.iter().find(|f| {
            f.account_id == finding.account_id && f.message_id == finding.message_id
        }) && let Some(id) = existing.id
        {
            return Ok(id);
        }

        inner.next_id += 1;
        let id = FindingId::new(inner.next_id);
        let mut stored = finding.clone();
        stored.id = Some(id);
        inner.rows.push(stored);
        Ok(id)
    }

    async fn list_by_account(&self, account_id: AccountId, limit: usize) -> Result<Vec<Finding>> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut rows: Vec<Finding> = inner
            .rows
            .iter()
            .filter(|f| f.account_id == account_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::classify::CategoryMatch;
    use crate::monitor::config::Category;

    fn finding(account: i64, message_id: &str, detected_at: DateTime<Utc>) -> Finding {
        Finding {
            id: None,
            account_id: AccountId::new(account),
            message_id: message_id.to_string(),
            subject: "Final warning".to_string(),
            sender: "sender@example.com".to_string(),
            snippet: "I will kill you if you don't listen".to_string(),
            severity: Severity::High,
            confidence: 0.9,
            matches: vec![CategoryMatch {
                category: Category::Threats,
                phrase: "i will kill you".to_string(),
                context: "i will kill you if you don't listen".to_string(),
                severity: Severity::High,
                confidence: 0.9,
            }],
            annotations: Vec::new(),
            status: FindingStatus::New,
            detected_at,
        }
    }

    #[tokio::test]
    async fn test_save_and_list_roundtrip() {
        let store = SqliteViolationStore::in_memory().await.unwrap();
        let saved_id = store.save(&finding(1, "<a@x>", Utc::now())).await.unwrap();

        let listed = store.list_by_account(AccountId::new(1), 10).await.unwrap();
        assert_eq!(listed.len(), 1);

        let row = &listed[0];
        assert_eq!(row.id, Some(saved_id));
        assert_eq!(row.subject, "Final warning");
        assert_eq!(row.severity, Severity::High);
        assert_eq!(row.confidence, 0.9);
        assert_eq!(row.matches.len(), 1);
        assert_eq!(row.matches[0].category, Category::Threats);
        assert_eq!(row.status, FindingStatus::New);
    }

    #[tokio::test]
    async fn test_duplicate_save_returns_same_id() {
        let store = SqliteViolationStore::in_memory().await.unwrap();

        let first = store.save(&finding(1, "<a@x>", Utc::now())).await.unwrap();
        let second = store.save(&finding(1, "<a@x>", Utc::now())).await.unwrap();

        assert_eq!(first, second);
        let listed = store.list_by_account(AccountId::new(1), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_limited() {
        let store = SqliteViolationStore::in_memory().await.unwrap();
        let base = Utc::now();

        for (i, message_id) in ["<a@x>", "<b@x>", "<c@x>"].iter().enumerate() {
            let at = base + chrono::Duration::minutes(i64::try_from(i).unwrap());
            store.save(&finding(1, message_id, at)).await.unwrap();
        }

        let listed = store.list_by_account(AccountId::new(1), 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message_id, "<c@x>");
        assert_eq!(listed[1].message_id, "<b@x>");
    }

    #[tokio::test]
    async fn test_list_filters_by_account() {
        let store = SqliteViolationStore::in_memory().await.unwrap();
        store.save(&finding(1, "<a@x>", Utc::now())).await.unwrap();
        store.save(&finding(2, "<b@x>", Utc::now())).await.unwrap();

        let listed = store.list_by_account(AccountId::new(2), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_id, "<b@x>");
    }

    #[tokio::test]
    async fn test_same_message_different_accounts_both_saved() {
        let store = SqliteViolationStore::in_memory().await.unwrap();

        let first = store.save(&finding(1, "<a@x>", Utc::now())).await.unwrap();
        let second = store.save(&finding(2, "<a@x>", Utc::now())).await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_memory_store_deduplicates() {
        let store = MemoryViolationStore::new();

        let first = store.save(&finding(1, "<a@x>", Utc::now())).await.unwrap();
        let second = store.save(&finding(1, "<a@x>", Utc::now())).await.unwrap();

        assert_eq!(first, second);
        let listed = store.list_by_account(AccountId::new(1), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, Some(first));
    }
}
