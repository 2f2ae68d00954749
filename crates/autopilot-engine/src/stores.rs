//! Boundary adapters for the bookkeeping collaborators
//!
//! The agent reads ledger snapshots and appends notification records. It owns
//! neither store; these traits are the whole of what it needs from them.

use async_trait::async_trait;
use autopilot_core::{
    AutopilotError, LedgerRecord, LedgerSnapshot, NewNotice, NoticeRecord, NoticeStatus, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Read-only access to the sales and purchase ledgers
#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn invoices(&self) -> Result<LedgerSnapshot>;

    async fn expenses(&self) -> Result<LedgerSnapshot>;
}

/// Append-only access to the notification store
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Store a new record as Pending and return it with its id
    async fn append(&self, notice: NewNotice) -> Result<NoticeRecord>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    invoices: Vec<LedgerRecord>,
    #[serde(default)]
    expenses: Vec<LedgerRecord>,
}

/// Ledger read from `{ "invoices": [...], "expenses": [...] }`
#[derive(Debug, Clone)]
pub struct JsonLedger {
    path: PathBuf,
}

impl JsonLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<LedgerFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AutopilotError::Store(format!("Malformed ledger {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ledger at {}, treating as empty", self.path.display());
                Ok(LedgerFile::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LedgerSource for JsonLedger {
    async fn invoices(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot::from_records(self.load().await?.invoices))
    }

    async fn expenses(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot::from_records(self.load().await?.expenses))
    }
}

/// In-memory ledger
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    invoices: Vec<LedgerRecord>,
    expenses: Vec<LedgerRecord>,
}

impl MemoryLedger {
    pub fn new(invoices: Vec<LedgerRecord>, expenses: Vec<LedgerRecord>) -> Self {
        Self { invoices, expenses }
    }
}

#[async_trait]
impl LedgerSource for MemoryLedger {
    async fn invoices(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot::from_records(self.invoices.clone()))
    }

    async fn expenses(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot::from_records(self.expenses.clone()))
    }
}

fn next_record(existing: &[NoticeRecord], notice: NewNotice) -> NoticeRecord {
    let id = existing.iter().map(|r| r.id).max().unwrap_or(0) + 1;
    NoticeRecord {
        id,
        date: notice.date,
        notice_type: notice.notice_type,
        description: notice.description,
        action_required: notice.action_required,
        status: NoticeStatus::Pending,
    }
}

/// Notification records kept as a JSON array file
#[derive(Debug)]
pub struct JsonNotificationStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonNotificationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load_all(&self) -> Result<Vec<NoticeRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AutopilotError::Store(format!(
                    "Malformed notification store {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl NotificationSink for JsonNotificationStore {
    async fn append(&self, notice: NewNotice) -> Result<NoticeRecord> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load_all().await?;
        let record = next_record(&records, notice);
        records.push(record.clone());

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&records)?).await?;

        info!("Notification {} stored: {}", record.id, record.description);
        Ok(record)
    }
}

/// In-memory notification store
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    records: Mutex<Vec<NoticeRecord>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NoticeRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationStore {
    async fn append(&self, notice: NewNotice) -> Result<NoticeRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = next_record(&records, notice);
        records.push(record.clone());
        Ok(record)
    }
}
