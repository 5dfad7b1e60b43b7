use std::error::Error;
use std::fmt;

use serde::Serialize;

use crate::assets::{fetcher_for_origin, AssetError, AssetWorker, Fetcher, OfflineFetcher};
use crate::config::{Config, ConfigError, TriggerOn};
use crate::listing::{apply_filter, ListFilter};
use crate::notify::{Notification, Notifier};
use crate::share::{self, ShareError};
use crate::store::{Commit, MutationKind, Record, Store, StoreError};
use crate::sync::{
    FlushHandler, RunOutcome, Scheduler, SchedulerError, SqliteScheduler, SyncCoordinator,
    SyncError, SyncStatus, UnsupportedScheduler,
};

pub const DEFAULT_CATEGORY: &str = "Other";

/// Owns the store handle and the sync coordinator. Mutations commit first,
/// then request the deferred flush, then re-read the list.
pub struct App {
    store: Store,
    sync: SyncCoordinator,
    config: Config,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: u64,
    pub skipped: u64,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub pending_changes: u64,
    pub delivered_seq: i64,
}

impl App {
    pub fn open(db_path: &str, config: Config) -> Result<Self, AppError> {
        let store = Store::open(db_path)?;
        let scheduler: Box<dyn Scheduler> = if config.sync.background {
            Box::new(SqliteScheduler::open(db_path)?)
        } else {
            Box::new(UnsupportedScheduler)
        };
        let sync = SyncCoordinator::new(scheduler, &config.sync.tag, config.sync.lease());
        Ok(Self {
            store,
            sync,
            config,
        })
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, AppError> {
        Ok(apply_filter(self.store.list_all()?, filter))
    }

    pub fn get(&self, id: i64) -> Result<Option<Record>, AppError> {
        Ok(self.store.get(id)?)
    }

    pub fn add(&mut self, name: &str, category: Option<&str>) -> Result<Vec<Record>, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument(
                "item name must not be empty".to_string(),
            ));
        }
        let category = normalize_category(category);
        let commit = self.store.insert(name, &category)?;
        self.after_commit(&commit);
        Ok(self.store.list_all()?)
    }

    pub fn set_done(&mut self, id: i64, done: bool) -> Result<Vec<Record>, AppError> {
        let commit = self.store.set_done(id, done)?;
        self.after_commit(&commit);
        Ok(self.store.list_all()?)
    }

    pub fn remove(&mut self, id: i64) -> Result<Vec<Record>, AppError> {
        let commit = self.store.remove(id)?;
        self.after_commit(&commit);
        Ok(self.store.list_all()?)
    }

    pub fn share_link(&self, base_url: Option<&str>) -> Result<String, AppError> {
        let base_url = base_url.unwrap_or(&self.config.share.base_url);
        let records = self.store.list_all()?;
        Ok(share::share_link(base_url, &records)?)
    }

    /// Replays a shared list through the insert path. Only names and
    /// categories travel; ids, completion and timestamps are fresh.
    pub fn import(&mut self, input: &str) -> Result<ImportSummary, AppError> {
        let items = share::decode(input)?;
        let mut imported = 0;
        let mut skipped = 0;
        for item in items {
            let name = item.name.trim();
            if name.is_empty() {
                tracing::warn!(category = %item.category, "skipping shared item without a name");
                skipped += 1;
                continue;
            }
            let commit = self
                .store
                .insert(name, &normalize_category(Some(&item.category)))?;
            self.after_commit(&commit);
            imported += 1;
        }
        tracing::info!(imported, skipped, "shared list imported");
        Ok(ImportSummary {
            imported,
            skipped,
            records: self.store.list_all()?,
        })
    }

    /// Runs the registered flush in the foreground, standing in for the
    /// platform scheduler.
    pub fn run_sync(&mut self, notifier: &dyn Notifier) -> Result<RunOutcome, AppError> {
        let notification = Notification::from(&self.config.notification);
        let mut handler = FlushHandler::new(
            &mut self.store,
            notifier,
            notification,
            self.config.sync.flush_delay(),
        );
        Ok(self.sync.run_pending(&mut handler)?)
    }

    pub fn sync_status(&self) -> Result<SyncReport, AppError> {
        Ok(SyncReport {
            status: self.sync.status()?,
            pending_changes: self.store.pending_changes()?.len() as u64,
            delivered_seq: self.store.delivered_seq()?,
        })
    }

    fn after_commit(&self, commit: &Commit) {
        if !commit.applied {
            return;
        }
        let triggers = match self.config.sync.trigger_on {
            TriggerOn::All => true,
            TriggerOn::Insert => commit.kind == MutationKind::Insert,
        };
        if triggers {
            self.sync.request_deferred_flush();
        }
    }
}

/// Opens the intercepting worker for the generation this build deploys.
pub fn open_asset_worker(db_path: &str, config: &Config) -> Result<AssetWorker, AppError> {
    ensure_parent_dir(db_path)?;
    Ok(AssetWorker::open(
        db_path,
        &config.assets.generation,
        config.assets.manifest.clone(),
    )?)
}

/// Network side of the worker. Relative directory origins resolve against
/// `base_dir`.
pub fn network_fetcher(
    config: &Config,
    base_dir: &std::path::Path,
    offline: bool,
) -> Box<dyn Fetcher> {
    if offline {
        return Box::new(OfflineFetcher);
    }
    fetcher_for_origin(
        &config.assets.origin,
        config.assets.fetch_timeout(),
        base_dir,
    )
}

fn ensure_parent_dir(path: &str) -> Result<(), AppError> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn normalize_category(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string()
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(ConfigError),
    Store(StoreError),
    Asset(AssetError),
    Sync(SyncError),
    Share(ShareError),
    InvalidArgument(String),
    VerifyFailed { generation: String, issues: usize },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Json(err) => write!(f, "JSON error: {}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Store(err) => write!(f, "{}", err),
            AppError::Asset(err) => write!(f, "{}", err),
            AppError::Sync(err) => write!(f, "sync error: {}", err),
            AppError::Share(err) => write!(f, "share error: {}", err),
            AppError::InvalidArgument(message) => write!(f, "{}", message),
            AppError::VerifyFailed { generation, issues } => write!(
                f,
                "cache generation '{}' failed verification with {} issue(s)",
                generation, issues
            ),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Json(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Asset(err) => Some(err),
            AppError::Sync(err) => Some(err),
            AppError::Share(err) => Some(err),
            AppError::InvalidArgument(_) => None,
            AppError::VerifyFailed { .. } => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::Json(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::Store(value)
    }
}

impl From<AssetError> for AppError {
    fn from(value: AssetError) -> Self {
        AppError::Asset(value)
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        AppError::Sync(value)
    }
}

impl From<SchedulerError> for AppError {
    fn from(value: SchedulerError) -> Self {
        AppError::Sync(SyncError::Scheduler(value))
    }
}

impl From<ShareError> for AppError {
    fn from(value: ShareError) -> Self {
        AppError::Share(value)
    }
}
