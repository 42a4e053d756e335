use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use habitor_core::config::SyncConfig;
use habitor_core::connectivity::{ConnectivityMonitor, ConnectivityProbe, TcpProbe};
use habitor_core::db::SqliteLocalStore;
use habitor_core::identity::{AccountIdentity, SessionIdentity};
use habitor_core::remote::{HttpRemoteStore, RemoteStore, UnconfiguredRemote};
use habitor_core::sync::{ConflictResolver, RecordRepository, SyncContext, SyncCoordinator};
use habitor_core::{LocalId, Record};
use serde::Serialize;

use crate::error::CliError;

/// Everything one CLI invocation needs, wired to the local database
pub struct App {
    pub store: Arc<SqliteLocalStore>,
    pub identity: Arc<SessionIdentity>,
    pub connectivity: ConnectivityMonitor,
    pub config: SyncConfig,
    pub repo: RecordRepository,
    pub coordinator: Arc<SyncCoordinator>,
    pub resolver: ConflictResolver,
}

impl App {
    pub async fn open(db_path: &Path, config_path: Option<&Path>) -> Result<Self, CliError> {
        let config = SyncConfig::load(config_path)?;
        let store = Arc::new(SqliteLocalStore::open(db_path)?);
        let identity = Arc::new(
            SessionIdentity::new(store.device_id()?).with_account(store.stored_account()?),
        );

        let (remote, online): (Arc<dyn RemoteStore>, bool) = match config.remote_url.as_deref() {
            Some(url) => {
                let remote = HttpRemoteStore::new(url, config.request_timeout())?;
                let online = match config.probe_address.as_deref() {
                    Some(address) => {
                        TcpProbe::new(address, config.request_timeout())
                            .check()
                            .await
                    }
                    None => true,
                };
                (Arc::new(remote), online)
            }
            None => (Arc::new(UnconfiguredRemote), false),
        };
        tracing::debug!(
            "Opened {} (remote: {}, online: {online})",
            db_path.display(),
            remote.name()
        );

        let connectivity = ConnectivityMonitor::new(online);
        let ctx = SyncContext::new(
            store.clone(),
            remote,
            connectivity.clone(),
            identity.clone(),
        );
        let coordinator = Arc::new(SyncCoordinator::new(ctx.clone()));
        let resolver = ConflictResolver::new(ctx.clone(), coordinator.gate());
        let repo = RecordRepository::new(ctx);

        Ok(Self {
            store,
            identity,
            connectivity,
            config,
            repo,
            coordinator,
            resolver,
        })
    }

    /// Let background remote writes finish before the process exits
    pub async fn finish(&self) {
        self.repo.wait_for_remote_writes().await;
    }

    pub fn require_sync(&self) -> Result<(), CliError> {
        if !self.config.sync_configured() {
            return Err(CliError::SyncNotConfigured);
        }
        if !self.identity.is_authenticated() {
            return Err(CliError::NotSignedIn);
        }
        Ok(())
    }

    pub fn find_record(&self, id: &str) -> Result<Record, CliError> {
        let local_id = parse_local_id(id)?;
        self.repo
            .get(local_id)?
            .ok_or_else(|| CliError::HabitNotFound(id.trim().to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: i64,
    pub name: String,
    pub note: String,
    pub remote_key: Option<String>,
    pub synced: bool,
    pub deleted: bool,
    pub last_synced_at: i64,
    pub last_synced_at_iso: Option<String>,
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    RecordListItem {
        id: record.local_id.get(),
        name: record.name.clone(),
        note: record.details.note.clone(),
        remote_key: record.remote_key.as_ref().map(ToString::to_string),
        synced: record.is_synced(),
        deleted: record.deleted,
        last_synced_at: record.last_synced_at,
        last_synced_at_iso: (record.last_synced_at > 0)
            .then(|| format_sync_timestamp(record.last_synced_at)),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let name = truncate(&record.name, 32);
            let state = if record.is_synced() {
                format!("synced {}", format_relative_time(record.last_synced_at, now_ms))
            } else {
                "local only".to_string()
            };
            format!("{:>5}  {name:<32}  {state}", record.local_id.get())
        })
        .collect()
}

pub fn truncate(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut truncated = collapsed
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Join CLI words into a habit name
pub fn resolve_habit_name(parts: &[String]) -> Result<String, CliError> {
    normalize_name(&parts.join(" ")).ok_or(CliError::EmptyName)
}

pub fn normalize_name(name: &str) -> Option<String> {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub fn parse_local_id(id: &str) -> Result<LocalId, CliError> {
    id.trim()
        .parse::<LocalId>()
        .ok()
        .filter(|local_id| local_id.is_assigned())
        .ok_or_else(|| CliError::InvalidId(id.to_string()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("HABITOR_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("habitor")
        .join("habitor.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> Option<PathBuf> {
    cli_config
        .or_else(|| env::var_os("HABITOR_CONFIG").map(PathBuf::from))
        .or_else(|| dirs::config_dir().map(|dir| dir.join("habitor").join("config.json")))
}
