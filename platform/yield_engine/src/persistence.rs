//! Ledger persistence port and adapters
//!
//! The service owns the in-memory state and hands complete snapshots to a
//! [`StateRepository`] before committing them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::{fs, sync::RwLock};
use tracing::{debug, info};

use crate::{
    ledger::LedgerState,
    typed_errors::{AppError, ErrorContext, ErrorKind, Result},
};

/// State persistence trait
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Persist a full snapshot of the ledger
    async fn save(&self, state: &LedgerState) -> Result<()>;

    /// Load the last saved snapshot, if any
    async fn load(&self) -> Result<Option<LedgerState>>;

    fn name(&self) -> &'static str;
}

/// In-memory persistence (for tests and the `memory` backend)
#[derive(Default)]
pub struct InMemoryRepository {
    snapshot: RwLock<Option<LedgerState>>,
    saves: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LedgerState) -> Self {
        Self {
            snapshot: RwLock::new(Some(state)),
            saves: AtomicU64::new(0),
        }
    }

    /// Number of snapshots written so far
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StateRepository for InMemoryRepository {
    async fn save(&self, state: &LedgerState) -> Result<()> {
        *self.snapshot.write().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load(&self) -> Result<Option<LedgerState>> {
        Ok(self.snapshot.read().await.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Single JSON document on disk, replaced atomically on every save
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn storage_error(&self, operation: &str, message: String) -> AppError {
        AppError::new(
            ErrorKind::Persistence,
            message,
            ErrorContext::new("json_repository", operation)
                .with_metadata("path", serde_json::json!(self.path.display().to_string())),
        )
    }
}

#[async_trait]
impl StateRepository for JsonFileRepository {
    async fn save(&self, state: &LedgerState) -> Result<()> {
        let payload = serde_json::to_vec_pretty(state)
            .map_err(|e| self.storage_error("save", format!("Failed to serialize ledger: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                self.storage_error("save", format!("Failed to create directory: {}", e))
            })?;
        }

        let temp = self.temp_path();
        fs::write(&temp, &payload)
            .await
            .map_err(|e| self.storage_error("save", format!("Failed to write snapshot: {}", e)))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.storage_error("save", format!("Failed to replace snapshot: {}", e)))?;

        debug!(
            path = %self.path.display(),
            version = state.version,
            bytes = payload.len(),
            "Ledger snapshot saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<LedgerState>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(self.storage_error("load", format!("Failed to read snapshot: {}", e)))
            }
        };

        let state: LedgerState = serde_json::from_slice(&content)
            .map_err(|e| self.storage_error("load", format!("Corrupt ledger snapshot: {}", e)))?;

        info!(
            path = %self.path.display(),
            version = state.version,
            investments = state.investments.len(),
            "Ledger snapshot loaded"
        );
        Ok(Some(state))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
