//! Proxy-granting ticket registry.
//!
//! The CAS server delivers each PGT to the proxy callback under an opaque IOU before
//! it answers the validation request. The application later finds the PGT by the IOU
//! carried in the validation response. Records are written once and never updated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocket::tokio::fs::{self, OpenOptions};
use rocket::tokio::io::AsyncWriteExt;
use rocket::tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CasResult, RegistryError};
use crate::validator::CasValidator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgtIouRecord {
    pub pgt_iou: String,
    pub pgt: String,
    pub created: DateTime<Utc>,
}

impl PgtIouRecord {
    pub fn new(pgt_iou: impl Into<String>, pgt: impl Into<String>) -> Self {
        PgtIouRecord {
            pgt_iou: pgt_iou.into(),
            pgt: pgt.into(),
            created: Utc::now(),
        }
    }
}

#[async_trait]
pub trait PgtRegistry: Send + Sync {
    /// Stores a new record. A second record for the same IOU is refused.
    async fn create(&self, record: PgtIouRecord) -> Result<(), RegistryError>;

    async fn lookup(&self, pgt_iou: &str) -> Result<Option<String>, RegistryError>;

    /// Removes records older than `age`, returning how many were dropped.
    async fn purge_older_than(&self, age: Duration) -> Result<usize, RegistryError>;
}

/// Handles an inbound proxy callback. Returns whether a record was stored.
///
/// A callback without both values is a no-op: CAS servers hit the callback URL
/// before sending real tickets.
pub async fn record_callback(registry: &dyn PgtRegistry, pgt_iou: Option<&str>, pgt: Option<&str>) -> bool {
    let (Some(pgt_iou), Some(pgt)) = (
        pgt_iou.filter(|iou| !iou.is_empty()),
        pgt.filter(|pgt| !pgt.is_empty()),
    ) else {
        tracing::debug!("proxy callback without pgtIou/pgtId, ignoring");
        return false;
    };

    match registry.create(PgtIouRecord::new(pgt_iou, pgt)).await {
        Ok(()) => {
            tracing::info!(pgt_iou = %pgt_iou, "proxy-granting ticket registered");
            true
        }
        Err(e) => {
            tracing::warn!(pgt_iou = %pgt_iou, error = %e, "could not register proxy-granting ticket");
            false
        }
    }
}

/// Looks up the PGT stored under `pgt_iou` and exchanges it for a proxy ticket.
pub async fn proxy_ticket_for(
    registry: &dyn PgtRegistry,
    validator: &CasValidator,
    pgt_iou: &str,
    target_service: &str,
) -> CasResult<Option<String>> {
    match registry.lookup(pgt_iou).await? {
        Some(pgt) => Ok(Some(validator.proxy_ticket(&pgt, target_service).await?)),
        None => Ok(None),
    }
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Default)]
pub struct InMemoryPgtRegistry {
    records: Arc<RwLock<HashMap<String, PgtIouRecord>>>,
}

impl InMemoryPgtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PgtRegistry for InMemoryPgtRegistry {
    async fn create(&self, record: PgtIouRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.pgt_iou) {
            return Err(RegistryError::Duplicate(record.pgt_iou));
        }
        records.insert(record.pgt_iou.clone(), record);
        Ok(())
    }

    async fn lookup(&self, pgt_iou: &str) -> Result<Option<String>, RegistryError> {
        Ok(self.records.read().await.get(pgt_iou).map(|record| record.pgt.clone()))
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, RegistryError> {
        let cutoff = cutoff(age);
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.created >= cutoff);
        Ok(before - records.len())
    }
}

/// Registry persisted as JSON lines, one record per line, replayed on open.
#[derive(Debug)]
pub struct FilePgtRegistry {
    path: PathBuf,
    records: RwLock<HashMap<String, PgtIouRecord>>,
}

impl FilePgtRegistry {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let mut records = HashMap::new();
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<PgtIouRecord>(line) {
                Ok(record) => {
                    records.entry(record.pgt_iou.clone()).or_insert(record);
                }
                // A write cut short leaves a partial last line; anything earlier is corruption.
                Err(e) if index + 1 == lines.len() => {
                    tracing::warn!(path = %path.display(), error = %e, "dropping truncated last PGT record");
                    rewrite(&path, &records).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(path = %path.display(), records = records.len(), "PGT registry loaded");
        Ok(FilePgtRegistry {
            path,
            records: RwLock::new(records),
        })
    }
}

#[async_trait]
impl PgtRegistry for FilePgtRegistry {
    async fn create(&self, record: PgtIouRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.pgt_iou) {
            return Err(RegistryError::Duplicate(record.pgt_iou));
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        records.insert(record.pgt_iou.clone(), record);
        Ok(())
    }

    async fn lookup(&self, pgt_iou: &str) -> Result<Option<String>, RegistryError> {
        Ok(self.records.read().await.get(pgt_iou).map(|record| record.pgt.clone()))
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, RegistryError> {
        let cutoff = cutoff(age);
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.created >= cutoff);
        rewrite(&self.path, &records).await?;
        Ok(before - records.len())
    }
}

async fn rewrite(path: &Path, records: &HashMap<String, PgtIouRecord>) -> Result<(), RegistryError> {
    let mut contents = String::new();
    for record in records.values() {
        contents.push_str(&serde_json::to_string(record)?);
        contents.push('\n');
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
