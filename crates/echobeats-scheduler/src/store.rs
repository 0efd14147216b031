//! Job persistence store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::job::ScheduledJob;

/// Job store trait for persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Save a job, replacing any previous record with the same ID.
    async fn save(&self, job: &ScheduledJob) -> Result<(), StoreError>;

    /// Load a job by ID. `None` if no record exists.
    async fn load(&self, id: &str) -> Result<Option<ScheduledJob>, StoreError>;

    /// Load every readable job. Unreadable records are skipped.
    async fn load_all(&self) -> Result<Vec<ScheduledJob>, StoreError>;

    /// Delete a job. Deleting a missing job is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Update a job.
    async fn update(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        self.save(job).await
    }
}

/// Check that an ID is usable as a record key.
///
/// Accepts ASCII alphanumerics, `-`, `_` and `.`, not starting with `.`.
pub fn validate_job_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// In-memory job store for testing.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
}

impl MemoryJobStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        validate_job_id(&job.id)?;
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<ScheduledJob>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(id);
        Ok(())
    }
}

/// File system based job store.
///
/// Each job is a pretty-printed JSON file named by its ID:
/// ```text
/// {storage_path}/
/// ├── {id}.json
/// └── {id}.json
/// ```
///
/// Writes go to a hidden temp file that is then renamed over the record,
/// so a crash never leaves a half-written job behind.
pub struct FileJobStore {
    /// Directory holding job records.
    storage_path: PathBuf,
}

impl FileJobStore {
    /// Create a new file-based job store, creating the directory if needed.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        fs::create_dir_all(&storage_path).await?;

        debug!("FileJobStore initialized at {:?}", storage_path);

        Ok(Self { storage_path })
    }

    /// Get the storage directory.
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Get the file path for a job.
    fn job_path(&self, id: &str) -> PathBuf {
        self.storage_path.join(format!("{}.json", id))
    }

    /// Get the temp file path used while writing a job.
    fn temp_path(&self, id: &str) -> PathBuf {
        self.storage_path.join(format!(".{}.json.tmp", id))
    }

    /// Read and parse a single record.
    async fn read_job(path: &Path) -> Result<ScheduledJob, StoreError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        validate_job_id(&job.id)?;

        let content = serde_json::to_string_pretty(job)?;
        let temp_path = self.temp_path(&job.id);
        let path = self.job_path(&job.id);

        fs::write(&temp_path, content).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            fs::remove_file(&temp_path).await.ok();
            return Err(e.into());
        }

        debug!("Saved job '{}' to {:?}", job.id, path);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<ScheduledJob>, StoreError> {
        validate_job_id(id)?;

        let path = self.job_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        Self::read_job(&path).await.map(Some)
    }

    async fn load_all(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&self.storage_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }

            let job = match Self::read_job(&path).await {
                Ok(job) => job,
                Err(e) => {
                    warn!("Skipping unreadable job record {:?}: {}", path, e);
                    continue;
                }
            };

            // The record must be addressable under the name it is stored as.
            let stem = path.file_stem().map(|stem| stem.to_string_lossy());
            if validate_job_id(&job.id).is_err() || stem.as_deref() != Some(job.id.as_str()) {
                warn!("Skipping job record {:?} with mismatched id {:?}", path, job.id);
                continue;
            }

            jobs.push(job);
        }

        debug!("Loaded {} jobs from {:?}", jobs.len(), self.storage_path);
        Ok(jobs)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        validate_job_id(id)?;

        match fs::remove_file(self.job_path(id)).await {
            Ok(()) => {
                debug!("Deleted job '{}'", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
