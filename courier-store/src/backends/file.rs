use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use courier_common::{QueueId, QueueRecord, QueueStatus, RecipientStatus, internal};
use serde::Deserialize;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{FieldUpdate, RecordFilter, RecordStore, StoreError, store::flush_order};

/// File-backed record store
///
/// Each record is a single bincode file named `{id}.record` inside the store
/// directory.
///
/// # Atomicity
/// Writes go to `.tmp_{id}.record` first and are renamed into place, so a
/// crash never leaves a half-written record behind. With `commit = true` the
/// temporary file is fsynced before the rename.
///
/// Read-modify-write updates are serialised through a store-wide lock, which
/// makes each `set_fields`/`set_recipient_status` call atomic per record.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Default for FileRecordStore {
    fn default() -> Self {
        Self::new("/var/spool/courier")
    }
}

impl<'de> Deserialize<'de> for FileRecordStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileRecordStoreHelper {
            path: PathBuf,
        }

        let helper = FileRecordStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self::new(helper.path))
    }
}

impl FileRecordStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::default(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reject traversal, relative paths and system directories
    fn validate_path(path: &Path) -> crate::Result<()> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(StoreError::Validation(format!(
                "Store path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(StoreError::Validation(format!(
                "Store path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
            return Err(StoreError::Validation(format!(
                "Store path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    /// Create the store directory and sweep temporary files left by a crash.
    ///
    /// # Errors
    /// - If the path cannot be created
    /// - If the path exists but is not a directory
    pub async fn init(&self) -> crate::Result<()> {
        internal!("Initialising record store at {}", self.path.display());

        if !fs::try_exists(&self.path).await? {
            internal!("{} does not exist, creating...", self.path.display());
            fs::create_dir_all(&self.path).await?;
        } else if !fs::metadata(&self.path).await?.is_dir() {
            return Err(StoreError::Validation(format!(
                "Expected {} to be a directory, but it is not",
                self.path.display()
            )));
        }

        let mut entries = fs::read_dir(&self.path).await?;
        let mut cleaned = 0_usize;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(".tmp_") {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from record store"
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &QueueId) -> PathBuf {
        self.path.join(id.filename())
    }

    async fn read_record(&self, id: &QueueId) -> crate::Result<QueueRecord> {
        let bytes = match fs::read(self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        };

        let (record, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(record)
    }

    async fn write_record(&self, record: &QueueRecord, commit: bool) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())?;

        let filename = record.id.filename();
        let temp_path = self.path.join(format!(".tmp_{filename}"));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        if commit {
            file.sync_all().await?;
        }
        drop(file);

        fs::rename(&temp_path, self.path.join(&filename)).await?;
        Ok(())
    }

    async fn modify<F>(&self, id: &QueueId, commit: bool, f: F) -> crate::Result<()>
    where
        F: FnOnce(&mut QueueRecord) -> crate::Result<()> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record(id).await?;
        f(&mut record)?;
        self.write_record(&record, commit).await
    }

    async fn load_all(&self) -> crate::Result<Vec<QueueRecord>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(".tmp_") {
                continue;
            }

            if let Some(id) = QueueId::from_filename(&filename) {
                match self.read_record(&id).await {
                    Ok(record) => records.push(record),
                    // Deleted between the directory scan and the read
                    Err(StoreError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn get(&self, id: &QueueId) -> crate::Result<QueueRecord> {
        self.read_record(id).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %record.id))]
    async fn insert(&self, record: &QueueRecord) -> crate::Result<()> {
        let _guard = self.write_lock.lock().await;

        if fs::try_exists(self.record_path(&record.id)).await? {
            return Err(StoreError::AlreadyExists(record.id));
        }

        self.write_record(record, true).await?;
        internal!(level = DEBUG, "Stored queue record {}", record.id);
        Ok(())
    }

    async fn save(&self, record: &QueueRecord) -> crate::Result<()> {
        self.modify(&record.id, true, |stored| {
            stored.clone_from(record);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self, fields), fields(id = %id))]
    async fn set_fields(
        &self,
        id: &QueueId,
        fields: &FieldUpdate,
        commit: bool,
    ) -> crate::Result<()> {
        self.modify(id, commit, |record| {
            fields.apply(record);
            Ok(())
        })
        .await
    }

    async fn claim_for_sending(&self, id: &QueueId) -> crate::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record(id).await?;

        if !record.status.is_to_be_sent() {
            return Ok(false);
        }

        record.status = QueueStatus::Sending;
        self.write_record(&record, true).await?;
        Ok(true)
    }

    async fn set_recipient_status(
        &self,
        id: &QueueId,
        recipient: &str,
        status: RecipientStatus,
        commit: bool,
    ) -> crate::Result<()> {
        self.modify(id, commit, |record| {
            let row = record
                .recipients
                .iter_mut()
                .find(|r| r.address == recipient)
                .ok_or_else(|| StoreError::RecipientNotFound {
                    id: *id,
                    recipient: recipient.to_string(),
                })?;
            row.status = status;
            Ok(())
        })
        .await
    }

    async fn count(&self, filter: &RecordFilter) -> crate::Result<usize> {
        Ok(self
            .load_all()
            .await?
            .iter()
            .filter(|r| filter.matches(r))
            .count())
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueueRecord>> {
        let mut records: Vec<_> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();

        records.sort_by(flush_order);
        if let Some(limit) = limit {
            records.truncate(limit);
        }

        internal!(level = DEBUG, "Found {} matching queue records", records.len());
        Ok(records)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        let _guard = self.write_lock.lock().await;

        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(*id))
            }
            Err(err) => Err(err.into()),
        }
    }
}
