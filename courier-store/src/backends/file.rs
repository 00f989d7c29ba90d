use std::{
    io::{Error, ErrorKind},
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Utc;
use courier_common::{EmailRecord, MailId, internal};
use tokio::{
    fs,
    sync::{Mutex, broadcast},
};

use crate::{ChangeEvent, ChangeFeed, RecordFilter, StoreError, r#trait::RecordStore};

const RECORD_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp_";

/// File-based record store
///
/// Each record is stored as a JSON document named after the hex encoding of
/// its mail id, e.g. `6d31.json` for `m1`. Hex encoding keeps arbitrary
/// caller-supplied ids from escaping the store directory.
///
/// # Atomicity
/// Writes go to a `.tmp_` file which is then renamed over the target, so a
/// crash never leaves a half-written record behind. Orphaned temporary files
/// are removed by [`init`](Self::init). An internal mutex serializes the
/// read-compare-write sequence of [`insert`](RecordStore::insert) and
/// [`save`](RecordStore::save) so the version check is atomic within this
/// process.
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    feed: ChangeFeed,
    write_lock: Mutex<()>,
}

impl FileRecordStore {
    /// Create a store rooted at `path`.
    ///
    /// # Errors
    /// If the path fails [`validate_path`](Self::validate_path).
    pub fn new(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        Ok(Self {
            path,
            feed: ChangeFeed::default(),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate a store path
    ///
    /// # Security Checks
    /// - Rejects paths containing `..` (directory traversal)
    /// - Rejects paths to sensitive system directories
    /// - Ensures the path is absolute
    ///
    /// # Errors
    /// Returns [`StoreError::Validation`] if the path is invalid or potentially dangerous
    pub fn validate_path(path: &Path) -> crate::Result<()> {
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

    /// Initialise the store directory
    ///
    /// Creates the directory if it doesn't exist and removes temporary files
    /// left behind by interrupted writes.
    ///
    /// # Errors
    /// - If the directory cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising record store at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(Error::new(
                ErrorKind::NotADirectory,
                format!(
                    "Expected {} to be a Directory, but it is not",
                    self.path.display()
                ),
            )
            .into());
        }

        self.cleanup_temp_files()
    }

    fn cleanup_temp_files(&self) -> crate::Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                std::fs::remove_file(entry.path())?;
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

    fn file_name(id: &MailId) -> String {
        format!("{}.{RECORD_EXTENSION}", hex::encode(id.as_str()))
    }

    fn record_path(&self, id: &MailId) -> PathBuf {
        self.path.join(Self::file_name(id))
    }

    /// Parse a directory entry name back into a mail id.
    ///
    /// Anything that isn't `<hex>.json` decoding to a valid id is ignored.
    fn id_from_file_name(name: &str) -> Option<MailId> {
        if name.starts_with(TEMP_PREFIX) {
            return None;
        }

        let stem = name.strip_suffix(RECORD_EXTENSION)?.strip_suffix('.')?;
        let bytes = hex::decode(stem).ok()?;
        let id = String::from_utf8(bytes).ok()?;

        MailId::new(id).ok()
    }

    async fn read_record(&self, id: &MailId) -> crate::Result<Option<EmailRecord>> {
        match fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &EmailRecord) -> crate::Result<()> {
        let file_name = Self::file_name(&record.mail_id);
        let temp_path = self.path.join(format!("{TEMP_PREFIX}{file_name}"));
        let final_path = self.path.join(&file_name);

        let encoded = serde_json::to_vec_pretty(record)?;
        fs::write(&temp_path, encoded).await?;
        fs::rename(&temp_path, &final_path).await?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn find_many(&self, filter: &RecordFilter) -> crate::Result<Vec<EmailRecord>> {
        let mut entries = fs::read_dir(&self.path).await.map_err(|e| {
            StoreError::Unavailable(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = Self::id_from_file_name(&name.to_string_lossy()) else {
                continue;
            };

            match self.read_record(&id).await {
                Ok(Some(record)) if filter.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(mail_id = %id, error = %e, "Skipping unreadable record");
                }
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn find_by_id(&self, id: &MailId) -> crate::Result<Option<EmailRecord>> {
        self.read_record(id).await
    }

    async fn insert(&self, mut record: EmailRecord) -> crate::Result<EmailRecord> {
        let _guard = self.write_lock.lock().await;

        if fs::try_exists(self.record_path(&record.mail_id)).await? {
            return Err(StoreError::AlreadyExists(record.mail_id));
        }

        record.version = 1;
        self.write_record(&record).await?;

        internal!(
            level = DEBUG,
            "Stored record {} at {}",
            record.mail_id,
            self.record_path(&record.mail_id).display()
        );

        self.feed.publish(ChangeEvent::inserted(record.clone()));
        Ok(record)
    }

    async fn save(&self, record: &EmailRecord) -> crate::Result<EmailRecord> {
        let _guard = self.write_lock.lock().await;

        let stored = self
            .read_record(&record.mail_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(record.mail_id.clone()))?;

        if stored.version != record.version {
            return Err(StoreError::Conflict {
                id: record.mail_id.clone(),
                expected: record.version,
                found: stored.version,
            });
        }

        let mut saved = record.clone();
        saved.version = record.version.saturating_add(1);
        saved.updated_at = Utc::now();
        self.write_record(&saved).await?;

        self.feed.publish(ChangeEvent::updated(saved.clone()));
        Ok(saved)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    async fn is_connected(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .is_ok_and(|metadata| metadata.is_dir())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        let id = MailId::new("../../etc/passwd").unwrap();
        let name = FileRecordStore::file_name(&id);

        assert!(!name.contains('/'));
        assert_eq!(FileRecordStore::id_from_file_name(&name), Some(id));
    }

    #[test]
    fn test_ignores_foreign_file_names() {
        assert_eq!(FileRecordStore::id_from_file_name(".tmp_6d31.json"), None);
        assert_eq!(FileRecordStore::id_from_file_name("notes.txt"), None);
        assert_eq!(FileRecordStore::id_from_file_name("zz.json"), None);
        assert_eq!(FileRecordStore::id_from_file_name(".json"), None);
    }
}
