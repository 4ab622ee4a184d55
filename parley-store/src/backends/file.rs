use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parley_common::{Direction, MessageUnit, UnitId, internal, message::Payload};
use tokio::{fs, sync::Mutex};

use crate::{
    StoreError,
    error::SerializationError,
    r#trait::{BackingStore, prepare_insert, with_payload},
};

/// File-based backing store implementation
///
/// Every unit is one bincode file named after its ULID: `{core_id}.bin`.
///
/// # Atomicity
/// Writes go to `.tmp_{core_id}.bin` first and are renamed into place, so a
/// crash never leaves a half-written record behind. Deletes rename to
/// `{core_id}.bin.deleted` before removing; leftovers are cleaned up by
/// [`FileBackingStore::init`].
///
/// # Concurrency
/// Version checks are serialised through a process-local lock. Two processes
/// sharing a directory do not see each other's conflicts.
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
    /// Message ids of stored outgoing units, guarded together with every
    /// read-check-write sequence
    outgoing: Arc<Mutex<HashMap<String, UnitId>>>,
}

impl FileBackingStore {
    /// Validate a store path
    ///
    /// Rejects relative paths, `..` components and system directories.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> crate::Result<()> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(StoreError::Configuration(format!(
                "Store path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(StoreError::Configuration(format!(
                "Store path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
            return Err(StoreError::Configuration(format!(
                "Store path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialise the store directory
    ///
    /// Creates the directory if needed, removes orphaned `.deleted` and
    /// `.tmp_` files and loads the outgoing message-id index.
    ///
    /// # Errors
    /// - If the directory cannot be created or read
    /// - If the path exists but is not a directory
    /// - If a stored record cannot be decoded
    pub async fn init(&self) -> crate::Result<()> {
        internal!("Initialising file store at {:?} ...", self.path);

        if !fs::try_exists(&self.path).await? {
            internal!("{:?} does not exist, creating...", self.path);
            fs::create_dir_all(&self.path).await?;
        } else if !fs::metadata(&self.path).await?.is_dir() {
            return Err(StoreError::Configuration(format!(
                "Expected {} to be a directory, but it is not",
                self.path.display()
            )));
        }

        let mut outgoing = self.outgoing.lock().await;
        outgoing.clear();

        let mut cleaned = 0;
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".deleted") || filename.starts_with(".tmp_") {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
            } else if let Some(id) = UnitId::from_filename(&filename) {
                let unit = self.load(&id).await?;
                if unit.direction() == Direction::Out {
                    outgoing.insert(unit.message_id().to_string(), id);
                }
            }
        }
        drop(outgoing);

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from the store"
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &UnitId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    async fn load(&self, id: &UnitId) -> crate::Result<MessageUnit> {
        let bytes = match fs::read(self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*id));
            }
            Err(e) => return Err(e.into()),
        };

        let (unit, _): (MessageUnit, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(SerializationError::from)?;

        if unit.core_id() != Some(*id) {
            return Err(SerializationError::Corrupted(format!(
                "record {id} holds unit {:?}",
                unit.core_id()
            ))
            .into());
        }

        Ok(unit)
    }

    /// Write `unit` to its record through a temporary file and rename
    async fn store(&self, id: &UnitId, unit: &MessageUnit) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(unit, bincode::config::standard())
            .map_err(SerializationError::from)?;

        let temp_path = self.path.join(format!(".tmp_{id}.bin"));
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, self.record_path(id)).await?;

        Ok(())
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    async fn write(&self, unit: &mut MessageUnit) -> crate::Result<UnitId> {
        let id = UnitId::generate();
        let mut outgoing = self.outgoing.lock().await;

        let is_outgoing = unit.direction() == Direction::Out;
        if is_outgoing && outgoing.contains_key(unit.message_id()) {
            return Err(StoreError::DuplicateId(unit.message_id().to_string()));
        }

        if fs::try_exists(self.record_path(&id)).await? {
            return Err(StoreError::Internal(format!("ULID collision detected: {id}")));
        }

        prepare_insert(unit, id);
        self.store(&id, unit).await?;
        if is_outgoing {
            outgoing.insert(unit.message_id().to_string(), id);
        }

        internal!(level = DEBUG, "Stored {unit} as {id}");

        Ok(id)
    }

    /// Ids of all complete records, ignoring temporary and deleted files
    async fn list(&self) -> crate::Result<Vec<UnitId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(".tmp_")
                && let Some(id) = UnitId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        // ULIDs are lexicographically sortable by creation time
        ids.sort();

        Ok(ids)
    }

    async fn read(&self, id: &UnitId) -> crate::Result<MessageUnit> {
        self.load(id).await
    }

    async fn update(&self, unit: &mut MessageUnit) -> crate::Result<()> {
        let id = unit.core_id().ok_or_else(|| {
            StoreError::Internal(format!("{unit} was never written to the store"))
        })?;

        let _guard = self.outgoing.lock().await;
        let stored = self.load(&id).await?;

        if stored.version() != unit.version() {
            return Err(StoreError::Conflict(Box::new(stored)));
        }

        unit.set_version(unit.version() + 1);
        if let Err(e) = self.store(&id, unit).await {
            unit.set_version(stored.version());
            return Err(e);
        }

        Ok(())
    }

    async fn delete(&self, id: &UnitId) -> crate::Result<()> {
        let mut outgoing = self.outgoing.lock().await;
        let unit = self.load(id).await?;

        let path = self.record_path(id);
        let deleted = self.path.join(format!("{id}.bin.deleted"));

        fs::rename(&path, &deleted).await?;
        fs::remove_file(&deleted).await?;

        if outgoing.get(unit.message_id()) == Some(id) {
            outgoing.remove(unit.message_id());
        }

        internal!(level = DEBUG, "Deleted {unit} ({id}) from the store");

        Ok(())
    }

    async fn update_payload(&self, payload: &Payload) -> crate::Result<()> {
        let not_found = || StoreError::PayloadNotFound(payload.content_id.clone());
        let owner = payload.owner.ok_or_else(not_found)?;

        let _guard = self.outgoing.lock().await;
        let stored = match self.load(&owner).await {
            Err(StoreError::NotFound(_)) => return Err(not_found()),
            other => other?,
        };

        let updated = with_payload(&stored, payload).ok_or_else(not_found)?;
        self.store(&owner, &updated).await
    }
}

/// Builder for `FileBackingStore`
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Build the final `FileBackingStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> crate::Result<FileBackingStore> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore {
            path: self.path,
            outgoing: Arc::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_common::{
        ProcessingState,
        message::{Receipt, UserMessage},
    };
    use pretty_assertions::assert_eq;

    use super::*;

    async fn store() -> (tempfile::TempDir, FileBackingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackingStore::builder().path(dir.path()).build().unwrap();
        store.init().await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_path_validation() {
        assert!(FileBackingStore::builder().path("relative/store").build().is_err());
        assert!(FileBackingStore::builder().path("/var/lib/../etc").build().is_err());
        assert!(FileBackingStore::builder().path("/etc/parley").build().is_err());
        assert!(FileBackingStore::builder().path("/var/lib/parley").build().is_ok());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_round_trip_through_disk() {
        let (_dir, store) = store().await;

        let mut message = UserMessage::default();
        message.payloads.push(Payload::new("cid:part-1"));
        let mut unit = MessageUnit::user_message(message).with_message_id("u-1");
        unit.push_state(ProcessingState::Received, None);

        let id = store.write(&mut unit).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec![id]);

        let read = store.read(&id).await.unwrap();
        assert_eq!(read, unit);
        assert_eq!(read.payloads()[0].owner, Some(id));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_history_with_and_without_descriptions_reads_back() {
        let (dir, store) = store().await;

        let mut unit = MessageUnit::receipt(Receipt::default()).with_message_id("r-hist");
        unit.push_state(ProcessingState::Received, None);
        unit.push_state(ProcessingState::DeliveryFailed, Some("backend down".to_string()));
        unit.push_state(ProcessingState::ReadyForDelivery, None);
        let id = store.write(&mut unit).await.unwrap();

        let read = store.read(&id).await.unwrap();
        assert_eq!(read.states(), unit.states());

        unit.push_state(ProcessingState::OutForDelivery, None);
        store.update(&mut unit).await.unwrap();

        let reopened = FileBackingStore::builder().path(dir.path()).build().unwrap();
        reopened.init().await.unwrap();
        let read = reopened.read(&id).await.unwrap();
        assert_eq!(read.states().len(), 4);
        assert_eq!(read.states()[1].description.as_deref(), Some("backend down"));
        assert_eq!(read.current_state(), Some(ProcessingState::OutForDelivery));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_update_conflict_and_delete() {
        let (_dir, store) = store().await;
        let mut unit = MessageUnit::receipt(Receipt::default()).with_message_id("r-1");
        let id = store.write(&mut unit).await.unwrap();

        let mut stale = unit.clone();
        unit.push_state(ProcessingState::ReadyForDelivery, None);
        store.update(&mut unit).await.unwrap();
        assert_eq!(unit.version(), 2);

        stale.push_state(ProcessingState::Done, None);
        match store.update(&mut stale).await.unwrap_err() {
            StoreError::Conflict(stored) => {
                assert_eq!(stored.current_state(), Some(ProcessingState::ReadyForDelivery));
            }
            other => panic!("Expected a conflict, got {other}"),
        }

        store.delete(&id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.read(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_init_rebuilds_outgoing_index_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackingStore::builder().path(dir.path()).build().unwrap();
        store.init().await.unwrap();

        let mut unit = MessageUnit::receipt(Receipt::default()).with_message_id("m-1");
        unit.set_direction(Direction::Out);
        store.write(&mut unit).await.unwrap();
        std::fs::write(dir.path().join("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin.deleted"), b"x").unwrap();

        let reopened = FileBackingStore::builder().path(dir.path()).build().unwrap();
        reopened.init().await.unwrap();

        assert!(!dir.path().join("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin.deleted").exists());

        let mut duplicate = MessageUnit::receipt(Receipt::default()).with_message_id("m-1");
        duplicate.set_direction(Direction::Out);
        assert!(reopened.write(&mut duplicate).await.unwrap_err().is_duplicate_id());
    }
}
