//! Built-in delivery method writing every unit to a directory
//!
//! Each delivery produces one RON record `{ulid}.ron` in the configured
//! `directory`. The record is written to `.tmp_{ulid}.ron` and renamed into
//! place so the business application never picks up a partial file.
//!
//! ```ron
//! (id: Some("orders-in"), factory: "file", settings: { "directory": "/srv/parley/in" })
//! ```

use std::{
    collections::BTreeMap,
    path::{Component, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::{MessageUnit, UnitKind, outgoing, tracing::debug};
use serde::Serialize;
use tokio::fs;

use crate::{
    error::{DeliveryError, PermanentError, SystemError, TemporaryError},
    method::{DeliveryMethod, DeliveryMethodFactory},
};

/// What the business application finds on disk
#[derive(Debug, Serialize)]
struct DeliveryRecord<'a> {
    message_id: &'a str,
    ref_to_message_id: Option<&'a str>,
    timestamp: Option<DateTime<Utc>>,
    pmode_id: Option<&'a str>,
    delivered_at: DateTime<Utc>,
    unit: &'a UnitKind,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileDeliveryFactory;

impl FileDeliveryFactory {
    pub const NAME: &'static str = "file";
}

impl DeliveryMethodFactory for FileDeliveryFactory {
    fn create(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn DeliveryMethod>, DeliveryError> {
        let directory = settings.get("directory").map(PathBuf::from).ok_or_else(|| {
            SystemError::Configuration("file delivery needs a 'directory' setting".to_string())
        })?;

        if !directory.is_absolute() || directory.components().any(|c| c == Component::ParentDir) {
            return Err(SystemError::Configuration(format!(
                "file delivery directory must be absolute and free of '..': {}",
                directory.display()
            ))
            .into());
        }

        Ok(Arc::new(FileDeliveryMethod { directory }))
    }
}

#[derive(Debug)]
pub struct FileDeliveryMethod {
    directory: PathBuf,
}

impl FileDeliveryMethod {
    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }
}

#[async_trait]
impl DeliveryMethod for FileDeliveryMethod {
    async fn deliver(&self, unit: &MessageUnit) -> Result<(), DeliveryError> {
        let record = DeliveryRecord {
            message_id: unit.message_id(),
            ref_to_message_id: unit.ref_to_message_id(),
            timestamp: unit.timestamp(),
            pmode_id: unit.pmode_id(),
            delivered_at: Utc::now(),
            unit: unit.kind(),
        };

        let content = ron::ser::to_string_pretty(&record, ron::ser::PrettyConfig::default())
            .map_err(|e| PermanentError::Undeliverable(format!("{unit}: {e}")))?;

        fs::create_dir_all(&self.directory).await.map_err(|e| {
            TemporaryError::Unavailable(format!("{}: {e}", self.directory.display()))
        })?;

        let name = ulid::Ulid::new().to_string();
        let temp_path = self.directory.join(format!(".tmp_{name}.ron"));
        let path = self.directory.join(format!("{name}.ron"));

        fs::write(&temp_path, content)
            .await
            .map_err(SystemError::from)?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(SystemError::from)?;

        outgoing!(level = DEBUG, "Wrote {unit} to {}", path.display());

        Ok(())
    }

    fn shutdown(&self) -> Result<(), DeliveryError> {
        debug!(directory = %self.directory.display(), "File delivery method released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_common::message::{Payload, UserMessage};
    use pretty_assertions::assert_eq;

    use super::*;

    fn settings(directory: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("directory".to_string(), directory.to_string())])
    }

    #[test]
    fn test_factory_validates_settings() {
        let factory = FileDeliveryFactory;
        assert!(factory.create(&BTreeMap::new()).unwrap_err().is_system());
        assert!(factory.create(&settings("relative/in")).is_err());
        assert!(factory.create(&settings("/srv/../etc")).is_err());
        assert!(factory.create(&settings("/srv/parley/in")).is_ok());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_deliver_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("in");
        let method = FileDeliveryFactory
            .create(&settings(target.to_str().unwrap()))
            .unwrap();

        let mut message = UserMessage::default();
        message.payloads.push(Payload::new("cid:part-1"));
        let unit = MessageUnit::user_message(message)
            .with_message_id("u-1@partner")
            .with_pmode_id("pm-1");

        method.deliver(&unit).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(&target)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extension().and_then(|e| e.to_str()), Some("ron"));

        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert!(content.contains("\"u-1@partner\""));
        assert!(content.contains("cid:part-1"));
        assert!(method.shutdown().is_ok());
    }
}
