//! Non-volatile record that survives deep sleep.
//!
//! Layout (9 bytes): `[status tag][last successful delivery, i64 LE epoch seconds]`,
//! where a timestamp of 0 means no delivery has succeeded yet.

use crate::errors::Result;
use crate::model::DeviceStatus;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

pub const RECORD_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistedRecord {
    pub status: DeviceStatus,
    pub last_success: Option<DateTime<Utc>>,
}

impl PersistedRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0] = self.status.tag();
        let secs = self.last_success.map(|t| t.timestamp()).unwrap_or(0);
        bytes[1..].copy_from_slice(&secs.to_le_bytes());
        bytes
    }

    /// Returns `None` for anything that is not a well-formed record.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; RECORD_LEN] = bytes.try_into().ok()?;
        let status = DeviceStatus::try_from(bytes[0]).ok()?;
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&bytes[1..]);
        let secs = i64::from_le_bytes(secs);
        let last_success = if secs == 0 {
            None
        } else {
            Some(DateTime::from_timestamp(secs, 0)?)
        };
        Some(Self {
            status,
            last_success,
        })
    }
}

pub trait StateStore {
    fn load(&self) -> Result<Option<PersistedRecord>>;

    fn save(&mut self, record: &PersistedRecord) -> Result<()>;
}

/// Record kept in a single file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for FileStore {
    fn load(&self) -> Result<Option<PersistedRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = PersistedRecord::from_bytes(&bytes);
        if record.is_none() {
            warn!(
                "Ignoring corrupt state record at {} ({} bytes)",
                self.path.display(),
                bytes.len()
            );
        }
        Ok(record)
    }

    fn save(&mut self, record: &PersistedRecord) -> Result<()> {
        if self.load().ok().flatten().as_ref() == Some(record) {
            debug!("State record unchanged, skipping write");
            return Ok(());
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, record.to_bytes())?;
        fs::rename(&tmp, &self.path)?;
        debug!("State record written to {}", self.path.display());
        Ok(())
    }
}

/// Volatile stand-in used by tests and the offline simulator.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    record: Option<PersistedRecord>,
    writes: usize,
}

impl MemoryStore {
    pub fn with_record(record: PersistedRecord) -> Self {
        Self {
            record: Some(record),
            writes: 0,
        }
    }

    pub fn record(&self) -> Option<PersistedRecord> {
        self.record
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedRecord>> {
        Ok(self.record)
    }

    fn save(&mut self, record: &PersistedRecord) -> Result<()> {
        self.record = Some(*record);
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tracker-{}-{}.bin", name, std::process::id()))
    }

    #[test]
    fn test_record_layout() {
        let record = PersistedRecord {
            status: DeviceStatus::InstalledOff,
            last_success: DateTime::from_timestamp(1_760_000_000, 0),
        };
        let bytes = record.to_bytes();
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..], &1_760_000_000i64.to_le_bytes());
        assert_eq!(PersistedRecord::from_bytes(&bytes), Some(record));
    }

    #[test]
    fn test_never_delivered_encodes_zero() {
        let bytes = PersistedRecord::default().to_bytes();
        assert_eq!(&bytes[1..], &[0u8; 8]);
        assert_eq!(
            PersistedRecord::from_bytes(&bytes).unwrap().last_success,
            None
        );
    }

    #[test]
    fn test_corrupt_records_rejected() {
        assert!(PersistedRecord::from_bytes(&[0u8; 4]).is_none());
        let mut bytes = PersistedRecord::default().to_bytes();
        bytes[0] = 7;
        assert!(PersistedRecord::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_file(&path);
        let mut store = FileStore::new(&path);
        assert_eq!(store.load().unwrap(), None);

        let record = PersistedRecord {
            status: DeviceStatus::Detached,
            last_success: DateTime::from_timestamp(1_700_000_000, 0),
        };
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));

        fs::write(&path, b"garbage").unwrap();
        assert_eq!(store.load().unwrap(), None);

        let _ = fs::remove_file(&path);
    }
}
