//! On-disk image of the store.
//!
//! A store directory holds:
//! - `MANIFEST`: magic + format version
//! - `LOCK`: held exclusively while a `Store` is open
//! - `store.bin`: the latest image, MessagePack framed by magic, version,
//!   length and a CRC32 of the payload
//!
//! Images are written to a temp file and renamed into place, so a crash
//! mid-write leaves the previous image intact.

use crate::error::{Result, StoreError};
use crate::types::{Notification, NotificationId, Timestamp, TopicId, TopicRoute};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"TSS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Magic bytes for the image file.
const IMAGE_MAGIC: &[u8; 4] = b"TSI\0";

/// Current image format version.
const IMAGE_VERSION: u8 = 1;

/// Magic, version, payload length and checksum.
const IMAGE_HEADER_LEN: u64 = 4 + 1 + 8 + 4;

const IMAGE_FILE: &str = "store.bin";
const IMAGE_TMP_FILE: &str = "store.bin.tmp";

/// Persistent part of a subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct SubscriptionMeta {
    pub id: TopicId,
    pub route: TopicRoute,
    pub display_name: Option<String>,
    pub created: Timestamp,
    pub last_received: Option<Timestamp>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct SubscriptionImage {
    pub meta: SubscriptionMeta,
    /// Insertion order.
    pub notifications: Vec<Notification>,
    pub tombstones: HashMap<NotificationId, Timestamp>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreImage {
    pub next_topic_id: u64,
    pub subscriptions: Vec<SubscriptionImage>,
}

pub(crate) fn write_manifest(path: &Path) -> Result<()> {
    let mut file = File::create(path.join("MANIFEST"))?;

    file.write_all(STORE_MAGIC)?;
    file.write_all(&[STORE_VERSION])?;
    file.sync_all()?;

    Ok(())
}

pub(crate) fn verify_manifest(path: &Path) -> Result<()> {
    let mut file = File::open(path.join("MANIFEST"))?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != STORE_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid store magic".into()));
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != STORE_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported store version: {}",
            version[0]
        )));
    }

    Ok(())
}

pub(crate) fn acquire_lock(path: &Path) -> Result<File> {
    let lock_file = File::create(path.join("LOCK"))?;

    lock_file
        .try_lock_exclusive()
        .map_err(|_| StoreError::Locked)?;

    Ok(lock_file)
}

pub(crate) fn save_image(path: &Path, image: &StoreImage) -> Result<()> {
    let encoded = rmp_serde::to_vec(image)?;
    let checksum = crc32fast::hash(&encoded);

    let tmp_path = path.join(IMAGE_TMP_FILE);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        file.write_all(IMAGE_MAGIC)?;
        file.write_all(&[IMAGE_VERSION])?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(&encoded)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path.join(IMAGE_FILE))?;
    Ok(())
}

/// Returns `None` when no image has been written yet.
pub(crate) fn load_image(path: &Path) -> Result<Option<StoreImage>> {
    let image_path = path.join(IMAGE_FILE);
    if !image_path.exists() {
        return Ok(None);
    }

    let mut file = File::open(image_path)?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != IMAGE_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid image magic".into()));
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != IMAGE_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported image version: {}",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);

    let mut checksum_bytes = [0u8; 4];
    file.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    let available = file.metadata()?.len().saturating_sub(IMAGE_HEADER_LEN);
    if len != available {
        return Err(StoreError::InvalidFormat(format!(
            "Image length {len} does not match {available} payload bytes on disk"
        )));
    }

    let mut encoded = vec![0u8; len as usize];
    file.read_exact(&mut encoded)?;

    let computed_checksum = crc32fast::hash(&encoded);
    if stored_checksum != computed_checksum {
        return Err(StoreError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    Ok(Some(rmp_serde::from_slice(&encoded)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_image() -> StoreImage {
        let topic = TopicId(1);
        StoreImage {
            next_topic_id: 2,
            subscriptions: vec![SubscriptionImage {
                meta: SubscriptionMeta {
                    id: topic,
                    route: TopicRoute::new("https://ntfy.sh", "alerts"),
                    display_name: Some("Alerts".into()),
                    created: Timestamp(1),
                    last_received: Some(Timestamp(20)),
                },
                notifications: vec![
                    Notification::new("n1", topic, Timestamp(10), "first"),
                    Notification::new("n2", topic, Timestamp(20), "second"),
                ],
                tombstones: HashMap::new(),
            }],
        }
    }

    #[test]
    fn test_missing_image_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_image(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_image_preserves_order() {
        let dir = TempDir::new().unwrap();
        save_image(dir.path(), &sample_image()).unwrap();

        let loaded = load_image(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.next_topic_id, 2);
        let ids: Vec<_> = loaded.subscriptions[0]
            .notifications
            .iter()
            .map(|n| n.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert!(!dir.path().join(IMAGE_TMP_FILE).exists());
    }

    #[test]
    fn test_corrupted_image_detected() {
        let dir = TempDir::new().unwrap();
        save_image(dir.path(), &sample_image()).unwrap();

        let image_path = dir.path().join(IMAGE_FILE);
        let mut bytes = fs::read(&image_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&image_path, bytes).unwrap();

        let result = load_image(dir.path());
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let dir = TempDir::new().unwrap();
        save_image(dir.path(), &sample_image()).unwrap();

        let image_path = dir.path().join(IMAGE_FILE);
        let mut bytes = fs::read(&image_path).unwrap();
        bytes[5..13].copy_from_slice(&(u64::MAX / 2).to_le_bytes());
        fs::write(&image_path, &bytes).unwrap();

        assert!(matches!(
            load_image(dir.path()),
            Err(StoreError::InvalidFormat(_))
        ));

        // A truncated payload is caught the same way
        save_image(dir.path(), &sample_image()).unwrap();
        let mut bytes = fs::read(&image_path).unwrap();
        bytes.truncate(bytes.len() - 3);
        fs::write(&image_path, &bytes).unwrap();

        assert!(matches!(
            load_image(dir.path()),
            Err(StoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_manifest_roundtrip_and_bad_magic() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path()).unwrap();
        verify_manifest(dir.path()).unwrap();

        fs::write(dir.path().join("MANIFEST"), b"NOPE\x01").unwrap();
        assert!(matches!(
            verify_manifest(dir.path()),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
