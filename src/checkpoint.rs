/*!
 * Checkpoint store for resumable downloads
 *
 * A checkpoint maps a transfer fingerprint to the absolute path of the local
 * file written so far. Nothing else is persisted; the remaining transfer state
 * is rebuilt from the live request on every run.
 */

use crate::error::CosResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable fingerprint → local path mapping
///
/// `put` and `remove` must be durable before they return, so a crash right
/// after leaves a checkpoint that points at a real partial file.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, fingerprint: &str) -> CosResult<Option<PathBuf>>;

    /// Record `path` for `fingerprint`, dropping every other entry for `path`
    fn put(&self, fingerprint: &str, path: &Path) -> CosResult<()>;

    fn remove(&self, fingerprint: &str) -> CosResult<()>;
}

/// Fields identifying one resumable transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintInput<'a> {
    /// Operation kind, e.g. `download`
    pub kind: &'a str,
    pub region: &'a str,
    pub bucket: &'a str,
    pub key: &'a str,
    pub range_start: u64,
    pub range_end: Option<u64>,
    pub file_offset: u64,
    pub local_dir: &'a str,
    pub local_file_name: &'a str,
    pub etag: &'a str,
}

/// 64-char lowercase hex SHA-256 over the identifying fields
///
/// An open range end is encoded as `-1`.
pub fn fingerprint(input: &FingerprintInput<'_>) -> String {
    let range_end = input
        .range_end
        .map(|end| end.to_string())
        .unwrap_or_else(|| "-1".to_string());
    let material = format!(
        "{}_{}_{}_{}_{}_{}_{}_{}_{}_{}",
        input.kind,
        input.region,
        input.bucket,
        input.key,
        input.range_start,
        range_end,
        input.file_offset,
        input.local_dir,
        input.local_file_name,
        input.etag
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, PathBuf>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, fingerprint: &str) -> CosResult<Option<PathBuf>> {
        Ok(self.entries.lock().get(fingerprint).cloned())
    }

    fn put(&self, fingerprint: &str, path: &Path) -> CosResult<()> {
        let mut entries = self.entries.lock();
        entries.retain(|key, existing| key == fingerprint || existing != path);
        entries.insert(fingerprint.to_string(), path.to_path_buf());
        Ok(())
    }

    fn remove(&self, fingerprint: &str) -> CosResult<()> {
        self.entries.lock().remove(fingerprint);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointFile {
    #[serde(default)]
    checkpoints: BTreeMap<String, PathBuf>,
}

/// JSON-file store; every mutation rewrites the file atomically
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PathBuf>>,
}

impl FileCheckpointStore {
    /// Open (or lazily create) the store at `path`
    ///
    /// A file that cannot be parsed is ignored with a warning; the next write
    /// replaces it.
    pub fn open<P: AsRef<Path>>(path: P) -> CosResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<CheckpointFile>(&text) {
                Ok(file) => file.checkpoints,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable checkpoint file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "checkpoint store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, PathBuf>) -> CosResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let document = CheckpointFile {
            checkpoints: entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&document)?;

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, fingerprint: &str) -> CosResult<Option<PathBuf>> {
        Ok(self.entries.lock().get(fingerprint).cloned())
    }

    fn put(&self, fingerprint: &str, path: &Path) -> CosResult<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.retain(|key, existing| key == fingerprint || existing != path);
        next.insert(fingerprint.to_string(), path.to_path_buf());

        self.persist(&next)?;
        *entries = next;
        debug!(fingerprint, path = %path.display(), "checkpoint written");
        Ok(())
    }

    fn remove(&self, fingerprint: &str) -> CosResult<()> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(fingerprint) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(fingerprint);

        self.persist(&next)?;
        *entries = next;
        debug!(fingerprint, "checkpoint cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn input(etag: &str) -> FingerprintInput<'_> {
        FingerprintInput {
            kind: "download",
            region: "ap-guangzhou",
            bucket: "examplebucket-1250000000",
            key: "reports/q1.csv",
            range_start: 0,
            range_end: None,
            file_offset: 0,
            local_dir: "/tmp/dl",
            local_file_name: "q1.csv",
            etag,
        }
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint(&input("abc"));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, fingerprint(&input("abc")));
    }

    #[test]
    fn test_fingerprint_changes_with_fields() {
        let base = fingerprint(&input("abc"));
        assert_ne!(base, fingerprint(&input("abd")));

        let mut ranged = input("abc");
        ranged.range_end = Some(99);
        assert_ne!(base, fingerprint(&ranged));

        let mut offset = input("abc");
        offset.file_offset = 1;
        assert_ne!(base, fingerprint(&offset));
    }

    #[test]
    fn test_fingerprint_known_material() {
        // sha256("download_r_b_k_0_-1_0_/d_f_e")
        let input = FingerprintInput {
            kind: "download",
            region: "r",
            bucket: "b",
            key: "k",
            range_start: 0,
            range_end: None,
            file_offset: 0,
            local_dir: "/d",
            local_file_name: "f",
            etag: "e",
        };
        let expected = hex::encode(Sha256::digest(b"download_r_b_k_0_-1_0_/d_f_e"));
        assert_eq!(fingerprint(&input), expected);
    }

    #[test]
    fn test_memory_store_invalidates_same_path() {
        let store = MemoryCheckpointStore::new();
        let path = Path::new("/tmp/dl/q1.csv");
        store.put("old", path).unwrap();
        store.put("other", Path::new("/tmp/dl/other.csv")).unwrap();
        store.put("new", path).unwrap();

        assert_eq!(store.get("old").unwrap(), None);
        assert_eq!(store.get("new").unwrap(), Some(path.to_path_buf()));
        assert!(store.get("other").unwrap().is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("state").join("checkpoints.json");
        let target = dir.path().join("q1.csv");

        {
            let store = FileCheckpointStore::open(&file).unwrap();
            store.put("fp1", &target).unwrap();
            store.put("fp2", &dir.path().join("q2.csv")).unwrap();
            store.remove("fp2").unwrap();
        }

        let store = FileCheckpointStore::open(&file).unwrap();
        assert_eq!(store.get("fp1").unwrap(), Some(target));
        assert_eq!(store.get("fp2").unwrap(), None);

        let mut temp = file.as_os_str().to_owned();
        temp.push(".tmp");
        assert!(!PathBuf::from(temp).exists());
    }

    #[test]
    fn test_file_store_ignores_corrupt_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("checkpoints.json");
        std::fs::write(&file, "{ not json").unwrap();

        let store = FileCheckpointStore::open(&file).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
        store.put("fp", Path::new("/x")).unwrap();
        assert_eq!(
            FileCheckpointStore::open(&file).unwrap().get("fp").unwrap(),
            Some(PathBuf::from("/x"))
        );
    }

    #[test]
    fn test_concurrent_puts_do_not_alias() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(
            FileCheckpointStore::open(dir.path().join("checkpoints.json")).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let base = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    store
                        .put(&format!("fp{}", i), &base.join(format!("f{}", i)))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = FileCheckpointStore::open(dir.path().join("checkpoints.json")).unwrap();
        for i in 0..8 {
            assert_eq!(
                reopened.get(&format!("fp{}", i)).unwrap(),
                Some(dir.path().join(format!("f{}", i)))
            );
        }
    }
}
