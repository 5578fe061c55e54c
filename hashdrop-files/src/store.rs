//! Received-file store: payload bytes on disk under the envelope name, plus a
//! thin SQLite ledger recording each upload's verdict.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use hashdrop_protocol::{SaltingMode, TransferEnvelope, UploadVerdict};
use rusqlite::Connection;

use crate::transfer::PayloadSink;

/// One recorded upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub id: i64,
    pub name: String,
    pub declared_size: u64,
    pub digest: String,
    pub salted: bool,
    pub integrity_valid: bool,
    pub stored_path: PathBuf,
}

/// Subdirectory holding received payloads, named by their envelope names.
const FILES_DIR: &str = "files";

/// Subdirectory for in-progress writes.
const TMP_DIR: &str = "tmp";

const LEDGER_FILE: &str = "receipts.db";

/// Stores received payloads and their receipts.
///
/// Layout under `storage_dir`: payloads in `files/`, in-progress writes in
/// `tmp/`, and the ledger in `receipts.db`. Upload names only ever land in
/// `files/`, so no upload can replace the ledger.
///
/// Thread-safe: file writes go through unique temp files and the SQLite
/// connection is protected by a `Mutex`.
pub struct FileStore {
    storage_dir: PathBuf,
    files_dir: PathBuf,
    tmp_dir: PathBuf,
    conn: Mutex<Connection>,
}

impl FileStore {
    /// Create a new FileStore rooted at `storage_dir`.
    ///
    /// Creates the directories and the receipt ledger if they don't exist.
    pub fn new(storage_dir: PathBuf) -> Result<Self> {
        let files_dir = storage_dir.join(FILES_DIR);
        let tmp_dir = storage_dir.join(TMP_DIR);
        for dir in [&files_dir, &tmp_dir] {
            std::fs::create_dir_all(dir).with_context(|| {
                format!("failed to create storage directory: {}", dir.display())
            })?;
        }

        let db_path = storage_dir.join(LEDGER_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open database: {}", db_path.display()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS receipts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                declared_size INTEGER NOT NULL,
                digest TEXT NOT NULL,
                salted INTEGER NOT NULL,
                integrity_valid INTEGER NOT NULL,
                stored_path TEXT NOT NULL
            );",
        )
        .context("failed to initialize database schema")?;

        tracing::info!(storage_dir = %storage_dir.display(), "file store opened");

        Ok(Self {
            storage_dir,
            files_dir,
            tmp_dir,
            conn: Mutex::new(conn),
        })
    }

    /// Write `payload` to `files/` under the final component of `name`,
    /// replacing any previous file of that name.
    pub fn save_payload(&self, name: &str, payload: &[u8]) -> Result<PathBuf> {
        let file_name =
            stored_file_name(name).with_context(|| format!("unusable file name: {name:?}"))?;
        let path = self.files_dir.join(&file_name);
        // Temp names never derive from the upload name.
        let tmp_path = self
            .tmp_dir
            .join(format!("{:016x}.part", rand::random::<u64>()));

        if let Err(e) = std::fs::write(&tmp_path, payload) {
            tracing::error!(path = %tmp_path.display(), error = %e, "failed to write temp file");
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("failed to write {}", tmp_path.display()));
        }

        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            tracing::error!(
                from = %tmp_path.display(),
                to = %path.display(),
                error = %e,
                "failed to rename temp file"
            );
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("failed to store {}", path.display()));
        }

        tracing::info!(
            file_name = %file_name,
            file_size = payload.len(),
            path = %path.display(),
            "payload stored"
        );

        Ok(path)
    }

    /// Record the outcome of one processed upload.
    pub fn record_receipt(
        &self,
        envelope: &TransferEnvelope,
        verdict: &UploadVerdict,
        stored_path: &Path,
    ) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("receipt ledger lock poisoned"))?;
        conn.execute(
            "INSERT INTO receipts (name, declared_size, digest, salted, integrity_valid, stored_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                envelope.name,
                envelope.declared_size as i64,
                envelope.digest.as_str(),
                envelope.salting_mode() == SaltingMode::Salted,
                verdict.integrity_valid,
                stored_path.to_string_lossy().into_owned(),
            ],
        )
        .context("failed to insert receipt")?;

        Ok(conn.last_insert_rowid())
    }

    /// List all receipts, oldest first.
    pub fn list_receipts(&self) -> Result<Vec<Receipt>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("receipt ledger lock poisoned"))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, declared_size, digest, salted, integrity_valid, stored_path
                 FROM receipts ORDER BY id",
            )
            .context("failed to prepare list query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Receipt {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    declared_size: row.get::<_, i64>(2)? as u64,
                    digest: row.get(3)?,
                    salted: row.get(4)?,
                    integrity_valid: row.get(5)?,
                    stored_path: PathBuf::from(row.get::<_, String>(6)?),
                })
            })
            .context("failed to query receipts")?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.context("failed to read receipt row")?);
        }

        Ok(result)
    }

    /// Get the storage directory root.
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Directory holding received payloads.
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }
}

impl PayloadSink for FileStore {
    fn persist(&self, name: &str, payload: &[u8]) -> Result<PathBuf> {
        self.save_payload(name, payload)
    }

    fn record(
        &self,
        envelope: &TransferEnvelope,
        verdict: &UploadVerdict,
        stored_path: &Path,
    ) -> Result<()> {
        self.record_receipt(envelope, verdict, stored_path)
            .map(|_| ())
    }
}

/// Reduce an envelope name to a single path component safe to join onto the
/// storage directory.
fn stored_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn envelope(name: &str, payload: &[u8], salted: bool) -> TransferEnvelope {
        TransferEnvelope::seal(name, payload.to_vec(), salted, &mut StdRng::seed_from_u64(3))
            .unwrap()
    }

    fn part_files(store: &FileStore) -> Vec<PathBuf> {
        let tmp_dir = store.storage_dir().join("tmp");
        let mut found = Vec::new();
        for dir in [store.storage_dir(), store.files_dir(), tmp_dir.as_path()] {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            found.extend(
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.to_string_lossy().ends_with(".part")),
            );
        }
        found
    }

    #[test]
    fn new_creates_directory_and_database() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("received");
        let _store = FileStore::new(store_dir.clone()).unwrap();

        assert!(store_dir.join("files").is_dir());
        assert!(store_dir.join("tmp").is_dir());
        assert!(store_dir.join("receipts.db").exists());
    }

    #[test]
    fn save_payload_writes_bytes_under_name() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf()).unwrap();

        let path = store.save_payload("notes.txt", b"hello").unwrap();
        assert_eq!(path, tmp.path().join("files").join("notes.txt"));
        assert_eq!(path.parent(), Some(store.files_dir()));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn save_payload_overwrites_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf()).unwrap();

        store.save_payload("a.bin", b"first").unwrap();
        let path = store.save_payload("a.bin", b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        assert!(part_files(&store).is_empty());
    }

    #[test]
    fn save_payload_strips_directories_from_name() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        let store = FileStore::new(store_dir.clone()).unwrap();

        let path = store.save_payload("../../escape.txt", b"x").unwrap();
        assert_eq!(path, store_dir.join("files").join("escape.txt"));

        let path = store.save_payload("C:\\Users\\me\\doc.txt", b"y").unwrap();
        assert_eq!(path, store_dir.join("files").join("doc.txt"));
    }

    #[test]
    fn save_payload_rejects_unusable_names() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf()).unwrap();

        assert!(store.save_payload("..", b"x").is_err());
        assert!(store.save_payload("dir/", b"x").is_err());
        assert!(store.save_payload("", b"x").is_err());
    }

    #[test]
    fn concurrent_writes_to_distinct_names_do_not_interfere() {
        let tmp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FileStore::new(tmp.path().to_path_buf()).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    let data = vec![i; 64 * 1024];
                    store.save_payload(&format!("file_{i}.bin"), &data).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..8u8 {
            let data = std::fs::read(store.files_dir().join(format!("file_{i}.bin"))).unwrap();
            assert_eq!(data, vec![i; 64 * 1024]);
        }
    }

    #[test]
    fn record_and_list_receipts() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf()).unwrap();

        let ok = envelope("ok.txt", b"good", true);
        let ok_verdict = UploadVerdict::for_envelope(&ok, ok.recompute_digest(), true);
        let ok_path = store.save_payload(&ok.name, &ok.payload).unwrap();
        store.record_receipt(&ok, &ok_verdict, &ok_path).unwrap();

        let bad = envelope("bad.txt", b"evil", false);
        let bad_verdict = UploadVerdict::for_envelope(&bad, bad.recompute_digest(), false);
        let bad_path = store.save_payload(&bad.name, &bad.payload).unwrap();
        store.record_receipt(&bad, &bad_verdict, &bad_path).unwrap();

        let receipts = store.list_receipts().unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].name, "ok.txt");
        assert!(receipts[0].salted);
        assert!(receipts[0].integrity_valid);
        assert_eq!(receipts[0].digest, ok.digest.as_str());
        assert_eq!(receipts[1].name, "bad.txt");
        assert!(!receipts[1].salted);
        assert!(!receipts[1].integrity_valid);
        assert_eq!(receipts[1].stored_path, bad_path);
    }

    #[test]
    fn receipts_persist_across_instances() {
        let tmp = TempDir::new().unwrap();
        let env = envelope("keep.txt", b"data", false);

        {
            let store = FileStore::new(tmp.path().to_path_buf()).unwrap();
            let verdict = UploadVerdict::for_envelope(&env, env.recompute_digest(), true);
            let path = store.save_payload(&env.name, &env.payload).unwrap();
            store.record_receipt(&env, &verdict, &path).unwrap();
        }

        {
            let store = FileStore::new(tmp.path().to_path_buf()).unwrap();
            let receipts = store.list_receipts().unwrap();
            assert_eq!(receipts.len(), 1);
            assert_eq!(receipts[0].name, "keep.txt");
            assert_eq!(receipts[0].declared_size, 4);
        }
    }

    #[test]
    fn upload_named_like_the_ledger_does_not_touch_it() {
        let tmp = TempDir::new().unwrap();
        let env = envelope("first.txt", b"data", false);

        {
            let store = FileStore::new(tmp.path().to_path_buf()).unwrap();
            let verdict = UploadVerdict::for_envelope(&env, env.recompute_digest(), true);
            let path = store.save_payload(&env.name, &env.payload).unwrap();
            store.record_receipt(&env, &verdict, &path).unwrap();

            for name in ["receipts.db", "receipts.db-journal", "../receipts.db"] {
                let path = store.save_payload(name, b"not a database").unwrap();
                assert_eq!(path.parent(), Some(store.files_dir()));
            }
            assert_eq!(store.list_receipts().unwrap().len(), 1);
        }

        let store = FileStore::new(tmp.path().to_path_buf()).unwrap();
        let receipts = store.list_receipts().unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].name, "first.txt");
    }

    #[test]
    fn save_payload_accepts_names_near_the_filesystem_limit() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf()).unwrap();

        let name = format!("{}.txt", "a".repeat(240));
        let path = store.save_payload(&name, b"long").unwrap();
        assert_eq!(path, store.files_dir().join(&name));
        assert_eq!(std::fs::read(&path).unwrap(), b"long");
        assert!(part_files(&store).is_empty());
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf()).unwrap();

        // A plain file where the temp directory should be makes the write fail.
        let tmp_dir = tmp.path().join("tmp");
        std::fs::remove_dir(&tmp_dir).unwrap();
        std::fs::write(&tmp_dir, b"").unwrap();

        let err = store.save_payload("doomed.bin", b"payload").unwrap_err();
        assert!(err.to_string().contains("failed to write"));
        assert!(!store.files_dir().join("doomed.bin").exists());
        assert!(part_files(&store).is_empty());
    }
}
