//! 会话记录存储 - 原始日志（只追加）与快照文档（整体覆盖）

use crate::error::CaptureError;
use crate::persistence::snapshot::format_timestamp;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 原始日志与快照文档的位置
#[derive(Debug)]
pub struct TranscriptStore {
    session_log: PathBuf,
    snapshot_path: PathBuf,
    /// 已提交快照的最大版本号
    committed: Mutex<Option<u64>>,
}

/// 会话分隔头
pub fn session_header(started_at: &DateTime<Utc>) -> String {
    format!("\n=== Session: {} ===\n", format_timestamp(started_at))
}

impl TranscriptStore {
    pub fn new(session_log: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            session_log: session_log.into(),
            snapshot_path: snapshot_path.into(),
            committed: Mutex::new(None),
        }
    }

    pub fn session_log(&self) -> &Path {
        &self.session_log
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// 在会话结束时追加整个会话（带文件锁，写完后 fsync）
    pub fn append_raw_log(
        &self,
        started_at: &DateTime<Utc>,
        raw: &[u8],
    ) -> Result<(), CaptureError> {
        let path = &self.session_log;
        let io_err = |e| CaptureError::persistence(path, e);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let header = session_header(started_at);
        let mut block = Vec::with_capacity(header.len() + raw.len());
        block.extend_from_slice(header.as_bytes());
        block.extend_from_slice(raw);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;

        file.lock_exclusive().map_err(io_err)?;
        let written = file.write_all(&block).and_then(|_| file.sync_data());
        let unlocked = FileExt::unlock(&file);
        written.map_err(io_err)?;
        unlocked.map_err(io_err)?;

        debug!(path = %path.display(), bytes = raw.len(), "Raw session appended");
        Ok(())
    }

    /// 整体替换快照文档（先写临时文件再 rename）
    pub fn write_snapshot(&self, contents: &str) -> Result<(), CaptureError> {
        let temp_file = self.stage_snapshot(contents)?;
        self.install_snapshot(&temp_file)
    }

    /// 按版本替换快照，版本不大于已提交版本时丢弃并返回 false
    ///
    /// 写入超时后仍在进行的旧请求不会覆盖更新的快照。
    pub fn write_snapshot_versioned(
        &self,
        version: u64,
        contents: &str,
    ) -> Result<bool, CaptureError> {
        let temp_file = self.stage_snapshot(contents)?;

        let mut committed = self
            .committed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if committed.is_some_and(|last| version <= last) {
            let _ = fs::remove_file(&temp_file);
            debug!(version, "Stale snapshot discarded");
            return Ok(false);
        }
        self.install_snapshot(&temp_file)?;
        *committed = Some(version);
        Ok(true)
    }

    /// 写入本次专用的临时文件
    fn stage_snapshot(&self, contents: &str) -> Result<PathBuf, CaptureError> {
        let path = &self.snapshot_path;
        let io_err = |e| CaptureError::persistence(path, e);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let temp_file = temp_path(path);
        if let Err(e) = fs::write(&temp_file, contents) {
            let _ = fs::remove_file(&temp_file);
            return Err(io_err(e));
        }
        Ok(temp_file)
    }

    fn install_snapshot(&self, temp_file: &Path) -> Result<(), CaptureError> {
        if let Err(e) = fs::rename(temp_file, &self.snapshot_path) {
            let _ = fs::remove_file(temp_file);
            return Err(CaptureError::persistence(&self.snapshot_path, e));
        }
        Ok(())
    }

    /// 读取完整原始日志（清理命令使用）
    pub fn read_raw_log(&self) -> Result<Vec<u8>, CaptureError> {
        fs::read(&self.session_log).map_err(|e| CaptureError::persistence(&self.session_log, e))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    // 每次写入使用不同的临时文件，并发写者互不干扰
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_in(dir: &Path) -> TranscriptStore {
        TranscriptStore::new(dir.join("session.log"), dir.join("MEMORY.md"))
    }

    #[test]
    fn test_append_raw_log_appends_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let first = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();

        store.append_raw_log(&first, b"one\x1b[0m").unwrap();
        store.append_raw_log(&second, b"two").unwrap();

        let log = String::from_utf8(store.read_raw_log().unwrap()).unwrap();
        assert_eq!(
            log,
            "\n=== Session: 2026-01-01T09:00:00.000Z ===\none\u{1b}[0m\
             \n=== Session: 2026-01-01T10:00:00.000Z ===\ntwo"
        );
    }

    #[test]
    fn test_write_snapshot_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.write_snapshot("first version, longer").unwrap();
        store.write_snapshot("second").unwrap();

        assert_eq!(fs::read_to_string(store.snapshot_path()).unwrap(), "second");
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn test_versioned_write_never_goes_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        // Given: 最终快照（版本 5）已经提交
        assert!(store.write_snapshot_versioned(5, "final").unwrap());

        // When: 超时后才完成的旧请求（版本 3）到达
        let committed = store.write_snapshot_versioned(3, "stale").unwrap();

        // Then: 旧请求被丢弃，快照内容不回退
        assert!(!committed);
        assert_eq!(fs::read_to_string(store.snapshot_path()).unwrap(), "final");
        assert_eq!(leftover_temp_files(dir.path()), 0);
        assert!(store.write_snapshot_versioned(6, "newer").unwrap());
        assert_eq!(fs::read_to_string(store.snapshot_path()).unwrap(), "newer");
    }

    #[test]
    fn test_concurrent_versioned_writes_keep_highest() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(store_in(dir.path()));

        // Given: 多个写者乱序提交
        let handles: Vec<_> = (1..=8u64)
            .rev()
            .map(|version| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .write_snapshot_versioned(version, &format!("v{}", version))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Then: 最终留下的一定是最高版本
        assert_eq!(fs::read_to_string(store.snapshot_path()).unwrap(), "v8");
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[test]
    fn test_write_snapshot_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(
            dir.path().join("log"),
            dir.path().join("notes/deep/MEMORY.md"),
        );
        store.write_snapshot("x").unwrap();
        assert!(store.snapshot_path().exists());
    }

    #[test]
    fn test_write_failure_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // 快照路径是一个已存在的目录，rename 会失败
        let blocked = dir.path().join("MEMORY.md");
        fs::create_dir_all(blocked.join("child")).unwrap();
        let store = TranscriptStore::new(dir.path().join("log"), &blocked);

        let err = store.write_snapshot("x").unwrap_err();
        assert!(matches!(err, CaptureError::Persistence { .. }));
        assert!(!err.is_fatal());
    }
}
