//! 文件检查点存储
//!
//! 每个会话一个 JSON 文件（`<dir>/<session_id>.json`），用于跨进程恢复挂起的会话。
//! save / claim 在 `<session_id>.lock` 上持有操作系统排他锁（fs2），多个进程或存储实例同时 claim 时只有一个成功。

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;

use super::{Checkpoint, CheckpointError, CheckpointStatus, CheckpointStore, ResumeToken};

/// 目录不存在时在首次写入时创建
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

fn io_err(e: std::io::Error) -> CheckpointError {
    CheckpointError::Io(e.to_string())
}

fn read_file(path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(e)),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| CheckpointError::Serde(e.to_string()))
}

/// 先写临时文件再 rename，读者不会看到半个 JSON
fn write_file(path: &Path, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    let data = serde_json::to_string_pretty(checkpoint).map_err(|e| CheckpointError::Serde(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, CheckpointError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CheckpointError::Io(format!("invalid session id: {session_id}")));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    /// 在会话锁文件的排他锁内执行 f（阻塞 IO 放到 spawn_blocking）
    async fn with_session_lock<T, F>(&self, session_id: &str, f: F) -> Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, CheckpointError> + Send + 'static,
    {
        let path = self.path_for(session_id)?;
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(io_err)?;
            let lock: File = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path.with_extension("lock"))
                .map_err(io_err)?;
            lock.lock_exclusive().map_err(io_err)?;
            let result = f(&path);
            if let Err(e) = FileExt::unlock(&lock) {
                tracing::warn!(error = %e, "failed to release checkpoint lock");
            }
            result
        })
        .await
        .map_err(|e| CheckpointError::Io(format!("checkpoint task failed: {e}")))?
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let session_id = checkpoint.session_id.clone();
        self.with_session_lock(&session_id, move |path| write_file(path, &checkpoint))
            .await?;
        tracing::debug!(session = %session_id, dir = ?self.dir, "checkpoint saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(session_id)?;
        tokio::task::spawn_blocking(move || read_file(&path))
            .await
            .map_err(|e| CheckpointError::Io(format!("checkpoint task failed: {e}")))?
    }

    async fn claim(&self, token: &ResumeToken) -> Result<Checkpoint, CheckpointError> {
        let session_id = token.session_id.clone();
        let token = token.clone();
        self.with_session_lock(&session_id, move |path| {
            let mut checkpoint =
                read_file(path)?.ok_or_else(|| CheckpointError::NotFound(token.session_id.clone()))?;
            checkpoint.claim(&token)?;
            write_file(path, &checkpoint)?;
            Ok(checkpoint)
        })
        .await
    }

    async fn suspended_sessions(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::Io(e.to_string())),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(stem).await {
                Ok(Some(cp)) if cp.status == CheckpointStatus::Suspended => ids.push(cp.session_id),
                Ok(_) => {}
                Err(e) => tracing::warn!(file = ?path, error = %e, "skipping unreadable checkpoint"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
