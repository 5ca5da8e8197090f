//! 文档存储 - 基础设施层
//!
//! 只负责"把字节落盘"和"写摘要"，不关心流程。
//!
//! 目录布局：
//! ```text
//! <output>/<identifier>/Property Card.pdf
//! <output>/<identifier>/Deeds/Deed.pdf
//! <output>/logs/execution_summary_<run_id>.json
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::models::document::DocumentKind;

/// 目录被并发删除时的最大写入尝试次数
const SAVE_ATTEMPTS: usize = 5;

/// 存储协作者
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 保存文档，返回文档路径
    async fn save_document(
        &self,
        bytes: &[u8],
        identifier: &str,
        kind: DocumentKind,
        county: &str,
    ) -> Result<PathBuf, StorageError>;

    /// 写入执行摘要，返回摘要路径
    async fn write_summary(&self, run_id: &str, data: &JsonValue) -> Result<PathBuf, StorageError>;

    /// 删除输出目录中的空文件夹，返回删除数量
    async fn cleanup_empty_folders(&self) -> Result<usize, StorageError>;
}

/// 基于本地文件系统的存储
///
/// 并发运行可能写入同一输出目录；目录创建是幂等的。
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    base_dir: PathBuf,
    logs_dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let logs_dir = base_dir.join("logs");
        Self { base_dir, logs_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// 文档的目标路径
    pub fn document_path(&self, identifier: &str, kind: DocumentKind) -> PathBuf {
        let mut folder = self.base_dir.join(identifier);
        if let Some(sub) = kind.subfolder() {
            folder = folder.join(sub);
        }
        folder.join(kind.file_name())
    }

    /// 统计输出目录下的全部文件
    pub async fn storage_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats {
            base_dir: self.base_dir.clone(),
            ..Default::default()
        };
        if !fs::try_exists(&self.base_dir).await.unwrap_or(false) {
            return Ok(stats);
        }

        let mut pending = vec![self.base_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::io(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(&dir, e))?
            {
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| StorageError::io(&path, e))?;
                if metadata.is_dir() {
                    pending.push(path);
                } else if metadata.is_file() {
                    stats.total_files += 1;
                    stats.total_bytes += metadata.len();
                    let extension = path
                        .extension()
                        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
                        .unwrap_or_default();
                    *stats.by_extension.entry(extension).or_default() += 1;
                }
            }
        }

        debug!(
            "存储统计: {} 个文件, {} 字节 ({})",
            stats.total_files,
            stats.total_bytes,
            self.base_dir.display()
        );
        Ok(stats)
    }

    /// 某个标识符下各类文档是否已存在，存在时给出字节数
    pub async fn document_status(&self, identifier: &str) -> Vec<(DocumentKind, Option<u64>)> {
        let mut status = Vec::with_capacity(DocumentKind::ALL.len());
        for kind in DocumentKind::ALL {
            let size = fs::metadata(self.document_path(identifier, kind))
                .await
                .ok()
                .filter(|metadata| metadata.is_file())
                .map(|metadata| metadata.len());
            status.push((kind, size));
        }
        status
    }

    async fn create_dir(path: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn save_document(
        &self,
        bytes: &[u8],
        identifier: &str,
        kind: DocumentKind,
        county: &str,
    ) -> Result<PathBuf, StorageError> {
        let path = self.document_path(identifier, kind);
        let folder = path.parent().unwrap_or(&self.base_dir).to_path_buf();

        let mut attempt = 1;
        loop {
            match write_into(&folder, &path, bytes).await {
                Ok(()) => break,
                // 其他运行的整理步骤可能刚删掉了这个空目录，重建后再写
                Err(e) if e.kind() == ErrorKind::NotFound && attempt < SAVE_ATTEMPTS => {
                    debug!("目录被并发删除，重试写入 ({}/{}): {}", attempt, SAVE_ATTEMPTS, path.display());
                    attempt += 1;
                }
                Err(e) => return Err(StorageError::io(&path, e)),
            }
        }

        info!(
            "📄 文档已保存: {} ({} | {} | {} 字节)",
            path.display(),
            county,
            kind,
            bytes.len()
        );
        Ok(path)
    }

    async fn write_summary(&self, run_id: &str, data: &JsonValue) -> Result<PathBuf, StorageError> {
        Self::create_dir(&self.logs_dir).await?;
        let path = self.logs_dir.join(format!("execution_summary_{}.json", run_id));
        let content = serde_json::to_vec_pretty(data)?;
        fs::write(&path, content)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        debug!("执行摘要已写入: {}", path.display());
        Ok(path)
    }

    async fn cleanup_empty_folders(&self) -> Result<usize, StorageError> {
        let base_dir = self.base_dir.clone();
        let logs_dir = self.logs_dir.clone();
        tokio::task::spawn_blocking(move || {
            if !base_dir.exists() {
                return Ok(0);
            }
            prune_empty_dirs(&base_dir, &base_dir, &logs_dir)
        })
        .await
        .map_err(|e| StorageError::io(&self.base_dir, std::io::Error::other(e)))?
    }
}

/// 输出目录统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub base_dir: PathBuf,
    pub total_files: usize,
    pub total_bytes: u64,
    /// 扩展名（小写，含点；无扩展名为空串）→ 文件数
    pub by_extension: BTreeMap<String, usize>,
}

async fn write_into(folder: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(folder).await?;
    fs::write(path, bytes).await
}

/// 自底向上删除空目录，保留根目录和 logs 目录
fn prune_empty_dirs(dir: &Path, root: &Path, keep: &Path) -> Result<usize, StorageError> {
    let mut removed = 0;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // 另一个运行刚删除了它
        Err(e) if e.kind() == ErrorKind::NotFound && dir != root => return Ok(0),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            removed += prune_empty_dirs(&path, root, keep)?;
        }
    }

    if dir == root || dir == keep {
        return Ok(removed);
    }

    let is_empty = match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    if is_empty {
        match std::fs::remove_dir(dir) {
            Ok(()) => {
                debug!("已删除空目录: {}", dir.display());
                removed += 1;
            }
            // 并发运行可能已删除或刚写入
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(_) if has_entries(dir) => {}
            Err(e) => return Err(StorageError::io(dir, e)),
        }
    }
    Ok(removed)
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn saves_deeds_into_their_own_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());

        let card = store
            .save_document(b"%PDF-card", "5590200072", DocumentKind::PropertyCard, "charleston")
            .await
            .unwrap();
        let deed = store
            .save_document(b"%PDF-deed", "5590200072", DocumentKind::Deed, "charleston")
            .await
            .unwrap();

        assert_eq!(card, dir.path().join("5590200072").join("Property Card.pdf"));
        assert_eq!(deed, dir.path().join("5590200072").join("Deeds").join("Deed.pdf"));
        assert_eq!(std::fs::read(&deed).unwrap(), b"%PDF-deed");
    }

    #[tokio::test]
    async fn saving_twice_is_idempotent_on_folders() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        for _ in 0..2 {
            assert_ok!(
                store
                    .save_document(b"x", "2590502005", DocumentKind::TaxBill, "berkeley")
                    .await
            );
        }
    }

    #[tokio::test]
    async fn cleanup_removes_nested_empty_folders_but_keeps_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("111").join("Deeds")).unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        store
            .save_document(b"x", "222", DocumentKind::TaxInfo, "charleston")
            .await
            .unwrap();

        let removed = store.cleanup_empty_folders().await.unwrap();

        assert_eq!(removed, 2);
        assert!(!dir.path().join("111").exists());
        assert!(dir.path().join("logs").exists());
        assert!(dir.path().join("222").join("Tax Info.pdf").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saves_survive_concurrent_folder_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsDocumentStore::new(dir.path()));

        let pruner = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    store.cleanup_empty_folders().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let savers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let identifier = format!("55902000{:02}", i);
                    for _ in 0..20 {
                        store
                            .save_document(b"%PDF", &identifier, DocumentKind::Deed, "charleston")
                            .await
                            .unwrap();
                    }
                    identifier
                })
            })
            .collect();

        for saver in savers {
            let identifier = saver.await.unwrap();
            assert!(store.document_path(&identifier, DocumentKind::Deed).exists());
        }
        pruner.await.unwrap();
    }

    #[tokio::test]
    async fn storage_stats_counts_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        store
            .save_document(b"12345", "5590200072", DocumentKind::PropertyCard, "charleston")
            .await
            .unwrap();
        store
            .save_document(b"123", "5590200072", DocumentKind::Deed, "charleston")
            .await
            .unwrap();
        store
            .write_summary("exec_1", &serde_json::json!({}))
            .await
            .unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();

        let stats = store.storage_stats().await.unwrap();

        assert_eq!(stats.base_dir, dir.path());
        assert_eq!(stats.total_files, 4);
        assert_eq!(stats.by_extension.get(".pdf"), Some(&2));
        assert_eq!(stats.by_extension.get(".json"), Some(&1));
        assert_eq!(stats.by_extension.get(""), Some(&1));
        let summary_len = std::fs::metadata(dir.path().join("logs").join("execution_summary_exec_1.json"))
            .unwrap()
            .len();
        assert_eq!(stats.total_bytes, 5 + 3 + 1 + summary_len);
    }

    #[tokio::test]
    async fn storage_stats_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path().join("never-created"));
        let stats = assert_ok!(store.storage_stats().await);
        assert_eq!(stats.total_files, 0);
        assert!(stats.by_extension.is_empty());
    }

    #[tokio::test]
    async fn document_status_reports_present_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        store
            .save_document(b"abcd", "2590502005", DocumentKind::TaxBill, "berkeley")
            .await
            .unwrap();

        let status = store.document_status("2590502005").await;

        assert_eq!(status.len(), DocumentKind::ALL.len());
        for (kind, size) in status {
            let expected = (kind == DocumentKind::TaxBill).then_some(4);
            assert_eq!(size, expected, "{}", kind);
        }
    }

    #[tokio::test]
    async fn summary_lands_in_logs_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        let path = store
            .write_summary("exec_1", &serde_json::json!({ "ok": true }))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("logs").join("execution_summary_exec_1.json"));
        let parsed: JsonValue = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(parsed["ok"], true);
    }
}
