//! 结果汇总 - 业务能力层
//!
//! 由完成/失败步骤与收集到的文档计算终态、指标，并持久化执行摘要。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::infrastructure::storage::DocumentStore;
use crate::models::result::{ExecutionMetrics, ExecutionResult, ExecutionStatus};

/// 计算文档指纹时的分块大小
const CHUNK_SIZE: usize = 4096;

/// 推导运行终态
///
/// 取消优先；没有失败即成功（包括完成与失败都为空的情况，运行仍须到达终态）。
pub fn derive_status(completed: usize, failed: usize, cancelled: bool) -> ExecutionStatus {
    if cancelled {
        ExecutionStatus::Cancelled
    } else if failed == 0 {
        ExecutionStatus::Success
    } else if completed > 0 {
        ExecutionStatus::Partial
    } else {
        ExecutionStatus::Failed
    }
}

/// 计算运行指标
pub fn compute_metrics(
    result: &ExecutionResult,
    total_steps: usize,
    county: &str,
    identifier_count: usize,
) -> ExecutionMetrics {
    let success_rate = if total_steps > 0 {
        result.completed_steps.len() as f64 / total_steps as f64
    } else {
        0.0
    };
    ExecutionMetrics {
        total_steps,
        success_rate,
        documents_count: result.documents.len(),
        county: county.to_string(),
        identifier_count,
    }
}

/// 摘要中的单个文档元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFingerprint {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub sha256: String,
}

impl DocumentFingerprint {
    /// 分块读取文件计算 SHA-256；文件不存在或不可读时大小为 0、哈希为空
    pub async fn of(path: &Path) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (size, sha256) = match hash_file(path).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("无法计算文档指纹 {}: {}", path.display(), e);
                (0, String::new())
            }
        };
        Self {
            path: path.display().to_string(),
            filename,
            size,
            sha256,
        }
    }
}

async fn hash_file(path: &Path) -> std::io::Result<(u64, String)> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((size, format!("{:x}", hasher.finalize())))
}

/// 结果汇总器
#[derive(Clone)]
pub struct ResultAggregator {
    store: Arc<dyn DocumentStore>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// 生成并持久化执行摘要，返回摘要路径
    ///
    /// 写入失败返回 `PersistenceError`，不影响已确定的运行状态。
    pub async fn summarize(
        &self,
        run_id: &str,
        result: &ExecutionResult,
    ) -> Result<PathBuf, AppError> {
        let mut documents = Vec::with_capacity(result.documents.len());
        for path in &result.documents {
            documents.push(DocumentFingerprint::of(path).await);
        }
        let total_size: u64 = documents.iter().map(|doc| doc.size).sum();

        let summary = json!({
            "execution_id": run_id,
            "timestamp": Local::now().to_rfc3339(),
            "status": result.status,
            "execution_time": result.execution_time,
            "results": result.metrics,
            "completed_steps": result.completed_steps,
            "failed_steps": result.failed_steps,
            "errors": result.errors,
            "documents": documents,
            "summary": {
                "total_documents": documents.len(),
                "total_size": total_size,
                "success_rate": result.metrics.success_rate,
            },
        });
        debug!("执行摘要: {} 个文档, 共 {} 字节", documents.len(), total_size);

        let path = self
            .store
            .write_summary(run_id, &summary)
            .await
            .map_err(AppError::Persistence)?;
        info!("📝 执行摘要已保存: {}", path.display());
        Ok(path)
    }
}
