//! 步骤结果与执行结果

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::AppError;

/// 运行状态
///
/// `NotStarted → InProgress → {Success, Partial, Failed, Cancelled}`，终态不可离开。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    NotStarted,
    InProgress,
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Partial
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::NotStarted => "not_started",
            ExecutionStatus::InProgress => "in_progress",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 步骤失败描述：错误标签 + 消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: String,
    pub message: String,
}

impl From<&AppError> for StepFailure {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// 单个步骤的执行结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    /// 下载步骤产出的文档路径
    pub artifacts: Vec<PathBuf>,
    pub error: Option<StepFailure>,
    /// 提取步骤的字段结果（不是文档）
    pub extracted: Option<BTreeMap<String, String>>,
    /// 整理步骤清理掉的空目录数
    pub folders_cleaned: Option<usize>,
}

impl StepOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(err: &AppError) -> Self {
        Self {
            success: false,
            error: Some(StepFailure::from(err)),
            ..Default::default()
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_extracted(mut self, extracted: BTreeMap<String, String>) -> Self {
        self.extracted = Some(extracted);
        self
    }

    pub fn with_folders_cleaned(mut self, count: usize) -> Self {
        self.folders_cleaned = Some(count);
        self
    }
}

/// 错误记录（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_kind: String,
    pub message: String,
    pub step_id: Option<String>,
    pub timestamp: DateTime<Local>,
    pub context: BTreeMap<String, JsonValue>,
    pub retry_count: u32,
    pub resolved: bool,
}

impl ErrorRecord {
    pub fn new(error_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_kind: error_kind.into(),
            message: message.into(),
            step_id: None,
            timestamp: Local::now(),
            context: BTreeMap::new(),
            retry_count: 0,
            resolved: false,
        }
    }

    pub fn from_error(err: &AppError) -> Self {
        Self::new(err.kind(), err.to_string())
    }

    pub fn from_failure(failure: &StepFailure, step_id: impl Into<String>) -> Self {
        Self::new(failure.kind.clone(), failure.message.clone()).with_step(step_id)
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// 运行指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_steps: usize,
    pub success_rate: f64,
    pub documents_count: usize,
    pub county: String,
    pub identifier_count: usize,
}

/// 一次运行的累加器与最终报告
///
/// 只由拥有该运行的编排器修改；状态进入终态后不再变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub status: ExecutionStatus,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub documents: Vec<PathBuf>,
    pub errors: Vec<ErrorRecord>,
    /// 执行耗时（秒）
    pub execution_time: f64,
    pub metrics: ExecutionMetrics,
    pub started_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
    /// 提取步骤的字段结果，按步骤 ID 索引
    pub extracted: BTreeMap<String, BTreeMap<String, String>>,
}

impl ExecutionResult {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: ExecutionStatus::NotStarted,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            documents: Vec::new(),
            errors: Vec::new(),
            execution_time: 0.0,
            metrics: ExecutionMetrics::default(),
            started_at: None,
            completed_at: None,
            extracted: BTreeMap::new(),
        }
    }

    /// 进入 InProgress 并记录开始时间
    pub fn start(run_id: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::InProgress,
            started_at: Some(Local::now()),
            ..Self::new(run_id)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn record_success(&mut self, step_id: &str, outcome: StepOutcome) {
        if self.is_terminal() {
            return;
        }
        self.completed_steps.push(step_id.to_string());
        self.documents.extend(outcome.artifacts);
        if let Some(extracted) = outcome.extracted {
            self.extracted.insert(step_id.to_string(), extracted);
        }
    }

    pub(crate) fn record_failure(&mut self, step_id: &str, record: ErrorRecord) {
        if self.is_terminal() {
            return;
        }
        self.failed_steps.push(step_id.to_string());
        self.errors.push(record);
    }

    /// 记录不属于任何步骤的致命错误
    pub(crate) fn record_error(&mut self, record: ErrorRecord) {
        if self.is_terminal() {
            return;
        }
        self.errors.push(record);
    }

    /// 关闭运行：设置终态、结束时间和耗时
    pub(crate) fn close(&mut self, status: ExecutionStatus) {
        if self.is_terminal() {
            return;
        }
        let now = Local::now();
        self.status = status;
        self.execution_time = self
            .started_at
            .map(|started| (now - started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        self.completed_at = Some(now);
    }
}
