use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 进度事件：运行内百分比单调不减，终态时以 100 结束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub current_step: String,
    pub percentage: f64,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl ProgressEvent {
    pub fn new(
        job_id: impl Into<String>,
        current_step: impl Into<String>,
        percentage: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            current_step: current_step.into(),
            percentage,
            message: message.into(),
            timestamp: Local::now(),
        }
    }
}
