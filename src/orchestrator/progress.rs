//! 进度事件通道
//!
//! 编排器通过有界 broadcast 通道发送进度事件：通道满时丢弃最旧的事件，
//! 慢消费者收到 `Lagged(n)` 后从最新事件继续，运行本身永不阻塞。
//!
//! 进度刻度：0–10 解析，10–20 初始化，20–90 步骤，90–95 收尾，95–100 摘要/完成。

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::progress::ProgressEvent;

pub const PARSED: f64 = 10.0;
pub const INITIALIZED: f64 = 20.0;
pub const STEPS_SPAN: f64 = 70.0;
pub const FINALIZING: f64 = 95.0;
pub const COMPLETE: f64 = 100.0;

/// 第 `index` 步（从 0 开始）开始执行前的百分比
pub fn step_percentage(index: usize, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return INITIALIZED;
    }
    INITIALIZED + STEPS_SPAN * (index + 1) as f64 / total_steps as f64
}

/// 进度接收端的发送侧
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<broadcast::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// 创建容量为 `capacity` 的通道，返回发送侧和一个接收端
    pub fn bounded(capacity: usize) -> (Self, broadcast::Receiver<ProgressEvent>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// 不关心进度的调用方使用
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// 发送即忘：没有接收端不是错误
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("进度事件无人接收");
            }
        }
    }
}

/// 单次运行的进度上报器，保证百分比单调不减
#[derive(Debug)]
pub struct ProgressReporter {
    job_id: String,
    sink: ProgressSink,
    last: f64,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<String>, sink: ProgressSink) -> Self {
        Self {
            job_id: job_id.into(),
            sink,
            last: 0.0,
        }
    }

    pub fn report(&mut self, current_step: &str, percentage: f64, message: impl Into<String>) {
        let percentage = percentage.clamp(0.0, COMPLETE).max(self.last);
        self.last = percentage;
        self.sink.emit(ProgressEvent::new(
            self.job_id.clone(),
            current_step,
            percentage,
            message,
        ));
    }

    pub fn last(&self) -> f64 {
        self.last
    }
}
