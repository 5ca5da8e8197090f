//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责运行调度和并发控制，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 应用入口
//! - 分配运行 ID，登记取消令牌
//! - 控制并发运行数量（Semaphore）
//! - 为每次运行创建独立的导航能力
//! - 批量执行并输出全局统计信息
//!
//! ### `run_processor` - 单次运行处理器
//! - 生成计划、初始化导航能力
//! - 逐步执行，记录完成/失败步骤
//! - 计算终态，持久化摘要，释放资源
//!
//! ### `progress` - 进度通道
//! - 有界 broadcast 通道，满时丢弃最旧事件
//! - 单调不减的百分比上报
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<CollectionRequest>)
//!     ↓
//! run_processor (处理 Plan 中的 Vec<Step>)
//!     ↓
//! workflow::StepExecutor (处理单个 Step)
//!     ↓
//! services (能力层：plan_builder / result_aggregator)
//!     ↓
//! infrastructure (基础设施：Navigator / DocumentStore)
//! ```

pub mod batch_processor;
pub mod progress;
pub mod run_processor;

// 重新导出主要类型
pub use batch_processor::{App, BatchStats, RunHandle};
pub use progress::{ProgressReporter, ProgressSink};
pub use run_processor::ExecutionOrchestrator;
