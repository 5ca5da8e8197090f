//! # County Doc Collector
//!
//! 把"采集某县某地块的文档"这类指令转换为有序的自动化步骤并执行，
//! 跟踪进度，汇总结果（收集到的文档、错误、耗时）。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `browser/` - 启动或连接 Chromium
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `Navigator` - 导航能力（Chrome 实现 / 离线实现）
//! - `DocumentStore` - 文档落盘与执行摘要
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `InstructionParser` - 指令 → （县, 标识符, 文档类型）
//! - `PlanBuilder` - 确定性地生成执行计划
//! - `ResultAggregator` - 终态推导、指标与执行摘要
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个步骤"的执行方式
//! - `PlanContext` - 上下文封装（run_id + 步骤序号）
//! - `StepExecutor` - 按步骤类型分派，错误在此边界被收敛
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 运行登记、并发上限、取消、批量执行
//! - `orchestrator/run_processor` - 单次运行的状态机
//! - `orchestrator/progress` - 有界进度通道
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, ConfigOverrides};
pub use error::{AppError, Result};
pub use infrastructure::{DocumentStore, FsDocumentStore, MockNavigator, Navigator};
pub use models::{
    CollectionRequest, DocumentKind, ExecutionResult, ExecutionStatus, Plan, ProgressEvent, Step,
    StepKind,
};
pub use orchestrator::{App, ExecutionOrchestrator, ProgressSink, RunHandle};
pub use services::{InstructionParser, PlanBuilder, ResultAggregator};
pub use workflow::{PlanContext, StepExecutor};
