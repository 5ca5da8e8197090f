//! 单次运行处理器 - 编排层
//!
//! ## 职责
//!
//! 驱动一次运行的状态机：
//! `NotStarted → InProgress → {Success, Partial, Failed, Cancelled}`
//!
//! 1. **生成计划**：县配置缺失时直接失败
//! 2. **初始化能力**：失败时直接失败，不执行任何步骤
//! 3. **逐步执行**：按步骤 ID 顺序执行，单步失败不中断（尽力而为）
//! 4. **协作式取消**：每个步骤开始前检查取消标记
//! 5. **收尾**：计算终态和指标，持久化摘要（失败只记录日志）
//! 6. **释放资源**：任何路径下都恰好调用一次 `cleanup()`

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::navigator::Navigator;
use crate::infrastructure::storage::DocumentStore;
use crate::models::plan::{Plan, Step};
use crate::models::request::CollectionRequest;
use crate::models::result::{
    ErrorRecord, ExecutionResult, ExecutionStatus, StepFailure, StepOutcome,
};
use crate::orchestrator::progress::{self, ProgressReporter, ProgressSink};
use crate::services::plan_builder::{PlanBuilder, PlanSettings};
use crate::services::result_aggregator::{compute_metrics, derive_status, ResultAggregator};
use crate::workflow::{PlanContext, StepExecutor};

/// 运行编排器
///
/// 无内部可变状态，可被多个并发运行共享；每次运行独占自己的计划、结果和导航能力。
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    planner: PlanBuilder,
    executor: StepExecutor,
    aggregator: ResultAggregator,
    retry_failed_steps: bool,
}

impl ExecutionOrchestrator {
    pub fn new(planner: PlanBuilder, executor: StepExecutor, aggregator: ResultAggregator) -> Self {
        Self {
            planner,
            executor,
            aggregator,
            retry_failed_steps: false,
        }
    }

    /// 按配置组装
    pub fn from_config(config: &Config, store: Arc<dyn DocumentStore>) -> Self {
        let planner = PlanBuilder::new(Arc::new(config.county_registry()), PlanSettings::from(config));
        Self::new(
            planner,
            StepExecutor::new(store.clone()),
            ResultAggregator::new(store),
        )
        .with_retries(config.retry_failed_steps)
    }

    /// 失败步骤是否在 `max_retries` 内重试
    pub fn with_retries(mut self, enabled: bool) -> Self {
        self.retry_failed_steps = enabled;
        self
    }

    pub fn planner(&self) -> &PlanBuilder {
        &self.planner
    }

    /// 执行一次运行，总是返回终态结果
    pub async fn run(
        &self,
        run_id: &str,
        request: &CollectionRequest,
        mut navigator: Box<dyn Navigator>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let mut reporter = ProgressReporter::new(run_id, progress);
        let mut result = ExecutionResult::start(run_id);
        info!("▶ 运行 {} 开始: 县 {}", run_id, request.county);

        let plan = match self
            .planner
            .build(&request.county, &request.identifiers, &request.kinds)
        {
            Ok(plan) => {
                info!(
                    "运行 {} 计划: {} 个步骤, 预计 {:?}",
                    run_id,
                    plan.len(),
                    plan.estimated_duration()
                );
                Some(plan)
            }
            Err(e) => {
                error!("运行 {} 计划生成失败: {}", run_id, e);
                result.record_error(ErrorRecord::from_error(&e));
                None
            }
        };
        reporter.report("parse", progress::PARSED, "计划已生成");

        let mut fatal = plan.is_none();
        if let Some(plan) = &plan {
            if cancel.is_cancelled() {
                info!("运行 {} 在开始前已被取消", run_id);
            } else {
                match navigator.initialize().await {
                    Ok(()) => {
                        reporter.report("initialize", progress::INITIALIZED, "导航能力已就绪");
                        self.execute_steps(
                            run_id,
                            plan,
                            navigator.as_mut(),
                            &mut result,
                            &mut reporter,
                            &cancel,
                        )
                        .await;
                    }
                    Err(e) => {
                        let e = AppError::CapabilityInit(e);
                        error!("运行 {} 导航能力初始化失败: {}", run_id, e);
                        result.record_error(ErrorRecord::from_error(&e));
                        fatal = true;
                    }
                }
            }
        }

        reporter.report("finalize", progress::FINALIZING, "正在汇总结果");
        let status = if fatal {
            ExecutionStatus::Failed
        } else {
            derive_status(
                result.completed_steps.len(),
                result.failed_steps.len(),
                cancel.is_cancelled(),
            )
        };
        result.metrics = compute_metrics(
            &result,
            plan.as_ref().map(Plan::len).unwrap_or(0),
            &request.county,
            request.identifiers.len(),
        );
        result.close(status);

        if let Err(e) = self.aggregator.summarize(run_id, &result).await {
            warn!("运行 {} 执行摘要写入失败（不影响结果）: {}", run_id, e);
        }
        if let Err(e) = navigator.cleanup().await {
            warn!("运行 {} 释放导航能力失败: {}", run_id, e);
        }

        reporter.report("complete", progress::COMPLETE, format!("运行结束: {}", result.status));
        info!(
            "■ 运行 {} 结束: {} | 完成 {} | 失败 {} | 文档 {} | 耗时 {:.2}s",
            run_id,
            result.status,
            result.completed_steps.len(),
            result.failed_steps.len(),
            result.documents.len(),
            result.execution_time
        );
        result
    }

    /// 主循环：单步失败不中断，取消只在步骤边界生效
    async fn execute_steps(
        &self,
        run_id: &str,
        plan: &Plan,
        navigator: &mut dyn Navigator,
        result: &mut ExecutionResult,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) {
        let total = plan.len();
        let base_ctx = PlanContext::new(run_id, plan.county.clone(), total);

        for (index, step) in plan.steps.iter().enumerate() {
            let ctx = base_ctx.at(index);
            if cancel.is_cancelled() {
                info!("{} ⏹ 收到取消请求，剩余 {} 个步骤不再执行", ctx, total - index);
                return;
            }

            reporter.report(
                &step.step_id,
                progress::step_percentage(index, total),
                format!("执行 {}: {}", step.kind, step.expected_outcome),
            );

            let (outcome, retry_count) = self.execute_with_retries(navigator, step, &ctx, cancel).await;
            if outcome.success {
                result.record_success(&step.step_id, outcome);
            } else {
                let failure = outcome.error.unwrap_or_else(|| StepFailure {
                    kind: "StepExecutionError".to_string(),
                    message: format!("步骤 {} 执行失败", step.step_id),
                });
                let record = ErrorRecord::from_failure(&failure, &step.step_id)
                    .with_context("step_kind", step.kind.as_str())
                    .with_context("target_url", step.target_url.as_str())
                    .with_retry_count(retry_count);
                result.record_failure(&step.step_id, record);
            }
        }
    }

    /// 执行步骤；启用重试时失败步骤在 `max_retries` 内重新执行
    async fn execute_with_retries(
        &self,
        navigator: &mut dyn Navigator,
        step: &Step,
        ctx: &PlanContext,
        cancel: &CancellationToken,
    ) -> (StepOutcome, u32) {
        let mut attempt = step.clone();
        loop {
            let outcome = self.executor.execute(navigator, &attempt, ctx).await;
            if outcome.success
                || !self.retry_failed_steps
                || !attempt.can_retry()
                || cancel.is_cancelled()
            {
                return (outcome, attempt.retry_count);
            }
            attempt.retry_count += 1;
            info!(
                "{} 🔄 重试 {} ({}/{})",
                ctx, attempt.step_id, attempt.retry_count, attempt.max_retries
            );
        }
    }
}
