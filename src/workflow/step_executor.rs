//! 单步执行 - 流程层
//!
//! 按步骤类型分派到导航能力或存储协作者，返回统一的 `StepOutcome`。
//!
//! 能力返回的错误、超时和 panic 都在这里被转换为失败结果，
//! 不会逃逸到编排层。

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::infrastructure::navigator::{FieldMap, Navigator};
use crate::infrastructure::storage::DocumentStore;
use crate::models::plan::{params, Step, StepKind};
use crate::models::result::StepOutcome;
use crate::workflow::plan_ctx::PlanContext;

/// 查询输入框的规范字段键，按优先级排列
pub const SEARCH_FIELD_PRIORITY: [&str; 2] = ["tms_input", "search_input"];

/// 单步执行器
///
/// - 只读步骤，不修改计划
/// - 不持有导航能力，由编排层按次借入
#[derive(Clone)]
pub struct StepExecutor {
    store: Arc<dyn DocumentStore>,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// 执行一个步骤
    ///
    /// 超出步骤的超时预算记为 `TimeoutError`，能力内部 panic 记为 `PanicError`。
    pub async fn execute(
        &self,
        navigator: &mut dyn Navigator,
        step: &Step,
        ctx: &PlanContext,
    ) -> StepOutcome {
        debug!("{} ▶ {}: {}", ctx, step.kind, step.expected_outcome);
        let dispatch = AssertUnwindSafe(self.dispatch(navigator, step, ctx)).catch_unwind();

        let result = match timeout(step.timeout(), dispatch).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(AppError::Panic(panic_message(panic))),
            Err(_) => Err(AppError::timeout(&step.step_id, step.timeout_ms)),
        };

        match result {
            Ok(outcome) => {
                info!("{} ✓ {} 完成", ctx, step.step_id);
                outcome
            }
            Err(e) => {
                warn!("{} ❌ {} 失败 [{}]: {}", ctx, step.step_id, e.kind(), e);
                StepOutcome::failed(&e)
            }
        }
    }

    async fn dispatch(
        &self,
        navigator: &mut dyn Navigator,
        step: &Step,
        ctx: &PlanContext,
    ) -> Result<StepOutcome, AppError> {
        match step.kind {
            StepKind::Navigate => {
                if navigator.navigate(&step.target_url, &ctx.county).await? {
                    Ok(StepOutcome::succeeded())
                } else {
                    Err(AppError::step_failed(
                        &step.step_id,
                        format!("无法打开页面 {}", step.target_url),
                    ))
                }
            }
            StepKind::Search => {
                let fields = search_fields(step)?;
                if navigator.fill_form(&fields, true).await? {
                    Ok(StepOutcome::succeeded())
                } else {
                    Err(AppError::step_failed(&step.step_id, "查询表单填写失败"))
                }
            }
            StepKind::Extract => {
                // 字段缺失只体现为空值，不算步骤失败
                let extracted = navigator.extract(&step.selectors).await?;
                let empty = extracted.values().filter(|v| v.is_empty()).count();
                if empty > 0 {
                    debug!("{} 提取结果中有 {} 个空字段", ctx, empty);
                }
                Ok(StepOutcome::succeeded().with_extracted(extracted))
            }
            StepKind::Download => self.download(navigator, step, ctx).await,
            StepKind::Organize => {
                let cleaned = self.store.cleanup_empty_folders().await?;
                info!("{} 🧹 已清理 {} 个空目录", ctx, cleaned);
                Ok(StepOutcome::succeeded().with_folders_cleaned(cleaned))
            }
        }
    }

    async fn download(
        &self,
        navigator: &mut dyn Navigator,
        step: &Step,
        ctx: &PlanContext,
    ) -> Result<StepOutcome, AppError> {
        let identifier = required_param(step, params::IDENTIFIER)?;
        let kind = step
            .document_kind()?
            .ok_or_else(|| AppError::step_failed(&step.step_id, "缺少参数 document_kind"))?;
        let county = step.param_str(params::COUNTY).unwrap_or(ctx.county.as_str());

        match navigator.download(&step.selectors, county).await? {
            Some(document) => {
                let path = self
                    .store
                    .save_document(&document.bytes, identifier, kind, county)
                    .await?;
                debug!("{} 文档来源: {}", ctx, document.url);
                Ok(StepOutcome::succeeded().with_artifacts(vec![path]))
            }
            None => {
                info!("{} 未找到 {} 的下载链接，跳过", ctx, kind.display_name());
                Ok(StepOutcome::succeeded())
            }
        }
    }
}

/// 查询字段：第一个匹配的规范字段键的选择器 → 标识符
fn search_fields(step: &Step) -> Result<FieldMap, AppError> {
    let identifier = required_param(step, params::IDENTIFIER)?;
    let selector = SEARCH_FIELD_PRIORITY
        .iter()
        .find_map(|key| step.selectors.get(*key))
        .ok_or_else(|| AppError::step_failed(&step.step_id, "没有可用的查询输入框选择器"))?;
    Ok(BTreeMap::from([(selector.clone(), identifier.to_string())]))
}

fn required_param<'a>(step: &'a Step, key: &str) -> Result<&'a str, AppError> {
    step.param_str(key)
        .ok_or_else(|| AppError::step_failed(&step.step_id, format!("缺少参数 {}", key)))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
