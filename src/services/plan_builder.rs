//! 计划生成 - 业务能力层
//!
//! 把（县, 标识符, 文档类型）确定性地展开为有序步骤序列：
//! 每个标识符 × 文档类型生成 navigate → search → extract → download 四步，
//! 最后追加一个 organize 步骤。
//!
//! 纯函数：不读时钟、不产生随机数，相同输入与县配置得到逐字节相同的计划。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::models::county::{CountyConfig, CountyRegistry};
use crate::models::document::DocumentKind;
use crate::models::plan::{params, Plan, Step, StepKind};

/// 每个标识符 × 文档类型生成的步骤数
pub const STEPS_PER_DOCUMENT: usize = 4;

/// 步骤预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSettings {
    pub step_timeout_ms: u64,
    pub max_step_retries: u32,
    pub seconds_per_document: u64,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            max_step_retries: 3,
            seconds_per_document: 180,
        }
    }
}

impl From<&Config> for PlanSettings {
    fn from(config: &Config) -> Self {
        Self {
            step_timeout_ms: config.step_timeout_ms,
            max_step_retries: config.max_step_retries,
            seconds_per_document: config.seconds_per_document,
        }
    }
}

/// 计划生成器
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    counties: Arc<CountyRegistry>,
    settings: PlanSettings,
}

impl PlanBuilder {
    pub fn new(counties: Arc<CountyRegistry>, settings: PlanSettings) -> Self {
        Self { counties, settings }
    }

    /// 生成执行计划
    ///
    /// `kinds` 为空时使用默认文档类型；县不在配置表中时返回 `ConfigError`。
    pub fn build(
        &self,
        county: &str,
        identifiers: &[String],
        kinds: &[DocumentKind],
    ) -> Result<Plan, AppError> {
        let county_config = self.counties.lookup(county)?;
        let county = county.trim().to_lowercase();
        let kinds = if kinds.is_empty() {
            DocumentKind::DEFAULTS.to_vec()
        } else {
            kinds.to_vec()
        };

        let mut steps = StepSequence::new(self.settings);
        for identifier in identifiers {
            for &kind in &kinds {
                steps.push_document_steps(&county, county_config, identifier, kind);
            }
        }
        steps.push(
            StepKind::Organize,
            String::new(),
            BTreeMap::from([(params::IDENTIFIERS.to_string(), json!(identifiers))]),
            BTreeMap::new(),
            "整理已收集的文档".to_string(),
        );

        let document_count = (identifiers.len() * kinds.len()) as u64;
        let plan = Plan {
            county,
            identifiers: identifiers.to_vec(),
            kinds,
            steps: steps.finish(),
            estimated_duration_secs: document_count * self.settings.seconds_per_document,
        };

        info!(
            "📋 计划已生成: 县 {} | 标识符 {} 个 | 文档类型 {} 种 | 步骤 {} 个 | 预计 {} 秒",
            plan.county,
            plan.identifiers.len(),
            plan.kinds.len(),
            plan.len(),
            plan.estimated_duration_secs
        );
        Ok(plan)
    }
}

/// 按发射顺序分配步骤 ID
struct StepSequence {
    settings: PlanSettings,
    steps: Vec<Step>,
}

impl StepSequence {
    fn new(settings: PlanSettings) -> Self {
        Self {
            settings,
            steps: Vec::new(),
        }
    }

    fn push_document_steps(
        &mut self,
        county: &str,
        config: &CountyConfig,
        identifier: &str,
        kind: DocumentKind,
    ) {
        let document_params = || {
            BTreeMap::from([
                (params::IDENTIFIER.to_string(), json!(identifier)),
                (params::DOCUMENT_KIND.to_string(), json!(kind.as_str())),
            ])
        };

        self.push(
            StepKind::Navigate,
            config.search_url.clone(),
            document_params(),
            BTreeMap::new(),
            format!("导航到 {} 查询页面", county),
        );
        self.push(
            StepKind::Search,
            config.search_url.clone(),
            document_params(),
            config.selectors.clone(),
            format!("查询地块 {}", identifier),
        );
        self.push(
            StepKind::Extract,
            String::new(),
            document_params(),
            config.selectors.clone(),
            format!("提取 {} 信息", kind.display_name()),
        );

        let mut download_params = document_params();
        download_params.insert(params::COUNTY.to_string(), json!(county));
        self.push(
            StepKind::Download,
            String::new(),
            download_params,
            config.download_selectors(),
            format!("下载地块 {} 的 {}", identifier, kind.display_name()),
        );
    }

    fn push(
        &mut self,
        kind: StepKind,
        target_url: String,
        parameters: BTreeMap<String, JsonValue>,
        selectors: BTreeMap<String, String>,
        expected_outcome: String,
    ) {
        let step_id = format!("step_{:03}", self.steps.len() + 1);
        self.steps.push(Step {
            step_id,
            kind,
            target_url,
            parameters,
            selectors,
            expected_outcome,
            retry_count: 0,
            max_retries: self.settings.max_step_retries,
            timeout_ms: self.settings.step_timeout_ms,
        });
    }

    fn finish(self) -> Vec<Step> {
        self.steps
    }
}
