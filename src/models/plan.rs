//! 执行计划与步骤

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::models::document::DocumentKind;

/// 步骤类型（封闭集合，执行器按此穷举分派）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StepKind {
    Navigate,
    Search,
    Extract,
    Download,
    Organize,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Navigate => "navigate",
            StepKind::Search => "search",
            StepKind::Extract => "extract",
            StepKind::Download => "download",
            StepKind::Organize => "organize",
        }
    }
}

impl Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "navigate" => Ok(StepKind::Navigate),
            "search" => Ok(StepKind::Search),
            "extract" => Ok(StepKind::Extract),
            "download" => Ok(StepKind::Download),
            "organize" => Ok(StepKind::Organize),
            other => Err(AppError::UnknownStepKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for StepKind {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

/// 参数键
pub mod params {
    pub const IDENTIFIER: &str = "identifier";
    pub const IDENTIFIERS: &str = "identifiers";
    pub const DOCUMENT_KIND: &str = "document_kind";
    pub const COUNTY: &str = "county";
}

/// 原子执行单元
///
/// 创建后不可变，唯一例外是编排器对重试计数的递增。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 零填充的序号（"step_001"），是编排器唯一信任的排序键
    pub step_id: String,
    pub kind: StepKind,
    pub target_url: String,
    pub parameters: BTreeMap<String, JsonValue>,
    pub selectors: BTreeMap<String, String>,
    pub expected_outcome: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl Step {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 读取字符串参数
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(JsonValue::as_str)
    }

    /// 读取文档类型参数
    pub fn document_kind(&self) -> Result<Option<DocumentKind>, AppError> {
        self.param_str(params::DOCUMENT_KIND)
            .map(str::parse)
            .transpose()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// 执行计划：每条指令生成一次，执行期间只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub county: String,
    pub identifiers: Vec<String>,
    pub kinds: Vec<DocumentKind>,
    pub steps: Vec<Step>,
    /// 预估耗时（秒）
    pub estimated_duration_secs: u64,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_duration_secs)
    }

    /// 从 JSON 载入计划；未知步骤类型会在这里被拒绝
    pub fn from_json(text: &str) -> Result<Self, AppError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| AppError::InvalidPlan(e.to_string()))?;
        let kinds = value
            .get("steps")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .filter_map(|step| step.get("kind").and_then(JsonValue::as_str));
        for kind in kinds {
            kind.parse::<StepKind>()?;
        }
        serde_json::from_value(value).map_err(|e| AppError::InvalidPlan(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_kind_round_trips_through_strings() {
        for kind in [
            StepKind::Navigate,
            StepKind::Search,
            StepKind::Extract,
            StepKind::Download,
            StepKind::Organize,
        ] {
            assert_eq!(kind.as_str().parse::<StepKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_step_kind_carries_offending_string() {
        let err = "teleport".parse::<StepKind>().unwrap_err();
        assert!(matches!(err, AppError::UnknownStepKind(ref k) if k == "teleport"));
        assert_eq!(err.kind(), "UnknownStepKindError");
    }

    #[test]
    fn plan_json_with_unknown_kind_is_rejected() {
        let json = r#"{
            "county": "charleston",
            "identifiers": [],
            "kinds": [],
            "steps": [{
                "step_id": "step_001",
                "kind": "teleport",
                "target_url": "",
                "parameters": {},
                "selectors": {},
                "expected_outcome": "",
                "retry_count": 0,
                "max_retries": 3,
                "timeout_ms": 1000
            }],
            "estimated_duration_secs": 0
        }"#;
        let err = Plan::from_json(json).unwrap_err();
        assert!(matches!(err, AppError::UnknownStepKind(ref k) if k == "teleport"));
    }

    #[test]
    fn malformed_plan_json_is_invalid_plan() {
        let err = Plan::from_json(r#"{ "county": "charleston", "steps": "nope" }"#).unwrap_err();
        assert!(matches!(err, AppError::InvalidPlan(_)));
        assert_eq!(err.kind(), "InvalidPlanError");
    }

    #[test]
    fn estimated_duration_is_in_seconds() {
        let plan = Plan {
            county: "berkeley".into(),
            identifiers: vec![],
            kinds: vec![],
            steps: vec![],
            estimated_duration_secs: 540,
        };
        assert_eq!(plan.estimated_duration(), Duration::from_secs(540));
    }
}
