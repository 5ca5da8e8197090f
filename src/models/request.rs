//! 解析后的采集请求
//!
//! 解析器的输出契约：县 + 目标标识符 + 文档类型

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::document::DocumentKind;

/// 一次采集请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRequest {
    /// 县配置键（如 "charleston"）
    pub county: String,
    /// 目标标识符（地块编号），去重并保持插入顺序
    pub identifiers: Vec<String>,
    /// 文档类型，去重并保持插入顺序；为空时由 PlanBuilder 使用默认值
    pub kinds: Vec<DocumentKind>,
}

impl CollectionRequest {
    pub fn new<I, S>(county: impl Into<String>, identifiers: I, kinds: Vec<DocumentKind>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            county: county.into(),
            identifiers: dedup_in_order(
                identifiers
                    .into_iter()
                    .map(|id| {
                        let id: String = id.into();
                        id.trim().to_string()
                    })
                    .filter(|id| !id.is_empty()),
            ),
            kinds: dedup_in_order(kinds),
        }
    }
}

fn dedup_in_order<T, I>(items: I) -> Vec<T>
where
    T: Clone + Eq + std::hash::Hash,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
