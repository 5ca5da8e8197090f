//! 指令解析 - 业务能力层
//!
//! 基于正则的解析器，只负责产出（县, 标识符, 文档类型）三元组，
//! 不做语义理解。

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use crate::models::county::CountyRegistry;
use crate::models::document::DocumentKind;
use crate::models::request::CollectionRequest;

/// 未提及县时的默认值
pub const DEFAULT_COUNTY: &str = "charleston";

/// 10 位地块编号（TMS）
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{10}\b").expect("identifier pattern is valid"));

/// 文档类型关键词，按输出顺序排列
static KIND_PATTERNS: LazyLock<Vec<(DocumentKind, Regex)>> = LazyLock::new(|| {
    [
        (DocumentKind::PropertyCard, r"property\s+card"),
        (DocumentKind::TaxInfo, r"tax\s+info(rmation)?"),
        (DocumentKind::TaxBill, r"tax\s+bill"),
        (DocumentKind::TaxReceipt, r"tax\s+receipt"),
        (DocumentKind::Deed, r"deed"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("document pattern is valid")))
    .collect()
});

/// 指令解析器
#[derive(Debug, Clone)]
pub struct InstructionParser {
    counties: Arc<CountyRegistry>,
}

impl InstructionParser {
    pub fn new(counties: Arc<CountyRegistry>) -> Self {
        Self { counties }
    }

    pub fn parse(&self, instruction: &str) -> CollectionRequest {
        let lower = instruction.to_lowercase();
        let county = self.detect_county(&lower);
        let identifiers: Vec<&str> = IDENTIFIER_RE
            .find_iter(instruction)
            .map(|m| m.as_str())
            .collect();
        let kinds = detect_kinds(&lower);

        let request = CollectionRequest::new(county, identifiers, kinds);
        info!(
            "🧾 指令已解析: 县 {} | 标识符 {:?} | 文档类型 {:?}",
            request.county,
            request.identifiers,
            request.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>()
        );
        request
    }

    /// 配置表中第一个出现在文本里的县
    fn detect_county(&self, lower: &str) -> String {
        match self.counties.keys().find(|key| lower.contains(*key)) {
            Some(key) => key.to_string(),
            None => {
                debug!("指令中未提及县，使用默认值 {}", DEFAULT_COUNTY);
                DEFAULT_COUNTY.to_string()
            }
        }
    }
}

fn detect_kinds(lower: &str) -> Vec<DocumentKind> {
    let kinds: Vec<DocumentKind> = KIND_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(lower))
        .map(|(kind, _)| *kind)
        .collect();
    if !kinds.is_empty() {
        return kinds;
    }
    if lower.contains("all") || lower.contains("documents") {
        DocumentKind::DEFAULTS.to_vec()
    } else {
        vec![DocumentKind::PropertyCard]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> InstructionParser {
        InstructionParser::new(Arc::new(CountyRegistry::builtin()))
    }

    #[test]
    fn parses_county_identifiers_and_kinds() {
        let request = parser().parse(
            "Collect the property card and tax information for parcel 5590200072 in Charleston",
        );
        assert_eq!(request.county, "charleston");
        assert_eq!(request.identifiers, vec!["5590200072"]);
        assert_eq!(request.kinds, vec![DocumentKind::PropertyCard, DocumentKind::TaxInfo]);
    }

    #[test]
    fn identifiers_are_deduplicated_in_order() {
        let request = parser().parse("Berkeley deeds for 2590502005, 1234567890 and 2590502005");
        assert_eq!(request.county, "berkeley");
        assert_eq!(request.identifiers, vec!["2590502005", "1234567890"]);
        assert_eq!(request.kinds, vec![DocumentKind::Deed]);
    }

    #[test]
    fn longer_digit_runs_are_not_identifiers() {
        let request = parser().parse("parcel 12345678901 and 5590200072");
        assert_eq!(request.identifiers, vec!["5590200072"]);
    }

    #[test]
    fn kind_defaults_depend_on_wording() {
        let parser = parser();
        assert_eq!(
            parser.parse("get all documents for 5590200072").kinds,
            DocumentKind::DEFAULTS.to_vec()
        );
        assert_eq!(
            parser.parse("look up 5590200072").kinds,
            vec![DocumentKind::PropertyCard]
        );
    }

    #[test]
    fn unknown_county_falls_back_to_default() {
        assert_eq!(parser().parse("tax bill for 5590200072").county, DEFAULT_COUNTY);
    }
}
