//! 县站点配置
//!
//! 只读的县配置查询表：进程内共享，加载后不再修改

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 县站点的请求频率限制
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_minute: u32,
    /// 每次导航/下载前等待的秒数
    pub delay_between_requests: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            delay_between_requests: 2,
        }
    }
}

impl RateLimit {
    /// 两次请求之间的最小间隔：固定等待与每分钟配额中取较严者
    pub fn min_interval(&self) -> Duration {
        let fixed = Duration::from_secs(self.delay_between_requests);
        if self.requests_per_minute == 0 {
            return fixed;
        }
        fixed.max(Duration::from_secs(60) / self.requests_per_minute)
    }
}

/// 单个县的站点配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountyConfig {
    pub name: String,
    pub base_url: String,
    pub search_url: String,
    #[serde(default)]
    pub deeds_url: Option<String>,
    #[serde(default)]
    pub tax_url: Option<String>,
    /// 逻辑字段名 → CSS 选择器
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub rate_limit: RateLimit,
}

impl CountyConfig {
    /// 下载链接相关的选择器子集
    pub fn download_selectors(&self) -> BTreeMap<String, String> {
        self.selectors
            .iter()
            .filter(|(key, _)| key.contains("download"))
            .map(|(key, selector)| (key.clone(), selector.clone()))
            .collect()
    }
}

/// 县配置查询表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountyRegistry {
    counties: BTreeMap<String, CountyConfig>,
}

impl CountyRegistry {
    pub fn new(counties: BTreeMap<String, CountyConfig>) -> Self {
        Self {
            counties: counties
                .into_iter()
                .map(|(key, county)| (key.to_ascii_lowercase(), county))
                .collect(),
        }
    }

    /// 内置的 Charleston / Berkeley 配置
    pub fn builtin() -> Self {
        Self::new(builtin_counties())
    }

    /// 按键查询县配置（大小写不敏感）
    pub fn lookup(&self, county: &str) -> Result<&CountyConfig, ConfigError> {
        self.counties
            .get(&county.trim().to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnsupportedCounty {
                county: county.to_string(),
            })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.counties.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CountyConfig)> {
        self.counties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.counties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counties.is_empty()
    }
}

fn selectors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn builtin_counties() -> BTreeMap<String, CountyConfig> {
    let mut counties = BTreeMap::new();
    counties.insert(
        "charleston".to_string(),
        CountyConfig {
            name: "Charleston County".to_string(),
            base_url: "https://www.charlestoncounty.org".to_string(),
            search_url: "https://www.charlestoncounty.org/departments/prc/property-search.php"
                .to_string(),
            deeds_url: Some("https://www.charlestoncounty.org/departments/prc/deeds.php".to_string()),
            tax_url: Some(
                "https://www.charlestoncounty.org/departments/prc/tax-info.php".to_string(),
            ),
            selectors: selectors(&[
                ("search_input", "#PIN"),
                ("search_button", "input[type='submit']"),
                ("property_link", "a[href*='property']"),
                ("tax_link", "a[href*='tax']"),
                ("deed_link", "a[href*='deed']"),
                ("download_link", "a[href*='.pdf']"),
            ]),
            rate_limit: RateLimit {
                requests_per_minute: 30,
                delay_between_requests: 2,
            },
        },
    );
    counties.insert(
        "berkeley".to_string(),
        CountyConfig {
            name: "Berkeley County".to_string(),
            base_url: "https://www.berkeleycountysc.gov".to_string(),
            search_url: "https://www.berkeleycountysc.gov/departments/assessor/property-search"
                .to_string(),
            deeds_url: Some(
                "https://www.berkeleycountysc.gov/departments/clerk-of-court/deeds".to_string(),
            ),
            tax_url: Some(
                "https://www.berkeleycountysc.gov/departments/treasurer/tax-bills".to_string(),
            ),
            selectors: selectors(&[
                ("tms_input", "input[name='tms']"),
                ("search_button", "button[type='submit']"),
                ("property_card_link", "a[href*='PropertyCard']"),
                ("tax_bill_link", "a[href*='TaxBill']"),
                ("tax_receipt_link", "a[href*='TaxReceipt']"),
                ("deed_search_link", "a[href*='DeedSearch']"),
                ("pdf_download", "a[href$='.pdf']"),
            ]),
            rate_limit: RateLimit {
                requests_per_minute: 20,
                delay_between_requests: 3,
            },
        },
    );
    counties
}
