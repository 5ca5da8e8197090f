//! 文档类型

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 可采集的文档类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PropertyCard,
    TaxInfo,
    TaxBill,
    TaxReceipt,
    Deed,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 5] = [
        DocumentKind::PropertyCard,
        DocumentKind::TaxInfo,
        DocumentKind::TaxBill,
        DocumentKind::TaxReceipt,
        DocumentKind::Deed,
    ];

    /// 调用方未指定时使用的默认类型
    pub const DEFAULTS: [DocumentKind; 3] = [
        DocumentKind::PropertyCard,
        DocumentKind::TaxInfo,
        DocumentKind::Deed,
    ];

    /// 标签（与序列化形式一致）
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::PropertyCard => "property_card",
            DocumentKind::TaxInfo => "tax_info",
            DocumentKind::TaxBill => "tax_bill",
            DocumentKind::TaxReceipt => "tax_receipt",
            DocumentKind::Deed => "deed",
        }
    }

    /// 保存时使用的文件名（不含扩展名）
    pub fn display_name(self) -> &'static str {
        match self {
            DocumentKind::PropertyCard => "Property Card",
            DocumentKind::TaxInfo => "Tax Info",
            DocumentKind::TaxBill => "Tax Bill",
            DocumentKind::TaxReceipt => "Tax Receipt",
            DocumentKind::Deed => "Deed",
        }
    }

    /// 契据单独存放在子目录中
    pub fn subfolder(self) -> Option<&'static str> {
        match self {
            DocumentKind::Deed => Some("Deeds"),
            _ => None,
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.pdf", self.display_name())
    }
}

impl Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        DocumentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| AppError::UnknownDocumentKind(s.to_string()))
    }
}
