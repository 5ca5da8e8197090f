//! 导航能力接口
//!
//! 编排器只通过这个 trait 驱动浏览器；每次运行独占一个实例。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::NavigatorError;

/// 选择器/字段 → 值
pub type FieldMap = BTreeMap<String, String>;

/// 下载得到的文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedDocument {
    /// 实际下载的地址
    pub url: String,
    pub bytes: Vec<u8>,
}

/// 导航能力
///
/// 所有方法都可能在网络 I/O 上挂起。
#[async_trait]
pub trait Navigator: Send {
    /// 获取资源（启动或连接浏览器）
    async fn initialize(&mut self) -> Result<(), NavigatorError>;

    /// 打开页面；`county` 用于按县限流
    async fn navigate(&mut self, url: &str, county: &str) -> Result<bool, NavigatorError>;

    /// 按 选择器 → 值 填写表单，可选提交
    async fn fill_form(&mut self, fields: &FieldMap, submit: bool) -> Result<bool, NavigatorError>;

    /// 按 字段名 → 选择器 提取文本；单个字段失败时返回空字符串
    async fn extract(&mut self, selectors: &FieldMap) -> Result<FieldMap, NavigatorError>;

    /// 解析页面上的下载链接并取回文档；找不到链接时返回 `None`
    async fn download(
        &mut self,
        link_selectors: &FieldMap,
        county: &str,
    ) -> Result<Option<DownloadedDocument>, NavigatorError>;

    /// 释放资源；每次运行恰好调用一次
    async fn cleanup(&mut self) -> Result<(), NavigatorError>;
}

/// 为每次运行创建独立的导航能力实例
pub type NavigatorFactory = Arc<dyn Fn() -> Box<dyn Navigator> + Send + Sync>;
