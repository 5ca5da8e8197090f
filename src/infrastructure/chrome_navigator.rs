//! 基于 chromiumoxide 的导航能力
//!
//! 页面操作全部通过 `page.evaluate` 执行 JS 完成；
//! 文档字节由 reqwest 按解析出的链接下载。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::browser::{open_session, BrowserSession};
use crate::config::BrowserSettings;
use crate::error::NavigatorError;
use crate::infrastructure::navigator::{DownloadedDocument, FieldMap, Navigator};
use crate::models::county::CountyRegistry;

/// 表单提交按钮的候选选择器，按顺序尝试
const SUBMIT_SELECTORS: [&str; 3] = [
    "input[type=\"submit\"]",
    "button[type=\"submit\"]",
    "input[value*=\"Search\"]",
];

/// 县配置缺失时的默认限流间隔
const FALLBACK_DELAY: Duration = Duration::from_secs(2);

pub struct ChromeNavigator {
    settings: BrowserSettings,
    counties: Arc<CountyRegistry>,
    http: reqwest::Client,
    session: Option<BrowserSession>,
}

impl ChromeNavigator {
    pub fn new(settings: BrowserSettings, counties: Arc<CountyRegistry>) -> Self {
        Self {
            settings,
            counties,
            http: reqwest::Client::new(),
            session: None,
        }
    }

    fn page(&self) -> Result<&Page, NavigatorError> {
        self.session
            .as_ref()
            .map(|session| &session.page)
            .ok_or(NavigatorError::NotInitialized)
    }

    /// 执行 JS 并反序列化结果
    async fn eval_as<T: DeserializeOwned>(&self, script: String) -> Result<T, NavigatorError> {
        let result = self.page()?.evaluate(script).await?;
        result
            .into_value()
            .map_err(|e| NavigatorError::script(format!("无法解析脚本结果: {}", e)))
    }

    /// 按县配置的间隔等待
    async fn apply_rate_limit(&self, county: &str) {
        let delay = match self.counties.lookup(county) {
            Ok(config) => config.rate_limit.min_interval(),
            Err(e) => {
                warn!("限流配置缺失，使用默认间隔: {}", e);
                FALLBACK_DELAY
            }
        };
        if !delay.is_zero() {
            debug!("限流等待 {:?} ({})", delay, county);
            sleep(delay).await;
        }
    }

    async fn click_submit(&self) -> Result<(), NavigatorError> {
        let page = self.page()?;
        for selector in SUBMIT_SELECTORS {
            let Ok(button) = page.find_element(selector).await else {
                continue;
            };
            if button.click().await.is_err() {
                continue;
            }
            if let Err(e) = page.wait_for_navigation().await {
                debug!("提交后等待导航失败: {}", e);
            }
            debug!("已点击提交按钮: {}", selector);
            return Ok(());
        }
        warn!("未找到可点击的提交按钮");
        Ok(())
    }
}

#[async_trait]
impl Navigator for ChromeNavigator {
    async fn initialize(&mut self) -> Result<(), NavigatorError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = open_session(&self.settings).await?;
        info!(
            "✓ 浏览器已就绪 (无头: {}, 视口: {}x{})",
            self.settings.headless, self.settings.viewport_width, self.settings.viewport_height
        );
        self.session = Some(session);
        Ok(())
    }

    async fn navigate(&mut self, url: &str, county: &str) -> Result<bool, NavigatorError> {
        self.apply_rate_limit(county).await;
        let page = self.page()?;
        match page.goto(url).await {
            Ok(_) => {
                info!("已导航到: {}", url);
                Ok(true)
            }
            Err(e) => {
                error!("导航到 {} 失败: {}", url, e);
                Ok(false)
            }
        }
    }

    async fn fill_form(&mut self, fields: &FieldMap, submit: bool) -> Result<bool, NavigatorError> {
        for (selector, value) in fields {
            let script = format!(
                r#"
                (() => {{
                    const el = document.querySelector({selector});
                    if (!el) return false;
                    el.focus();
                    el.value = {value};
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }})()
                "#,
                selector = json!(selector),
                value = json!(value),
            );
            let filled: bool = self.eval_as(script).await?;
            if !filled {
                error!("表单字段不存在: {}", selector);
                return Ok(false);
            }
            debug!("表单字段已填写: {}", selector);
        }

        if submit {
            self.click_submit().await?;
        }
        info!("表单填写完成，字段数: {}", fields.len());
        Ok(true)
    }

    async fn extract(&mut self, selectors: &FieldMap) -> Result<FieldMap, NavigatorError> {
        let script = format!(
            r#"
            (() => {{
                const selectors = {selectors};
                const out = {{}};
                for (const [key, sel] of Object.entries(selectors)) {{
                    try {{
                        const el = document.querySelector(sel);
                        out[key] = el && el.textContent ? el.textContent.trim() : '';
                    }} catch (e) {{
                        out[key] = '';
                    }}
                }}
                return out;
            }})()
            "#,
            selectors = json!(selectors),
        );
        let extracted: FieldMap = self.eval_as(script).await?;
        let filled = extracted.values().filter(|v| !v.is_empty()).count();
        info!("数据提取完成: {}/{} 个字段有值", filled, extracted.len());
        Ok(extracted)
    }

    async fn download(
        &mut self,
        link_selectors: &FieldMap,
        county: &str,
    ) -> Result<Option<DownloadedDocument>, NavigatorError> {
        let selectors: Vec<&String> = link_selectors.values().collect();
        let script = format!(
            r#"
            (() => {{
                for (const sel of {selectors}) {{
                    try {{
                        const el = document.querySelector(sel);
                        if (el && el.href) return el.href;
                    }} catch (e) {{}}
                }}
                return '';
            }})()
            "#,
            selectors = json!(selectors),
        );
        let url: String = self.eval_as(script).await?;
        if url.is_empty() {
            info!("页面上没有可下载的文档链接");
            return Ok(None);
        }

        self.apply_rate_limit(county).await;
        let download_error = |message: String| NavigatorError::Download {
            url: url.clone(),
            message,
        };
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| download_error(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        info!("文档已下载: {} ({} 字节)", url, bytes.len());
        Ok(Some(DownloadedDocument {
            url: url.clone(),
            bytes: bytes.to_vec(),
        }))
    }

    async fn cleanup(&mut self) -> Result<(), NavigatorError> {
        match self.session.take() {
            Some(session) => {
                session.close().await?;
                info!("浏览器资源已释放");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
