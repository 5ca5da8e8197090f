//! 浏览器会话
//!
//! 启动无头浏览器，或连接到已打开浏览器的调试端口。

use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::BrowserSettings;
use crate::error::NavigatorError;

/// 一个运行独占的浏览器会话
pub struct BrowserSession {
    pub browser: Browser,
    pub page: Page,
    /// 是否由本会话启动（连接到外部浏览器时不关闭浏览器本身）
    owned: bool,
    handler: JoinHandle<()>,
}

/// 打开浏览器会话
pub async fn open_session(settings: &BrowserSettings) -> Result<BrowserSession, NavigatorError> {
    let (browser, mut handler, owned) = match settings.debug_port {
        Some(port) => {
            let browser_url = format!("http://localhost:{}", port);
            info!("正在连接到浏览器: {}", browser_url);
            let (browser, handler) = Browser::connect(&browser_url).await.map_err(|e| {
                error!("连接浏览器失败: {}", e);
                NavigatorError::Launch {
                    message: format!("{} ({})", e, browser_url),
                }
            })?;
            (browser, handler, false)
        }
        None => {
            info!("🚀 启动无头浏览器...");
            let config = browser_config(settings)?;
            let (browser, handler) = Browser::launch(config).await.map_err(|e| {
                error!("启动无头浏览器失败: {}", e);
                NavigatorError::Launch {
                    message: e.to_string(),
                }
            })?;
            (browser, handler, true)
        }
    };
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    let handler = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建页面失败: {}", e);
        NavigatorError::Launch {
            message: format!("创建页面失败: {}", e),
        }
    })?;

    Ok(BrowserSession {
        browser,
        page,
        owned,
        handler,
    })
}

fn browser_config(settings: &BrowserSettings) -> Result<BrowserConfig, NavigatorError> {
    let mut args = vec![
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];
    if let Some(user_agent) = &settings.user_agent {
        args.push(format!("--user-agent={}", user_agent));
    }

    let mut builder = BrowserConfig::builder()
        .window_size(settings.viewport_width, settings.viewport_height)
        .args(args);
    if settings.headless {
        builder = builder.new_headless_mode();
    } else {
        builder = builder.with_head();
    }
    if let Some(path) = &settings.chrome_executable {
        builder = builder.chrome_executable(path);
    }
    builder.build().map_err(|e| {
        error!("配置无头浏览器失败: {}", e);
        NavigatorError::Launch { message: e }
    })
}

impl BrowserSession {
    /// 关闭页面；若浏览器由本会话启动则一并关闭
    pub async fn close(mut self) -> Result<(), NavigatorError> {
        let page_result = self.page.close().await;
        let browser_result = if self.owned {
            let closed = self.browser.close().await.map(|_| ());
            if closed.is_ok() {
                let _ = self.browser.wait().await;
            }
            closed
        } else {
            Ok(())
        };
        self.handler.abort();

        page_result?;
        browser_result?;
        debug!("浏览器会话已关闭");
        Ok(())
    }
}
