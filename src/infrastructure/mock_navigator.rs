//! 离线导航能力
//!
//! 不启动浏览器，按脚本返回结果；用于 `--mock` 模式和测试。
//! 支持按调用序号注入错误/false/panic、人为延迟、无文档，以及调用钩子。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use crate::error::NavigatorError;
use crate::infrastructure::navigator::{DownloadedDocument, FieldMap, Navigator};

/// 模拟文档内容
pub const MOCK_PDF: &[u8] = b"%PDF-1.4\n% mock county document\n%%EOF\n";

/// 导航能力的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Initialize,
    Navigate,
    FillForm,
    Extract,
    Download,
    Cleanup,
}

impl MockOp {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

/// 调用计数探针，可在导航器移交给运行后继续观察
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    counts: Arc<[AtomicUsize; MockOp::COUNT]>,
}

impl MockProbe {
    pub fn calls(&self, op: MockOp) -> usize {
        self.counts[op.index()].load(Ordering::SeqCst)
    }

    fn record(&self, op: MockOp) -> usize {
        self.counts[op.index()].fetch_add(1, Ordering::SeqCst) + 1
    }
}

type Hook = Arc<dyn Fn(MockOp) + Send + Sync>;

#[derive(Default)]
pub struct MockNavigator {
    probe: MockProbe,
    failures: HashMap<MockOp, HashSet<usize>>,
    rejections: HashMap<MockOp, HashSet<usize>>,
    panics: HashMap<MockOp, HashSet<usize>>,
    latency: HashMap<MockOp, Duration>,
    fail_initialize: bool,
    without_documents: bool,
    hook: Option<Hook>,
    initialized: bool,
}

impl MockNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第 `nth` 次（从 1 开始）调用 `op` 时返回错误
    pub fn fail_on(mut self, op: MockOp, nth: usize) -> Self {
        self.failures.entry(op).or_default().insert(nth);
        self
    }

    /// 第 `nth` 次调用 `op` 时返回 false（只对 navigate / fill_form 有意义）
    pub fn reject_on(mut self, op: MockOp, nth: usize) -> Self {
        self.rejections.entry(op).or_default().insert(nth);
        self
    }

    /// 第 `nth` 次调用 `op` 时 panic
    pub fn panic_on(mut self, op: MockOp, nth: usize) -> Self {
        self.panics.entry(op).or_default().insert(nth);
        self
    }

    pub fn fail_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// 所有操作统一的延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        for op in [
            MockOp::Initialize,
            MockOp::Navigate,
            MockOp::FillForm,
            MockOp::Extract,
            MockOp::Download,
            MockOp::Cleanup,
        ] {
            self.latency.insert(op, latency);
        }
        self
    }

    pub fn with_op_latency(mut self, op: MockOp, latency: Duration) -> Self {
        self.latency.insert(op, latency);
        self
    }

    /// 页面上永远找不到下载链接
    pub fn without_documents(mut self) -> Self {
        self.without_documents = true;
        self
    }

    /// 每次调用前触发的钩子
    pub fn on_call(mut self, hook: impl Fn(MockOp) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    /// 记录调用、触发钩子、模拟延迟，返回本次调用序号
    async fn enter(&self, op: MockOp) -> Result<usize, NavigatorError> {
        let nth = self.probe.record(op);
        if let Some(hook) = &self.hook {
            hook(op);
        }
        if let Some(latency) = self.latency.get(&op) {
            sleep(*latency).await;
        }
        if self.panics.get(&op).is_some_and(|calls| calls.contains(&nth)) {
            panic!("mock {:?} panicked on call {}", op, nth);
        }
        if op != MockOp::Initialize && op != MockOp::Cleanup && !self.initialized {
            return Err(NavigatorError::NotInitialized);
        }
        if self.failures.get(&op).is_some_and(|calls| calls.contains(&nth)) {
            return Err(injected_error(op, nth));
        }
        Ok(nth)
    }

    fn rejected(&self, op: MockOp, nth: usize) -> bool {
        self.rejections
            .get(&op)
            .is_some_and(|calls| calls.contains(&nth))
    }
}

fn injected_error(op: MockOp, nth: usize) -> NavigatorError {
    let message = format!("injected {:?} failure on call {}", op, nth);
    match op {
        MockOp::Initialize => NavigatorError::Launch { message },
        MockOp::Navigate => NavigatorError::Navigation {
            url: "mock://".to_string(),
            message,
        },
        MockOp::Download => NavigatorError::Download {
            url: "mock://".to_string(),
            message,
        },
        _ => NavigatorError::Script { message },
    }
}

#[async_trait]
impl Navigator for MockNavigator {
    async fn initialize(&mut self) -> Result<(), NavigatorError> {
        self.enter(MockOp::Initialize).await?;
        if self.fail_initialize {
            return Err(NavigatorError::Launch {
                message: "mock browser failed to start".to_string(),
            });
        }
        self.initialized = true;
        debug!("模拟浏览器已初始化");
        Ok(())
    }

    async fn navigate(&mut self, url: &str, county: &str) -> Result<bool, NavigatorError> {
        let nth = self.enter(MockOp::Navigate).await?;
        debug!("模拟导航: {} ({})", url, county);
        Ok(!self.rejected(MockOp::Navigate, nth))
    }

    async fn fill_form(&mut self, fields: &FieldMap, submit: bool) -> Result<bool, NavigatorError> {
        let nth = self.enter(MockOp::FillForm).await?;
        debug!("模拟填写表单: {:?} (提交: {})", fields.keys().collect::<Vec<_>>(), submit);
        Ok(!self.rejected(MockOp::FillForm, nth))
    }

    async fn extract(&mut self, selectors: &FieldMap) -> Result<FieldMap, NavigatorError> {
        self.enter(MockOp::Extract).await?;
        Ok(selectors
            .keys()
            .map(|key| (key.clone(), format!("mock {}", key)))
            .collect())
    }

    async fn download(
        &mut self,
        link_selectors: &FieldMap,
        county: &str,
    ) -> Result<Option<DownloadedDocument>, NavigatorError> {
        let nth = self.enter(MockOp::Download).await?;
        if self.without_documents || link_selectors.is_empty() {
            return Ok(None);
        }
        Ok(Some(DownloadedDocument {
            url: format!("mock://{}/document_{}.pdf", county, nth),
            bytes: MOCK_PDF.to_vec(),
        }))
    }

    async fn cleanup(&mut self) -> Result<(), NavigatorError> {
        self.enter(MockOp::Cleanup).await?;
        self.initialized = false;
        debug!("模拟浏览器已释放");
        Ok(())
    }
}
