//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **运行登记**：为每次运行分配 ID 和取消令牌，支持 `cancel(run_id)`
//! 2. **并发控制**：使用 Semaphore 限制同时进行的运行数，超出上限的请求排队等待
//! 3. **资源分配**：每次运行由工厂创建独立的导航能力实例
//! 4. **批量处理**：分批提交请求，每批完成后再开始下一批
//! 5. **全局统计**：汇总所有运行的结果

use std::sync::Arc;

use chrono::Local;
use dashmap::DashMap;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::navigator::{Navigator, NavigatorFactory};
use crate::infrastructure::storage::{DocumentStore, FsDocumentStore};
use crate::infrastructure::{ChromeNavigator, MockNavigator};
use crate::models::plan::Plan;
use crate::models::progress::ProgressEvent;
use crate::models::request::CollectionRequest;
use crate::models::result::{ErrorRecord, ExecutionResult, ExecutionStatus};
use crate::orchestrator::progress::ProgressSink;
use crate::orchestrator::run_processor::ExecutionOrchestrator;
use crate::services::InstructionParser;
use crate::utils::logging::{log_batch_complete, log_batch_start, log_startup, print_final_stats};

/// 已提交运行的句柄
pub struct RunHandle {
    pub run_id: String,
    handle: JoinHandle<ExecutionResult>,
}

impl RunHandle {
    /// 等待运行结束；任务本身崩溃时返回失败结果
    pub async fn wait(self) -> ExecutionResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("运行 {} 任务执行失败: {}", self.run_id, e);
                let mut result = ExecutionResult::start(&self.run_id);
                result.record_error(ErrorRecord::new("PanicError", e.to_string()));
                result.close(ExecutionStatus::Failed);
                result
            }
        }
    }
}

/// 运行登记项：任务结束（含崩溃）时从登记表移除
struct ActiveRun {
    active: Arc<DashMap<String, CancellationToken>>,
    run_id: String,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active.remove(&self.run_id);
    }
}

/// 批量统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchStats {
    fn record(&mut self, status: ExecutionStatus) {
        self.total += 1;
        match status {
            ExecutionStatus::Success => self.success += 1,
            ExecutionStatus::Partial => self.partial += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            _ => self.failed += 1,
        }
    }
}

/// 应用主结构
///
/// 配置在构造后只读；并发运行之间不共享可变状态，只共享运行登记表。
pub struct App {
    config: Arc<Config>,
    orchestrator: Arc<ExecutionOrchestrator>,
    parser: InstructionParser,
    navigators: NavigatorFactory,
    permits: Arc<Semaphore>,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl App {
    /// 使用文件系统存储创建应用
    pub fn new(config: Config, navigators: NavigatorFactory) -> Self {
        let store = Arc::new(FsDocumentStore::new(&config.output_dir));
        Self::with_store(config, navigators, store)
    }

    pub fn with_store(
        config: Config,
        navigators: NavigatorFactory,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let max_concurrent = config.max_concurrent_runs.max(1);
        log_startup(max_concurrent);
        let counties = Arc::new(config.county_registry());
        Self {
            orchestrator: Arc::new(ExecutionOrchestrator::from_config(&config, store)),
            parser: InstructionParser::new(counties),
            navigators,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            active: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    /// 基于 Chrome 的导航能力工厂
    pub fn chrome_navigators(config: &Config) -> NavigatorFactory {
        let settings = config.browser.clone();
        let counties = Arc::new(config.county_registry());
        Arc::new(move || -> Box<dyn Navigator> {
            Box::new(ChromeNavigator::new(settings.clone(), counties.clone()))
        })
    }

    /// 离线导航能力工厂
    pub fn mock_navigators() -> NavigatorFactory {
        Arc::new(|| -> Box<dyn Navigator> { Box::new(MockNavigator::new()) })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 解析自然语言指令
    pub fn parse(&self, instruction: &str) -> CollectionRequest {
        self.parser.parse(instruction)
    }

    /// 只生成计划，不执行
    pub fn build_plan(&self, request: &CollectionRequest) -> Result<Plan, AppError> {
        self.orchestrator
            .planner()
            .build(&request.county, &request.identifiers, &request.kinds)
    }

    /// 新建一个进度通道（容量取自配置）
    pub fn progress_channel(&self) -> (ProgressSink, broadcast::Receiver<ProgressEvent>) {
        ProgressSink::bounded(self.config.progress_buffer)
    }

    /// 提交一次运行，立即返回句柄
    ///
    /// 运行在获得并发许可前排队；排队期间也可以被取消。
    pub fn submit(&self, request: CollectionRequest, progress: ProgressSink) -> RunHandle {
        let run_id = new_run_id();
        let cancel = CancellationToken::new();
        self.active.insert(run_id.clone(), cancel.clone());

        let permits = self.permits.clone();
        let orchestrator = self.orchestrator.clone();
        let navigators = self.navigators.clone();
        let active = self.active.clone();
        let task_run_id = run_id.clone();

        let handle = tokio::spawn(async move {
            let _registration = ActiveRun {
                active,
                run_id: task_run_id.clone(),
            };
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("运行 {} 未能获得并发许可: {}", task_run_id, e);
                    let mut result = ExecutionResult::start(&task_run_id);
                    result.record_error(ErrorRecord::new(
                        "ConcurrencyLimitError",
                        format!("并发许可不可用: {}", e),
                    ));
                    result.close(ExecutionStatus::Failed);
                    return result;
                }
            };
            let navigator = navigators();
            orchestrator
                .run(&task_run_id, &request, navigator, progress, cancel)
                .await
        });

        info!("📥 运行 {} 已提交", run_id);
        RunHandle { run_id, handle }
    }

    /// 执行一次运行并等待结果
    pub async fn run(&self, request: CollectionRequest, progress: ProgressSink) -> ExecutionResult {
        self.submit(request, progress).wait().await
    }

    /// 解析指令并执行
    pub async fn execute_instruction(
        &self,
        instruction: &str,
        progress: ProgressSink,
    ) -> ExecutionResult {
        let request = self.parse(instruction);
        self.run(request, progress).await
    }

    /// 请求取消运行；运行不存在或已结束时返回 false
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.active.get(run_id) {
            Some(token) => {
                token.cancel();
                info!("⏹ 已请求取消运行 {}", run_id);
                true
            }
            None => {
                warn!("运行 {} 不存在或已结束", run_id);
                false
            }
        }
    }

    /// 进行中（含排队）的运行 ID
    pub fn active_runs(&self) -> Vec<String> {
        let mut runs: Vec<String> = self.active.iter().map(|entry| entry.key().clone()).collect();
        runs.sort();
        runs
    }

    /// 批量执行：每批最多 `max_concurrent_runs` 个运行，完成后再开始下一批
    pub async fn run_batch(&self, requests: Vec<CollectionRequest>) -> Vec<ExecutionResult> {
        let total = requests.len();
        if total == 0 {
            warn!("⚠️ 没有待执行的请求");
            return Vec::new();
        }

        let batch_size = self.config.max_concurrent_runs.max(1);
        let total_batches = total.div_ceil(batch_size);
        let mut stats = BatchStats::default();
        let mut results = Vec::with_capacity(total);

        for (batch_index, batch) in requests.chunks(batch_size).enumerate() {
            let batch_num = batch_index + 1;
            let start = batch_index * batch_size;
            log_batch_start(batch_num, total_batches, start + 1, start + batch.len(), total);

            let handles: Vec<RunHandle> = batch
                .iter()
                .cloned()
                .map(|request| self.submit(request, ProgressSink::disabled()))
                .collect();

            let mut batch_success = 0;
            for handle in handles {
                let result = handle.wait().await;
                if result.status == ExecutionStatus::Success {
                    batch_success += 1;
                }
                stats.record(result.status);
                results.push(result);
            }
            log_batch_complete(batch_num, batch_success, batch.len());
        }

        print_final_stats(
            stats.success,
            stats.partial,
            stats.failed + stats.cancelled,
            stats.total,
            &self.config.output_dir,
        );
        results
    }
}

/// `exec_<时间戳>_<8位随机>`
fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("exec_{}_{}", Local::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}
