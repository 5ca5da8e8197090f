use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use county_doc_collector::config::{Config, ConfigOverrides};
use county_doc_collector::infrastructure::FsDocumentStore;
use county_doc_collector::orchestrator::App;
use county_doc_collector::utils::{logging, truncate_text};
use county_doc_collector::ExecutionResult;

#[derive(Parser)]
#[command(name = "county-docs", version, about = "County parcel document collector")]
struct Cli {
    /// TOML 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 文档输出目录
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// 日志级别
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 最大并发运行数
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// 使用离线导航能力，不启动浏览器
    #[arg(long, global = true)]
    mock: bool,

    /// 显示浏览器窗口
    #[arg(long, global = true)]
    no_headless: bool,

    /// 单步超时（毫秒）
    #[arg(long, global = true, value_name = "MS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Parse and execute one or more instructions")]
    Execute {
        instructions: Vec<String>,

        /// 把运行结果写入 JSON 文件
        #[arg(long)]
        save_results: Option<PathBuf>,
    },

    #[command(about = "Print the execution plan for an instruction")]
    Plan { instruction: String },

    #[command(about = "List supported counties")]
    Counties,

    #[command(about = "Show collected documents and storage statistics")]
    Status {
        #[arg(long)]
        tms_number: String,
    },

    #[command(about = "Print the effective configuration")]
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let overrides = ConfigOverrides {
        config_file: cli.config.clone(),
        output_dir: cli.output_dir.clone(),
        log_level: cli.log_level.clone(),
        max_concurrent_runs: cli.max_concurrent,
        step_timeout_ms: cli.timeout,
        headless: cli.no_headless.then_some(false),
    };
    let config = Config::load(&overrides).context("加载配置失败")?;

    // 初始化日志
    logging::init(&config.log_level);

    match cli.command {
        Commands::Counties => {
            for (key, county) in config.county_registry().iter() {
                println!("{:<12} {}  {}", key, county.name, county.search_url);
            }
            Ok(())
        }
        Commands::Status { tms_number } => {
            let store = FsDocumentStore::new(&config.output_dir);
            println!("TMS {} 文档状态", tms_number);
            for (kind, size) in store.document_status(&tms_number).await {
                match size {
                    Some(bytes) => println!("  ✅ {:<14} {} 字节", kind.display_name(), bytes),
                    None => println!("  ❌ {:<14} 未收集", kind.display_name()),
                }
            }

            let stats = store.storage_stats().await.context("统计输出目录失败")?;
            println!("输出目录: {}", stats.base_dir.display());
            println!("文件总数: {}", stats.total_files);
            println!("总大小: {:.2} MB", stats.total_bytes as f64 / (1024.0 * 1024.0));
            for (extension, count) in &stats.by_extension {
                let label = if extension.is_empty() { "无扩展名" } else { extension.as_str() };
                println!("  {}: {} 个文件", label, count);
            }
            Ok(())
        }
        Commands::Config => {
            print_config(&config);
            Ok(())
        }
        Commands::Plan { instruction } => {
            let app = App::new(config, App::mock_navigators());
            let request = app.parse(&instruction);
            let plan = app.build_plan(&request).context("生成计划失败")?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Commands::Execute {
            instructions,
            save_results,
        } => {
            if instructions.is_empty() {
                anyhow::bail!("至少需要一条指令");
            }
            let navigators = if cli.mock {
                info!("🧪 使用离线导航能力");
                App::mock_navigators()
            } else {
                App::chrome_navigators(&config)
            };
            let app = App::new(config, navigators);

            let results = if instructions.len() == 1 {
                vec![execute_with_progress(&app, &instructions[0]).await]
            } else {
                let requests = instructions.iter().map(|text| app.parse(text)).collect();
                app.run_batch(requests).await
            };

            for result in &results {
                println!(
                    "{}  {}  完成 {}  失败 {}  文档 {}  耗时 {:.2}s",
                    result.run_id,
                    result.status,
                    result.completed_steps.len(),
                    result.failed_steps.len(),
                    result.documents.len(),
                    result.execution_time
                );
            }

            if let Some(path) = save_results {
                let content = serde_json::to_string_pretty(&results)?;
                tokio::fs::write(&path, content)
                    .await
                    .with_context(|| format!("写入结果文件失败: {}", path.display()))?;
                info!("结果已保存至: {}", path.display());
            }
            Ok(())
        }
    }
}

fn print_config(config: &Config) {
    let browser = &config.browser;
    let rows = [
        ("输出目录", config.output_dir.display().to_string()),
        ("日志级别", config.log_level.clone()),
        ("最大并发运行数", config.max_concurrent_runs.to_string()),
        ("进度通道容量", config.progress_buffer.to_string()),
        ("单步超时", format!("{} ms", config.step_timeout_ms)),
        ("最大重试次数", config.max_step_retries.to_string()),
        ("失败步骤重试", config.retry_failed_steps.to_string()),
        ("无头模式", browser.headless.to_string()),
        ("视口", format!("{}x{}", browser.viewport_width, browser.viewport_height)),
        (
            "调试端口",
            browser
                .debug_port
                .map(|port| port.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("支持的县", config.counties.keys().cloned().collect::<Vec<_>>().join(", ")),
    ];
    for (name, value) in rows {
        println!("{:<12} {}", name, value);
    }
}

/// 执行单条指令并在终端显示进度
async fn execute_with_progress(app: &App, instruction: &str) -> ExecutionResult {
    info!("📝 指令: {}", truncate_text(instruction, 80));
    let (sink, mut rx) = app.progress_channel();

    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    info!("[{:>5.1}%] {} - {}", event.percentage, event.current_step, event.message)
                }
                Err(RecvError::Lagged(skipped)) => warn!("进度显示落后，跳过 {} 条", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = app.execute_instruction(instruction, sink).await;
    if let Err(e) = printer.await {
        warn!("进度显示任务异常退出: {}", e);
    }
    result
}
