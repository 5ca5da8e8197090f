use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use county_doc_collector::config::{BrowserSettings, Config};
use county_doc_collector::infrastructure::{
    ChromeNavigator, FsDocumentStore, MockNavigator, MockOp, Navigator, NavigatorFactory,
};
use county_doc_collector::models::{CollectionRequest, CountyRegistry, DocumentKind, ExecutionStatus};
use county_doc_collector::orchestrator::{App, ExecutionOrchestrator, ProgressSink};
use county_doc_collector::ExecutionResult;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

fn config_for(dir: &Path) -> Config {
    Config {
        output_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

fn orchestrator(dir: &Path) -> ExecutionOrchestrator {
    ExecutionOrchestrator::from_config(&config_for(dir), Arc::new(FsDocumentStore::new(dir)))
}

fn charleston_request() -> CollectionRequest {
    CollectionRequest::new(
        "charleston",
        ["5590200072"],
        vec![DocumentKind::PropertyCard, DocumentKind::TaxInfo, DocumentKind::Deed],
    )
}

async fn run_with(dir: &Path, request: &CollectionRequest, nav: MockNavigator) -> ExecutionResult {
    orchestrator(dir)
        .run(
            "exec_test",
            request,
            Box::new(nav),
            ProgressSink::disabled(),
            CancellationToken::new(),
        )
        .await
}

fn step_ids(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("step_{:03}", i)).collect()
}

#[tokio::test]
async fn charleston_end_to_end_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let nav = MockNavigator::new();
    let probe = nav.probe();

    let result = run_with(dir.path(), &charleston_request(), nav).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.completed_steps, step_ids(1..=13));
    assert!(result.failed_steps.is_empty());
    assert_eq!(result.documents.len(), 3);
    assert_eq!(result.metrics.total_steps, 13);
    assert_eq!(result.metrics.success_rate, 1.0);
    assert_eq!(result.metrics.documents_count, 3);
    assert_eq!(result.metrics.identifier_count, 1);
    assert_eq!(probe.calls(MockOp::Cleanup), 1);

    let parcel = dir.path().join("5590200072");
    assert!(parcel.join("Property Card.pdf").exists());
    assert!(parcel.join("Tax Info.pdf").exists());
    assert!(parcel.join("Deeds").join("Deed.pdf").exists());
    assert_eq!(result.extracted.len(), 3);
}

#[tokio::test]
async fn forced_extraction_failure_yields_partial() {
    let dir = tempfile::tempdir().unwrap();
    let nav = MockNavigator::new().fail_on(MockOp::Extract, 2);

    let result = run_with(dir.path(), &charleston_request(), nav).await;

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(result.failed_steps, vec!["step_007"]);
    assert_eq!(result.completed_steps.len(), 12);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].step_id.as_deref(), Some("step_007"));
    assert_eq!(result.errors[0].error_kind, "ScriptError");
}

#[tokio::test]
async fn failure_does_not_stop_later_steps() {
    let dir = tempfile::tempdir().unwrap();
    let request = CollectionRequest::new(
        "charleston",
        ["5590200072", "5590200073"],
        vec![DocumentKind::TaxBill],
    );
    // 9 个步骤中的第 2 个（查询）失败
    let nav = MockNavigator::new().fail_on(MockOp::FillForm, 1);

    let result = run_with(dir.path(), &request, nav).await;

    assert_eq!(result.failed_steps, vec!["step_002"]);
    for id in step_ids(3..=9) {
        assert!(result.completed_steps.contains(&id) || result.failed_steps.contains(&id));
    }
    assert_eq!(result.completed_steps.len() + result.failed_steps.len(), 9);
}

#[tokio::test]
async fn every_step_failing_yields_failed() {
    let dir = tempfile::tempdir().unwrap();
    // 只有 organize 步骤，且输出目录被普通文件占用
    let output = dir.path().join("output");
    std::fs::write(&output, b"not a folder").unwrap();
    let request = CollectionRequest::new("berkeley", Vec::<String>::new(), vec![]);

    let result = run_with(&output, &request, MockNavigator::new()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.failed_steps, vec!["step_001"]);
    assert_eq!(result.errors[0].error_kind, "StorageError");
}

#[tokio::test]
async fn organize_only_plan_still_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let request = CollectionRequest::new("charleston", Vec::<String>::new(), vec![]);

    let result = run_with(dir.path(), &request, MockNavigator::new()).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.completed_steps, vec!["step_001"]);
    assert!(result.is_terminal());
}

#[tokio::test]
async fn cancellation_stops_at_the_next_step_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let nav = MockNavigator::new().on_call(move |op| {
        if op == MockOp::Extract {
            trigger.cancel();
        }
    });
    let probe = nav.probe();

    let result = orchestrator(dir.path())
        .run(
            "exec_cancel",
            &charleston_request(),
            Box::new(nav),
            ProgressSink::disabled(),
            cancel,
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    // 进行中的提取步骤照常完成，之后的步骤既不算完成也不算失败
    assert_eq!(result.completed_steps, step_ids(1..=3));
    assert!(result.failed_steps.is_empty());
    assert_eq!(probe.calls(MockOp::Download), 0);
    assert_eq!(probe.calls(MockOp::Cleanup), 1);
}

#[tokio::test]
async fn init_failure_fails_run_and_still_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let nav = MockNavigator::new().fail_initialize();
    let probe = nav.probe();
    let (sink, mut rx) = ProgressSink::bounded(64);

    let result = orchestrator(dir.path())
        .run(
            "exec_init_fail",
            &charleston_request(),
            Box::new(nav),
            sink,
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_kind, "CapabilityInitError");
    assert!(result.completed_steps.is_empty() && result.failed_steps.is_empty());
    assert_eq!(probe.calls(MockOp::Navigate), 0);
    assert_eq!(probe.calls(MockOp::Cleanup), 1);

    let mut last = 0.0;
    while let Ok(event) = rx.try_recv() {
        last = event.percentage;
    }
    assert_eq!(last, 100.0);
}

#[tokio::test]
async fn unknown_county_fails_before_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let request = CollectionRequest::new("atlantis", ["5590200072"], vec![]);
    let nav = MockNavigator::new();
    let probe = nav.probe();

    let result = run_with(dir.path(), &request, nav).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_kind, "ConfigError");
    assert_eq!(result.errors[0].step_id, None);
    assert_eq!(probe.calls(MockOp::Initialize), 0);
    assert_eq!(probe.calls(MockOp::Cleanup), 1);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    let dir = tempfile::tempdir().unwrap();
    let (sink, mut rx) = ProgressSink::bounded(64);

    let result = orchestrator(dir.path())
        .run(
            "exec_progress",
            &charleston_request(),
            Box::new(MockNavigator::new().fail_on(MockOp::Download, 1)),
            sink,
            CancellationToken::new(),
        )
        .await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    // 解析 + 初始化 + 13 步 + 收尾 + 完成
    assert_eq!(events.len(), 17);
    assert!(events.windows(2).all(|pair| pair[0].percentage <= pair[1].percentage));
    assert!(events.iter().all(|e| e.job_id == "exec_progress"));
    assert_eq!(events[2].current_step, "step_001");
    assert_eq!(events.last().unwrap().percentage, 100.0);
    assert_eq!(result.status, ExecutionStatus::Partial);
}

#[tokio::test]
async fn summary_is_written_next_to_documents() {
    let dir = tempfile::tempdir().unwrap();

    let result = run_with(dir.path(), &charleston_request(), MockNavigator::new()).await;

    let path = dir.path().join("logs").join("execution_summary_exec_test.json");
    let summary: serde_json::Value =
        serde_json::from_slice(&assert_ok!(std::fs::read(path))).unwrap();
    assert_eq!(summary["status"], "success");
    assert_eq!(summary["summary"]["total_documents"], 3);
    assert_eq!(summary["results"]["total_steps"], 13);
    assert_eq!(result.documents.len(), 3);
}

#[tokio::test]
async fn failed_summary_does_not_change_status() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("logs"), b"not a folder").unwrap();

    let result = run_with(dir.path(), &charleston_request(), MockNavigator::new()).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn app_caps_concurrent_runs() {
    let dir = tempfile::tempdir().unwrap();
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let factory: NavigatorFactory = {
        let live = live.clone();
        let peak = peak.clone();
        Arc::new(move || -> Box<dyn Navigator> {
            let live = live.clone();
            let peak = peak.clone();
            Box::new(
                MockNavigator::new()
                    .with_latency(Duration::from_millis(5))
                    .on_call(move |op| match op {
                        MockOp::Initialize => {
                            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                        }
                        MockOp::Cleanup => {
                            live.fetch_sub(1, Ordering::SeqCst);
                        }
                        _ => {}
                    }),
            )
        })
    };
    let config = Config {
        max_concurrent_runs: 2,
        ..config_for(dir.path())
    };
    let app = App::new(config, factory);

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let request = CollectionRequest::new(
                "berkeley",
                [format!("259050200{}", i)],
                vec![DocumentKind::TaxReceipt],
            );
            app.submit(request, ProgressSink::disabled())
        })
        .collect();
    let mut run_ids = Vec::new();
    for handle in handles {
        run_ids.push(handle.run_id.clone());
        assert_eq!(handle.wait().await.status, ExecutionStatus::Success);
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    run_ids.sort();
    run_ids.dedup();
    assert_eq!(run_ids.len(), 5);
    assert!(app.active_runs().is_empty());
}

#[tokio::test]
async fn app_cancel_stops_a_queued_run() {
    let dir = tempfile::tempdir().unwrap();
    let factory: NavigatorFactory = Arc::new(|| -> Box<dyn Navigator> {
        Box::new(MockNavigator::new().with_latency(Duration::from_millis(20)))
    });
    let app = App::new(config_for(dir.path()), factory);

    let handle = app.submit(charleston_request(), ProgressSink::disabled());
    assert!(app.cancel(&handle.run_id));
    let result = handle.wait().await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(result.completed_steps.len() < 13);
    assert!(!app.cancel(&result.run_id));
}

#[tokio::test]
async fn instruction_runs_end_to_end_in_mock_mode() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(config_for(dir.path()), App::mock_navigators());

    let result = app
        .execute_instruction(
            "Collect the property card and deed for parcel 5590200072 in Charleston County",
            ProgressSink::disabled(),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.metrics.total_steps, 9);
    assert!(result.run_id.starts_with("exec_"));
}

#[tokio::test]
async fn batch_runs_return_one_result_per_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(config_for(dir.path()), App::mock_navigators());
    let requests = vec![
        charleston_request(),
        CollectionRequest::new("berkeley", ["2590502005"], vec![DocumentKind::TaxBill]),
        CollectionRequest::new("atlantis", ["1111111111"], vec![]),
    ];

    let results = app.run_batch(requests).await;

    let statuses: Vec<ExecutionStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ExecutionStatus::Success, ExecutionStatus::Success, ExecutionStatus::Failed]
    );
}

#[tokio::test]
#[ignore] // 需要本机安装 Chromium 并能访问县政府网站：cargo test -- --ignored
async fn live_browser_collects_charleston_documents() {
    let dir = tempfile::tempdir().unwrap();
    let settings = BrowserSettings::default();
    let nav = ChromeNavigator::new(settings, Arc::new(CountyRegistry::builtin()));

    let result = orchestrator(dir.path())
        .run(
            "exec_live",
            &charleston_request(),
            Box::new(nav),
            ProgressSink::disabled(),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_terminal());
    assert_eq!(result.metrics.total_steps, 13);
}
