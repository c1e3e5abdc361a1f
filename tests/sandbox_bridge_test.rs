use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plugin_platform::host::{
    AdaptiveRetryFetcher, HostCapabilityRouter, InMemoryHostStats, RetryPolicy, SnapshotTabs,
};
use plugin_platform::logger::{Logger, MemoryLogger};
use plugin_platform::plugins::DirPluginSource;
use plugin_platform::sandbox::{BridgeError, HostFunctions, SandboxBridge, WorkerHealth, WorkerLaunch};
use sandbox_protocol::{LogLevel, WorkerStatus};
use sandbox_worker::RhaiInterpreter;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Notify;

const TOOLS: &str = r#"
    fn echo(input) { input }

    fn headline(input) {
        let found = host_call("getElements", [input.selector]);
        found.elements[0][0].textContent
    }

    fn announce(input) {
        send_message_to_chat("working on " + input.topic);
        "announced"
    }

    fn forbidden(input) { host_call("readCookies", []) }

    fn explode(input) { throw "cannot handle " + input.kind; }

    fn wait_for_host(input) { host_call("hang", []) }
"#;

const PAGE: &str = "<html><body><h1>Breaking news</h1></body></html>";

fn plugin_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let plugin = dir.path().join("news");
    fs::create_dir_all(&plugin).unwrap();
    fs::write(plugin.join("manifest.json"), r#"{"name":"News"}"#).unwrap();
    fs::write(plugin.join("mcp_server.rhai"), TOOLS).unwrap();
    dir
}

fn in_process() -> WorkerLaunch {
    WorkerLaunch::InProcess(Arc::new(RhaiInterpreter::default()))
}

fn bridge_with_router(dir: &TempDir, memory: &MemoryLogger) -> Arc<SandboxBridge> {
    let logger = Logger::new(memory.clone());
    let tabs = Arc::new(SnapshotTabs::new());
    tabs.open("https://news.example/", PAGE).unwrap();
    let fetcher = Arc::new(AdaptiveRetryFetcher::new(
        Arc::new(InMemoryHostStats::default()),
        RetryPolicy::default(),
    ));
    let router = Arc::new(HostCapabilityRouter::new(tabs, fetcher, logger.clone(), "platform://index.html"));
    SandboxBridge::new(in_process(), Arc::new(DirPluginSource::new(dir.path())), router, logger)
}

/// Host whose `hang` function never answers.
#[derive(Default)]
struct HangingHost {
    entered: Notify,
}

#[async_trait]
impl HostFunctions for HangingHost {
    async fn call(&self, func: &str, _args: Vec<Value>) -> Result<Value, String> {
        if func == "hang" {
            self.entered.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn values_survive_the_round_trip() {
    let dir = plugin_dir();
    let memory = MemoryLogger::new();
    let bridge = bridge_with_router(&dir, &memory);

    let input = json!({"title": "t", "tags": ["a", "b"], "nested": {"n": 1.5, "none": null, "ok": true}});
    let out = bridge.run_tool("news", "echo", input.clone()).await.unwrap();
    assert_eq!(out, input);
    assert_eq!(bridge.pending_calls(), 0);

    assert!(matches!(
        bridge.health().await,
        WorkerHealth::Running { generation: 1, status: Some(WorkerStatus::Ready) }
    ));
    let sandbox = memory.entries().into_iter().filter(|e| e.context == "SANDBOX").count();
    assert_eq!(sandbox, 2, "loading and ready status are logged");
}

#[tokio::test]
async fn tool_errors_arrive_verbatim() {
    let dir = plugin_dir();
    let bridge = bridge_with_router(&dir, &MemoryLogger::new());

    assert_eq!(
        bridge.run_tool("news", "explode", json!({"kind": "video"})).await,
        Err(BridgeError::Tool("cannot handle video".into()))
    );
    assert_eq!(
        bridge.run_tool("news", "summarize", json!({})).await,
        Err(BridgeError::Tool("Tool 'summarize' not found".into()))
    );
    assert!(matches!(
        bridge.run_tool("ghost", "echo", json!({})).await,
        Err(BridgeError::Plugin(_))
    ));
}

#[tokio::test]
async fn sandbox_reaches_host_functions() {
    let dir = plugin_dir();
    let memory = MemoryLogger::new();
    let bridge = bridge_with_router(&dir, &memory);

    let out = bridge
        .run_tool("news", "headline", json!({"selector": "h1"}))
        .await
        .unwrap();
    assert_eq!(out, json!("Breaking news"));

    let err = bridge.run_tool("news", "forbidden", json!({})).await.unwrap_err();
    assert_eq!(err, BridgeError::Tool(r#"host function "readCookies" not found"#.into()));
}

#[tokio::test]
async fn fire_and_forget_messages_reach_the_logger() {
    let dir = plugin_dir();
    let memory = MemoryLogger::new();
    let bridge = bridge_with_router(&dir, &memory);

    let out = bridge
        .run_tool("news", "announce", json!({"topic": "elections"}))
        .await
        .unwrap();
    assert_eq!(out, json!("announced"));

    // The notification is handled on its own task; give it a moment.
    for _ in 0..50 {
        if memory.entries().iter().any(|e| e.context == "PLUGIN") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let plugin = memory
        .entries()
        .into_iter()
        .find(|e| e.context == "PLUGIN")
        .expect("plugin message logged");
    assert_eq!(plugin.level, LogLevel::Info);
    assert_eq!(plugin.message, "working on elections");
}

#[tokio::test]
async fn restart_rejects_calls_of_the_old_worker() {
    let dir = plugin_dir();
    let host = Arc::new(HangingHost::default());
    let bridge = SandboxBridge::new(
        in_process(),
        Arc::new(DirPluginSource::new(dir.path())),
        host.clone(),
        Logger::new(MemoryLogger::new()),
    );

    let stuck = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.run_tool("news", "wait_for_host", json!({})).await })
    };
    host.entered.notified().await;
    assert_eq!(bridge.pending_calls(), 1);

    assert_eq!(bridge.restart().await.unwrap(), 2);
    let outcome = tokio::time::timeout(Duration::from_secs(5), stuck)
        .await
        .expect("pending call settled")
        .unwrap();
    assert!(matches!(outcome, Err(BridgeError::WorkerExited(_))));
    assert_eq!(bridge.pending_calls(), 0);

    let out = bridge.run_tool("news", "echo", json!(7)).await.unwrap();
    assert_eq!(out, json!(7));
    assert!(matches!(bridge.health().await, WorkerHealth::Running { generation: 2, .. }));
}

#[tokio::test]
async fn dropped_caller_leaves_no_pending_entry() {
    let dir = plugin_dir();
    let host = Arc::new(HangingHost::default());
    let bridge = SandboxBridge::new(
        in_process(),
        Arc::new(DirPluginSource::new(dir.path())),
        host.clone(),
        Logger::new(MemoryLogger::new()),
    );

    let call = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.run_tool("news", "wait_for_host", json!({})).await })
    };
    host.entered.notified().await;
    assert_eq!(bridge.pending_calls(), 1);

    call.abort();
    let _ = call.await;
    assert_eq!(bridge.pending_calls(), 0);
    bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_a_tool_waiting_on_the_host() {
    let dir = plugin_dir();
    let host = Arc::new(HangingHost::default());
    let bridge = SandboxBridge::new(
        in_process(),
        Arc::new(DirPluginSource::new(dir.path())),
        host.clone(),
        Logger::new(MemoryLogger::new()),
    );

    let _waiting = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.run_tool("news", "wait_for_host", json!({})).await })
    };
    host.entered.notified().await;

    // Returning right away drops the runtime, which must not wait on the
    // worker thread parked in the host call.
    bridge.shutdown().await;
    assert_eq!(bridge.health().await, WorkerHealth::Stopped { generation: 1 });
}
