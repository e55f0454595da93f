//! End-to-end scenarios for the contract-driven plan runner, executed
//! against the in-memory mock backend.

use serde_json::{Value, json};
use std::sync::Arc;
use stratum_kernel::contract::ContractRegistry;
use stratum_kernel::error::{PlanError, ValidationError};
use stratum_kernel::plan::Plan;
use stratum_runtime::normalize::normalize_outputs;
use stratum_runtime::runner::PlanRunner;
use stratum_testing::MockBackend;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn runner(backend: &MockBackend) -> PlanRunner {
    runner_with_pool(backend, 1)
}

fn runner_with_pool(backend: &MockBackend, pool_size: usize) -> PlanRunner {
    PlanRunner::new(
        Arc::new(ContractRegistry::builtin()),
        Arc::new(backend.router_with_pool(pool_size)),
        stratum_kernel::RunnerConfig {
            retry_backoff_ms: 1,
            pool_size_per_backend: pool_size,
            ..Default::default()
        },
    )
}

/// Decode a recorded tool output back into plain data.
fn decoded(state_value: &Value) -> Value {
    normalize_outputs(std::slice::from_ref(state_value))
}

fn creates_then_list_plan() -> Plan {
    Plan::from_value(json!([
        {"id": "create_alice", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Alice", "email": "alice@example.com"}},
        {"id": "create_bob", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Bob", "email": "bon@example.com"}},
        {"id": "create_charlie", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Charlie", "email": "chuck@example.com"}},
        {"id": "all_users", "type": "tool", "server": "db", "tool": "list_users", "arguments": {}}
    ]))
    .unwrap()
}

fn explicit_fan_in_plan() -> Plan {
    Plan::from_value(json!([
        {"id": "create_alice", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Alice", "email": "alice@example.com"}, "$from": []},
        {"id": "create_bob", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Bob", "email": "bon@example.com"}, "$from": []},
        {"id": "create_charlie", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Charlie", "email": "chuck@example.com"}, "$from": []},
        {"id": "list_all_users", "type": "tool", "server": "db", "tool": "list_users",
         "arguments": {}, "$from": ["create_alice", "create_bob", "create_charlie"]},
        {"id": "write_user_list_file", "type": "tool", "server": "file", "tool": "write_file",
         "arguments": {"path": "user_list.json", "content": {}}, "$from": "list_all_users"},
        {"id": "read_user_list_file", "type": "resource", "server": "file", "tool": "read_file",
         "arguments": {"uri": "file://user_list.json/"}, "$from": "write_user_list_file"}
    ]))
    .unwrap()
}

#[tokio::test]
async fn commutative_creates_then_list() {
    init_tracing();
    let backend = MockBackend::new();
    let state = runner(&backend).run(&creates_then_list_plan()).await.unwrap();

    assert_eq!(state.len(), 4);
    let users = decoded(state.get("all_users").unwrap());
    let names: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|user| user["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 3);
    for name in ["Alice", "Bob", "Charlie"] {
        assert!(names.contains(&name), "missing {name} in {names:?}");
    }
}

#[tokio::test]
async fn read_after_write() {
    init_tracing();
    let backend = MockBackend::new();
    let plan = Plan::from_value(json!([
        {"id": "create_alice", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Alice", "email": "alice@example.com"}},
        {"id": "lookup", "type": "tool", "server": "db", "tool": "get_user_by_id",
         "arguments": {"id": 1}}
    ]))
    .unwrap();

    let state = runner(&backend).run(&plan).await.unwrap();
    assert_eq!(decoded(state.get("lookup").unwrap())["name"], "Alice");
}

#[tokio::test]
async fn non_commutative_mutations_apply_in_order() {
    init_tracing();
    let backend = MockBackend::new();
    backend.seed_user("Original", "original@example.com");

    let plan = Plan::from_value(json!([
        {"id": "rename_x", "type": "tool", "server": "db", "tool": "update_user",
         "arguments": {"id": 1, "name": "X"}},
        {"id": "rename_y", "type": "tool", "server": "db", "tool": "update_user",
         "arguments": {"id": 1, "name": "Y"}}
    ]))
    .unwrap();

    runner(&backend).run(&plan).await.unwrap();
    assert_eq!(backend.users()[0]["name"], "Y");
}

#[tokio::test]
async fn explicit_fan_in_round_trips_through_the_file() {
    init_tracing();
    let backend = MockBackend::new();
    let state = runner(&backend).run(&explicit_fan_in_plan()).await.unwrap();

    // the injected content reached the file backend as the user list
    let written: Value = serde_json::from_str(&backend.file("user_list.json").unwrap()).unwrap();
    assert_eq!(written.as_array().unwrap().len(), 3);

    // the resource read decoded the same list
    let read_back = state.get("read_user_list_file").unwrap();
    assert_eq!(read_back, &written);
}

#[tokio::test]
async fn layered_strategy_matches_streaming() {
    init_tracing();
    let streaming_backend = MockBackend::new();
    let streaming = runner(&streaming_backend)
        .run(&explicit_fan_in_plan())
        .await
        .unwrap();

    let layered_backend = MockBackend::new();
    let layered = runner(&layered_backend)
        .run_layered(&explicit_fan_in_plan())
        .await
        .unwrap();

    let mut streaming_keys: Vec<&str> = streaming.keys().collect();
    let mut layered_keys: Vec<&str> = layered.keys().collect();
    streaming_keys.sort_unstable();
    layered_keys.sort_unstable();
    assert_eq!(streaming_keys, layered_keys);

    // commutative creates may claim ids in any order, so compare the
    // round-tripped lists by name
    let names = |state: &Value| -> Vec<String> {
        let mut names: Vec<String> = state
            .as_array()
            .unwrap()
            .iter()
            .map(|user| user["name"].as_str().unwrap().to_string())
            .collect();
        names.sort_unstable();
        names
    };
    assert_eq!(
        names(streaming.get("read_user_list_file").unwrap()),
        names(layered.get("read_user_list_file").unwrap())
    );
}

#[tokio::test]
async fn idempotent_tool_retries_through_transient_errors() {
    init_tracing();
    let backend = MockBackend::new();
    backend.fail_times("list_users", 2);

    let plan = Plan::from_value(json!([
        {"id": "all_users", "type": "tool", "server": "db", "tool": "list_users", "arguments": {}}
    ]))
    .unwrap();

    let state = runner(&backend).run(&plan).await.unwrap();
    assert_eq!(decoded(state.get("all_users").unwrap()), json!([]));
    assert_eq!(backend.call_count("list_users"), 3);
}

#[tokio::test]
async fn non_idempotent_tool_fails_after_one_attempt() {
    init_tracing();
    let backend = MockBackend::new();
    backend.fail_times("create_user", 1);

    let plan = Plan::from_value(json!([
        {"id": "create_alice", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Alice", "email": "alice@example.com"}}
    ]))
    .unwrap();

    let err = runner(&backend).run(&plan).await.unwrap_err();
    assert!(matches!(err, PlanError::Transport { .. }));
    assert_eq!(backend.call_count("create_user"), 1);
    assert!(backend.users().is_empty());
}

#[tokio::test]
async fn validator_rejects_reference_cycles() {
    init_tracing();
    let plan = Plan::from_value(json!([
        {"id": "a", "type": "tool", "server": "db", "tool": "list_users",
         "arguments": {}, "$from": "b"},
        {"id": "b", "type": "tool", "server": "db", "tool": "list_users",
         "arguments": {}, "$from": "a"}
    ]))
    .unwrap();

    let backend = MockBackend::new();
    let err = runner(&backend).run(&plan).await.unwrap_err();
    assert!(matches!(
        err,
        PlanError::Validation(ValidationError::ForwardReference { .. })
    ));
}

#[tokio::test]
async fn fail_fast_stops_downstream_dispatch() {
    init_tracing();
    let backend = MockBackend::new();
    backend.fail_times("create_user", 1);

    // inferred mode: the list depends on the failing create
    let plan = Plan::from_value(json!([
        {"id": "create_alice", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Alice", "email": "alice@example.com"}},
        {"id": "all_users", "type": "tool", "server": "db", "tool": "list_users", "arguments": {}}
    ]))
    .unwrap();

    let err = runner(&backend).run(&plan).await.unwrap_err();
    assert!(matches!(err, PlanError::Transport { .. }));
    assert_eq!(backend.call_count("list_users"), 0);
}

#[tokio::test]
async fn disabled_fail_fast_still_surfaces_the_first_error() {
    init_tracing();
    let backend = MockBackend::new();
    backend.fail_times("create_user", 1);

    // two independent chains: the failing create and an unrelated file write
    let plan = Plan::from_value(json!([
        {"id": "create_alice", "type": "tool", "server": "db", "tool": "create_user",
         "arguments": {"name": "Alice", "email": "alice@example.com"}, "$from": []},
        {"id": "write_note", "type": "tool", "server": "file", "tool": "write_file",
         "arguments": {"path": "note.txt", "content": "hello"}, "$from": []},
        {"id": "all_users", "type": "tool", "server": "db", "tool": "list_users",
         "arguments": {}, "$from": "create_alice"}
    ]))
    .unwrap();

    let runner = PlanRunner::new(
        Arc::new(ContractRegistry::builtin()),
        Arc::new(backend.router()),
        stratum_kernel::RunnerConfig {
            fail_fast: false,
            retry_backoff_ms: 1,
            ..Default::default()
        },
    );

    let err = runner.run(&plan).await.unwrap_err();
    assert!(matches!(err, PlanError::Transport { .. }));
    // the independent chain still ran to completion
    assert_eq!(backend.file("note.txt").as_deref(), Some("hello"));
    // the dependent of the failed step never dispatched
    assert_eq!(backend.call_count("list_users"), 0);
}

#[tokio::test]
async fn produces_mirrors_the_output() {
    init_tracing();
    let backend = MockBackend::new();
    let plan = Plan::from_value(json!([
        {"id": "all_users", "type": "tool", "server": "db", "tool": "list_users",
         "arguments": {}, "produces": "user_snapshot"}
    ]))
    .unwrap();

    let state = runner(&backend).run(&plan).await.unwrap();
    assert_eq!(state.get("all_users"), state.get("user_snapshot"));
}

#[tokio::test]
async fn state_keys_are_deterministic_across_runs() {
    init_tracing();
    let mut previous: Option<Vec<String>> = None;
    for _ in 0..3 {
        let backend = MockBackend::new();
        let state = runner(&backend).run(&explicit_fan_in_plan()).await.unwrap();
        let mut keys: Vec<String> = state.keys().map(str::to_string).collect();
        keys.sort_unstable();
        if let Some(previous) = &previous {
            assert_eq!(previous, &keys);
        }
        previous = Some(keys);
    }
}

#[tokio::test]
async fn larger_pool_completes_the_same_plan() {
    init_tracing();
    let backend = MockBackend::new();
    let state = runner_with_pool(&backend, 2)
        .run(&creates_then_list_plan())
        .await
        .unwrap();
    assert_eq!(state.len(), 4);
    assert_eq!(backend.users().len(), 3);
}

#[tokio::test]
async fn plan_from_raw_planner_text_round_trips() {
    init_tracing();
    let raw = r#"Sure! Here is the plan:
[
  {"id": "create_alice", "type": "tool", "server": "db", "tool": "create_user",
   "arguments": {"name": "Alice", "email": "alice@example.com"}},
  {"id": "read_user_list_file", "type": "resource", "uri": "file://user_list.json/"}
]
Hope that helps."#;

    let text = stratum_kernel::plan::extract_plan_text(raw).unwrap();
    let plan = Plan::from_json(text).unwrap();
    assert_eq!(plan.len(), 2);
    // intake normalization filled the resource step's omissions
    let resource = plan.get(1).unwrap();
    assert_eq!(resource.tool, "read_file");
    assert_eq!(
        resource.arguments.get("uri").and_then(Value::as_str),
        Some("file://user_list.json/")
    );
}
