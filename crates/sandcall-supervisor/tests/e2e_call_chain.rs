//! End-to-end call chain tests.
//!
//! Each test runs a real [`Supervisor`] event loop against scripted in-memory
//! sandboxes and talks to it only through messages, the way an embedding
//! application would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sandcall_messaging::{
    AddableAction, DEFAULT_PLUGIN, ErrorResult, FunctionCallRequest, FunctionCallResponse, Message,
    QualifiedFunctionCallArgs,
};
use sandcall_supervisor::{
    MethodScript, PluginScript, RecordingSubmitter, SiblingDomain, Simulation, Supervisor,
    SupervisorConfig, SupervisorMetrics,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

const APP: &str = "https://wallet.example.com";
const OTHER_APP: &str = "https://explorer.example.com";

struct Harness {
    sim: Arc<Simulation>,
    replies: mpsc::UnboundedReceiver<FunctionCallResponse>,
    submitter: Arc<RecordingSubmitter>,
    metrics: Arc<SupervisorMetrics>,
}

impl Harness {
    fn start(config: SupervisorConfig, scripts: Vec<PluginScript>) -> Self {
        Self::start_with(config, scripts, |sim| sim, RecordingSubmitter::new())
    }

    fn start_with(
        config: SupervisorConfig,
        scripts: Vec<PluginScript>,
        customize: impl FnOnce(Simulation) -> Simulation,
        submitter: RecordingSubmitter,
    ) -> Self {
        let (sim, channels) = Simulation::new(SiblingDomain::from_config(&config), scripts);
        let sim = Arc::new(customize(sim));
        let submitter = Arc::new(submitter);

        let supervisor = Supervisor::new(config, sim.clone(), submitter.clone());
        let metrics = supervisor.metrics();
        tokio::spawn(supervisor.run(channels.inbound));

        Self {
            sim,
            replies: channels.replies,
            submitter,
            metrics,
        }
    }

    fn call(&self, origin: &str, id: &str, args: QualifiedFunctionCallArgs) {
        let request = Message::FunctionCallRequest(FunctionCallRequest {
            id: id.into(),
            args,
        });
        self.sim.send_from_application(origin, &request).unwrap();
    }

    async fn reply(&mut self) -> FunctionCallResponse {
        tokio::time::timeout(Duration::from_secs(10), self.replies.recv())
            .await
            .expect("no reply within 10s")
            .expect("reply channel closed")
    }

    /// Let the event loop drain everything currently queued.
    async fn settle(&self) {
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        root_domain: "example.com".into(),
        ..SupervisorConfig::default()
    }
}

fn call(service: &str, method: &str, params: Vec<Value>) -> QualifiedFunctionCallArgs {
    QualifiedFunctionCallArgs::new(service, DEFAULT_PLUGIN, None, method, params)
}

fn script(service: &str, methods: Vec<(&str, MethodScript)>) -> PluginScript {
    PluginScript {
        service: service.into(),
        plugin: DEFAULT_PLUGIN.into(),
        dependencies: vec![],
        methods: methods
            .into_iter()
            .map(|(name, method)| (name.to_string(), method))
            .collect::<HashMap<_, _>>(),
    }
}

fn returns(result: Value) -> MethodScript {
    MethodScript {
        result,
        ..MethodScript::default()
    }
}

fn failing(error: ErrorResult) -> MethodScript {
    MethodScript {
        error: Some(error),
        ..MethodScript::default()
    }
}

fn act(service: &str, action: &str) -> AddableAction {
    AddableAction::new(service, action, vec![0xab])
}

#[tokio::test]
async fn nested_call_resolves_and_submits_once() {
    let scripts = vec![
        script(
            "a",
            vec![(
                "foo",
                MethodScript {
                    calls: vec![call("b", "bar", vec![json!(2)])],
                    result: json!("done"),
                    actions: vec![act("a", "act")],
                    error: None,
                },
            )],
        ),
        script("b", vec![("bar", returns(json!(42)))]),
    ];
    let mut harness = Harness::start(config(), scripts);

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    assert_eq!(reply.id, "req-1");
    assert_eq!(reply.call.service, "a");
    assert_eq!(reply.call.method, "foo");
    assert_eq!(reply.result, json!("done"));
    assert_eq!(harness.submitter.batches(), vec![vec![act("a", "act")]]);

    let invocations = harness.sim.invocations();
    let methods: Vec<&str> = invocations.iter().map(|r| r.args.method.as_str()).collect();
    assert_eq!(methods, vec!["foo", "bar", "foo"]);

    // bar is invoked by a's sandbox; foo is re-invoked with bar's result cached.
    assert_eq!(invocations[1].caller, "https://a.example.com");
    assert!(invocations[0].result_cache.is_empty());
    assert_eq!(invocations[2].result_cache.len(), 1);
    assert_eq!(invocations[2].result_cache[0].result, json!(42));
    assert_eq!(invocations[2].result_cache[0].allowed_service, "a");

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.chains_started, 1);
    assert_eq!(snapshot.chains_completed, 1);
    assert_eq!(snapshot.frames_dispatched, 3);
    assert_eq!(snapshot.results_cached, 1);
    assert_eq!(snapshot.transactions_submitted, 1);
}

#[tokio::test]
async fn actions_from_every_frame_are_submitted_together_in_order() {
    let scripts = vec![
        script(
            "a",
            vec![(
                "foo",
                MethodScript {
                    calls: vec![call("b", "bar", vec![]), call("c", "baz", vec![])],
                    result: json!("done"),
                    actions: vec![act("a", "settle")],
                    error: None,
                },
            )],
        ),
        script(
            "b",
            vec![(
                "bar",
                MethodScript {
                    result: json!(1),
                    actions: vec![act("b", "debit")],
                    ..MethodScript::default()
                },
            )],
        ),
        script(
            "c",
            vec![(
                "baz",
                MethodScript {
                    result: json!(2),
                    actions: vec![act("c", "credit")],
                    ..MethodScript::default()
                },
            )],
        ),
    ];
    let mut harness = Harness::start(config(), scripts);

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    assert_eq!(reply.result, json!("done"));
    assert_eq!(
        harness.submitter.batches(),
        vec![vec![act("b", "debit"), act("c", "credit"), act("a", "settle")]]
    );
    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.transactions_submitted, 1);
    assert_eq!(snapshot.results_cached, 2);
}

#[tokio::test]
async fn chain_without_actions_skips_submission() {
    let mut harness = Harness::start(config(), vec![script("a", vec![("foo", returns(json!(7)))])]);

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    assert_eq!(reply.result, json!(7));
    assert!(harness.submitter.batches().is_empty());
}

#[tokio::test]
async fn unrecoverable_error_discards_all_actions() {
    let scripts = vec![
        script(
            "a",
            vec![(
                "foo",
                MethodScript {
                    calls: vec![call("b", "bar", vec![]), call("c", "baz", vec![])],
                    result: json!("done"),
                    actions: vec![act("a", "act")],
                    error: None,
                },
            )],
        ),
        script(
            "b",
            vec![(
                "bar",
                MethodScript {
                    result: json!(1),
                    actions: vec![act("b", "credit")],
                    ..MethodScript::default()
                },
            )],
        ),
        script("c", vec![("baz", failing(ErrorResult::unrecoverable("boom")))]),
    ];
    let mut harness = Harness::start(config(), scripts);

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    assert_eq!(reply.id, "req-1");
    let error = ErrorResult::from_value(&reply.result).expect("error reply");
    assert_eq!(error.message(), Some("boom"));
    assert!(harness.submitter.batches().is_empty());
    assert_eq!(harness.metrics.snapshot().chains_aborted, 1);
    assert_eq!(harness.metrics.snapshot().chains_completed, 0);
}

#[tokio::test]
async fn recoverable_nested_error_is_handed_to_the_caller() {
    let scripts = vec![
        script(
            "a",
            vec![(
                "foo",
                MethodScript {
                    calls: vec![call("b", "bar", vec![])],
                    result: json!("recovered"),
                    ..MethodScript::default()
                },
            )],
        ),
        script("b", vec![("bar", failing(ErrorResult::recoverable("try again")))]),
    ];
    let mut harness = Harness::start(config(), scripts);

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    assert_eq!(reply.result, json!("recovered"));
    let retried = &harness.sim.invocations()[2];
    assert!(ErrorResult::from_value(&retried.result_cache[0].result).is_some());
}

#[tokio::test]
async fn recoverable_error_at_root_is_replied_without_submission() {
    let scripts = vec![script(
        "a",
        vec![("foo", failing(ErrorResult::recoverable("insufficient balance")))],
    )];
    let mut harness = Harness::start(config(), scripts);

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    let error = ErrorResult::from_value(&reply.result).expect("error reply");
    assert!(error.is_recoverable());
    assert!(harness.submitter.batches().is_empty());
}

#[tokio::test]
async fn second_root_application_is_rejected_until_chain_resolves() {
    let scripts = vec![script("a", vec![("foo", returns(json!("first")))])];
    let mut harness = Harness::start(config(), scripts);

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    harness.call(OTHER_APP, "req-2", call("a", "foo", vec![]));

    let reply = harness.reply().await;
    assert_eq!(reply.id, "req-1");
    harness.settle().await;
    assert!(harness.replies.try_recv().is_err());

    harness.call(OTHER_APP, "req-3", call("a", "foo", vec![]));
    let reply = harness.reply().await;
    assert_eq!(reply.id, "req-3");
    assert_eq!(harness.metrics.snapshot().chains_started, 2);
}

#[tokio::test]
async fn applications_outside_the_root_domain_are_ignored() {
    let scripts = vec![script("a", vec![("foo", returns(json!(1)))])];
    let mut harness = Harness::start(config(), scripts);

    harness.call("https://evil.com", "req-1", call("a", "foo", vec![]));
    harness.settle().await;

    assert!(harness.replies.try_recv().is_err());
    assert!(harness.sim.invocations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unresponsive_sandbox_times_out_with_service_name() {
    let mut harness = Harness::start_with(
        config(),
        vec![script("a", vec![("foo", returns(json!(1)))])],
        |sim| sim.with_unresponsive("a"),
        RecordingSubmitter::new(),
    );

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    let error = ErrorResult::from_value(&reply.result).expect("error reply");
    let message = error.message().unwrap_or_default();
    assert!(message.contains("`a`"), "unexpected error: {message}");
    assert!(message.contains("2000ms"), "unexpected error: {message}");
    assert!(harness.sim.invocations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn call_deadline_aborts_a_stuck_frame() {
    let config = SupervisorConfig {
        call_timeout_ms: Some(500),
        ..config()
    };
    let mut harness = Harness::start_with(
        config,
        vec![script("a", vec![("foo", returns(json!(1)))])],
        |sim| sim.with_unresponsive("a"),
        RecordingSubmitter::new(),
    );

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    let error = ErrorResult::from_value(&reply.result).expect("error reply");
    assert!(error.message().unwrap_or_default().contains("500ms"));

    // The later sandbox timeout belongs to the aborted chain and is dropped.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(harness.replies.try_recv().is_err());
    assert_eq!(harness.metrics.snapshot().chains_aborted, 1);
}

#[tokio::test]
async fn rejected_transaction_becomes_error_reply() {
    let scripts = vec![script(
        "a",
        vec![(
            "foo",
            MethodScript {
                result: json!("done"),
                actions: vec![act("a", "act")],
                ..MethodScript::default()
            },
        )],
    )];
    let mut harness = Harness::start_with(
        config(),
        scripts,
        |sim| sim,
        RecordingSubmitter::rejecting("insufficient resources"),
    );

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    let error = ErrorResult::from_value(&reply.result).expect("error reply");
    assert!(error.message().unwrap_or_default().contains("insufficient resources"));
    assert_eq!(harness.metrics.snapshot().transactions_failed, 1);
}

#[tokio::test]
async fn preloaded_dependencies_are_loaded_before_any_call() {
    let mut a = script("a", vec![("foo", returns(json!(1)))]);
    a.dependencies = vec![sandcall_messaging::QualifiedPluginId::new("b", DEFAULT_PLUGIN)];
    let scripts = vec![a, script("b", vec![])];
    let mut harness = Harness::start(config(), scripts);

    harness
        .sim
        .send_from_application(APP, &Message::preload_plugins_request(vec!["a".into()]))
        .unwrap();
    harness.settle().await;

    harness.call(APP, "req-1", call("a", "foo", vec![]));
    let reply = harness.reply().await;

    assert_eq!(reply.result, json!(1));
    assert_eq!(harness.metrics.snapshot().chains_started, 1);
}
