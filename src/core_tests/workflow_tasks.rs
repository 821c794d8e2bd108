//! End-to-end scenarios for the workflow task handler: replay, sticky cache lifecycle, queries,
//! and non-determinism policies.

use crate::{
    errors::{WorkflowError, WorkflowTaskError},
    protocol::{
        decisions::{Decision, ScheduleActivityTaskDecisionAttributes},
        service::{
            DecisionTaskCompletion, PollForDecisionTaskResponse, QueryTaskCompletedType,
            WorkflowQuery,
        },
        ActivityType,
    },
    telemetry::{
        metrics::{self, test_sink::RecordingSink},
        MetricsContext,
    },
    test_help::{
        canned_histories, EmptyHistoryIterator, ScriptAction, ScriptedHandlerFactory,
        TestHistoryIterator,
    },
    worker::{
        workflow::{
            EventHandlerFactory, PressurePoint, PressurePointHandler, StickyCache,
            WorkflowTaskHandler,
        },
        LocalActivityResult, LocalActivityTask, LocalActivityTunnel, TunnelResult,
    },
    NonDeterministicWorkflowPolicy, WorkerConfigBuilder,
};
use std::{sync::Arc, time::Duration};

struct TestWorker {
    handler: Arc<WorkflowTaskHandler>,
    cache: Arc<StickyCache>,
    sink: Arc<RecordingSink>,
}

struct TestWorkerOptions {
    factory: Arc<dyn EventHandlerFactory>,
    cache_size: usize,
    policy: NonDeterministicWorkflowPolicy,
    disable_sticky: bool,
    tunnel: Option<LocalActivityTunnel>,
    pressure_points: Option<Arc<dyn PressurePointHandler>>,
}

impl TestWorkerOptions {
    fn new(factory: ScriptedHandlerFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            cache_size: 10,
            policy: NonDeterministicWorkflowPolicy::FailWorkflow,
            disable_sticky: false,
            tunnel: None,
            pressure_points: None,
        }
    }

    fn build(self) -> TestWorker {
        let mut builder = WorkerConfigBuilder::default();
        builder
            .domain("test-domain")
            .task_list("test-task-list")
            .identity("test-worker@localhost")
            .disable_sticky_execution(self.disable_sticky)
            .non_deterministic_workflow_policy(self.policy);
        if let Some(pp) = self.pressure_points {
            builder.pressure_points(pp);
        }
        let config = builder.build().unwrap();

        let sink = Arc::new(RecordingSink::default());
        let metrics = MetricsContext::top_level(
            sink.clone(),
            config.domain.clone(),
            config.task_list.clone(),
        );
        let cache = Arc::new(StickyCache::new(self.cache_size));
        let handler =
            WorkflowTaskHandler::new(&config, self.factory, cache.clone(), self.tunnel, metrics);
        TestWorker {
            handler,
            cache,
            sink,
        }
    }
}

fn schedule_activity_decision(activity_id: &str) -> Decision {
    Decision::ScheduleActivityTask(ScheduleActivityTaskDecisionAttributes {
        activity_id: activity_id.to_string(),
        activity_type: ActivityType {
            name: "test.Activity".to_string(),
        },
        task_list: "test-task-list".to_string(),
        ..Default::default()
    })
}

fn completed_request(
    completion: Option<DecisionTaskCompletion>,
) -> crate::protocol::service::RespondDecisionTaskCompletedRequest {
    match completion {
        Some(DecisionTaskCompletion::Completed(request)) => request,
        other => panic!("expected a decision task completion, got {:?}", other),
    }
}

#[tokio::test]
async fn first_decision_task_with_no_decisions() {
    let t = canned_histories::first_decision_task();
    let worker = TestWorkerOptions::new(ScriptedHandlerFactory::default()).build();

    let (completion, _ctx) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();

    let request = completed_request(completion);
    assert!(request.decisions.is_empty());
    assert!(request.return_new_decision_task);
    assert!(!request.force_create_new_decision_task);
    assert_eq!(request.identity, "test-worker@localhost");
    // live run stays cached for sticky execution
    assert_eq!(worker.cache.size(), 1);
}

#[tokio::test]
async fn workflow_completes_after_activity_replay() {
    let t = canned_histories::single_activity("act-1");
    let factory = ScriptedHandlerFactory::with_actions([
        (1, ScriptAction::decide(vec![schedule_activity_decision("act-1")])),
        (2, ScriptAction::complete_workflow(Some(b"done".to_vec()))),
    ]);
    let worker = TestWorkerOptions::new(factory).build();

    let (completion, _ctx) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();

    let request = completed_request(completion);
    assert_matches!(
        request.decisions.as_slice(),
        [Decision::CompleteWorkflowExecution(attrs)] => {
            assert_eq!(attrs.result, Some(b"done".to_vec()));
        }
    );
    assert_eq!(worker.sink.counter_count(metrics::WORKFLOW_COMPLETED), 1);
    assert!(worker
        .sink
        .timers
        .lock()
        .contains(&metrics::WORKFLOW_ENDTOEND_LATENCY));
    // terminal runs leave the cache on unlock
    assert_eq!(worker.cache.size(), 0);
}

#[tokio::test]
async fn nondeterminism_fail_workflow_policy() {
    let t = canned_histories::single_activity("act-1");
    let factory = ScriptedHandlerFactory::with_actions([(
        1,
        ScriptAction::decide(vec![schedule_activity_decision("some-other-id")]),
    )]);
    let worker = TestWorkerOptions::new(factory).build();

    let (completion, _ctx) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();

    let request = completed_request(completion);
    assert_matches!(
        request.decisions.as_slice(),
        [Decision::FailWorkflowExecution(attrs)] => {
            assert_eq!(attrs.reason, "nondeterministic workflow");
            assert!(attrs.details.is_some());
        }
    );
    assert_eq!(
        worker.sink.counter_count(metrics::NON_DETERMINISTIC_ERROR),
        1
    );
    assert_eq!(worker.cache.size(), 0);
}

#[tokio::test]
async fn nondeterminism_block_workflow_policy() {
    let t = canned_histories::single_activity("act-1");
    let factory = ScriptedHandlerFactory::with_actions([(
        1,
        ScriptAction::decide(vec![schedule_activity_decision("some-other-id")]),
    )]);
    let mut options = TestWorkerOptions::new(factory);
    options.policy = NonDeterministicWorkflowPolicy::BlockWorkflow;
    let worker = options.build();

    let result = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await;

    assert_matches!(result, Err(WorkflowTaskError::Nondeterminism(_)));
    // the errored run must not stay cached
    assert_eq!(worker.cache.size(), 0);
}

#[tokio::test]
async fn query_against_uncached_run_fetches_full_history() {
    let t = canned_histories::single_activity("act-1");
    let factory = ScriptedHandlerFactory::with_actions([
        (1, ScriptAction::decide(vec![schedule_activity_decision("act-1")])),
    ]);
    let handler_state = factory.state.clone();
    let worker = TestWorkerOptions::new(factory).build();

    let mut task = t.as_sticky_task(1000, 3);
    assert!(task.history.events.is_empty());
    task.query = Some(WorkflowQuery {
        query_type: "state".to_string(),
        query_args: None,
    });
    let mut iterator = TestHistoryIterator::new(t.events(), 3);

    let (completion, ctx) = worker
        .handler
        .process_workflow_task(task, &mut iterator)
        .await
        .unwrap();

    match completion {
        Some(DecisionTaskCompletion::QueryCompleted(request)) => {
            assert_eq!(request.completed_type, QueryTaskCompletedType::Completed);
            assert_eq!(request.query_result, Some(b"query-result".to_vec()));
            assert_eq!(request.error_message, None);
        }
        other => panic!("expected query completion, got {:?}", other),
    }
    assert_eq!(worker.sink.counter_count(metrics::STICKY_CACHE_MISS), 1);
    assert_eq!(handler_state.lock().queries, vec!["state".to_string()]);
    // query tasks never enter the cache and never advance replay progress
    assert_eq!(worker.cache.size(), 0);
    assert_eq!(ctx.lock().await.previous_started_event_id, 0);
}

#[tokio::test]
async fn query_against_cached_run_leaves_state_untouched() {
    let t = canned_histories::first_decision_task();
    let worker = TestWorkerOptions::new(ScriptedHandlerFactory::default()).build();

    let (_, ctx) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();
    assert_eq!(ctx.lock().await.previous_started_event_id, 3);

    let mut query_task = t.as_sticky_task(1000, 3);
    query_task.query = Some(WorkflowQuery {
        query_type: "state".to_string(),
        query_args: None,
    });

    let (completion, ctx) = worker
        .handler
        .process_workflow_task(query_task, &mut EmptyHistoryIterator)
        .await
        .unwrap();

    assert_matches!(completion, Some(DecisionTaskCompletion::QueryCompleted(_)));
    assert!(worker.sink.counter_count(metrics::STICKY_CACHE_HIT) >= 1);
    assert_eq!(worker.cache.size(), 1);
    assert_eq!(ctx.lock().await.previous_started_event_id, 3);
}

#[tokio::test]
async fn stale_cached_state_rebuilds_from_full_history() {
    let t = canned_histories::single_activity("act-1");
    let factory = ScriptedHandlerFactory::with_actions([
        (1, ScriptAction::decide(vec![schedule_activity_decision("act-1")])),
        (2, ScriptAction::complete_workflow(None)),
    ]);
    let state = factory.state.clone();
    let worker = TestWorkerOptions::new(factory).build();

    // first decision task primes the cache up to event 3
    let (completion, ctx) = worker
        .handler
        .process_workflow_task(t.as_task_ending_at(3, 0), &mut EmptyHistoryIterator)
        .await
        .unwrap();
    let request = completed_request(completion);
    assert_matches!(request.decisions.as_slice(), [Decision::ScheduleActivityTask(_)]);
    assert_eq!(ctx.lock().await.previous_started_event_id, 3);

    // a sticky task skipping ahead of the cached state (first event 6, expected 4)
    let mut iterator = TestHistoryIterator::new(t.events(), 100);
    let (completion, ctx) = worker
        .handler
        .process_workflow_task(t.as_sticky_task(6, 3), &mut iterator)
        .await
        .unwrap();

    let request = completed_request(completion);
    assert_matches!(
        request.decisions.as_slice(),
        [Decision::CompleteWorkflowExecution(_)]
    );
    assert_eq!(worker.sink.counter_count(metrics::STICKY_CACHE_STALL), 1);
    // the stale handler was torn down and a fresh one replayed everything
    assert_eq!(state.lock().created, 2);
    assert_eq!(state.lock().closed, 1);
    assert_eq!(ctx.lock().await.previous_started_event_id, 9);
}

#[tokio::test]
async fn sticky_cache_hit_applies_incremental_history() {
    let t = canned_histories::single_activity("act-1");
    let factory = ScriptedHandlerFactory::with_actions([
        (1, ScriptAction::decide(vec![schedule_activity_decision("act-1")])),
        (2, ScriptAction::complete_workflow(Some(b"ok".to_vec()))),
    ]);
    let state = factory.state.clone();
    let worker = TestWorkerOptions::new(factory).build();

    let (completion, _) = worker
        .handler
        .process_workflow_task(t.as_task_ending_at(3, 0), &mut EmptyHistoryIterator)
        .await
        .unwrap();
    assert_matches!(
        completed_request(completion).decisions.as_slice(),
        [Decision::ScheduleActivityTask(_)]
    );

    // continuation starting exactly after the cached progress point
    let (completion, _) = worker
        .handler
        .process_workflow_task(t.as_sticky_task(4, 3), &mut EmptyHistoryIterator)
        .await
        .unwrap();

    let request = completed_request(completion);
    assert_matches!(
        request.decisions.as_slice(),
        [Decision::CompleteWorkflowExecution(attrs)] => {
            assert_eq!(attrs.result, Some(b"ok".to_vec()));
        }
    );
    assert!(worker.sink.counter_count(metrics::STICKY_CACHE_HIT) >= 1);
    // one handler served both tasks
    assert_eq!(state.lock().created, 1);
    // only the batch-closing started event may be flagged is_last, and only when not replaying
    let processed = state.lock().processed.clone();
    let (event_id, event_type, is_replay, is_last) = *processed.last().unwrap();
    assert_eq!(event_id, 9);
    assert_eq!(event_type, crate::protocol::history::EventType::DecisionTaskStarted);
    assert!(!is_replay);
    assert!(is_last);
    // the new events preceding it in the same batch are not
    assert!(processed
        .iter()
        .filter(|(id, ..)| (5..9).contains(id))
        .all(|(_, _, _, last)| !last));
}

#[tokio::test]
async fn lru_eviction_of_live_run_queues_reset_stickiness() {
    let (tunnel, _task_rx, mut result_rx) = LocalActivityTunnel::new(16);
    let t_first = canned_histories::first_decision_task();
    let t_second = canned_histories::first_decision_task();

    let mut options = TestWorkerOptions::new(ScriptedHandlerFactory::default());
    options.cache_size = 1;
    options.tunnel = Some(tunnel);
    let worker = options.build();

    worker
        .handler
        .process_workflow_task(t_first.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();
    assert_eq!(worker.cache.size(), 1);

    // second run overflows the capacity-1 cache and evicts the first
    worker
        .handler
        .process_workflow_task(t_second.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();
    assert_eq!(worker.cache.size(), 1);

    let notice = tokio::time::timeout(Duration::from_secs(5), result_rx.recv())
        .await
        .expect("eviction must enqueue a reset-stickiness request")
        .unwrap();
    match notice {
        TunnelResult::ResetStickiness(request) => {
            assert_eq!(request.domain, "test-domain");
            assert_eq!(request.execution.run_id, t_first.run_id());
        }
        other => panic!("unexpected tunnel notice: {:?}", other),
    }
    // exactly one reset per eviction
    assert!(result_rx.try_recv().is_err());
}

#[tokio::test]
async fn clear_evicts_all_runs_but_resets_stickiness_only_for_live_ones() {
    let (tunnel, _task_rx, mut result_rx) = LocalActivityTunnel::new(16);
    let live = canned_histories::first_decision_task();
    let completed = canned_histories::first_decision_task();
    let errored = canned_histories::first_decision_task();

    let mut options = TestWorkerOptions::new(ScriptedHandlerFactory::default());
    options.tunnel = Some(tunnel);
    let worker = options.build();

    for t in [&live, &completed, &errored] {
        worker
            .handler
            .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
            .await
            .unwrap();
    }
    assert_eq!(worker.cache.size(), 3);

    // push two of the runs into terminal states while they are still cached
    worker
        .cache
        .get(completed.run_id())
        .unwrap()
        .lock()
        .await
        .completion
        .complete(None, None);
    worker
        .cache
        .get(errored.run_id())
        .unwrap()
        .lock()
        .await
        .completion
        .complete(None, Some(WorkflowError::custom("boom", None)));

    worker.cache.clear();
    assert_eq!(worker.cache.size(), 0);

    let notice = tokio::time::timeout(Duration::from_secs(5), result_rx.recv())
        .await
        .expect("clearing a live run must enqueue a reset-stickiness request")
        .unwrap();
    match notice {
        TunnelResult::ResetStickiness(request) => {
            assert_eq!(request.execution.run_id, live.run_id());
        }
        other => panic!("unexpected tunnel notice: {:?}", other),
    }
    // terminal runs evict without a server call
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(result_rx.try_recv().is_err());
}

#[tokio::test]
async fn completed_run_leaves_cache_silently() {
    let (tunnel, _task_rx, mut result_rx) = LocalActivityTunnel::new(16);
    let t = canned_histories::first_decision_task();
    let factory = ScriptedHandlerFactory::with_actions([(
        1,
        ScriptAction::complete_workflow(None),
    )]);
    let mut options = TestWorkerOptions::new(factory);
    options.tunnel = Some(tunnel);
    let worker = options.build();

    let (completion, _) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();
    assert_matches!(
        completed_request(completion).decisions.as_slice(),
        [Decision::CompleteWorkflowExecution(_)]
    );
    assert_eq!(worker.cache.size(), 0);
    // voluntary removal sends nothing to the server
    assert!(result_rx.try_recv().is_err());
}

#[tokio::test]
async fn sticky_disabled_worker_never_caches() {
    let t = canned_histories::first_decision_task();
    let mut options = TestWorkerOptions::new(ScriptedHandlerFactory::default());
    options.disable_sticky = true;
    let worker = options.build();

    let (completion, _) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();

    assert_matches!(completion, Some(DecisionTaskCompletion::Completed(_)));
    assert_eq!(worker.cache.size(), 0);
}

#[tokio::test]
async fn pending_local_activities_defer_the_response() {
    let (tunnel, mut task_rx, _result_rx) = LocalActivityTunnel::new(16);
    let t = canned_histories::first_decision_task();
    let factory = ScriptedHandlerFactory {
        unstarted_local_activities: vec![LocalActivityTask {
            activity_id: "la-1".to_string(),
            activity_type: "test.LocalActivity".to_string(),
            input: None,
        }],
        la_completes_workflow: true,
        ..Default::default()
    };
    let mut options = TestWorkerOptions::new(factory);
    options.tunnel = Some(tunnel);
    let worker = options.build();

    let (completion, _ctx) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();
    // cannot respond yet; the local activity runner owes us a result
    assert!(completion.is_none());
    assert_eq!(worker.cache.size(), 1);

    let dispatch = tokio::time::timeout(Duration::from_secs(5), task_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dispatch.task.activity_id, "la-1");
    assert_eq!(dispatch.context.run_id(), t.run_id());

    let completion = dispatch
        .context
        .process_local_activity_result(LocalActivityResult {
            activity_id: "la-1".to_string(),
            result: Ok(Some(b"la-done".to_vec())),
        })
        .await
        .unwrap();

    let request = completed_request(completion);
    assert_matches!(
        request.decisions.as_slice(),
        [Decision::CompleteWorkflowExecution(attrs)] => {
            assert_eq!(attrs.result, Some(b"la-done".to_vec()));
        }
    );
    assert_eq!(worker.cache.size(), 0);
}

#[tokio::test]
async fn empty_task_is_rejected() {
    let worker = TestWorkerOptions::new(ScriptedHandlerFactory::default()).build();
    let result = worker
        .handler
        .process_workflow_task(
            PollForDecisionTaskResponse::default(),
            &mut EmptyHistoryIterator,
        )
        .await;
    assert_matches!(result, Err(WorkflowTaskError::EmptyTask));
}

struct FailOn(PressurePoint);

impl PressurePointHandler for FailOn {
    fn execute(&self, point: PressurePoint) -> Result<(), anyhow::Error> {
        if point == self.0 {
            anyhow::bail!("pressure point fired")
        }
        Ok(())
    }
}

#[tokio::test]
async fn pressure_points_fire_outside_replay_only() {
    let t = canned_histories::first_decision_task();
    let mut options = TestWorkerOptions::new(ScriptedHandlerFactory::default());
    options.pressure_points = Some(Arc::new(FailOn(PressurePoint::DecisionTaskStartTimeout)));
    let worker = options.build();

    // the final started event is not a replay event, so the hook fires
    let result = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await;
    assert_matches!(result, Err(WorkflowTaskError::PressurePoint(_)));
}

#[tokio::test]
async fn cache_returns_existing_entry_on_duplicate_insert() {
    let t = canned_histories::first_decision_task();
    let worker = TestWorkerOptions::new(ScriptedHandlerFactory::default()).build();

    let (_, first_ctx) = worker
        .handler
        .process_workflow_task(t.as_full_history_task(), &mut EmptyHistoryIterator)
        .await
        .unwrap();

    let existing = worker.cache.put_if_not_exist(
        t.run_id().to_string(),
        first_ctx.clone(),
    );
    assert!(Arc::ptr_eq(&existing, &first_ctx));
    assert_eq!(worker.cache.size(), 1);

    worker.cache.delete(t.run_id());
    assert_eq!(worker.cache.size(), 0);
}
