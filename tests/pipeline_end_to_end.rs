// tests/pipeline_end_to_end.rs

mod common;
use crate::common::{
    RegistryBuilder, init_tracing, options, parallel, pipeline_with_sink, sequential, with_timeout,
};

use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;

use etldag::dag::{TaskDefinition, TaskRegistry, TaskState};
use etldag::errors::EtlDagError;
use etldag::events::RunEvent;
use etldag::exec::SimulatedWork;
use etldag::tracker::{RunId, RunState};
use etldag::types::{EngineOptions, FailurePolicy, StartWhileActiveBehaviour};

type TestResult = Result<(), Box<dyn Error>>;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// ETL graph with distinct per-task delays; the critical path is
/// start, extract, transform, load_b, validate, end = 1300 ms.
fn timed_etl() -> RegistryBuilder {
    RegistryBuilder::etl(Duration::ZERO)
        .delay("start", ms(100))
        .delay("extract", ms(200))
        .delay("transform", ms(300))
        .delay("load_a", ms(400))
        .delay("load_b", ms(500))
        .delay("validate", ms(100))
        .delay("end", ms(100))
}

#[tokio::test(start_paused = true)]
async fn extract_failure_skips_everything_downstream() -> TestResult {
    init_tracing();

    let registry = RegistryBuilder::etl(ms(10))
        .failing("extract", "file not found: data/test_small.csv")
        .build();
    let (pipeline, _) = pipeline_with_sink(registry, sequential());

    let run_id = pipeline.start_run()?;
    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;

    assert_eq!(snapshot.state_of("start"), Some(TaskState::Success));
    assert_eq!(snapshot.state_of("extract"), Some(TaskState::Failed));
    for task in ["transform", "load_a", "load_b", "validate", "end"] {
        assert_eq!(snapshot.state_of(task), Some(TaskState::Skipped), "{task}");
    }
    assert_eq!(snapshot.overall_state, RunState::Failed);

    let extract = snapshot.task("extract").unwrap();
    assert_eq!(extract.error.as_deref(), Some("file not found: data/test_small.csv"));
    assert!(extract.ended_at.is_some());
    assert_eq!(
        snapshot.task("transform").unwrap().skip_reason.as_deref(),
        Some("upstream task 'extract' failed")
    );

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sequential_run_takes_sum_of_task_durations() -> TestResult {
    init_tracing();

    let (pipeline, _) = pipeline_with_sink(timed_etl().build(), sequential());
    let run_id = pipeline.start_run()?;
    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;

    assert_eq!(snapshot.overall_state, RunState::Success);
    assert!(snapshot.tasks.iter().all(|t| t.state == TaskState::Success));

    let sum = snapshot.total_task_duration();
    assert!(sum >= ms(1700), "sum of task durations was {sum:?}");

    // Tasks run back to back, so the run lasts as long as its tasks together.
    let total = snapshot.duration.unwrap();
    assert!(total >= sum, "run {total:?} shorter than tasks {sum:?}");
    assert!(total < sum + ms(50), "run {total:?} much longer than tasks {sum:?}");

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parallel_run_is_bounded_by_longest_chain() -> TestResult {
    init_tracing();

    let (pipeline, _) = pipeline_with_sink(timed_etl().build(), parallel(4));
    let run_id = pipeline.start_run()?;
    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;

    assert_eq!(snapshot.overall_state, RunState::Success);
    let total = snapshot.duration.unwrap();
    assert!(total >= ms(1300), "run took {total:?}");
    // load_a and load_b overlap.
    assert!(total < snapshot.total_task_duration(), "run took {total:?}");

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn only_one_run_may_be_active() -> TestResult {
    init_tracing();

    let (pipeline, _) = pipeline_with_sink(RegistryBuilder::etl(ms(50)).build(), sequential());

    let first = pipeline.start_run()?;
    match pipeline.start_run() {
        Err(EtlDagError::RunAlreadyActive(active)) => assert_eq!(active, first),
        other => panic!("expected RunAlreadyActive, got {other:?}"),
    }

    let snapshot = with_timeout(pipeline.wait_for(&first)).await?;
    assert!(snapshot.overall_state.is_terminal());

    let second = pipeline.start_run()?;
    assert_ne!(first, second);
    with_timeout(pipeline.wait_for(&second)).await?;

    let listed: Vec<_> = pipeline.list_runs(10).into_iter().map(|r| r.run_id).collect();
    assert_eq!(listed, vec![second, first]);
    assert_eq!(pipeline.latest_run().unwrap().run_id, second);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_run_is_not_found() -> TestResult {
    let (pipeline, _) = pipeline_with_sink(RegistryBuilder::etl(Duration::ZERO).build(), sequential());
    let missing: RunId = "00000000-0000-4000-8000-000000000000".parse()?;

    assert!(matches!(pipeline.get_status(&missing), Err(EtlDagError::RunNotFound(_))));
    assert!(matches!(pipeline.cancel_run(&missing), Err(EtlDagError::RunNotFound(_))));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn continue_on_error_keeps_independent_branches_running() -> TestResult {
    init_tracing();

    // validate depends on {load_a, load_b}; load_a fails.
    let registry = RegistryBuilder::etl(ms(20))
        .task("audit", &[], SimulatedWork::new("audit").delay(ms(500)).records(1))
        .failing("load_a", "connection refused")
        .build();
    let (pipeline, _) =
        pipeline_with_sink(registry, options(FailurePolicy::ContinueOnError, 3));

    let run_id = pipeline.start_run()?;
    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;

    assert_eq!(snapshot.state_of("load_a"), Some(TaskState::Failed));
    assert_eq!(snapshot.state_of("validate"), Some(TaskState::Skipped));
    assert_eq!(snapshot.state_of("end"), Some(TaskState::Skipped));
    // Not downstream of load_a.
    assert_eq!(snapshot.state_of("load_b"), Some(TaskState::Success));
    assert_eq!(snapshot.state_of("audit"), Some(TaskState::Success));
    assert_eq!(snapshot.overall_state, RunState::Failed);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cascade_policy_halts_independent_branches() -> TestResult {
    init_tracing();

    // zz_report is independent and sorts last, so it is still pending when
    // extract fails.
    let registry = RegistryBuilder::etl(ms(20))
        .task("zz_report", &[], SimulatedWork::new("report"))
        .failing("extract", "file not found")
        .build();
    let (pipeline, _) = pipeline_with_sink(registry, sequential());

    let run_id = pipeline.start_run()?;
    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;

    let report = snapshot.task("zz_report").unwrap();
    assert_eq!(report.state, TaskState::Skipped);
    assert_eq!(
        report.skip_reason.as_deref(),
        Some("run halted after failure of task 'extract'")
    );
    assert_eq!(snapshot.overall_state, RunState::Failed);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_lets_running_task_finish_and_skips_the_rest() -> TestResult {
    init_tracing();

    let (pipeline, _) = pipeline_with_sink(timed_etl().build(), sequential());
    let run_id = pipeline.start_run()?;

    // start is done at 100 ms, extract runs until 300 ms.
    tokio::time::sleep(ms(150)).await;
    assert_eq!(pipeline.get_status(&run_id)?.state_of("extract"), Some(TaskState::Running));
    assert!(pipeline.cancel_run(&run_id)?);
    assert!(!pipeline.cancel_run(&run_id)?);

    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;
    assert_eq!(snapshot.state_of("start"), Some(TaskState::Success));
    assert_eq!(snapshot.state_of("extract"), Some(TaskState::Success));
    for task in ["transform", "load_a", "load_b", "validate", "end"] {
        let t = snapshot.task(task).unwrap();
        assert_eq!(t.state, TaskState::Skipped, "{task}");
        assert_eq!(t.skip_reason.as_deref(), Some("run cancelled"));
    }
    assert_eq!(snapshot.overall_state, RunState::Cancelled);

    // A finished run cannot be cancelled again.
    assert!(!pipeline.cancel_run(&run_id)?);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn preempting_start_cancels_the_active_run() -> TestResult {
    init_tracing();

    let options = EngineOptions {
        start_while_active: StartWhileActiveBehaviour::Preempt,
        ..sequential()
    };
    let (pipeline, _) = pipeline_with_sink(timed_etl().build(), options);

    let first = pipeline.start_run()?;
    tokio::time::sleep(ms(150)).await;
    let second = pipeline.start_run()?;
    assert_eq!(pipeline.active_run(), Some(second));

    let first_snapshot = with_timeout(pipeline.wait_for(&first)).await?;
    assert_eq!(first_snapshot.overall_state, RunState::Cancelled);

    let second_snapshot = with_timeout(pipeline.wait_for(&second)).await?;
    assert_eq!(second_snapshot.overall_state, RunState::Success);
    assert!(second_snapshot.created_at >= first_snapshot.created_at);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn run_preempted_while_queued_never_starts() -> TestResult {
    init_tracing();

    let options = EngineOptions {
        start_while_active: StartWhileActiveBehaviour::Preempt,
        ..sequential()
    };
    let (pipeline, sink) = pipeline_with_sink(timed_etl().build(), options);

    let first = pipeline.start_run()?;
    tokio::time::sleep(ms(50)).await;
    // `queued` waits behind `first` and is preempted before the worker reaches it.
    let queued = pipeline.start_run()?;
    let last = pipeline.start_run()?;
    assert_eq!(pipeline.active_run(), Some(last));

    let queued_snapshot = with_timeout(pipeline.wait_for(&queued)).await?;
    assert!(queued_snapshot.cancel_requested);
    assert_eq!(queued_snapshot.overall_state, RunState::Cancelled);
    for task in &queued_snapshot.tasks {
        assert_eq!(task.state, TaskState::Skipped, "{}", task.task_id);
        assert_eq!(task.skip_reason.as_deref(), Some("run cancelled"));
        assert!(task.started_at.is_none());
    }
    assert!(!sink.events().iter().any(|e| matches!(
        e,
        RunEvent::Transition { run_id, state: TaskState::Running, .. } if *run_id == queued
    )));

    let first_snapshot = with_timeout(pipeline.wait_for(&first)).await?;
    assert_eq!(first_snapshot.overall_state, RunState::Cancelled);
    assert_eq!(first_snapshot.state_of("start"), Some(TaskState::Success));

    let last_snapshot = with_timeout(pipeline.wait_for(&last)).await?;
    assert_eq!(last_snapshot.overall_state, RunState::Success);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_are_retried() -> TestResult {
    init_tracing();

    let mut registry = TaskRegistry::new();
    registry.register_definition(
        TaskDefinition::new("extract", SimulatedWork::new("extract").records(10).flaky(2, "timeout"))
            .retries(2, ms(100)),
    )?;
    let (pipeline, _) = pipeline_with_sink(registry.finalize()?, sequential());

    let run_id = pipeline.start_run()?;
    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;

    let extract = snapshot.task("extract").unwrap();
    assert_eq!(extract.state, TaskState::Success);
    assert_eq!(extract.attempt, 3);
    assert_eq!(extract.output.as_ref().unwrap()["records"], 10);
    assert_eq!(snapshot.overall_state, RunState::Success);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_status_reads_are_coherent() -> TestResult {
    init_tracing();

    let (pipeline, _) = pipeline_with_sink(RegistryBuilder::etl(ms(20)).build(), parallel(2));
    let run_id = pipeline.start_run()?;
    let tracker = pipeline.tracker().clone();

    let reader = tokio::spawn(async move {
        let mut reads = 0usize;
        loop {
            let snapshot = tracker.get_status(&run_id).expect("run exists");
            for task in &snapshot.tasks {
                if task.state == TaskState::Running {
                    assert!(task.started_at.is_some(), "{} running without start", task.task_id);
                    assert!(task.attempt >= 1);
                }
                if let (Some(start), Some(end)) = (task.started_at, task.ended_at) {
                    assert!(start <= end, "{} ended before it started", task.task_id);
                }
                if task.state.is_terminal() && task.state != TaskState::Skipped {
                    assert!(task.ended_at.is_some());
                }
            }
            reads += 1;
            if snapshot.finished {
                return reads;
            }
            tokio::task::yield_now().await;
        }
    });

    let snapshot = with_timeout(pipeline.wait_for(&run_id)).await?;
    let reads = with_timeout(reader).await?;
    assert!(reads > 0);
    assert_eq!(snapshot.overall_state, RunState::Success);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn events_follow_task_lifecycle_order() -> TestResult {
    init_tracing();

    let registry = RegistryBuilder::etl(ms(10)).failing("load_b", "duplicate key").build();
    let (pipeline, sink) = pipeline_with_sink(registry, parallel(2));

    let run_id = pipeline.start_run()?;
    with_timeout(pipeline.wait_for(&run_id)).await?;

    let events = sink.events();
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished { state: RunState::Failed, .. })
    ));

    let mut transitions: HashMap<String, Vec<TaskState>> = HashMap::new();
    for event in &events {
        assert_eq!(event.run_id(), run_id);
        if let RunEvent::Transition { task_id, state, .. } = event {
            transitions.entry(task_id.clone()).or_default().push(*state);
        }
    }

    use TaskState::*;
    assert_eq!(transitions["start"], vec![Running, Success]);
    assert_eq!(transitions["load_b"], vec![Running, Failed]);
    assert_eq!(transitions["validate"], vec![Skipped]);
    // load_a was already running when load_b failed, and finishes normally.
    assert_eq!(transitions["load_a"], vec![Running, Success]);

    // A dependency's terminal event precedes its dependent's start.
    let position = |task: &str, state: TaskState| {
        events.iter().position(|e| {
            matches!(e, RunEvent::Transition { task_id, state: s, .. } if task_id == task && *s == state)
        })
    };
    assert!(position("transform", Success) < position("load_a", Running));
    assert!(position("transform", Success) < position("load_b", Running));

    pipeline.shutdown().await?;
    Ok(())
}
