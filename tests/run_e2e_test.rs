//! End-to-end load runs against an in-memory target

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use volley_config::{PauseConfig, RunConfig, StageConfig, ThresholdConfig, VolleyConfig};
use volley_engine::{workload_fn, RunController, RunPhase, SchedulerState, Verdict};
use volley_http::{HttpMethod, MockHttpClient, MockResponse};
use volley_metrics::builtin;

const TARGET: &str = "http://target.local/";

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn init_logging() {
    let _ = volley_logging::init_simple_tracing("warn");
}

/// 10s ramp to 10 VUs, 20s hold, 10s ramp down
fn standard_profile() -> RunConfig {
    RunConfig::staged(vec![
        StageConfig::new(secs(10), 10),
        StageConfig::new(secs(20), 10),
        StageConfig::new(secs(10), 0),
    ])
}

fn fast_target() -> MockHttpClient {
    MockHttpClient::new().mock(
        HttpMethod::Get,
        TARGET,
        MockResponse::ok("ok").with_latency(Duration::from_millis(50)),
    )
}

fn get_and_check() -> impl volley_engine::Workload {
    workload_fn(|ctx| async move {
        let response = ctx.get(TARGET).await;
        ctx.check("status is 200", response.status == 200);
        Ok(())
    })
}

#[tokio::test(start_paused = true)]
async fn test_staged_run_passes() {
    init_logging();
    let config = VolleyConfig {
        run: standard_profile(),
        thresholds: vec![
            ThresholdConfig::new(builtin::HTTP_REQ_DURATION, "p(95)<500"),
            ThresholdConfig::new(builtin::HTTP_REQ_FAILED, "rate<0.01"),
        ],
        ..VolleyConfig::default()
    };

    let controller = RunController::new(config, get_and_check())
        .unwrap()
        .with_http_client(Arc::new(fast_target()));

    let mut states = controller.subscribe();
    let phases = tokio::spawn(async move {
        let mut phases = Vec::new();
        while states.changed().await.is_ok() {
            let phase = states.borrow().phase;
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
        }
        phases
    });

    let result = controller.run().await;

    assert_eq!(result.verdict, Verdict::Pass, "{:?}", result.final_results);
    assert!(!result.aborted());
    assert!(!result.cancelled);
    assert!(!result.degraded);
    assert_eq!(result.peak_vus, 10);
    assert_eq!(result.interrupted_iterations, 0);

    // ~10 VUs for 20s at one iteration per 1.05s, plus both ramps
    assert!(
        (200..=360).contains(&result.total_iterations),
        "iterations: {}",
        result.total_iterations
    );
    let http_reqs = result.metric(builtin::HTTP_REQS).unwrap();
    assert_eq!(http_reqs.values["count"], result.total_iterations as f64);
    let duration = result.metric(builtin::HTTP_REQ_DURATION).unwrap();
    assert_eq!(duration.values["p(95)"], 50.0);

    let total: Duration = result.timeline.iter().map(|span| span.duration).sum();
    assert!(total >= secs(40) && total <= secs(41) + result.drain.elapsed);
    assert_eq!(
        result.timeline.iter().map(|span| span.state).collect::<Vec<_>>(),
        vec![
            SchedulerState::Idle,
            SchedulerState::InStage(0),
            SchedulerState::InStage(1),
            SchedulerState::InStage(2),
            SchedulerState::Draining,
            SchedulerState::Done,
        ]
    );

    let phases = phases.await.unwrap();
    assert_eq!(&phases[..3], &[RunPhase::Ramping, RunPhase::Steady, RunPhase::Transitioning]);
    assert_eq!(phases.last(), Some(&RunPhase::Terminated));
}

#[tokio::test(start_paused = true)]
async fn test_abort_on_failing_threshold() {
    init_logging();
    let served = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&served);
    let flaky = MockHttpClient::with_responder(move |_, _, _| {
        let status = if counter.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
            200
        } else {
            500
        };
        MockResponse::status(status).with_latency(Duration::from_millis(50))
    });

    let config = VolleyConfig {
        run: standard_profile(),
        thresholds: vec![
            ThresholdConfig::new(builtin::HTTP_REQ_DURATION, "p(95)<500"),
            ThresholdConfig::new(builtin::HTTP_REQ_FAILED, "rate<0.1").abort_on_fail(),
        ],
        ..VolleyConfig::default()
    };

    let controller = RunController::new(config, get_and_check())
        .unwrap()
        .with_http_client(Arc::new(flaky));
    let result = controller.run().await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert!(!result.cancelled);
    let reason = result.abort_reason.as_deref().unwrap();
    assert!(reason.contains(builtin::HTTP_REQ_FAILED), "{}", reason);

    let draining = result
        .timeline
        .iter()
        .find(|span| span.state == SchedulerState::Draining)
        .unwrap();
    assert!(draining.entered_at < secs(10), "drained at {:?}", draining.entered_at);
    assert!(!result
        .timeline
        .iter()
        .any(|span| span.state == SchedulerState::InStage(2)));
    assert!(served.load(Ordering::Relaxed) > 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_on_failing_workload() {
    init_logging();
    let runs = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&runs);
    let workload = workload_fn(move |ctx| {
        let counter = Arc::clone(&counter);
        async move {
            ctx.sleep(Duration::from_millis(50)).await;
            if counter.fetch_add(1, Ordering::Relaxed) % 2 == 1 {
                anyhow::bail!("order rejected on iteration {}", ctx.iteration());
            }
            Ok(())
        }
    });

    let config = VolleyConfig {
        run: standard_profile(),
        thresholds: vec![
            ThresholdConfig::new(builtin::ITERATION_FAILED, "rate<0.1").abort_on_fail()
        ],
        ..VolleyConfig::default()
    };

    let result = RunController::new(config, workload)
        .unwrap()
        .with_http_client(Arc::new(MockHttpClient::new()))
        .run()
        .await;

    assert_eq!(result.verdict, Verdict::Fail);
    let reason = result.abort_reason.as_deref().unwrap();
    assert!(reason.contains(builtin::ITERATION_FAILED), "{}", reason);
    let draining = result
        .timeline
        .iter()
        .find(|span| span.state == SchedulerState::Draining)
        .unwrap();
    assert!(draining.entered_at < secs(10), "drained at {:?}", draining.entered_at);

    let failed = result.metric(builtin::ITERATION_FAILED).unwrap();
    assert!(failed.values["rate"] > 0.25, "{:?}", failed.values);
    assert_eq!(result.interrupted_iterations, 0);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_abort_waits() {
    init_logging();
    let failing = MockHttpClient::with_responder(|_, _, _| {
        MockResponse::status(503).with_latency(Duration::from_millis(20))
    });

    let config = VolleyConfig {
        run: RunConfig::flat(2, secs(60)),
        thresholds: vec![ThresholdConfig::new(builtin::HTTP_REQ_FAILED, "rate<0.1")
            .abort_on_fail()
            .with_delay_abort_eval(secs(15))],
        ..VolleyConfig::default()
    };

    let result = RunController::new(config, get_and_check())
        .unwrap()
        .with_http_client(Arc::new(failing))
        .run()
        .await;

    assert!(result.aborted());
    let first_failure = result
        .history
        .iter()
        .find(|evaluation| !evaluation.all_passed())
        .unwrap();
    assert!(first_failure.elapsed < secs(15));
    assert!(result.final_state.elapsed >= secs(15));
    assert!(result.final_state.elapsed < secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_graceful_ramp_down_interrupts_nothing() {
    init_logging();
    let config = VolleyConfig {
        run: RunConfig {
            pause: PauseConfig::fixed(Duration::from_millis(500)),
            graceful_ramp_down: secs(30),
            ..RunConfig::staged(vec![
                StageConfig::new(secs(2), 50),
                StageConfig::new(secs(5), 50),
                StageConfig::new(secs(5), 0),
            ])
        },
        thresholds: vec![ThresholdConfig::new(builtin::ITERATION_FAILED, "rate==0")],
        ..VolleyConfig::default()
    };

    let workload = workload_fn(|ctx| async move {
        ctx.sleep(secs(3)).await;
        ctx.check("finished", true);
        Ok(())
    });

    let result = RunController::new(config, workload)
        .unwrap()
        .with_http_client(Arc::new(MockHttpClient::new()))
        .run()
        .await;

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.peak_vus, 50);
    assert_eq!(result.interrupted_iterations, 0);
    assert_eq!(result.drain.interrupted, 0);
    assert_eq!(result.drain.aborted, 0);
    assert_eq!(result.metric(builtin::CHECKS).unwrap().values["rate"], 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_short_ramp_down_grace_interrupts() {
    init_logging();
    let config = VolleyConfig {
        run: RunConfig {
            pause: PauseConfig::none(),
            graceful_ramp_down: secs(1),
            graceful_stop: secs(1),
            ..RunConfig::staged(vec![
                StageConfig::new(secs(1), 20),
                StageConfig::new(secs(2), 20),
                StageConfig::new(secs(2), 0),
            ])
        },
        thresholds: vec![ThresholdConfig::new(builtin::ITERATION_FAILED, "rate<0.5")],
        ..VolleyConfig::default()
    };

    let workload = workload_fn(|ctx| async move {
        ctx.sleep(secs(30)).await;
        Ok(())
    });

    let result = RunController::new(config, workload)
        .unwrap()
        .with_http_client(Arc::new(MockHttpClient::new()))
        .run()
        .await;

    assert_eq!(result.interrupted_iterations, 20);
    assert_eq!(result.total_iterations, 0);
    assert_eq!(
        result.metric(builtin::ITERATIONS_INTERRUPTED).unwrap().values["count"],
        20.0
    );
    // Interrupted iterations are not workload failures
    assert_eq!(result.final_results[0].samples, 0);
    assert_eq!(result.verdict, Verdict::Pass);
}

#[tokio::test(start_paused = true)]
async fn test_max_vus_caps_profile() {
    init_logging();
    let config = VolleyConfig {
        run: RunConfig {
            max_vus: Some(5),
            ..RunConfig::flat(20, secs(5))
        },
        ..VolleyConfig::default()
    };

    let result = RunController::new(config, get_and_check())
        .unwrap()
        .with_http_client(Arc::new(fast_target()))
        .run()
        .await;

    assert_eq!(result.peak_vus, 5);
    assert!(!result.degraded);
    assert_eq!(result.metric(builtin::VUS_MAX).unwrap().values["value"], 5.0);
}

#[tokio::test(start_paused = true)]
async fn test_yaml_profile_runs() {
    init_logging();
    let yaml = r#"
run:
  start_vus: 2
  stages:
    - { duration: 5s, target: 6 }
    - { duration: 0s, target: 3 }
    - { duration: 5s, target: 3 }
  pause: { min: 200ms, max: 800ms }
  tags:
    scenario: smoke
thresholds:
  - metric: "http_req_duration{scenario:smoke}"
    expression: "p(99) < 100"
  - metric: checks
    expression: rate>0.99
"#;
    let config: VolleyConfig = serde_yaml::from_str(yaml).unwrap();

    let controller = RunController::new(config, get_and_check())
        .unwrap()
        .with_http_client(Arc::new(fast_target()));
    let sink = controller.sink();
    let result = controller.run().await;

    assert_eq!(result.verdict, Verdict::Pass, "{:?}", result.final_results);
    // The zero-length stage drops the target to 3 before 6 is reached
    assert_eq!(result.peak_vus, 5);
    assert!(result.final_results.iter().all(|r| r.samples > 0));

    let tagged = sink
        .snapshot(
            builtin::ITERATIONS,
            &volley_metrics::TagSet::new().with("scenario", "smoke"),
        )
        .unwrap();
    assert_eq!(tagged.count(), result.total_iterations);
}
