//! Integration tests for AdaptiveLimiter
//!
//! End-to-end coverage of the feedback loop: concurrency capping, additive
//! increase with a doubling step, multiplicative decrease on overload,
//! neutrality of unclassified errors, shutdown draining, and cancellation.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::future::join_all;
use surgeguard::{AdaptiveLimiter, LimiterError, ServiceOverload};
use tokio::time::sleep;

#[derive(Debug, thiserror::Error)]
#[error("widget {0} failed validation")]
struct ValidationError(usize);

/// respect RUST_LOG when poking at capacity trajectories
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_is_capped_at_two() {
    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(2)
        .min_concurrency(1)
        .initial_concurrency(2)
        .overload_threshold(0.1)
        .build()
        .unwrap();

    let start = Instant::now();

    let mut handles = Vec::new();
    for task_id in 0..4_usize {
        let handle = limiter
            .submit(async move {
                sleep(Duration::from_millis(100)).await;
                Ok(task_id)
            })
            .unwrap();
        handles.push(handle);
    }

    let mut results: Vec<usize> = join_all(handles)
        .await
        .into_iter()
        .map(|outcome| outcome.unwrap())
        .collect();
    results.sort_unstable();

    // two permits, four 100ms tasks: at least two rounds
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(results, vec![0, 1, 2, 3]);

    limiter.shutdown().await;
}

#[tokio::test]
async fn calm_traffic_raises_capacity_with_doubling_steps() {
    init_logging();

    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(10)
        .initial_concurrency(1)
        .overload_threshold(0.1)
        .build()
        .unwrap();

    let mut observed_capacities = Vec::new();

    for _ in 0..50 {
        let handle = limiter.submit(async { Ok(()) }).unwrap();
        handle.await.unwrap();
        observed_capacities.push(limiter.capacity());
    }

    // trajectory is non-decreasing...
    assert!(observed_capacities.windows(2).all(|pair| pair[0] <= pair[1]));

    // ...passes through the doubling-step waypoints and tops out at max
    for waypoint in [2, 4, 8, 10] {
        assert!(
            observed_capacities.contains(&waypoint),
            "trajectory {observed_capacities:?} missing waypoint {waypoint}"
        );
    }
    assert_eq!(limiter.capacity(), 10);

    // step doubled 1 -> 2 -> 4 -> 8 -> 16 and saturated
    assert_eq!(limiter.increase_step(), 16);

    limiter.shutdown().await;
}

#[tokio::test]
async fn overload_cuts_capacity_multiplicatively() {
    init_logging();

    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(100)
        .initial_concurrency(20)
        .overload_threshold(0.1)
        .decrease_factor(0.75)
        .build()
        .unwrap();

    // 21 completions close the window; 4/21 ~ 19% overload is above threshold
    let mut handles = Vec::new();
    for task_id in 0..21_usize {
        let handle = limiter
            .submit(async move {
                if task_id < 4 {
                    Err(anyhow::Error::new(ServiceOverload))
                } else {
                    Ok(task_id)
                }
            })
            .unwrap();
        handles.push(handle);
    }

    let outcomes = join_all(handles).await;

    // overload errors reach the submitter unchanged, counted but not swallowed
    let overloads = outcomes
        .iter()
        .filter(|outcome| {
            outcome
                .as_ref()
                .err()
                .map(|err| err.is::<ServiceOverload>())
                .unwrap_or(false)
        })
        .count();
    assert_eq!(overloads, 4);

    assert_eq!(limiter.capacity(), 15); // floor(20 * 0.75)
    assert_eq!(limiter.increase_step(), 1);

    limiter.shutdown().await;
}

#[tokio::test]
async fn unclassified_errors_leave_the_loop_untouched() {
    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(100)
        .initial_concurrency(5)
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for task_id in 0..100_usize {
        let handle = limiter
            .submit(async move { Err::<(), _>(anyhow::Error::new(ValidationError(task_id))) })
            .unwrap();
        handles.push(handle);
    }

    for (task_id, outcome) in join_all(handles).await.into_iter().enumerate() {
        let err = outcome.unwrap_err();
        // the original error, not a substitute
        let original = err.downcast_ref::<ValidationError>().unwrap();
        assert_eq!(original.0, task_id);
        assert!(!err.is::<ServiceOverload>());
    }

    // no window ever closed: capacity and step still at their initial values
    assert_eq!(limiter.capacity(), 5);
    assert_eq!(limiter.increase_step(), 1);

    limiter.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_and_rejects_further_submissions() {
    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(4)
        .initial_concurrency(2)
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for task_id in 0..10_usize {
        let handle = limiter
            .submit(async move {
                sleep(Duration::from_millis(30)).await;
                Ok(task_id)
            })
            .unwrap();
        handles.push(handle);
    }

    limiter.shutdown().await;
    assert!(limiter.is_shut());
    assert_eq!(limiter.live_tasks(), 0);

    // every handle settles: running tasks with their value, queued tasks
    // with the close error
    let mut settled = 0;
    for outcome in join_all(handles).await {
        match outcome {
            Ok(_) => settled += 1,
            Err(err) => {
                assert!(err.is::<LimiterError>());
                settled += 1;
            }
        }
    }
    assert_eq!(settled, 10);

    let rejected = limiter.submit(async { Ok(()) });
    assert!(matches!(rejected, Err(LimiterError::ShutDown)));
}

#[tokio::test]
async fn shutdown_waits_out_running_tasks() {
    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(4)
        .initial_concurrency(4)
        .build()
        .unwrap();

    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let finished = finished.clone();
        limiter
            .submit(async move {
                sleep(Duration::from_millis(50)).await;
                finished.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();
    }

    // give every task time to acquire its permit
    sleep(Duration::from_millis(10)).await;

    limiter.shutdown().await;

    // drain means waited out, not cancelled
    assert_eq!(finished.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let limiter = AdaptiveLimiter::builder().build().unwrap();

    limiter.shutdown().await;
    limiter.shutdown().await;

    assert!(limiter.is_shut());
}

#[tokio::test]
async fn aborted_task_is_neutral_and_returns_its_permit() {
    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(2)
        .initial_concurrency(2)
        .build()
        .unwrap();

    let handle = limiter
        .submit(async {
            sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .unwrap();

    sleep(Duration::from_millis(20)).await;
    assert_eq!(limiter.running_count(), 1);

    handle.abort();
    let err = handle.await.unwrap_err();
    assert!(err.is::<LimiterError>());

    // permit returned, running count restored, feedback loop untouched
    assert_eq!(limiter.running_count(), 0);
    assert_eq!(limiter.available(), 2);
    assert_eq!(limiter.capacity(), 2);

    // shutdown is not blocked by the aborted task
    limiter.shutdown().await;
}

#[tokio::test]
async fn successful_values_pass_through_unchanged() {
    let limiter = AdaptiveLimiter::builder()
        .initial_concurrency(4)
        .max_concurrency(8)
        .build()
        .unwrap();

    let handle = limiter
        .submit(async { Ok(String::from("payload intact")) })
        .unwrap();

    assert_eq!(handle.await.unwrap(), "payload intact");
    limiter.shutdown().await;
}

#[tokio::test]
async fn custom_overload_kind_drives_the_loop() {
    #[derive(Debug, thiserror::Error)]
    #[error("backend sheds load")]
    struct BackendBusy;

    let limiter = AdaptiveLimiter::builder()
        .max_concurrency(100)
        .initial_concurrency(10)
        .overload_kind::<BackendBusy>()
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for task_id in 0..11_usize {
        let handle = limiter
            .submit(async move {
                if task_id < 3 {
                    Err(anyhow::Error::new(BackendBusy))
                } else {
                    Ok(())
                }
            })
            .unwrap();
        handles.push(handle);
    }
    join_all(handles).await;

    // 3/11 ~ 27% above the 10% threshold: cut to floor(10 * 0.75)
    assert_eq!(limiter.capacity(), 7);

    // the default sentinel means nothing to this limiter
    let mut handles = Vec::new();
    for _ in 0..20_usize {
        let handle = limiter
            .submit(async { Err::<(), _>(anyhow::Error::new(ServiceOverload)) })
            .unwrap();
        handles.push(handle);
    }
    join_all(handles).await;

    assert_eq!(limiter.capacity(), 7);

    limiter.shutdown().await;
}

#[tokio::test]
async fn submission_order_does_not_gate_error_reporting() {
    // mixed successes and failures resolve independently through their own
    // handles
    let limiter = AdaptiveLimiter::builder()
        .initial_concurrency(3)
        .max_concurrency(16)
        .build()
        .unwrap();

    let ok = limiter.submit(async { Ok(1_usize) }).unwrap();
    let bad = limiter
        .submit(async { Err::<usize, _>(anyhow!("knocked over the vase")) })
        .unwrap();
    let also_ok = limiter.submit(async { Ok(3_usize) }).unwrap();

    assert_eq!(ok.await.unwrap(), 1);
    assert_eq!(bad.await.unwrap_err().to_string(), "knocked over the vase");
    assert_eq!(also_ok.await.unwrap(), 3);

    limiter.shutdown().await;
}
