//! Worker Pool Integration Tests
//!
//! Ordered `map` correctness, work distribution and failure surfacing for
//! the worker pool running on real threads.

use actor_mesh::{ActorError, PoolConfig, RuntimeConfig, WorkerPool};
use proptest::prelude::*;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

fn quick_runtime() -> RuntimeConfig {
    RuntimeConfig {
        receive_timeout_ms: Some(10_000),
        join_timeout_ms: Some(10_000),
        poll_interval_ms: 5,
    }
}

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::from_config(PoolConfig {
        workers,
        runtime: quick_runtime(),
        ..PoolConfig::default()
    })
    .unwrap()
}

#[test]
fn test_increment_with_four_workers() {
    actor_mesh::telemetry::init_test_tracing();

    let out = pool(4).map(|x: i32| x + 1, vec![1, 2, 3, 5, 6, 7, 8]).unwrap();
    assert_eq!(out, vec![2, 3, 4, 6, 7, 8, 9]);
}

#[test]
fn test_order_survives_uneven_completion() {
    // Early items take longest, so completion order is roughly reversed
    let items: Vec<u64> = (0..12).collect();
    let out = pool(4)
        .map(
            |x: u64| {
                thread::sleep(Duration::from_millis(24 - 2 * x));
                x * x
            },
            items.clone(),
        )
        .unwrap();
    assert_eq!(out, items.iter().map(|x| x * x).collect::<Vec<_>>());
}

#[test]
fn test_worker_count_is_min_of_items_and_pool() {
    let report = pool(8).map_report(|s: String| s.len(), vec!["a".to_string(), "bb".to_string()]).unwrap();
    assert_eq!(report.results, vec![1, 2]);
    assert_eq!(report.workers_started, 2);
    assert!(report.assignments.iter().all(|(_, n)| *n == 1));

    let report = pool(3).map_report(|x: u8| x, (0..30).collect()).unwrap();
    assert_eq!(report.workers_started, 3);
    assert_eq!(report.assignments.len(), 3);
}

#[test]
fn test_every_worker_takes_several_items() {
    let items: Vec<u32> = (0..24).collect();
    let report = pool(3)
        .map_report(
            |x: u32| {
                thread::sleep(Duration::from_millis(3));
                x + 100
            },
            items.clone(),
        )
        .unwrap();

    assert_eq!(report.results, items.iter().map(|x| x + 100).collect::<Vec<_>>());
    assert_eq!(
        report.assignments.iter().map(|(_, n)| n).sum::<usize>(),
        items.len()
    );
    for (worker, handled) in &report.assignments {
        assert!(*handled > 1, "{} handled only {} item(s)", worker, handled);
    }

    let distinct: HashSet<_> = report.assignments.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(distinct.len(), 3);
}

#[test]
fn test_empty_input_starts_no_workers() {
    let report = pool(4).map_report(|x: i32| x, Vec::new()).unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.workers_started, 0);
}

#[test]
fn test_single_worker_processes_everything() {
    let report = pool(1).map_report(|x: i32| -x, vec![3, 1, 2]).unwrap();
    assert_eq!(report.results, vec![-3, -1, -2]);
    assert_eq!(report.assignments[0].1, 3);
}

#[test]
fn test_panicking_function_fails_map() {
    let err = pool(2)
        .map(
            |x: u32| {
                if x == 3 {
                    panic!("cannot map {}", x);
                }
                x
            },
            (0..8).collect(),
        )
        .unwrap_err();

    match err {
        ActorError::Invocation { operation, message } => {
            assert_eq!(operation, "map_fn");
            assert!(message.contains("cannot map 3"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_slow_function_hits_receive_timeout() {
    let pool = WorkerPool::from_config(PoolConfig {
        workers: 1,
        runtime: RuntimeConfig {
            receive_timeout_ms: Some(50),
            join_timeout_ms: Some(5_000),
            poll_interval_ms: 5,
        },
        ..PoolConfig::default()
    })
    .unwrap();

    let err = pool
        .map(
            |x: u32| {
                thread::sleep(Duration::from_millis(300));
                x
            },
            vec![1],
        )
        .unwrap_err();
    assert!(matches!(err, ActorError::Timeout { timeout_ms: 50, .. }));
}

#[test]
fn test_pool_is_reusable() {
    let pool = pool(2);
    assert_eq!(pool.map(|x: i32| x * 2, vec![1, 2]).unwrap(), vec![2, 4]);
    assert_eq!(pool.map(|x: i32| x * 3, vec![1, 2]).unwrap(), vec![3, 6]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: map equals the sequential map for any input and pool size
    #[test]
    fn map_matches_sequential(
        xs in prop::collection::vec(any::<i64>(), 0..40),
        workers in 1usize..6,
    ) {
        let f = |x: i64| x.wrapping_mul(3).wrapping_sub(7);
        let expected: Vec<i64> = xs.iter().copied().map(f).collect();

        let report = pool(workers).map_report(f, xs.clone()).unwrap();
        prop_assert_eq!(report.results, expected);
        prop_assert_eq!(report.workers_started, xs.len().min(workers));
        prop_assert_eq!(
            report.assignments.iter().map(|(_, n)| n).sum::<usize>(),
            xs.len()
        );
    }
}
