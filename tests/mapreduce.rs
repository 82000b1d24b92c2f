use std::collections::HashMap;
use std::time::Duration;

use kvpipe::error::{Error, Phase};
use kvpipe::mapreduce::{map_reduce, MapReduceError};
use kvpipe::pair::IndexedPair;
use kvpipe::pipeline::cancel::CancelToken;
use kvpipe::pipeline::config::FlowControl;
use kvpipe::source::Items;

mod common;
use common::decimal_map;

fn values(n: usize) -> Items<usize, usize> {
    Items::from_vec((0..n).collect())
}

async fn identity(pair: IndexedPair<usize, usize>) -> kvpipe::error::Result<IndexedPair<usize, usize>> {
    Ok(pair)
}

fn sum(acc: &mut usize, pair: IndexedPair<usize, usize>) -> kvpipe::error::Result<()> {
    *acc += pair.value;
    Ok(())
}

#[tokio::test]
async fn sums_every_value() {
    let total = map_reduce(
        &CancelToken::new(),
        values(10_000),
        identity,
        sum,
        0usize,
        FlowControl::new(),
    )
    .await
    .unwrap();
    assert_eq!(total, 49_995_000);
}

#[tokio::test]
async fn counts_odd_values_of_a_map_source() {
    let mut source = HashMap::new();
    for i in 0..1_000u32 {
        source.insert(format!("k{i}"), i);
    }

    let odd = map_reduce(
        &CancelToken::new(),
        Items::from_map(source),
        |pair: IndexedPair<String, u32>| async move { Ok(pair.map_value(|v| v % 2 == 1)) },
        |acc: &mut usize, pair: IndexedPair<String, bool>| {
            if pair.value {
                *acc += 1;
            }
            Ok(())
        },
        0usize,
        FlowControl::new().concurrency(8),
    )
    .await
    .unwrap();
    assert_eq!(odd, 500);
}

#[tokio::test]
async fn mapper_output_keeps_input_position() {
    let mut positions = map_reduce(
        &CancelToken::new(),
        values(100),
        |pair: IndexedPair<usize, usize>| async move {
            // Try to move the item elsewhere.
            Ok(IndexedPair::new(usize::MAX, pair.key, pair.value))
        },
        |acc: &mut Vec<usize>, pair: IndexedPair<usize, usize>| {
            acc.push(pair.position);
            Ok(())
        },
        Vec::new(),
        FlowControl::new().concurrency(4),
    )
    .await
    .unwrap();

    positions.sort_unstable();
    assert_eq!(positions, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn skip_keeps_even_positions() {
    let kept = map_reduce(
        &CancelToken::new(),
        values(10_000),
        |pair: IndexedPair<usize, usize>| async move {
            if pair.position % 2 == 1 {
                Err(Error::Skip)
            } else {
                Ok(pair)
            }
        },
        |acc: &mut usize, _pair: IndexedPair<usize, usize>| {
            *acc += 1;
            Ok(())
        },
        0usize,
        FlowControl::new(),
    )
    .await
    .unwrap();
    assert_eq!(kept, 5_000);
}

#[tokio::test]
async fn failing_mappers_return_partial_result() {
    let err = map_reduce(
        &CancelToken::new(),
        values(1_000),
        |pair: IndexedPair<usize, usize>| async move {
            Err::<IndexedPair<usize, usize>, _>(Error::msg(format!("cannot map {}", pair.value)))
        },
        sum,
        0usize,
        FlowControl::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.partial, 0);
    match &err.error {
        Error::Aggregate(errors) => assert_eq!(errors.len(), 1),
        other => panic!("expected Aggregate, got {other:?}"),
    }
}

fn fail_on(bad: &'static [usize]) -> impl Fn(IndexedPair<usize, usize>) -> std::future::Ready<kvpipe::error::Result<IndexedPair<usize, usize>>> + Send + Sync + 'static {
    move |pair| {
        if bad.contains(&pair.value) {
            std::future::ready(Err(Error::msg(format!("value is {}", pair.value))))
        } else {
            std::future::ready(Ok(pair))
        }
    }
}

#[tokio::test]
async fn errors_below_threshold_are_dropped() {
    let total = map_reduce(
        &CancelToken::new(),
        values(10_000),
        fail_on(&[5_000]),
        sum,
        0usize,
        FlowControl::new().error_threshold(2),
    )
    .await
    .unwrap();
    assert_eq!(total, 49_995_000 - 5_000);
}

#[tokio::test]
async fn reaching_threshold_lists_errors_in_order() {
    let err = map_reduce(
        &CancelToken::new(),
        values(10_000),
        fail_on(&[5_000, 6_000]),
        sum,
        0usize,
        FlowControl::new().concurrency(1).error_threshold(2),
    )
    .await
    .unwrap_err();

    assert_eq!(
        err.error.to_string(),
        "2 errors: map stage failed: value is 5000, map stage failed: value is 6000"
    );
    // Everything before the first failure was reduced.
    assert!(err.partial >= (0..5_000).sum::<usize>());
    assert!(err.partial < 49_995_000 - 11_000);
}

#[tokio::test]
async fn reducer_errors_count_toward_threshold() {
    let err = map_reduce(
        &CancelToken::new(),
        values(100),
        identity,
        |acc: &mut usize, pair: IndexedPair<usize, usize>| {
            if pair.value == 42 {
                return Err(Error::msg("no 42s"));
            }
            *acc += 1;
            Ok(())
        },
        0usize,
        FlowControl::new().concurrency(1),
    )
    .await
    .unwrap_err();

    assert_eq!(err.partial, 42);
    assert_eq!(err.error.to_string(), "1 errors: reduce stage failed: no 42s");
}

#[tokio::test]
async fn plain_cancellation_adds_nothing() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = map_reduce(&cancel, values(100), identity, sum, 0usize, FlowControl::new())
        .await
        .unwrap_err();
    assert!(matches!(err.error, Error::Cancelled { phase: Phase::Sink }));
}

#[tokio::test]
async fn deadline_is_appended_to_recorded_errors() {
    let deadline = CancelToken::new().with_timeout(Duration::from_millis(30));

    let err = map_reduce(
        &deadline,
        values(10_000),
        |pair: IndexedPair<usize, usize>| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if pair.value == 0 {
                Err(Error::msg("first one fails"))
            } else {
                Ok(pair)
            }
        },
        sum,
        0usize,
        FlowControl::new().concurrency(2).error_threshold(100),
    )
    .await
    .unwrap_err();

    let MapReduceError { error, .. } = err;
    let Error::Aggregate(errors) = error else {
        panic!("expected Aggregate");
    };
    let errors = errors.into_vec();
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], Error::Stage { stage: "map", .. }));
    assert!(matches!(
        errors[1],
        Error::DeadlineExceeded { phase: Phase::Sink }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_aggregate_keeps_errors_queued_behind_a_busy_reducer() {
    let deadline = CancelToken::new().with_timeout(Duration::from_millis(150));

    let err = map_reduce(
        &deadline,
        values(100),
        |pair: IndexedPair<usize, usize>| async move {
            match pair.value {
                0 => Ok(pair),
                1..=3 => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(Error::msg(format!("value is {}", pair.value)))
                }
                _ => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(pair)
                }
            }
        },
        |acc: &mut usize, pair: IndexedPair<usize, usize>| {
            // Stays busy while the mappers fail and the deadline passes.
            std::thread::sleep(Duration::from_millis(300));
            *acc += pair.value + 1;
            Ok(())
        },
        0usize,
        FlowControl::new().concurrency(4).error_threshold(100),
    )
    .await
    .unwrap_err();

    assert_eq!(err.partial, 1);
    let Error::Aggregate(errors) = err.error else {
        panic!("expected Aggregate");
    };
    let errors = errors.into_vec();
    assert_eq!(errors.len(), 4);
    assert!(errors[..3]
        .iter()
        .all(|e| matches!(e, Error::Stage { stage: "map", .. })));
    assert!(matches!(
        errors[3],
        Error::DeadlineExceeded { phase: Phase::Sink }
    ));
}

#[tokio::test]
async fn invalid_concurrency_returns_initial_value() {
    let err = map_reduce(
        &CancelToken::new(),
        values(10),
        identity,
        sum,
        7usize,
        FlowControl::new().concurrency(0),
    )
    .await
    .unwrap_err();

    assert_eq!(err.partial, 7);
    assert!(matches!(
        err.error,
        Error::InvalidConcurrency { stage: "map", got: 0 }
    ));
}

#[tokio::test]
async fn ordered_map_feeds_map_reduce() {
    let map = decimal_map(100);
    let total = map_reduce(
        &CancelToken::new(),
        map,
        |pair: IndexedPair<u64, String>| async move {
            match pair.value.parse::<u64>() {
                Ok(parsed) => Ok(pair.with_value(parsed)),
                Err(err) => Err(Error::other(err)),
            }
        },
        |acc: &mut u64, pair: IndexedPair<u64, u64>| {
            *acc += pair.value;
            Ok(())
        },
        0u64,
        FlowControl::new().concurrency(10),
    )
    .await
    .unwrap();
    assert_eq!(total, 4_950);
}
