use kvpipe::error::{Error, Result};
use kvpipe::pipeline::cancel::CancelToken;
use kvpipe::pipeline::config::FlowControl;
use kvpipe::pipeline::stream::Stream;

mod common;
use common::numbers;

#[tokio::test]
async fn single_stage_error_trips_default_threshold() {
    let stream = Stream::new(numbers(100)).concurrency(4).map(|pair| {
        let value = pair.value;
        async move {
            if value == 13 {
                Err(Error::msg("unlucky"))
            } else {
                Ok(value)
            }
        }
    });

    let err = stream.collect(&CancelToken::new()).await.unwrap_err();
    match err {
        Error::Aggregate(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors.to_string(), "1 errors: map stage failed: unlucky");
            let inner = errors.into_vec().remove(0);
            assert!(matches!(inner, Error::Stage { stage: "map", .. }));
        }
        other => panic!("expected Aggregate, got {other:?}"),
    }
}

#[tokio::test]
async fn errors_below_threshold_are_dropped() -> Result<()> {
    let stream = Stream::new(numbers(100))
        .concurrency(4)
        .error_threshold(5)
        .filter(|pair| {
            let value = pair.value;
            async move {
                if value < 3 {
                    Err(Error::pipeline("rejected"))
                } else {
                    Ok(true)
                }
            }
        });

    let out = stream.collect(&CancelToken::new()).await?;
    assert_eq!(out.len(), 97);
    Ok(())
}

#[tokio::test]
async fn errors_from_the_last_items_still_count() {
    let stream = Stream::new(numbers(10)).concurrency(1).for_each(|pair| {
        let last = pair.value == 9;
        async move {
            if last {
                Err(Error::msg("tail"))
            } else {
                Ok(())
            }
        }
    });

    let err = stream
        .reduce(&CancelToken::new(), 0u64, |acc, pair| acc + pair.value)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Aggregate(_)));
}

#[tokio::test]
async fn threshold_counts_errors_across_stages() {
    let stream = Stream::new(numbers(50))
        .concurrency(1)
        .error_threshold(2)
        .map(|pair| {
            let value = pair.value;
            async move {
                if value == 5 {
                    Err(Error::msg("map failed"))
                } else {
                    Ok(value)
                }
            }
        })
        .filter(|pair| {
            let value = pair.value;
            async move {
                if value == 30 {
                    Err(Error::msg("filter failed"))
                } else {
                    Ok(true)
                }
            }
        });

    let err = stream.collect(&CancelToken::new()).await.unwrap_err();
    let Error::Aggregate(errors) = err else {
        panic!("expected Aggregate");
    };
    let stages: Vec<&str> = errors
        .iter()
        .map(|err| match err {
            Error::Stage { stage, .. } => *stage,
            _ => "other",
        })
        .collect();
    assert_eq!(stages, vec!["map", "filter"]);
}

#[test]
fn zero_threshold_keeps_previous_value() {
    let control = FlowControl::new().error_threshold(3).error_threshold(0);
    assert_eq!(control.threshold(), 3);
}

#[tokio::test]
async fn invalid_base_concurrency_is_rejected_at_run() {
    let stream = Stream::new(numbers(10)).concurrency(0).map(|pair| {
        let value = pair.value;
        async move { Ok(value) }
    });

    let err = stream.collect(&CancelToken::new()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidConcurrency {
            stage: "stream",
            got: 0
        }
    ));
}

#[tokio::test]
async fn invalid_stage_workers_are_rejected_at_run() {
    let stream = Stream::new(numbers(10))
        .filter(|_| async { Ok(true) })
        .workers(0);

    let err = stream
        .reduce(&CancelToken::new(), 0u64, |acc, _| acc + 1)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid concurrency for `filter`: should be at least 1, got 0"
    );
}

#[tokio::test]
async fn panicking_callback_is_reported() {
    let stream = Stream::new(numbers(10)).concurrency(1).map(|pair| {
        let value = pair.value;
        async move {
            if value == 4 {
                panic!("boom");
            }
            Ok(value)
        }
    });

    let err = stream.collect(&CancelToken::new()).await.unwrap_err();
    let Error::Aggregate(errors) = err else {
        panic!("expected Aggregate");
    };
    let first = errors.into_vec().remove(0);
    match first {
        Error::Stage { stage, source } => {
            assert_eq!(stage, "map");
            assert!(matches!(*source, Error::Join(_)));
        }
        other => panic!("expected stage error, got {other:?}"),
    }
}

#[test]
fn stage_errors_render_with_stage_name() {
    let errors = vec![
        Error::stage("map", Error::msg("a")),
        Error::stage("reduce", Error::msg("b")),
    ];
    let rendered = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    assert_eq!(rendered, "map stage failed: a, reduce stage failed: b");
}
