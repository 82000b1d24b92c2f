use kvpipe::error::Result;
use kvpipe::pipeline::cancel::CancelToken;
use kvpipe::pipeline::stream::Stream;
use kvpipe::source::Items;

mod common;
use common::numbers;

#[tokio::test]
async fn reduce_sums_keys() -> Result<()> {
    let stream = Stream::new(numbers(10));
    let total = stream
        .reduce(&CancelToken::new(), 0u64, |acc, pair| acc + pair.key)
        .await?;
    assert_eq!(total, 45);
    Ok(())
}

#[tokio::test]
async fn reduce_after_map() -> Result<()> {
    let stream = Stream::new(Items::from_vec((1..=10u64).collect()))
        .concurrency(4)
        .map(|pair| {
            let squared = pair.value * pair.value;
            async move { Ok(squared) }
        });

    let cancel = CancelToken::new();
    let squares = stream
        .reduce(&cancel, 0u64, |acc, pair| acc + pair.value)
        .await?;
    let positions = stream
        .reduce(&cancel, 0usize, |acc, pair| acc + pair.position + 1)
        .await?;

    assert_eq!(squares, 385);
    assert_eq!(positions, 55);
    Ok(())
}

#[tokio::test]
async fn reduce_after_filter_and_take() -> Result<()> {
    let stream = Stream::new(numbers(100))
        .filter(|pair| {
            let even = pair.key % 2 == 0;
            async move { Ok(even) }
        })
        .in_source_order()
        .take(5);

    let total = stream
        .reduce(&CancelToken::new(), 0u64, |acc, pair| acc + pair.key)
        .await?;
    // 0 + 2 + 4 + 6 + 8
    assert_eq!(total, 20);
    Ok(())
}

#[tokio::test]
async fn reduce_can_build_collections() -> Result<()> {
    let stream = Stream::new(numbers(5));
    let mut keys = stream
        .reduce(&CancelToken::new(), Vec::new(), |mut acc, pair| {
            acc.push(pair.key);
            acc
        })
        .await?;
    keys.sort_unstable();
    assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    Ok(())
}
