//! Counts word lengths with a stream, then totals them with map-reduce.
//!
//! ```text
//! RUST_LOG=kvpipe=debug cargo run --example word_lengths
//! ```

use std::sync::Arc;
use std::time::Duration;

use kvpipe::prelude::*;
use tracing_subscriber::EnvFilter;

const TEXT: &str = "streams of pairs flow through bounded stages while workers \
                    race each other and the sink puts everything back in order";

#[tokio::main]
async fn main() -> kvpipe::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kvpipe=info")),
        )
        .with_target(false)
        .init();

    let words: Arc<OrderedMap<usize, String>> = Arc::new(
        TEXT.split_whitespace()
            .enumerate()
            .map(|(i, w)| (i, w.to_string()))
            .collect(),
    );

    let cancel = CancelToken::new().with_timeout(Duration::from_secs(5));

    let long_words = words
        .stream()
        .concurrency(4)
        .filter(|pair| {
            let long = pair.value.len() > 4;
            async move {
                // Pretend each check is slow.
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(long)
            }
        })
        .map(|pair| {
            let upper = pair.value.to_uppercase();
            async move { Ok(upper) }
        })
        .in_source_order()
        .collect(&cancel)
        .await?;

    for pair in &long_words {
        println!("{:>3}  {}", pair.position, pair.value);
    }

    let letters = map_reduce(
        &cancel,
        Arc::clone(&words),
        |pair: IndexedPair<usize, String>| async move {
            let len = pair.value.len();
            Ok(pair.with_value(len))
        },
        |acc: &mut usize, pair: IndexedPair<usize, usize>| {
            *acc += pair.value;
            Ok(())
        },
        0usize,
        FlowControl::new().concurrency(8),
    )
    .await?;

    println!("{} words, {} letters", words.len(), letters);
    Ok(())
}
