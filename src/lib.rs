//! # kvpipe
//!
//! **Concurrent key/value pipelines on Tokio.**
//!
//! `kvpipe` pushes a sequence of key/value pairs through a chain of stages,
//! each backed by its own pool of workers, and hands the results to a sink.
//! Every pair remembers the position its source emitted it at, so the
//! source order can always be recovered after concurrent workers have
//! shuffled it.
//!
//! It is built for a few hard constraints:
//!
//! - bounded channels between stages (backpressure, bounded memory)
//! - cooperative cancellation with deadlines
//! - no leaked tasks, whichever way a run ends
//! - stage errors that count toward a threshold instead of vanishing
//!
//! ---
//!
//! ## Core Model
//!
//! ```text
//! Source → Feed → Stage₁ → … → Stageₙ → Sink
//! ```
//!
//! - The **feed** stamps positions `0, 1, 2, …` on the pairs of a
//!   [`PairSource`].
//! - **Stages** (`filter`, `map`, `for_each`, `take`, `sort_by`) each read
//!   one flow and write the next. Pooled stages run `concurrency` workers;
//!   `take` and `sort_by` always run one.
//! - **Sinks** (`collect`, `reduce`, `pipe_into`, `first`) start a run and
//!   drain it.
//!
//! Data moves downstream; stop signals move upstream. When a sink stops
//! early every stage above it winds down.
//!
//! ---
//!
//! ## Example
//!
//! ```no_run
//! use kvpipe::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> kvpipe::error::Result<()> {
//!     let stream = Stream::new(Items::from_vec((0..100u64).collect()))
//!         .filter(|pair| {
//!             let odd = pair.value % 2 == 1;
//!             async move { Ok(odd) }
//!         })
//!         .map(|pair| {
//!             let squared = pair.value * pair.value;
//!             async move { Ok(squared) }
//!         })
//!         .in_source_order();
//!
//!     let cancel = CancelToken::new();
//!     let squares = stream.collect(&cancel).await?;
//!     assert_eq!(squares.len(), 50);
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## Ordering
//!
//! Sinks see pairs in **arrival order**, which under concurrency is not
//! the source order. Add [`Stream::in_source_order`] (or any
//! [`Stream::sort_by`]) as the last stage when order matters; every pair
//! still carries its original `position`.
//!
//! ---
//!
//! ## Errors
//!
//! Callbacks return [`error::Result`]:
//!
//! - `Err(Error::Skip)` drops the pair quietly.
//! - Any other error drops the pair and is recorded by the sink.
//! - Once `error_threshold` errors are recorded (default 1) the run is
//!   cancelled and the sink returns [`Error::Aggregate`], listing them in
//!   the order they were seen.
//! - Fewer errors than the threshold are dropped: the threshold is a
//!   circuit breaker, not an error log.
//!
//! No stage retries anything.
//!
//! ---
//!
//! ## Cancellation
//!
//! Every sink takes a [`CancelToken`]. Cancelling it, or letting a
//! [`CancelToken::with_timeout`] deadline pass, stops every task of the
//! run and returns [`Error::Cancelled`] / [`Error::DeadlineExceeded`].
//!
//! ```no_run
//! use std::time::Duration;
//! use kvpipe::prelude::*;
//!
//! # async fn demo(stream: Stream<usize, u64>) {
//! let deadline = CancelToken::new().with_timeout(Duration::from_millis(50));
//! match stream.reduce(&deadline, 0u64, |acc, pair| acc + pair.value).await {
//!     Ok(total) => println!("total = {total}"),
//!     Err(err) if err.is_cancellation() => println!("gave up: {err}"),
//!     Err(err) => println!("failed: {err}"),
//! }
//! # }
//! ```
//!
//! ---
//!
//! ## MapReduce
//!
//! [`mapreduce::map_reduce`] maps any source on a worker pool and folds
//! the results on the calling task. A failed run still hands back the
//! partial accumulator.
//!
//! ---
//!
//! ## Observability
//!
//! With the `tracing` feature (on by default) `kvpipe` emits spans
//! `kvpipe.stage`, `kvpipe.sink` and `kvpipe.mapreduce`, and events such
//! as `kvpipe.stage.started`, `kvpipe.stage.closed`, `kvpipe.cancelled`,
//! `kvpipe.downstream.closed`, `kvpipe.error.recorded` and
//! `kvpipe.threshold.tripped`. It never installs a subscriber:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("kvpipe=debug")
//!     .init();
//! ```
//!
//! ---
//!
//! ## Feature Flags
//!
//! - `tracing` *(default)*: spans and structured events.
//!
//! [`PairSource`]: source::PairSource
//! [`Stream::in_source_order`]: pipeline::stream::Stream::in_source_order
//! [`Stream::sort_by`]: pipeline::stream::Stream::sort_by
//! [`Error::Aggregate`]: error::Error::Aggregate
//! [`Error::Cancelled`]: error::Error::Cancelled
//! [`Error::DeadlineExceeded`]: error::Error::DeadlineExceeded
//! [`CancelToken`]: pipeline::cancel::CancelToken
//! [`CancelToken::with_timeout`]: pipeline::cancel::CancelToken::with_timeout

pub mod collections;
pub mod error;
pub mod mapreduce;
pub mod pair;
pub mod pipeline;
pub mod source;

pub mod prelude {
    //! Convenient imports for most `kvpipe` users.

    pub use crate::collections::OrderedMap;
    pub use crate::error::Error;
    pub use crate::mapreduce::{map_reduce, MapReduceError};
    pub use crate::pair::IndexedPair;
    pub use crate::pipeline::cancel::{CancelReason, CancelToken};
    pub use crate::pipeline::config::FlowControl;
    pub use crate::pipeline::stream::Stream;
    pub use crate::source::{Destination, Items, PairSource};
}
