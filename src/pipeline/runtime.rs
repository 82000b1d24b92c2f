use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::Error;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::flow::Outlet;

/// Everything the tasks of one run share.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub(crate) cancel: CancelToken,
    pub(crate) buffer: usize,
    errors: mpsc::UnboundedSender<Error>,
}

impl RunContext {
    pub(crate) fn new(
        cancel: CancelToken,
        buffer: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (errors, rx) = mpsc::unbounded_channel();
        (
            Self {
                cancel,
                buffer: buffer.max(1),
                errors,
            },
            rx,
        )
    }

    /// Hands a stage error to the terminal sink.
    pub(crate) fn report(&self, stage: &'static str, err: Error) {
        #[cfg(feature = "tracing")]
        tracing::event!(
            tracing::Level::DEBUG,
            event = "kvpipe.stage.error",
            stage = stage,
            error = %err,
            "kvpipe.stage.error"
        );

        // The sink may already be gone, in which case nobody cares.
        let _ = self.errors.send(Error::stage(stage, err));
    }
}

/// Spawns `fut` into `set`, inside a `kvpipe.stage` span when tracing is on.
pub(crate) fn spawn_worker<F>(set: &mut JoinSet<()>, stage: &'static str, worker: usize, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    #[cfg(feature = "tracing")]
    {
        use tracing::Instrument;
        let span = tracing::debug_span!("kvpipe.stage", stage = stage, worker = worker);
        set.spawn(fut.instrument(span));
    }

    #[cfg(not(feature = "tracing"))]
    {
        let _ = (stage, worker);
        set.spawn(fut);
    }
}

/// Waits for every worker of a stage, then closes its output.
///
/// The supervisor holds the last sender: the output channel closes only
/// after all workers have exited, so no worker ever sends into a closed
/// flow and the consumer always sees the end of the stream.
pub(crate) fn supervise<K, V>(
    stage: &'static str,
    mut workers: JoinSet<()>,
    outlet: Outlet<K, V>,
    ctx: RunContext,
) where
    K: Send + 'static,
    V: Send + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::event!(
        tracing::Level::DEBUG,
        event = "kvpipe.stage.started",
        stage = stage,
        workers = workers.len(),
        "kvpipe.stage.started"
    );

    tokio::spawn(async move {
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                ctx.report(stage, Error::Join(err));
            }
        }
        drop(outlet);

        #[cfg(feature = "tracing")]
        tracing::event!(
            tracing::Level::DEBUG,
            event = "kvpipe.stage.closed",
            stage = stage,
            "kvpipe.stage.closed"
        );
    });
}

/// Runs a terminal operation inside a `kvpipe.sink` span when tracing is on.
#[cfg(feature = "tracing")]
pub(crate) fn sink_scope<F>(sink: &'static str, fut: F) -> tracing::instrument::Instrumented<F>
where
    F: Future,
{
    use tracing::Instrument;
    fut.instrument(tracing::debug_span!("kvpipe.sink", sink = sink))
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn sink_scope<F>(_sink: &'static str, fut: F) -> F
where
    F: Future,
{
    fut
}
