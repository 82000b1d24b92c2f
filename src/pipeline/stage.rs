use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::pair::IndexedPair;
use crate::pipeline::flow::Flow;
use crate::pipeline::runtime::RunContext;

/// One step of a stream: consumes a flow and returns the flow it feeds.
pub(crate) trait Stage<K, V>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Worker count this stage always runs with, regardless of configuration.
    fn fixed_workers(&self) -> Option<usize> {
        None
    }

    /// Spawns the stage's tasks and returns its output flow immediately.
    fn launch(self: Arc<Self>, input: Flow<K, V>, workers: usize, ctx: &RunContext) -> Flow<K, V>;
}

/// Per-item work of a pooled stage.
///
/// `Ok(Some(pair))` forwards a pair, `Ok(None)` drops the input quietly and
/// an error is reported to the sink (except [`Error::Skip`], which behaves
/// like `Ok(None)`).
///
/// [`Error::Skip`]: crate::error::Error::Skip
#[async_trait]
pub(crate) trait PairOperator<K, V>: Send + Sync + 'static
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn name(&self) -> &'static str;

    async fn apply(&self, pair: IndexedPair<K, V>) -> Result<Option<IndexedPair<K, V>>>;
}
