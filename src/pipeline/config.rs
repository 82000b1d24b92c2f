/// Worker count used when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Flow control shared by streams and [`map_reduce`](crate::mapreduce::map_reduce).
///
/// - `concurrency`: default worker count per pooled stage. Values below 1
///   are accepted here and rejected when a run starts.
/// - `buffer`: capacity of every inter-stage channel. The default of 1 is
///   a plain handoff; larger buffers let fast stages run ahead.
/// - `error_threshold`: number of recorded errors that aborts a run.
///   Zero is ignored and keeps the previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    concurrency: usize,
    buffer: usize,
    error_threshold: usize,
}

impl FlowControl {
    pub fn new() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            buffer: 1,
            error_threshold: 1,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn error_threshold(mut self, threshold: usize) -> Self {
        if threshold > 0 {
            self.error_threshold = threshold;
        }
        self
    }

    pub fn workers(&self) -> usize {
        self.concurrency
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer
    }

    pub fn threshold(&self) -> usize {
        self.error_threshold
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}
