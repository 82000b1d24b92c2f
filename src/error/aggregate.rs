use std::fmt;

use crate::error::Error;

/// Errors recorded during one run, in the order they were encountered.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<Error> {
        self.errors
    }

    pub(crate) fn push(&mut self, err: Error) {
        self.errors.push(err);
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors: ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl IntoIterator for AggregateError {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Counts recorded errors against a threshold.
///
/// Reaching the threshold is the only way recorded errors become visible:
/// a run that finishes below it reports success and the tally is dropped.
#[derive(Debug)]
pub(crate) struct ErrorTally {
    threshold: usize,
    errors: AggregateError,
}

impl ErrorTally {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            errors: AggregateError::default(),
        }
    }

    /// Records `err` and returns `true` once the threshold is reached.
    pub(crate) fn record(&mut self, err: Error) -> bool {
        #[cfg(feature = "tracing")]
        tracing::event!(
            tracing::Level::WARN,
            event = "kvpipe.error.recorded",
            recorded = self.errors.len() + 1,
            threshold = self.threshold,
            error = %err,
            "kvpipe.error.recorded"
        );

        self.errors.push(err);
        let tripped = self.is_tripped();

        #[cfg(feature = "tracing")]
        if tripped {
            tracing::event!(
                tracing::Level::ERROR,
                event = "kvpipe.threshold.tripped",
                threshold = self.threshold,
                "kvpipe.threshold.tripped"
            );
        }

        tripped
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.errors.len() >= self.threshold
    }

    /// Appends `err` without checking the threshold.
    pub(crate) fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub(crate) fn into_error(self) -> Error {
        Error::Aggregate(self.errors)
    }
}
