pub(crate) mod adapters;
pub(crate) mod barrier;
pub mod cancel;
pub mod config;
pub(crate) mod flow;
pub(crate) mod runtime;
mod sink;
pub(crate) mod stage;
pub mod stream;
