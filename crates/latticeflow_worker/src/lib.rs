pub mod ai;
pub mod cleanup;
pub mod download;
pub mod extract;
pub mod import;
pub mod preview;
pub mod runtime;
pub mod sync;

pub use runtime::{JobHandler, WorkerLoop, WorkerManager};
