//! Shared ids, error taxonomy, path resolution, and backoff math used
//! across every Latticeflow crate.

pub mod backoff;
pub mod error;
pub mod ids;
pub mod paths;

pub use error::{JobError, Retry};
