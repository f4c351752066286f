pub mod error;
pub mod models;
pub mod pool;
pub mod schema;
pub mod store;

pub use error::{DbError, Result};
pub use pool::{create_pool, DbConfig};
pub use store::Store;
