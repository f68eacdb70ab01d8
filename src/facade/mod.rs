pub mod database;
pub mod instrument;
pub mod metadata;
mod queries;
pub mod transactions;

pub use database::Database;
pub use instrument::{Params, QueryKind, QueryReporter, SLOW_QUERY_THRESHOLD};
pub use transactions::{PgTx, PgTxSource};
