//! Persistence of in-flight aggregates keyed by correlation key.

pub mod sqlite;

use crate::error::RepositoryError;
use crate::exchange::Exchange;

pub use sqlite::SqliteAggregationRepository;

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Storage for partially aggregated exchanges.
///
/// Active aggregates live under their correlation key. Completed ones move
/// to a separate area keyed by exchange id until the caller confirms
/// delivery, so they can be recovered after a crash.
pub trait AggregationRepository: Send + Sync {
    /// Store `exchange` under `key`, returning what was stored before.
    fn add(&self, key: &str, exchange: &Exchange) -> Result<Option<Exchange>>;

    fn get(&self, key: &str) -> Result<Option<Exchange>>;

    /// Move the aggregate for `key` into the completed area.
    fn remove(&self, key: &str, exchange: &Exchange) -> Result<()>;

    /// Forget a completed exchange. Returns false if it was not there.
    fn confirm(&self, exchange_id: &str) -> Result<bool>;

    /// Correlation keys of active aggregates.
    fn keys(&self) -> Result<Vec<String>>;

    /// Exchange ids of completed, unconfirmed aggregates.
    fn scan(&self) -> Result<Vec<String>>;

    fn recover(&self, exchange_id: &str) -> Result<Option<Exchange>>;
}
