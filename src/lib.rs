//! Reservoir: a result-caching query layer for ClickHouse.
//!
//! Queries are parameterized, finalized, hashed and looked up in a shared
//! key-value cache, executed against a bounded connection pool on miss,
//! normalized into ordered row-mappings, and cached with a fixed TTL.
//!
//! - **Configuration**: strongly typed settings with env overrides (`config`).
//! - **Connection Pool**: bounded, scoped lending of connections (`pool`).
//! - **Cached Query Executor**: the cache-or-execute path (`query::executor`).
//! - **Cache stores**: redis-backed and in-process implementations behind one
//!   trait (`query::cache`).
//! - **Error Handling**: unified error type with a category taxonomy (`error`).
pub mod config;
pub mod error;
pub mod pool;
pub mod query;

pub use config::{CacheSettings, ClickHouseSettings, Config};
pub use error::{Error, ErrorCategory, Result};
pub use pool::{ColumnDescriptor, ConnectionPool, PooledConnection, RawResponse};
pub use query::cache::{cache_key, MemoryStore, RedisStore, ResultStore};
pub use query::executor::{CachePolicy, CachedQueryExecutor, QueryRequest};
pub use query::params::{substitute, ParamValue, Params};
pub use query::{ResultSet, Row};
