use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::cache::{cache_key, ResultStore};
use super::params::{substitute, ParamValue, Params};
use super::{ResultSet, Row};
use crate::config::CacheSettings;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, RawResponse};

/// Bootstrap-time table enumeration, run uncached at startup.
const EXISTING_TABLES_SQL: &str = "SELECT name FROM system.tables WHERE database = %(database)s";

/// A single query to execute, with its cache and substitution flags.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    template: String,
    params: Params,
    settings: HashMap<String, ParamValue>,
    query_id: Option<String>,
    use_cache: bool,
    substitute_params: bool,
}

impl QueryRequest {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            params: Params::new(),
            settings: HashMap::new(),
            query_id: None,
            use_cache: true,
            substitute_params: true,
        }
    }

    /// Bind a value to a `%(name)s` placeholder.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add a server-side tuning knob for this execution only. Settings do
    /// not participate in the cache key.
    pub fn setting(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// Attach an identifier for server-side tracing.
    pub fn query_id(mut self, id: impl Into<String>) -> Self {
        self.query_id = Some(id.into());
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn substitute_params(mut self, substitute_params: bool) -> Self {
        self.substitute_params = substitute_params;
        self
    }
}

/// Cache population policy, fixed per executor.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// When true, a failed cache write fails the call. Otherwise writes are
    /// best-effort: logged and swallowed.
    pub strict_writes: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            strict_writes: false,
        }
    }
}

impl From<&CacheSettings> for CachePolicy {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.ttl_secs),
            strict_writes: settings.strict_writes,
        }
    }
}

/// Executes queries through the connection pool with a shared result cache
/// in front.
///
/// Both collaborators are injected: the pool bounds and lends connections,
/// the store holds serialized result sets keyed by the final query's hash.
/// One call is one cache-or-execute round trip; the executor holds no other
/// state and is safe to share across tasks.
pub struct CachedQueryExecutor {
    pool: Arc<ConnectionPool>,
    store: Arc<dyn ResultStore>,
    policy: CachePolicy,
}

impl CachedQueryExecutor {
    pub fn new(pool: Arc<ConnectionPool>, store: Arc<dyn ResultStore>, policy: CachePolicy) -> Self {
        Self { pool, store, policy }
    }

    /// Run a query: finalize, consult the cache, execute on miss, normalize,
    /// populate the cache, return.
    ///
    /// Errors from the pool and the server surface unrecovered; there is no
    /// retry and no partial result. A store failure on read degrades to a
    /// miss; a store failure on write follows the configured policy.
    pub async fn execute(&self, request: &QueryRequest) -> Result<ResultSet> {
        let final_query = if request.substitute_params {
            substitute(&request.template, &request.params)?
        } else {
            if !request.params.is_empty() {
                debug!(
                    target: "query",
                    count = request.params.len(),
                    "Ignoring params: substitution disabled"
                );
            }
            request.template.clone()
        };

        let key = request.use_cache.then(|| cache_key(&final_query));

        if let Some(key) = &key {
            if let Some(rows) = self.lookup(key).await {
                return Ok(rows);
            }
        }

        let settings: Vec<(String, String)> = request
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.render_plain()))
            .collect();

        // Scoped borrow: the connection returns to the pool on every exit
        // path, including execution failure.
        let raw = {
            let conn = self.pool.acquire().await?;
            conn.execute(&final_query, &settings, request.query_id.as_deref())
                .await?
        };
        let rows = normalize(raw);

        if let Some(key) = &key {
            self.populate(key, &rows).await?;
        }

        Ok(rows)
    }

    /// Cache lookup. Any store failure or undecodable entry is treated as a
    /// miss.
    async fn lookup(&self, key: &str) -> Option<ResultSet> {
        match self.store.get(key).await {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                match serde_json::from_slice::<ResultSet>(&bytes) {
                    Ok(rows) => {
                        debug!(target: "cache", key = %key, rows = rows.len(), "Cache hit");
                        Some(rows)
                    }
                    Err(e) => {
                        warn!(
                            target: "cache",
                            key = %key,
                            error = %e,
                            "Undecodable cache entry, treating as miss"
                        );
                        None
                    }
                }
            }
            Ok(_) => {
                debug!(target: "cache", key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(
                    target: "cache",
                    key = %key,
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    /// Serialize and store a result set. Empty result sets are cached too,
    /// so repeated empty queries still hit.
    async fn populate(&self, key: &str, rows: &ResultSet) -> Result<()> {
        let payload = serde_json::to_vec(rows)?;
        match self.store.set(key, payload, self.policy.ttl).await {
            Ok(()) => {
                debug!(
                    target: "cache",
                    key = %key,
                    rows = rows.len(),
                    ttl_secs = self.policy.ttl.as_secs(),
                    "Cached query result"
                );
                Ok(())
            }
            Err(e) if self.policy.strict_writes => Err(Error::Cache(e)),
            Err(e) => {
                warn!(target: "cache", key = %key, error = %e, "Cache write failed");
                Ok(())
            }
        }
    }

    /// Enumerate the tables existing in the configured database. Issued
    /// once, uncached, at startup; the caller owns the resulting read-only
    /// list.
    pub async fn existing_tables(&self) -> Result<Vec<String>> {
        let request = QueryRequest::new(EXISTING_TABLES_SQL)
            .param("database", self.pool.database())
            .use_cache(false);
        let rows = self.execute(&request).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match row.remove("name") {
                Some(Value::String(name)) => Some(name),
                _ => None,
            })
            .collect())
    }
}

/// Reconstruct row-mappings from the driver's columnar response: one map
/// per row, column name to value, row and column order preserved.
fn normalize(raw: RawResponse) -> ResultSet {
    raw.data
        .into_iter()
        .map(|values| {
            raw.meta
                .iter()
                .map(|column| column.name.clone())
                .zip(values)
                .collect::<Row>()
        })
        .collect()
}
