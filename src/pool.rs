use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};
use url::Url;

use crate::config::ClickHouseSettings;
use crate::error::{Error, Result};

/// A bounded pool of connections to the ClickHouse HTTP interface.
///
/// The pool owns one HTTP client (transport security and the network timeout
/// are applied at construction) and a semaphore bounding the number of
/// in-flight executions. A connection is lent out per query via [`acquire`]
/// and reclaimed when the guard drops, on every exit path.
///
/// [`acquire`]: ConnectionPool::acquire
pub struct ConnectionPool {
    endpoint: Url,
    client: reqwest::Client,
    user: String,
    password: String,
    database: String,
    default_settings: Vec<(String, String)>,
    permits: Semaphore,
}

impl ConnectionPool {
    /// Build a pool from connection settings. Errors here are configuration
    /// errors and fatal at startup.
    pub fn connect(settings: &ClickHouseSettings) -> Result<Self> {
        if settings.host.is_empty() {
            return Err(Error::Config("clickhouse host must not be empty".into()));
        }

        let scheme = if settings.secure { "https" } else { "http" };
        let port = settings
            .port
            .unwrap_or(if settings.secure { 8443 } else { 8123 });
        let endpoint = Url::parse(&format!("{}://{}:{}/", scheme, settings.host, port))
            .map_err(|e| Error::Config(format!("invalid clickhouse endpoint: {e}")))?;

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(settings.timeout_secs));
        if let Some(path) = &settings.ca_bundle {
            let pem = std::fs::read(path)
                .map_err(|e| Error::Config(format!("failed to read CA bundle {path}: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::Config(format!("invalid CA bundle {path}: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if !settings.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        info!(
            target: "pool",
            host = %settings.host,
            database = %settings.database,
            secure = settings.secure,
            size = settings.pool_size,
            "Initializing connection pool"
        );

        // Server-side knobs applied to every execution unless overridden
        // per call. 64-bit integers come back as JSON numbers, not strings.
        let default_settings = vec![
            (
                "max_result_rows".to_string(),
                settings.max_result_rows.to_string(),
            ),
            (
                "output_format_json_quote_64bit_integers".to_string(),
                "0".to_string(),
            ),
        ];

        Ok(Self {
            endpoint,
            client,
            user: settings.user.clone(),
            password: settings.password.clone(),
            database: settings.database.clone(),
            default_settings,
            permits: Semaphore::new(settings.pool_size),
        })
    }

    /// Borrow a connection, queueing when the pool is exhausted. The
    /// connection is returned to the pool when the guard drops.
    pub async fn acquire(&self) -> Result<PooledConnection<'_>> {
        let permit = self.permits.acquire().await.map_err(|_| Error::PoolClosed)?;
        Ok(PooledConnection {
            pool: self,
            _permit: permit,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

/// A connection lent out by the pool for the duration of one query.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    _permit: SemaphorePermit<'a>,
}

impl PooledConnection<'_> {
    /// Run a literal query, requesting column-type metadata alongside row
    /// data. `settings` overlay the pool's defaults for this call only.
    pub async fn execute(
        &self,
        query: &str,
        settings: &[(String, String)],
        query_id: Option<&str>,
    ) -> Result<RawResponse> {
        let pool = self.pool;

        let mut merged: BTreeMap<&str, &str> = pool
            .default_settings
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (k, v) in settings {
            merged.insert(k, v);
        }

        let mut url = pool.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("database", &pool.database);
            pairs.append_pair("default_format", "JSONCompact");
            for (k, v) in merged {
                pairs.append_pair(k, v);
            }
            if let Some(id) = query_id {
                pairs.append_pair("query_id", id);
            }
        }

        debug!(target: "pool", query_id = query_id.unwrap_or(""), "Executing query");

        let response = pool
            .client
            .post(url)
            .header("X-ClickHouse-User", &pool.user)
            .header("X-ClickHouse-Key", &pool.password)
            .body(query.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::server_rejection(status, body));
        }

        let bytes = response.bytes().await?;
        let raw: RawResponse = serde_json::from_slice(&bytes)?;
        Ok(raw)
    }
}

/// The driver's paired (rows, column-descriptors) response, as returned by
/// the `JSONCompact` output format.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    pub meta: Vec<ColumnDescriptor>,
    pub data: Vec<Vec<Value>>,
    #[serde(default)]
    pub rows: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_response_parsing() {
        let body = r#"{
            "meta": [
                {"name": "id", "type": "UInt64"},
                {"name": "name", "type": "String"}
            ],
            "data": [[1, "a"], [2, "b"]],
            "rows": 2,
            "statistics": {"elapsed": 0.001, "rows_read": 2, "bytes_read": 32}
        }"#;
        let raw: RawResponse = serde_json::from_str(body).unwrap();
        assert_eq!(raw.rows, 2);
        assert_eq!(raw.meta.len(), 2);
        assert_eq!(raw.meta[0].name, "id");
        assert_eq!(raw.meta[0].data_type, "UInt64");
        assert_eq!(
            raw.data,
            vec![
                vec![serde_json::json!(1), serde_json::json!("a")],
                vec![serde_json::json!(2), serde_json::json!("b")],
            ]
        );
    }

    #[test]
    fn test_connect_rejects_empty_host() {
        let settings = ClickHouseSettings {
            host: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            ConnectionPool::connect(&settings),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_endpoint_scheme_follows_secure_flag() {
        let plain = ClickHouseSettings {
            secure: false,
            ..Default::default()
        };
        let pool = ConnectionPool::connect(&plain).unwrap();
        assert_eq!(pool.endpoint.as_str(), "http://localhost:8123/");

        let secure = ClickHouseSettings::default();
        let pool = ConnectionPool::connect(&secure).unwrap();
        assert_eq!(pool.endpoint.as_str(), "https://localhost:8443/");
    }
}
