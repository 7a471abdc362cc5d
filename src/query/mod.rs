pub mod cache;
pub mod executor;
pub mod params;

/// A single result row: column name to value, in driver column order.
///
/// Column names come from the driver's metadata and are assumed unique per
/// query.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// An ordered sequence of rows, as returned to callers and as serialized
/// into the cache.
pub type ResultSet = Vec<Row>;
