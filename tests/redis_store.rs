//! Integration tests against a live redis instance.
//!
//! Run with: cargo test --test redis_store -- --ignored

use std::time::Duration;

use reservoir::{cache_key, RedisStore, ResultStore};

const REDIS_URL: &str = "redis://localhost:6379";

#[tokio::test]
#[ignore]
async fn test_redis_roundtrip() -> anyhow::Result<()> {
    let store = RedisStore::connect(REDIS_URL, "reservoir-test").await?;
    let key = cache_key("SELECT 1 -- redis_roundtrip");

    assert_eq!(store.get(&key).await?, None);

    store
        .set(&key, br#"[{"x":1}]"#.to_vec(), Duration::from_secs(60))
        .await?;
    assert_eq!(store.get(&key).await?, Some(br#"[{"x":1}]"#.to_vec()));

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_entry_expires() -> anyhow::Result<()> {
    let store = RedisStore::connect(REDIS_URL, "reservoir-test").await?;
    let key = cache_key("SELECT 1 -- redis_expiry");

    store
        .set(&key, b"[]".to_vec(), Duration::from_secs(1))
        .await?;
    assert!(store.get(&key).await?.is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(store.get(&key).await?.is_none());

    Ok(())
}
