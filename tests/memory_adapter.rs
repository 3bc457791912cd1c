//! In-memory adapter behavior through the `Adapter` trait object.

use bytes::Bytes;
use query_cache::{Adapter, MemoryAdapter};
use std::sync::Arc;
use std::time::Duration;

fn adapter() -> Arc<dyn Adapter> {
    Arc::new(MemoryAdapter::new())
}

#[tokio::test]
async fn test_round_trip_within_ttl() {
    let a = adapter();
    for (i, ttl) in [1u64, 10, 3600].into_iter().enumerate() {
        let key = format!("qcache:users:{}", i);
        let value = Bytes::from(format!("payload-{}", i));
        a.set(&key, value.clone(), Duration::from_secs(ttl))
            .await
            .unwrap();
        assert_eq!(a.get(&key).await.unwrap(), value);
    }
}

#[tokio::test]
async fn test_expiry() {
    let a = adapter();
    a.set("k", Bytes::from_static(b"v"), Duration::from_millis(20))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = a.get("k").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_pattern_delete_precision() {
    let a = adapter();
    for key in ["user:1", "user:2", "order:1", "users:1"] {
        a.set(key, Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .unwrap();
    }
    a.delete_pattern("user:*").await.unwrap();

    assert!(a.get("user:1").await.is_err());
    assert!(a.get("user:2").await.is_err());
    assert!(a.get("order:1").await.is_ok());
    assert!(a.get("users:1").await.is_ok());
}

#[tokio::test]
async fn test_clear() {
    let a = adapter();
    a.set("a:1", Bytes::from_static(b"v"), Duration::ZERO)
        .await
        .unwrap();
    a.set("b:1", Bytes::from_static(b"v"), Duration::ZERO)
        .await
        .unwrap();
    a.clear().await.unwrap();
    assert!(a.get("a:1").await.is_err());
    assert!(a.get("b:1").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_pattern_delete() {
    let a = adapter();
    let writers = (0..8).map(|w| {
        let a = Arc::clone(&a);
        tokio::spawn(async move {
            for i in 0..100 {
                let key = format!("t{}:{}", w % 2, i);
                a.set(&key, Bytes::from(key.clone()), Duration::ZERO)
                    .await
                    .unwrap();
                let _ = a.get(&key).await;
            }
        })
    });
    for handle in futures::future::join_all(writers).await {
        handle.unwrap();
    }

    a.delete_pattern("t0:*").await.unwrap();
    for i in 0..100 {
        assert!(a.get(&format!("t0:{}", i)).await.is_err());
        assert!(a.get(&format!("t1:{}", i)).await.is_ok());
    }
}

#[tokio::test]
async fn test_background_sweep_bounds_memory() {
    let memory = MemoryAdapter::with_sweep_interval(Duration::from_millis(25));
    for i in 0..50 {
        memory
            .set(&format!("k{}", i), Bytes::from_static(b"v"), Duration::from_millis(5))
            .await
            .unwrap();
    }
    memory
        .set("keep", Bytes::from_static(b"v"), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(memory.len().unwrap(), 51);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(memory.len().unwrap(), 1);

    memory.close().await.unwrap();
    memory.close().await.unwrap();
}
