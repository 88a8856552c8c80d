//! End-to-end tests for the datastore surface.

use astrid_datastore::prelude::*;
use astrid_test::{
    TempDatastore, numbered_keys, populate, sample_entries, sample_keys_with_prefix,
    setup_test_logging_default,
};

fn keys(entries: &[Entry]) -> Vec<String> {
    entries.iter().map(|e| e.key.to_string()).collect()
}

#[tokio::test]
async fn test_prefix_query_matches_children_only() {
    setup_test_logging_default();
    let store = Datastore::in_memory();
    populate(&store, &sample_entries()).await;

    let entries = store
        .query(Query::new().with_prefix("/a/"))
        .await
        .unwrap()
        .rest()
        .unwrap();
    assert_eq!(keys(&entries), sample_keys_with_prefix("/a/"));
    for entry in &entries {
        assert_eq!(entry.value.as_deref(), Some(entry.key.as_str().as_bytes()));
    }
}

#[tokio::test]
async fn test_query_whole_keyspace_in_order() {
    let store = Datastore::in_memory();
    populate(&store, &sample_entries()).await;
    let entries = store.query(Query::new()).await.unwrap().rest().unwrap();
    assert_eq!(keys(&entries), sample_keys_with_prefix(""));
}

#[tokio::test]
async fn test_query_paging_covers_every_key_once() {
    let store = Datastore::in_memory();
    let all = numbered_keys("/page", 25);
    for key in &all {
        store.put(key, Vec::new()).await.unwrap();
    }

    let mut seen = Vec::new();
    for page in 0..5 {
        let query = Query::new()
            .with_prefix("/page/")
            .with_offset(page * 6)
            .with_limit(6)
            .keys_only();
        let entries = store.query(query).await.unwrap().rest().unwrap();
        assert!(entries.iter().all(|e| e.value.is_none()));
        seen.extend(entries.into_iter().map(|e| e.key));
    }
    assert_eq!(seen, all);
}

#[tokio::test]
async fn test_descending_query_with_limit() {
    let store = Datastore::in_memory();
    populate(&store, &sample_entries()).await;
    let query = Query::new()
        .with_prefix("/a/b")
        .with_order(Order::ByKeyDescending)
        .with_limit(2);
    let entries = store.query(query).await.unwrap().rest().unwrap();
    assert_eq!(keys(&entries), vec!["/a/b/d", "/a/b/c"]);
}

#[tokio::test]
async fn test_streamed_query() {
    let store = Datastore::in_memory();
    populate(&store, &sample_entries()).await;

    let mut stream = store
        .query(Query::new().with_prefix("/a/"))
        .await
        .unwrap()
        .into_stream();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.key, Key::new("/a/b"));
    stream.close().await.unwrap();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_batch_is_atomic_and_invisible_until_commit() {
    let store = Datastore::in_memory();
    let keys = numbered_keys("/batch", 20);

    let mut batch = store.batch();
    for key in &keys {
        batch.put(key, b"x".to_vec()).unwrap();
    }
    assert_eq!(batch.len(), 20);
    for key in &keys {
        assert!(!store.has(key).await.unwrap());
    }

    batch.commit().await.unwrap();
    for key in &keys {
        assert_eq!(store.get(key).await.unwrap(), b"x");
    }
}

#[tokio::test]
async fn test_uncommitted_batch_leaves_no_trace() {
    let store = Datastore::in_memory();
    {
        let mut batch = store.batch();
        batch.put(&Key::new("/ghost"), b"x".to_vec()).unwrap();
    }
    assert!(!store.has(&Key::new("/ghost")).await.unwrap());
}

#[tokio::test]
async fn test_disk_usage() {
    let memory = Datastore::in_memory();
    memory.put(&Key::new("/k"), vec![0; 128]).await.unwrap();
    assert_eq!(memory.disk_usage().await.unwrap(), 0);

    let temp = TempDatastore::new();
    populate(&temp.store, &sample_entries()).await;
    assert!(temp.store.disk_usage().await.unwrap() > 0);

    temp.store.close().await.unwrap();
    assert!(temp.store.disk_usage().await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_reopen_keeps_writes_and_deletes() {
    let temp = TempDatastore::with_config(|c| c.with_max_value_size(64));
    populate(&temp.store, &sample_entries()).await;
    temp.store.delete(&Key::new("/e")).await.unwrap();

    let mut batch = temp.store.batch();
    batch.put(&Key::new("/g"), b"g".to_vec()).unwrap();
    batch.delete(&Key::new("/f"));
    batch.commit().await.unwrap();
    temp.store.close().await.unwrap();

    let store = temp.reopen();
    assert_eq!(store.config().max_value_size, 64);
    assert!(!store.has(&Key::new("/e")).await.unwrap());
    assert!(!store.has(&Key::new("/f")).await.unwrap());
    assert_eq!(store.get(&Key::new("/g")).await.unwrap(), b"g");
    let entries = store.query(Query::new().keys_only()).await.unwrap().rest().unwrap();
    assert_eq!(entries.len(), 7);
}

#[tokio::test]
async fn test_close_while_results_open() {
    let store = Datastore::in_memory();
    populate(&store, &sample_entries()).await;
    let mut results = store.query(Query::new()).await.unwrap();
    assert!(results.next().unwrap().is_ok());

    store.close().await.unwrap();
    assert!(results.next().unwrap().unwrap_err().is_closed());
    assert!(results.next().is_none());
}

#[tokio::test]
async fn test_config_file_round_trip() {
    let dir = astrid_test::test_dir();
    let data = dir.path().join("data");
    let config_path = dir.path().join("datastore.toml");
    std::fs::write(
        &config_path,
        format!("path = {:?}\nmax_value_size = 8\n", data.display().to_string()),
    )
    .unwrap();

    let config = DatastoreConfig::load_file(&config_path).unwrap();
    let store = Datastore::open(config).unwrap();
    assert!(
        store
            .put(&Key::new("/big"), vec![0; 9])
            .await
            .is_err()
    );
    store.put(&Key::new("/ok"), vec![0; 8]).await.unwrap();
    assert!(data.exists());
}
