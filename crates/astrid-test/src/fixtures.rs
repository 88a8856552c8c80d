//! Test fixtures for datastore contents.

use astrid_datastore::{Datastore, Key, KvStore};

/// Keys of the sample dataset, in ascending byte order.
pub const SAMPLE_KEYS: [&str; 8] = [
    "/a",
    "/a/b",
    "/a/b/c",
    "/a/b/d",
    "/a/c",
    "/a/d",
    "/e",
    "/f",
];

/// The sample dataset: each key maps to its own path as bytes.
#[must_use]
pub fn sample_entries() -> Vec<(Key, Vec<u8>)> {
    SAMPLE_KEYS
        .iter()
        .map(|k| (Key::new(k), k.as_bytes().to_vec()))
        .collect()
}

/// Sample keys that start with `prefix`, in ascending order.
#[must_use]
pub fn sample_keys_with_prefix(prefix: &str) -> Vec<&'static str> {
    SAMPLE_KEYS
        .iter()
        .copied()
        .filter(|k| k.starts_with(prefix))
        .collect()
}

/// `count` keys under `parent` whose names sort in numeric order.
#[must_use]
pub fn numbered_keys(parent: &str, count: usize) -> Vec<Key> {
    let parent = Key::new(parent);
    (0..count).map(|i| parent.child(format!("{i:06}"))).collect()
}

/// Write every entry to `store`.
///
/// # Panics
///
/// Panics if a put fails.
pub async fn populate(store: &Datastore, entries: &[(Key, Vec<u8>)]) {
    for (key, value) in entries {
        store
            .put(key, value.clone())
            .await
            .expect("Failed to populate datastore");
    }
}
