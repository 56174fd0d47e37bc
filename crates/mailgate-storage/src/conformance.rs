//! Backend conformance suite
//!
//! [`run_suite`] drives any [`BlobStore`] through the behavioral contract
//! every backend must honor. Each case gets a fresh store from the factory,
//! and the teardown function runs when the case finishes, including when an
//! assertion inside it panics.
//!
//! ```ignore
//! conformance::run_suite(
//!     || async { MemoryBlobStore::new() },
//!     |_: &MemoryBlobStore| {},
//! )
//! .await;
//! ```

use crate::blob::{BlobError, BlobKey, BlobStore, MissingKeyPolicy, OverwritePolicy};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Number of keys used by the concurrency cases
pub const CONCURRENT_KEYS: usize = 100;

/// Run every conformance case against stores produced by `factory`
pub async fn run_suite<S, F, Fut, T>(factory: F, teardown: T)
where
    S: BlobStore + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
    T: Fn(&S),
{
    run_case("put_then_get", &factory, &teardown, put_then_get).await;
    run_case("get_missing", &factory, &teardown, get_missing).await;
    run_case("delete_existing", &factory, &teardown, delete_existing).await;
    run_case("delete_missing", &factory, &teardown, delete_missing).await;
    run_case("overwrite", &factory, &teardown, overwrite).await;
    run_case("list_tracks_committed", &factory, &teardown, list_tracks_committed).await;
    run_case("uncommitted_write_invisible", &factory, &teardown, uncommitted_write_invisible).await;
    run_case("aborted_write_discarded", &factory, &teardown, aborted_write_discarded).await;
    run_case("concurrent_disjoint_keys", &factory, &teardown, concurrent_disjoint_keys).await;
    run_case("concurrent_same_key", &factory, &teardown, concurrent_same_key).await;
}

/// Owns a store for the duration of one case and tears it down on drop
struct Scoped<'t, S, T: Fn(&S)> {
    store: Arc<S>,
    teardown: &'t T,
}

impl<S, T: Fn(&S)> Drop for Scoped<'_, S, T> {
    fn drop(&mut self) {
        (self.teardown)(&self.store);
    }
}

async fn run_case<S, F, Fut, T, C, CFut>(name: &str, factory: &F, teardown: &T, case: C)
where
    S: BlobStore + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
    T: Fn(&S),
    C: FnOnce(Arc<S>) -> CFut,
    CFut: Future<Output = ()>,
{
    info!(case = name, "Running blob store conformance case");

    let scoped = Scoped {
        store: Arc::new(factory().await),
        teardown,
    };

    let existing = scoped.store.list().await.expect("list on a fresh store");
    assert!(
        existing.is_empty(),
        "{name}: factory produced a non-empty store: {existing:?}"
    );

    case(scoped.store.clone()).await;
}

fn key(name: impl Into<String>) -> BlobKey {
    BlobKey::new(name).expect("conformance keys are valid")
}

/// Random payload whose length also varies with `seed`
fn payload(seed: usize) -> Vec<u8> {
    let mut data = format!("payload-{seed}:").into_bytes();
    for _ in 0..(seed % 7 + 1) {
        data.extend_from_slice(Uuid::new_v4().as_bytes());
    }
    data
}

async fn put_then_get<S: BlobStore>(store: Arc<S>) {
    let cases: Vec<(&str, Vec<u8>)> = vec![
        ("text", b"Subject: hello\r\n\r\nbody\r\n".to_vec()),
        ("binary", (0u8..=255).collect()),
        ("empty", Vec::new()),
        ("large", (0..256 * 1024).map(|i| (i % 251) as u8).collect()),
    ];

    for (name, data) in &cases {
        store.put(&key(*name), data).await.expect("put");
    }
    for (name, data) in &cases {
        let read = store.get(&key(*name)).await.expect("get");
        assert!(read == *data, "{name}: content differs after put/get");
    }
}

async fn get_missing<S: BlobStore>(store: Arc<S>) {
    let err = store.get(&key("never-written")).await.unwrap_err();
    assert!(
        matches!(err, BlobError::NotFound(_)),
        "expected NotFound, got {err:?}"
    );
}

async fn delete_existing<S: BlobStore>(store: Arc<S>) {
    let k = key("doomed");
    store.put(&k, b"bye").await.expect("put");
    store.delete(&k).await.expect("delete");

    assert!(matches!(store.get(&k).await, Err(BlobError::NotFound(_))));
    assert!(!store.list().await.expect("list").contains(&k));
}

async fn delete_missing<S: BlobStore>(store: Arc<S>) {
    let k = key("ghost");
    let first = store.delete(&k).await;
    let second = store.delete(&k).await;

    match store.missing_key_policy() {
        MissingKeyPolicy::Ignore => {
            assert_eq!(first, Ok(()));
            assert_eq!(second, Ok(()));
        }
        MissingKeyPolicy::NotFound => {
            assert!(matches!(first, Err(BlobError::NotFound(_))));
            assert_eq!(first, second);
        }
    }

    // Deleting twice after a real put behaves like deleting a missing key.
    store.put(&k, b"x").await.expect("put");
    store.delete(&k).await.expect("delete");
    assert_eq!(store.delete(&k).await, second);
}

async fn overwrite<S: BlobStore>(store: Arc<S>) {
    let k = key("replaced");
    store.put(&k, b"a much longer first version").await.expect("put");
    let second = store.put(&k, b"short").await;

    match store.overwrite_policy() {
        OverwritePolicy::Replace => {
            assert_eq!(second, Ok(()));
            assert_eq!(store.get(&k).await.expect("get"), b"short");
        }
        OverwritePolicy::Reject => {
            assert!(matches!(second, Err(BlobError::AlreadyExists(_))));
            assert_eq!(
                store.get(&k).await.expect("get"),
                b"a much longer first version"
            );
        }
    }

    assert_eq!(store.list().await.expect("list"), vec![k]);
}

async fn list_tracks_committed<S: BlobStore>(store: Arc<S>) {
    for name in ["c", "a", "b"] {
        store.put(&key(name), name.as_bytes()).await.expect("put");
    }
    assert_eq!(
        store.list().await.expect("list"),
        vec![key("a"), key("b"), key("c")]
    );

    store.delete(&key("b")).await.expect("delete");
    assert_eq!(store.list().await.expect("list"), vec![key("a"), key("c")]);

    let content_key = BlobKey::for_content(b"addressed");
    store.put(&content_key, b"addressed").await.expect("put");
    assert!(store.list().await.expect("list").contains(&content_key));
}

async fn uncommitted_write_invisible<S: BlobStore>(store: Arc<S>) {
    let k = key("streamed");
    let mut writer = store.create(&k, Some(12)).await.expect("create");
    writer.write(b"first ").await.expect("write");

    assert!(store.list().await.expect("list").is_empty());
    assert!(matches!(store.get(&k).await, Err(BlobError::NotFound(_))));

    writer.write(b"second").await.expect("write");
    assert!(store.list().await.expect("list").is_empty());

    writer.commit().await.expect("commit");
    assert_eq!(store.get(&k).await.expect("get"), b"first second");
    assert_eq!(store.list().await.expect("list"), vec![k]);
}

async fn aborted_write_discarded<S: BlobStore>(store: Arc<S>) {
    let k = key("aborted");
    let mut writer = store.create(&k, None).await.expect("create");
    writer.write(b"never published").await.expect("write");
    writer.abort().await.expect("abort");

    assert!(matches!(writer.commit().await, Err(BlobError::WriterClosed)));
    assert!(store.list().await.expect("list").is_empty());
    assert!(matches!(store.get(&k).await, Err(BlobError::NotFound(_))));

    // A dropped writer behaves like an aborted one.
    let mut writer = store.create(&k, None).await.expect("create");
    writer.write(b"dropped").await.expect("write");
    drop(writer);
    assert!(store.list().await.expect("list").is_empty());
}

async fn concurrent_disjoint_keys<S: BlobStore + 'static>(store: Arc<S>) {
    let expected: Vec<(BlobKey, Vec<u8>)> = (0..CONCURRENT_KEYS)
        .map(|i| (key(format!("concurrent-{i:03}")), payload(i)))
        .collect();

    let mut writers = tokio::task::JoinSet::new();
    for (k, data) in expected.iter().cloned() {
        let store = store.clone();
        writers.spawn(async move { store.put(&k, &data).await });
    }
    while let Some(result) = writers.join_next().await {
        result.expect("writer task").expect("put");
    }

    let mut readers = tokio::task::JoinSet::new();
    for (k, data) in expected.iter().cloned() {
        let store = store.clone();
        readers.spawn(async move {
            let read = store.get(&k).await.expect("get");
            assert!(read == data, "{k}: payload corrupted");
        });
    }
    while let Some(result) = readers.join_next().await {
        result.expect("reader task");
    }

    // Delete even keys while re-reading odd ones.
    let mut mixed = tokio::task::JoinSet::new();
    for (i, (k, data)) in expected.iter().cloned().enumerate() {
        let store = store.clone();
        mixed.spawn(async move {
            if i % 2 == 0 {
                store.delete(&k).await.expect("delete");
            } else {
                assert!(store.get(&k).await.expect("get") == data, "{k}: payload corrupted");
            }
        });
    }
    while let Some(result) = mixed.join_next().await {
        result.expect("mixed task");
    }

    let listed: BTreeSet<BlobKey> = store.list().await.expect("list").into_iter().collect();
    let survivors: BTreeSet<BlobKey> = expected
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, (k, _))| k.clone())
        .collect();
    assert_eq!(listed, survivors);
}

async fn concurrent_same_key<S: BlobStore + 'static>(store: Arc<S>) {
    const WRITERS: u8 = 16;
    const SIZE: usize = 16 * 1024;

    let k = key("contended");
    let mut tasks = tokio::task::JoinSet::new();
    for fill in 1..=WRITERS {
        let store = store.clone();
        let k = k.clone();
        tasks.spawn(async move { store.put(&k, &vec![fill; SIZE]).await });
    }

    let mut succeeded = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("writer task") {
            Ok(()) => succeeded += 1,
            Err(BlobError::AlreadyExists(_))
                if store.overwrite_policy() == OverwritePolicy::Reject => {}
            Err(e) => panic!("put failed: {e}"),
        }
    }

    match store.overwrite_policy() {
        OverwritePolicy::Replace => assert_eq!(succeeded, WRITERS as usize),
        OverwritePolicy::Reject => assert_eq!(succeeded, 1),
    }

    let data = store.get(&k).await.expect("get");
    assert_eq!(data.len(), SIZE, "torn write: unexpected length");
    let first = data[0];
    assert!(
        (1..=WRITERS).contains(&first) && data.iter().all(|b| *b == first),
        "torn write: content mixes several writers"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobResult, BlobWriter, MemoryBlobStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loses the last byte of every object on read
    #[derive(Default)]
    struct TruncatingStore(MemoryBlobStore);

    #[async_trait]
    impl BlobStore for TruncatingStore {
        async fn create(
            &self,
            key: &BlobKey,
            size_hint: Option<u64>,
        ) -> BlobResult<Box<dyn BlobWriter>> {
            self.0.create(key, size_hint).await
        }

        async fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
            let mut data = self.0.get(key).await?;
            data.pop();
            Ok(data)
        }

        async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
            self.0.delete(key).await
        }

        async fn list(&self) -> BlobResult<Vec<BlobKey>> {
            self.0.list().await
        }
    }

    #[test]
    fn test_failing_case_still_tears_down() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let counter = torn_down.clone();

        let outcome = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(run_suite(
                || async { TruncatingStore::default() },
                move |_: &TruncatingStore| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            ));
        })
        .join();

        assert!(outcome.is_err(), "a lossy store must fail the suite");
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_case_gets_a_fresh_store() {
        let created = AtomicUsize::new(0);
        let torn_down = AtomicUsize::new(0);

        run_suite(
            || {
                created.fetch_add(1, Ordering::SeqCst);
                async { MemoryBlobStore::new() }
            },
            |_: &MemoryBlobStore| {
                torn_down.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(created.load(Ordering::SeqCst), 10);
        assert_eq!(torn_down.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_payloads_are_distinct() {
        let a = payload(1);
        let b = payload(1);
        assert_ne!(a, b);
        assert_ne!(payload(2).len(), payload(3).len());
    }
}
