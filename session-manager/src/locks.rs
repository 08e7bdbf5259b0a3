//! Per-container-name serialization (spec §5: "create and stop for the
//! same container name must not interleave. Implementations enforce this
//! via a per-name mutex.").

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A lazily-populated map of name -> mutex. Entries are never removed;
/// the number of distinct container names in a process's lifetime is
/// bounded by the container cap, so this does not grow unbounded.
#[derive(Default)]
pub struct NameLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Run `f` while holding the named lock; no other call for the same
    /// name may run concurrently.
    pub async fn with_lock<F, Fut, T>(&self, name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = self.entry(name);
        let _guard = lock.lock().await;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_calls_run_one_at_a_time() {
        let locks = Arc::new(NameLocks::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let locks = locks.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .with_lock("container-a", || async {
                        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        counter.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_names_can_run_concurrently() {
        let locks = Arc::new(NameLocks::new());
        let started = Arc::new(tokio::sync::Barrier::new(2));

        let locks_a = locks.clone();
        let started_a = started.clone();
        let a = tokio::spawn(async move {
            locks_a
                .with_lock("container-a", || async move {
                    started_a.wait().await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                })
                .await;
        });

        let locks_b = locks.clone();
        let started_b = started.clone();
        let b = tokio::spawn(async move {
            locks_b
                .with_lock("container-b", || async move {
                    started_b.wait().await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                })
                .await;
        });

        tokio::time::timeout(Duration::from_millis(200), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .expect("both locks should be acquired concurrently, not serialized");
    }
}
