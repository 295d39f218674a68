//! 叶子句柄缓存。
//!
//! 名字树每次重新求值都会再次解析同样的叶子；缓存保证同一键只构建一次句柄，
//! 并在宿主退出时统一关闭这些句柄（[`TreeHandle`](crate::name_tree::TreeHandle) 本身不会关闭叶子）。

use std::{fmt, hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    error::CloseError,
    handle::{CloseReport, SharedHandle, close_handles},
    name_tree::LeafResolver,
};

/// 以 `DashMap` 为底的记忆化 [`LeafResolver`]。
///
/// # 教案式说明
/// - **意图 (Why)**：多个名字树共享同一批后端连接，叶子句柄的所有权归缓存而非树；
/// - **契约 (What)**：
///   - 同一键并发解析时只会调用一次 `build`，后来者拿到同一个 `Arc`；
///   - `build` 在分片写锁内执行，不得回调本缓存，否则会死锁；
///   - [`Self::close_all`] 移出并关闭当时缓存的全部句柄，之后再解析会重新构建。
pub struct LeafCache<K, Req, Rep, B> {
    handles: DashMap<K, SharedHandle<Req, Rep>>,
    build: B,
}

impl<K, Req, Rep, B> LeafCache<K, Req, Rep, B>
where
    K: Eq + Hash + Clone,
    B: Fn(&K) -> SharedHandle<Req, Rep>,
{
    pub fn new(build: B) -> Self {
        Self {
            handles: DashMap::new(),
            build,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 查询已缓存的句柄，不触发构建。
    pub fn get(&self, key: &K) -> Option<SharedHandle<Req, Rep>> {
        self.handles.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn get_or_build(&self, key: &K) -> SharedHandle<Req, Rep> {
        if let Some(handle) = self.get(key) {
            return handle;
        }
        let entry = self.handles.entry(key.clone()).or_insert_with(|| {
            debug!("building leaf handle");
            (self.build)(key)
        });
        Arc::clone(entry.value())
    }

    /// 逐键移出缓存中的句柄并关闭。
    ///
    /// 只关闭本次移出的句柄；关闭期间新解析的键留在缓存中，由下一次调用负责。
    pub async fn close_all(&self, deadline: Instant) -> Result<CloseReport, CloseError> {
        let keys: Vec<K> = self.handles.iter().map(|entry| entry.key().clone()).collect();
        let handles: Vec<SharedHandle<Req, Rep>> = keys
            .iter()
            .filter_map(|key| self.handles.remove(key))
            .map(|(_, handle)| handle)
            .collect();

        let report = close_handles("leaf-cache", handles, deadline).await?;
        info!(closed = report.closed, failed = report.failed, "leaf cache closed");
        Ok(report)
    }
}

impl<K, Req, Rep, B> LeafResolver<K, Req, Rep> for LeafCache<K, Req, Rep, B>
where
    K: Eq + Hash + Clone + Send + Sync,
    B: Fn(&K) -> SharedHandle<Req, Rep> + Send + Sync,
{
    fn resolve(&self, key: &K) -> SharedHandle<Req, Rep> {
        self.get_or_build(key)
    }
}

impl<K, Req, Rep, B> fmt::Debug for LeafCache<K, Req, Rep, B>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafCache")
            .field("len", &self.handles.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::RouteError,
        handle::{RoutableHandle, Status},
    };
    use futures::{
        FutureExt,
        future::{self, BoxFuture},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Counted {
        closes: Arc<AtomicUsize>,
    }

    impl RoutableHandle<(), ()> for Counted {
        fn dispatch(&self, _request: ()) -> BoxFuture<'static, Result<(), RouteError>> {
            future::ready(Ok(())).boxed()
        }

        fn status(&self) -> Status {
            Status::Open
        }

        fn close(&self, _deadline: Instant) -> BoxFuture<'static, Result<(), RouteError>> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            future::ready(Ok(())).boxed()
        }
    }

    #[test]
    fn each_key_is_built_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cache = LeafCache::new(move |_: &&'static str| -> SharedHandle<(), ()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(Counted {
                closes: Arc::new(AtomicUsize::new(0)),
            })
        });

        let first = cache.resolve(&"a");
        let again = cache.resolve(&"a");
        cache.resolve(&"b");

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"c").is_none());
    }

    #[tokio::test]
    async fn close_all_closes_and_empties() {
        let closes = Arc::new(AtomicUsize::new(0));
        let shared = Arc::clone(&closes);
        let cache = LeafCache::new(move |_: &u8| -> SharedHandle<(), ()> {
            Arc::new(Counted {
                closes: Arc::clone(&shared),
            })
        });
        for key in 0..3u8 {
            cache.resolve(&key);
        }

        let report = cache
            .close_all(Instant::now() + std::time::Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(report, CloseReport { closed: 3, failed: 0 });
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    /// 关闭要等到闸门放行才完成。
    struct Gated {
        gate: Arc<Notify>,
        closes: Arc<AtomicUsize>,
    }

    impl RoutableHandle<(), ()> for Gated {
        fn dispatch(&self, _request: ()) -> BoxFuture<'static, Result<(), RouteError>> {
            future::ready(Ok(())).boxed()
        }

        fn status(&self) -> Status {
            Status::Open
        }

        fn close(&self, _deadline: Instant) -> BoxFuture<'static, Result<(), RouteError>> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&self.gate);
            async move {
                gate.notified().await;
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn leaves_resolved_while_closing_stay_cached() {
        let gate = Arc::new(Notify::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let (leaf_gate, leaf_closes) = (Arc::clone(&gate), Arc::clone(&closes));
        let cache = LeafCache::new(move |_: &u8| -> SharedHandle<(), ()> {
            Arc::new(Gated {
                gate: Arc::clone(&leaf_gate),
                closes: Arc::clone(&leaf_closes),
            })
        });
        let early = cache.resolve(&0);
        let deadline = Instant::now() + std::time::Duration::from_secs(5);

        let (report, late) = tokio::join!(cache.close_all(deadline), async {
            let late = cache.resolve(&1);
            gate.notify_one();
            late
        });

        assert_eq!(report.unwrap(), CloseReport { closed: 1, failed: 0 });
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(cache.get(&0).is_none());
        assert!(Arc::ptr_eq(&cache.get(&1).unwrap(), &late));
        assert!(!Arc::ptr_eq(&early, &late));
    }
}
