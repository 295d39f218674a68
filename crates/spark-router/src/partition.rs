//! 分区感知路由器：把不断变化的后端地址归组为“分区 → 负载均衡句柄”的稳定快照。
//!
//! ## 设计动机（Why）
//! - 集群成员与分片配置是两条独立变化、且都可能瞬时出错的外部信号；
//!   路由器需要在二者任意一方变化时重新归组，同时保证读路径永不阻塞、永不看到半更新的映射；
//! - 沿用 `ArcSwap` 整表替换的热更新模式：写路径只有一个后台任务，读路径仅 `load`。
//!
//! ## 行为概览（How）
//! 1. [`PartitionRouter::subscribe`] 将地址流与状态流合并为单一有序事件流，交给唯一的后台任务消费；
//! 2. 每当两路输入都已就绪且其中之一发生变化，执行一次归组：提取分片号 → 映射逻辑分区 →
//!    按分区聚合 → 通过 [`LoadBalancerFactory`] 构建句柄；
//! 3. 归组非空时以新修订号整体发布 [`PartitionSnapshot`]；归组为空时保留旧快照；
//! 4. 被替换下来的句柄不会立即关闭（底层连接可能仍被其他消费者共享），而是进入退役列表，
//!    在 [`PartitionRouter::close`] 时统一关闭。
//!
//! ## 契约说明（What）
//! - [`PartitionRouter::snapshot`] 永不失败，初始为“未初始化”哨兵；
//! - 后台归组中的错误（[`ShardError`]）只记录日志，不会传播给读者；
//! - 只有 [`PartitionRouter::close`] 存在对外可见的失败（截止时间内未全部关闭）。

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use arc_swap::ArcSwap;
use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream::{self, BoxStream, Stream},
};
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    address::{Address, Observed, PartitionId, ShardId},
    config::RouterParams,
    error::{BoxError, CloseError, RouteError, ShardError},
    handle::{CloseReport, SharedHandle, close_handles},
};

/// 将请求映射到分区的函数，由分片状态派生。
pub type PartitionFunction<Req> =
    Arc<dyn Fn(&Req) -> Result<PartitionId, RouteError> + Send + Sync>;

/// 由分片状态派生分区函数与“分片 → 逻辑分区”映射的策略。
///
/// # 教案式说明
/// - **意图 (Why)**：分片配置的形态因部署而异，本层只要求能从中推导出两件事；
/// - **契约 (What)**：两个方法都必须是纯函数：对同一 `state`（与同一 `shard`）重复求值须返回相同结果且无副作用。
///   路由器会在每轮更新中重新求值，并可通过 [`RouterParams::verify_determinism`] 做双重求值校验；
/// - **返回值**：`logical_partitions` 可返回零个、一个或多个分区（同一物理节点服务多个逻辑分区）；
///   返回 `Err` 时该地址在本轮被剔除。
pub trait PartitioningStrategy<A, Req>: Send + Sync + 'static {
    fn partition_function(&self, state: &A) -> PartitionFunction<Req>;

    fn logical_partitions(&self, state: &A, shard: ShardId) -> Result<Vec<PartitionId>, BoxError>;
}

/// 以两个闭包实现 [`PartitioningStrategy`] 的适配器。
pub struct FnPartitioning<P, L> {
    partition_fn_of: P,
    logical_partitions_of: L,
}

impl<P, L> FnPartitioning<P, L> {
    pub fn new(partition_fn_of: P, logical_partitions_of: L) -> Self {
        Self {
            partition_fn_of,
            logical_partitions_of,
        }
    }
}

impl<A, Req, P, L> PartitioningStrategy<A, Req> for FnPartitioning<P, L>
where
    P: Fn(&A) -> PartitionFunction<Req> + Send + Sync + 'static,
    L: Fn(&A, ShardId) -> Result<Vec<PartitionId>, BoxError> + Send + Sync + 'static,
{
    fn partition_function(&self, state: &A) -> PartitionFunction<Req> {
        (self.partition_fn_of)(state)
    }

    fn logical_partitions(&self, state: &A, shard: ShardId) -> Result<Vec<PartitionId>, BoxError> {
        (self.logical_partitions_of)(state, shard)
    }
}

/// 负载均衡器工厂：把一个分区的地址集合变成可路由句柄。
///
/// # 契约说明（What）
/// - 构造必须是同步、非阻塞的，真正的建连应延迟到首次派发；
/// - 同一分区的地址集合发生任何变化（包括权重变化）时都会被重新调用，
///   因此权重敏感的均衡策略能像节点重启一样重新评估。
pub trait LoadBalancerFactory<Req, Rep>: Send + Sync + 'static {
    fn build(
        &self,
        partition: PartitionId,
        addresses: &[Address],
        params: &RouterParams,
    ) -> SharedHandle<Req, Rep>;
}

impl<Req, Rep, F> LoadBalancerFactory<Req, Rep> for F
where
    F: Fn(PartitionId, &[Address], &RouterParams) -> SharedHandle<Req, Rep>
        + Send
        + Sync
        + 'static,
{
    fn build(
        &self,
        partition: PartitionId,
        addresses: &[Address],
        params: &RouterParams,
    ) -> SharedHandle<Req, Rep> {
        self(partition, addresses, params)
    }
}

/// 单个分区在快照中的条目。
pub struct PartitionEntry<Req, Rep> {
    addresses: Arc<[Address]>,
    handle: SharedHandle<Req, Rep>,
}

impl<Req, Rep> PartitionEntry<Req, Rep> {
    /// 构建该句柄时使用的地址（按地址排序）。
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn handle(&self) -> &SharedHandle<Req, Rep> {
        &self.handle
    }
}

impl<Req, Rep> Clone for PartitionEntry<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            addresses: Arc::clone(&self.addresses),
            handle: Arc::clone(&self.handle),
        }
    }
}

/// 不可变的分区路由快照。
///
/// # 教案式说明
/// - **意图 (Why)**：作为 `ArcSwap` 的载荷，读者拿到的永远是一份完整一致的映射；
/// - **生命周期**：路由器构造时为未初始化哨兵（无分区函数、映射为空、修订号 0）；
///   每次成功的非空归组整体替换；从不原地修改；路由器关闭后重新发布哨兵。
pub struct PartitionSnapshot<Req, Rep> {
    revision: u64,
    partition_fn: Option<PartitionFunction<Req>>,
    partitions: BTreeMap<PartitionId, PartitionEntry<Req, Rep>>,
}

impl<Req, Rep> PartitionSnapshot<Req, Rep> {
    /// 未初始化哨兵。
    pub fn uninitialized() -> Self {
        Self {
            revision: 0,
            partition_fn: None,
            partitions: BTreeMap::new(),
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        self.partition_fn.is_none()
    }

    /// 发布序号，每次成功发布递增 1。
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn partition_function(&self) -> Option<&PartitionFunction<Req>> {
        self.partition_fn.as_ref()
    }

    pub fn handle(&self, partition: PartitionId) -> Option<&SharedHandle<Req, Rep>> {
        self.partitions.get(&partition).map(|entry| &entry.handle)
    }

    pub fn addresses(&self, partition: PartitionId) -> Option<&[Address]> {
        self.partitions
            .get(&partition)
            .map(|entry| &entry.addresses[..])
    }

    pub fn entries(&self) -> impl Iterator<Item = (PartitionId, &PartitionEntry<Req, Rep>)> {
        self.partitions.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl<Req, Rep> fmt::Debug for PartitionSnapshot<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout: BTreeMap<PartitionId, Vec<&str>> = self
            .partitions
            .iter()
            .map(|(id, entry)| (*id, entry.addresses.iter().map(Address::endpoint).collect()))
            .collect();
        f.debug_struct("PartitionSnapshot")
            .field("revision", &self.revision)
            .field("initialized", &!self.is_uninitialized())
            .field("partitions", &layout)
            .finish()
    }
}

/// 单轮归组的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RoundOutcome {
    /// 输入与上一轮完全相同，跳过。
    Unchanged,
    /// 归组为空，保留旧快照。
    Retained { dropped: usize },
    /// 发布了新快照。
    Published {
        revision: u64,
        partitions: usize,
        rebuilt: usize,
        dropped: usize,
    },
}

/// 路由器与后台任务共享的状态。
struct Shared<Req, Rep> {
    label: Arc<str>,
    snapshot: ArcSwap<PartitionSnapshot<Req, Rep>>,
    /// 以对象身份为键的退役句柄，与当前快照中的句柄互不相交。
    retired: Mutex<HashMap<usize, SharedHandle<Req, Rep>>>,
    rounds: watch::Sender<u64>,
    closed: AtomicBool,
}

impl<Req, Rep> Shared<Req, Rep> {
    fn new(label: Arc<str>) -> Self {
        let (rounds, _) = watch::channel(0);
        Self {
            label,
            snapshot: ArcSwap::from_pointee(PartitionSnapshot::uninitialized()),
            retired: Mutex::new(HashMap::new()),
            rounds,
            closed: AtomicBool::new(false),
        }
    }
}

/// 归组状态机，只被后台任务持有。
///
/// - 记录上一轮输入，用于跳过重复轮次；
/// - 以当前已发布的快照为基准决定哪些分区句柄可以复用。
struct Regrouper<A, S, F> {
    strategy: S,
    factory: F,
    params: RouterParams,
    last_input: Option<(BTreeSet<Address>, A)>,
}

impl<A, S, F> Regrouper<A, S, F>
where
    A: Clone + PartialEq,
{
    fn new(strategy: S, factory: F, params: RouterParams) -> Self {
        Self {
            strategy,
            factory,
            params,
            last_input: None,
        }
    }

    fn apply<Req, Rep>(
        &mut self,
        shared: &Shared<Req, Rep>,
        addresses: &BTreeSet<Address>,
        state: &A,
    ) -> RoundOutcome
    where
        S: PartitioningStrategy<A, Req>,
        F: LoadBalancerFactory<Req, Rep>,
    {
        let identical = self
            .last_input
            .as_ref()
            .is_some_and(|(last_addresses, last_state)| {
                last_addresses == addresses && last_state == state
            });
        if identical && self.params.skip_identical_rounds {
            return RoundOutcome::Unchanged;
        }
        self.last_input = Some((addresses.clone(), state.clone()));

        let (grouping, failures) = self.group::<Req>(addresses, state);
        for failure in &failures {
            log_exclusion(&shared.label, failure);
        }
        let dropped = failures.len();

        if grouping.is_empty() {
            return RoundOutcome::Retained { dropped };
        }

        let current = shared.snapshot.load_full();
        let mut partitions = BTreeMap::new();
        let mut retired = Vec::new();
        let mut rebuilt = 0;
        for (partition, members) in grouping {
            let members: Vec<Address> = members.into_iter().collect();
            match current.partitions.get(&partition) {
                Some(entry) if entry.addresses[..] == members[..] => {
                    partitions.insert(partition, entry.clone());
                }
                previous => {
                    if let Some(previous) = previous {
                        retired.push(Arc::clone(&previous.handle));
                    }
                    let handle = self.factory.build(partition, &members, &self.params);
                    rebuilt += 1;
                    partitions.insert(
                        partition,
                        PartitionEntry {
                            addresses: members.into(),
                            handle,
                        },
                    );
                }
            }
        }
        retired.extend(
            current
                .partitions
                .iter()
                .filter(|(partition, _)| !partitions.contains_key(*partition))
                .map(|(_, entry)| Arc::clone(&entry.handle)),
        );

        let revision = current.revision + 1;
        let snapshot = PartitionSnapshot {
            revision,
            partition_fn: Some(self.strategy.partition_function(state)),
            partitions,
        };
        let published = snapshot.len();
        let live: HashSet<usize> = snapshot
            .partitions
            .values()
            .map(|entry| identity(&entry.handle))
            .collect();
        {
            let mut parked = shared.retired.lock();
            for handle in retired {
                let key = identity(&handle);
                if !live.contains(&key) {
                    parked.entry(key).or_insert(handle);
                }
            }
            // 工厂可能把曾经退役的句柄重新交回来。
            parked.retain(|key, _| !live.contains(key));
        }
        shared.snapshot.store(Arc::new(snapshot));

        RoundOutcome::Published {
            revision,
            partitions: published,
            rebuilt,
            dropped,
        }
    }

    /// 把地址按逻辑分区聚合，同时收集被剔除地址的错误。
    fn group<Req>(
        &self,
        addresses: &BTreeSet<Address>,
        state: &A,
    ) -> (BTreeMap<PartitionId, BTreeSet<Address>>, Vec<ShardError>)
    where
        S: PartitioningStrategy<A, Req>,
    {
        let resolved: Vec<Result<(&Address, Vec<PartitionId>), ShardError>> = addresses
            .iter()
            .map(|address| {
                self.logical_partitions::<Req>(address, state)
                    .map(|partitions| (address, partitions))
            })
            .collect();

        let mut grouping: BTreeMap<PartitionId, BTreeSet<Address>> = BTreeMap::new();
        let mut failures = Vec::new();
        for outcome in resolved {
            match outcome {
                Ok((address, partitions)) => {
                    for partition in partitions {
                        grouping
                            .entry(partition)
                            .or_default()
                            .insert(address.clone());
                    }
                }
                Err(failure) => failures.push(failure),
            }
        }
        (grouping, failures)
    }

    fn logical_partitions<Req>(
        &self,
        address: &Address,
        state: &A,
    ) -> Result<Vec<PartitionId>, ShardError>
    where
        S: PartitioningStrategy<A, Req>,
    {
        let endpoint = address.endpoint_arc();
        let weight = address.weight();
        if !weight.is_finite() || weight < 0.0 {
            return Err(ShardError::InvalidWeight {
                endpoint: Arc::clone(endpoint),
                weight,
            });
        }
        let shard = address.shard_id().ok_or_else(|| ShardError::NoShardId {
            endpoint: Arc::clone(endpoint),
        })?;
        let map = |source| ShardError::PartitionMapping {
            endpoint: Arc::clone(endpoint),
            shard,
            source,
        };

        let first = self.strategy.logical_partitions(state, shard).map_err(map)?;
        if self.params.verify_determinism {
            let second = self.strategy.logical_partitions(state, shard).map_err(map)?;
            if first != second {
                return Err(ShardError::NonDeterministic {
                    endpoint: Arc::clone(endpoint),
                    shard,
                    first,
                    second,
                });
            }
        }
        Ok(first)
    }
}

fn log_exclusion(label: &str, failure: &ShardError) {
    match failure {
        ShardError::NonDeterministic { .. } => error!(
            router = label,
            endpoint = failure.endpoint(),
            code = failure.code(),
            error = %failure,
            "partition mapping is not deterministic; address excluded"
        ),
        ShardError::NoShardId { .. }
        | ShardError::InvalidWeight { .. }
        | ShardError::PartitionMapping { .. } => warn!(
            router = label,
            endpoint = failure.endpoint(),
            code = failure.code(),
            error = %failure,
            "address excluded from partition grouping"
        ),
    }
}

fn report_round(label: &str, outcome: RoundOutcome) {
    match outcome {
        RoundOutcome::Published {
            revision,
            partitions,
            rebuilt,
            dropped,
        } => info!(
            router = label,
            revision,
            partitions,
            rebuilt,
            dropped,
            "published partition snapshot"
        ),
        RoundOutcome::Retained { dropped } => warn!(
            router = label,
            dropped,
            "regrouping produced no partitions; keeping the current snapshot"
        ),
        RoundOutcome::Unchanged => debug!(router = label, "inputs unchanged; skipping regrouping"),
    }
}

/// 合并后的输入事件。
enum Input<A> {
    Addresses(Observed<Vec<Address>>),
    State(Observed<A>),
}

/// 后台更新循环：唯一的写者。
///
/// 归组本身不含 `.await`，任务在 `close` 中被中止时不会留下半发布的轮次。
async fn drive<A, S, F, Req, Rep>(
    shared: Arc<Shared<Req, Rep>>,
    mut regrouper: Regrouper<A, S, F>,
    mut inputs: BoxStream<'static, Input<A>>,
) where
    A: Clone + PartialEq,
    S: PartitioningStrategy<A, Req>,
    F: LoadBalancerFactory<Req, Rep>,
{
    let mut addresses: Option<BTreeSet<Address>> = None;
    let mut state: Option<A> = None;

    while let Some(input) = inputs.next().await {
        let changed = match input {
            Input::Addresses(Observed::Ready(list)) => {
                addresses = Some(list.into_iter().collect());
                true
            }
            Input::State(Observed::Ready(value)) => {
                state = Some(value);
                true
            }
            Input::Addresses(Observed::Pending) => {
                debug!(router = %shared.label, "address source pending");
                false
            }
            Input::State(Observed::Pending) => {
                debug!(router = %shared.label, "sharding state pending");
                false
            }
            Input::Addresses(Observed::Failed(reason)) => {
                warn!(router = %shared.label, %reason, "address source failed; no update this round");
                false
            }
            Input::State(Observed::Failed(reason)) => {
                warn!(router = %shared.label, %reason, "sharding state failed; no update this round");
                false
            }
        };

        if changed {
            match (&addresses, &state) {
                (Some(addresses), Some(state)) => {
                    report_round(&shared.label, regrouper.apply(&shared, addresses, state));
                }
                _ => debug!(router = %shared.label, "waiting for both inputs before grouping"),
            }
        }
        shared.rounds.send_modify(|rounds| *rounds += 1);
    }

    debug!(router = %shared.label, "input streams ended; update loop stopped");
}

/// 分区感知路由器。
///
/// # 教案式说明
/// - **意图 (Why)**：对外提供“按分区号取句柄”的无锁读路径，对内独占后台归组任务与全部句柄；
/// - **契约 (What)**：
///   - [`Self::subscribe`] 必须在 Tokio 运行时内调用，后台任务随之启动；
///   - [`Self::snapshot`] 永不阻塞，返回最近一次发布的快照；
///   - [`Self::close`] 先停止后续更新，再对最后快照与退役列表中的每个句柄恰好关闭一次；
/// - **风险 (Trade-offs)**：退役句柄直到路由器关闭才释放。工厂每次构建新句柄时，
///   每一次成员或权重变化都会让退役列表增加一项，在路由器整个生命周期内单调增长；
///   退役列表按对象身份去重且不含当前快照中的句柄，工厂复用句柄（例如按地址集合池化）即可让其有界。
///   空闲句柄的资源占用由负载均衡器实现自行控制。
pub struct PartitionRouter<Req, Rep> {
    shared: Arc<Shared<Req, Rep>>,
    params: RouterParams,
    updates: Mutex<Option<JoinHandle<()>>>,
}

impl<Req, Rep> PartitionRouter<Req, Rep>
where
    Req: Send + 'static,
    Rep: Send + 'static,
{
    /// 订阅地址流与分片状态流，启动后台归组任务。
    ///
    /// # 教案级说明
    /// - **输入 (What)**：
    ///   - `addresses`：地址集合的观测流，每个 `Ready` 都是完整集合而非增量；
    ///   - `states`：分片状态的观测流；
    ///   - `strategy`：由状态派生分区函数与分区映射的纯函数；
    ///   - `factory`：按分区构建负载均衡句柄；
    ///   - `params`：运行参数，也会原样传给 `factory`；
    /// - **流程 (How)**：两路输入经 `futures::stream::select` 合并为单一事件流，
    ///   由一个 `tokio::spawn` 任务顺序消费，保证任意两次归组互不交错；
    /// - **后置条件**：返回时快照仍为未初始化哨兵，首次发布发生在两路输入都就绪之后。
    pub fn subscribe<A, SA, SS, S, F>(
        addresses: SA,
        states: SS,
        strategy: S,
        factory: F,
        params: RouterParams,
    ) -> Self
    where
        A: Clone + PartialEq + Send + Sync + 'static,
        SA: Stream<Item = Observed<Vec<Address>>> + Send + 'static,
        SS: Stream<Item = Observed<A>> + Send + 'static,
        S: PartitioningStrategy<A, Req>,
        F: LoadBalancerFactory<Req, Rep>,
    {
        let label: Arc<str> = Arc::from(params.label.as_str());
        let shared = Arc::new(Shared::new(Arc::clone(&label)));
        let inputs =
            stream::select(addresses.map(Input::Addresses), states.map(Input::State)).boxed();
        let regrouper = Regrouper::new(strategy, factory, params.clone());
        let updates = tokio::spawn(drive(Arc::clone(&shared), regrouper, inputs));

        info!(router = %label, "partition router subscribed");
        Self {
            shared,
            params,
            updates: Mutex::new(Some(updates)),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    /// 最近一次发布的快照，无锁且永不失败。
    pub fn snapshot(&self) -> Arc<PartitionSnapshot<Req, Rep>> {
        self.shared.snapshot.load_full()
    }

    /// 已处理的输入事件计数，每处理一个事件（无论是否发布）递增一次。
    pub fn rounds(&self) -> watch::Receiver<u64> {
        self.shared.rounds.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// 取出指定分区的句柄。
    pub fn handle(&self, partition: PartitionId) -> Result<SharedHandle<Req, Rep>, RouteError> {
        if self.is_closed() {
            return Err(RouteError::Closed {
                router: Arc::clone(&self.shared.label),
            });
        }
        let snapshot = self.shared.snapshot.load();
        if snapshot.is_uninitialized() {
            return Err(RouteError::Uninitialized {
                router: Arc::clone(&self.shared.label),
            });
        }
        snapshot
            .handle(partition)
            .cloned()
            .ok_or_else(|| RouteError::UnknownPartition {
                router: Arc::clone(&self.shared.label),
                partition,
            })
    }

    /// 按调用方给定的分区号派发。
    pub fn dispatch(
        &self,
        partition: PartitionId,
        request: Req,
    ) -> BoxFuture<'static, Result<Rep, RouteError>> {
        match self.handle(partition) {
            Ok(handle) => handle.dispatch(request),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    /// 使用快照中的分区函数为请求选择分区后派发。
    ///
    /// 分区函数与句柄映射来自同一份快照，二者总是一致的。
    pub fn route(&self, request: Req) -> BoxFuture<'static, Result<Rep, RouteError>> {
        match self.select(&request) {
            Ok(handle) => handle.dispatch(request),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    fn select(&self, request: &Req) -> Result<SharedHandle<Req, Rep>, RouteError> {
        if self.is_closed() {
            return Err(RouteError::Closed {
                router: Arc::clone(&self.shared.label),
            });
        }
        let snapshot = self.shared.snapshot.load();
        let Some(partition_fn) = snapshot.partition_function() else {
            return Err(RouteError::Uninitialized {
                router: Arc::clone(&self.shared.label),
            });
        };
        let partition = partition_fn(request)?;
        snapshot
            .handle(partition)
            .cloned()
            .ok_or_else(|| RouteError::UnknownPartition {
                router: Arc::clone(&self.shared.label),
                partition,
            })
    }

    /// 关闭路由器。
    ///
    /// # 教案级说明
    /// - **流程 (How)**：
    ///   1. 标记关闭并中止后台任务，等待其退出，此后不会再有新的发布；
    ///   2. 将快照替换回未初始化哨兵，取出最后快照与退役列表中的全部句柄并按身份去重；
    ///   3. 并发关闭所有句柄，直到全部完成或 `deadline` 到达；
    /// - **契约 (What)**：每个句柄恰好关闭一次；重复调用直接返回空报告；
    ///   截止时间只是建议，已接受的在途派发允许自然完成；
    /// - **错误**：截止时间到达仍有未完成的关闭时返回 [`CloseError::DeadlineElapsed`]。
    pub async fn close(&self, deadline: Instant) -> Result<CloseReport, CloseError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(CloseReport::default());
        }

        let updates = self.updates.lock().take();
        if let Some(updates) = updates {
            updates.abort();
            // 任务被中止时返回 JoinError::Cancelled，这里只关心它已经退出。
            let _ = updates.await;
        }

        let last = self
            .shared
            .snapshot
            .swap(Arc::new(PartitionSnapshot::uninitialized()));
        let retired = std::mem::take(&mut *self.shared.retired.lock());
        let handles = distinct_handles(
            last.partitions
                .values()
                .map(|entry| Arc::clone(&entry.handle))
                .chain(retired.into_values()),
        );

        let report = close_handles(&self.shared.label, handles, deadline).await?;

        info!(
            router = %self.shared.label,
            revision = last.revision,
            closed = report.closed,
            failed = report.failed,
            "partition router closed"
        );
        Ok(report)
    }

    /// 以 [`RouterParams::close_grace`] 作为截止时长关闭。
    pub async fn close_with_grace(&self) -> Result<CloseReport, CloseError> {
        self.close(Instant::now() + self.params.close_grace()).await
    }
}

/// 按对象身份去重，同一句柄只保留首次出现。
fn distinct_handles<Req, Rep, I>(handles: I) -> Vec<SharedHandle<Req, Rep>>
where
    I: IntoIterator<Item = SharedHandle<Req, Rep>>,
{
    let mut seen = HashSet::new();
    handles
        .into_iter()
        .filter(|handle| seen.insert(identity(handle)))
        .collect()
}

fn identity<Req, Rep>(handle: &SharedHandle<Req, Rep>) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

impl<Req, Rep> fmt::Debug for PartitionRouter<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionRouter")
            .field("label", &self.shared.label)
            .field("revision", &self.shared.snapshot.load().revision)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<Req, Rep> Drop for PartitionRouter<Req, Rep> {
    fn drop(&mut self) {
        if let Some(updates) = self.updates.get_mut().take() {
            updates.abort();
        }
    }
}
