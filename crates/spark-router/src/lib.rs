//! # spark-router
//!
//! 分区感知的请求路由核心：把动态变化的后端地址归组为分区快照，
//! 并把加权名字树编译为 O(1) 抽样的可路由句柄。
//!
//! ## 设计初衷（Why）
//! - 集群成员与分片配置都是不可靠、持续变化的外部信号，读路径却要求零锁、永不失败；
//! - 沿用 `ArcSwap` 整表替换的热更新模式：后台唯一写者发布不可变快照，派发线程只做原子加载；
//! - 加权分流（灰度、跨机房比例）在树变化时编译一次，派发时只做一次别名抽样。
//!
//! ## 模块地图（What）
//! - [`sampler`]：Vose 别名法加权采样器；
//! - [`partition`]：订阅地址流与分片状态流、发布 [`PartitionSnapshot`] 的 [`PartitionRouter`]；
//! - [`name_tree`]：名字树与其求值器 [`NameTreeRouter`]；
//! - [`leaf_cache`]：名字树叶子的记忆化解析器；
//! - [`handle`]：可路由句柄契约与健康状态；
//! - [`address`]、[`config`]、[`error`]、[`telemetry`]：数据模型、参数、错误域与日志安装。
//!
//! ## 使用提示（How）
//! - [`PartitionRouter::subscribe`] 需在 Tokio 运行时内调用；
//! - 负载均衡器与叶子句柄由宿主实现 [`RoutableHandle`] 后注入，本 crate 不做任何网络 I/O。

pub mod address;
pub mod config;
pub mod error;
pub mod handle;
pub mod leaf_cache;
pub mod name_tree;
pub mod partition;
pub mod sampler;
pub mod telemetry;

pub use address::{Address, AddressMetadata, Observed, PartitionId, ShardId};
pub use config::RouterParams;
pub use error::{
    BoxError, CloseError, ConfigError, NoRouteCause, RouteError, SamplerError, ShardError,
};
pub use handle::{CloseReport, RoutableHandle, SharedHandle, Status};
pub use leaf_cache::LeafCache;
pub use name_tree::{LeafResolver, NameTree, NameTreeRouter, TreeHandle, Weighted, WeightedHandle};
pub use partition::{
    FnPartitioning, LoadBalancerFactory, PartitionEntry, PartitionFunction, PartitionRouter,
    PartitionSnapshot, PartitioningStrategy,
};
pub use sampler::AliasSampler;
