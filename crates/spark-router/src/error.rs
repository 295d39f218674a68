//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为路由核心对外暴露的错误语义提供集中定义：采样器构造、分区归组、派发与关闭四类路径各自成域；
//! - 区分“后台可恢复”（[`ShardError`]，仅记录日志并剔除当轮地址）与“同步暴露”（[`RouteError`]、
//!   [`SamplerError`]、[`CloseError`]）两种传播策略，避免上层误判重试语义。
//!
//! ## 设计要求（What）
//! - 所有错误类型均派生 `thiserror::Error`，可直接交给 `anyhow` 等上层框架；
//! - 每个变体都提供稳定错误码（[`RouteError::code`] 等），前缀统一为 `router.*`，便于告警聚合。

use std::sync::Arc;

use thiserror::Error;

use crate::address::{PartitionId, ShardId};

/// 外部协作方（分区映射函数、负载均衡器等）返回的装箱错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 别名采样器构造阶段的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：采样器是纯算法组件，输入非法时必须立即失败，绝不静默替换为其他分布；
/// - **契约 (What)**：唯一的“宽容”策略是 [`AliasSampler::from_weights`](crate::sampler::AliasSampler::from_weights)
///   对全零权重回退为均匀分布，该路径不会产生错误。
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SamplerError {
    /// 分布为空，无法构造任何采样结构。
    #[error("cannot build an alias sampler from an empty distribution")]
    EmptyDistribution,

    /// 某个权重为负数或非有限值。
    #[error("weight #{index} is invalid: {weight}")]
    InvalidWeight { index: usize, weight: f64 },

    /// 以“已归一化分布”形式传入的概率之和偏离 1 超过容差，调用方应改用 `from_weights`。
    #[error("distribution sums to {sum}, expected 1 ± 0.01; use from_weights for raw weights")]
    NotNormalized { sum: f64 },

    /// 权重之和溢出为非有限值。
    #[error("sum of weights is not finite")]
    NonFiniteSum,
}

impl SamplerError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SamplerError::EmptyDistribution => "router.sampler.empty",
            SamplerError::InvalidWeight { .. } => "router.sampler.invalid_weight",
            SamplerError::NotNormalized { .. } => "router.sampler.not_normalized",
            SamplerError::NonFiniteSum => "router.sampler.non_finite_sum",
        }
    }
}

/// 分区归组过程中针对单个地址的失败。
///
/// # 教案式说明
/// - **意图 (Why)**：成员变更是不可靠的外部信号，单个地址的元数据缺失或映射异常不应拖垮整轮更新；
/// - **契约 (What)**：这些错误只在后台更新循环中产生，以 `tracing` 记录后剔除对应地址，
///   永远不会传递给 `snapshot()` 的调用方；
/// - **风险 (Trade-offs)**：若某轮所有地址都失败，整轮结果被丢弃并保留旧快照，
///   因此持续性的映射错误只会体现在日志中，需要配合告警观察。
#[derive(Debug, Error)]
pub enum ShardError {
    /// 地址元数据中缺少分片标识。
    #[error("address `{endpoint}` carries no shard id")]
    NoShardId { endpoint: Arc<str> },

    /// 地址权重为负或非有限值。
    #[error("address `{endpoint}` has invalid weight {weight}")]
    InvalidWeight { endpoint: Arc<str>, weight: f64 },

    /// 逻辑分区映射函数对该分片返回了错误。
    #[error("no logical partition for shard {shard} of `{endpoint}`: {source}")]
    PartitionMapping {
        endpoint: Arc<str>,
        shard: ShardId,
        #[source]
        source: BoxError,
    },

    /// 启用确定性校验时，同一输入两次求值得到不同的分区集合。
    #[error("logical partitions for shard {shard} of `{endpoint}` are not deterministic: {first:?} vs {second:?}")]
    NonDeterministic {
        endpoint: Arc<str>,
        shard: ShardId,
        first: Vec<PartitionId>,
        second: Vec<PartitionId>,
    },
}

impl ShardError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ShardError::NoShardId { .. } => "router.shard.missing_id",
            ShardError::InvalidWeight { .. } => "router.address.invalid_weight",
            ShardError::PartitionMapping { .. } => "router.shard.no_partition",
            ShardError::NonDeterministic { .. } => "router.shard.non_deterministic",
        }
    }

    /// 出错地址的端点标识。
    pub fn endpoint(&self) -> &str {
        match self {
            ShardError::NoShardId { endpoint }
            | ShardError::InvalidWeight { endpoint, .. }
            | ShardError::PartitionMapping { endpoint, .. }
            | ShardError::NonDeterministic { endpoint, .. } => endpoint,
        }
    }
}

/// 名字树中导致“无可路由目的地”的来源。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NoRouteCause {
    /// 名字被否定解析。
    Neg,
    /// 名字解析显式失败。
    Fail,
    /// 名字解析为空集合。
    Empty,
    /// 加权联合中的全部分支都被剪枝。
    PrunedUnion,
}

impl NoRouteCause {
    pub fn as_str(self) -> &'static str {
        match self {
            NoRouteCause::Neg => "neg",
            NoRouteCause::Fail => "fail",
            NoRouteCause::Empty => "empty",
            NoRouteCause::PrunedUnion => "pruned-union",
        }
    }
}

/// 路由派发与名字树求值的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：派发路径上的失败一律同步交还调用方，本层不做内部重试；
/// - **契约 (What)**：
///   - `NoRoute`：请求命中了由 `Neg/Fail/Empty` 派生的句柄；
///   - `InvariantViolation`：求值时遇到 `Alt` 节点，属于上游解析器的编程错误，永不降级；
///   - `Uninitialized` / `UnknownPartition` / `Closed`：分区路由器快照层面的失败；
///   - `Backend`：负载均衡器或叶子句柄自身返回的失败，原样携带描述。
/// - **设计权衡 (Trade-offs)**：变体携带 `Arc<str>` 而非 `String`，使错误在多个派发者间克隆时不重复分配。
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RouteError {
    #[error("no routable destination ({})", .cause.as_str())]
    NoRoute { cause: NoRouteCause },

    #[error("name tree invariant violated: {detail}")]
    InvariantViolation { detail: Arc<str> },

    #[error("router `{router}` has not published any partition snapshot yet")]
    Uninitialized { router: Arc<str> },

    #[error("partition {partition} is not served by router `{router}`")]
    UnknownPartition {
        router: Arc<str>,
        partition: PartitionId,
    },

    #[error("router `{router}` is closed")]
    Closed { router: Arc<str> },

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error("backend failure: {detail}")]
    Backend { detail: Arc<str> },
}

impl RouteError {
    /// 便捷构造：包装后端返回的失败描述。
    pub fn backend(detail: impl Into<Arc<str>>) -> Self {
        RouteError::Backend {
            detail: detail.into(),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RouteError::NoRoute { .. } => "router.dispatch.no_route",
            RouteError::InvariantViolation { .. } => "router.tree.invariant",
            RouteError::Uninitialized { .. } => "router.partition.uninitialized",
            RouteError::UnknownPartition { .. } => "router.partition.unknown",
            RouteError::Closed { .. } => "router.closed",
            RouteError::Sampler(inner) => inner.code(),
            RouteError::Backend { .. } => "router.backend",
        }
    }
}

/// 关闭分区路由器时的失败。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloseError {
    /// 截止时间到达时仍有句柄未完成关闭。
    #[error("close deadline elapsed: {closed} handle(s) closed, {pending} still pending")]
    DeadlineElapsed { closed: usize, pending: usize },
}

impl CloseError {
    pub fn code(&self) -> &'static str {
        match self {
            CloseError::DeadlineElapsed { .. } => "router.close.deadline",
        }
    }
}

/// 路由参数加载失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid router parameters: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SamplerError::EmptyDistribution.code(), "router.sampler.empty");
        assert_eq!(
            RouteError::NoRoute {
                cause: NoRouteCause::PrunedUnion
            }
            .code(),
            "router.dispatch.no_route"
        );
        assert_eq!(
            RouteError::from(SamplerError::NonFiniteSum).code(),
            "router.sampler.non_finite_sum"
        );
        assert_eq!(
            CloseError::DeadlineElapsed {
                closed: 1,
                pending: 2
            }
            .code(),
            "router.close.deadline"
        );
    }

    #[test]
    fn shard_errors_expose_endpoint() {
        let err = ShardError::PartitionMapping {
            endpoint: Arc::from("10.0.0.1:9000"),
            shard: 4,
            source: "shard 4 is unknown".into(),
        };
        assert_eq!(err.endpoint(), "10.0.0.1:9000");
        assert_eq!(err.code(), "router.shard.no_partition");
        assert!(err.to_string().contains("shard 4 is unknown"));

        let err = ShardError::InvalidWeight {
            endpoint: Arc::from("10.0.0.2:9000"),
            weight: -1.0,
        };
        assert_eq!(err.endpoint(), "10.0.0.2:9000");
        assert_eq!(err.code(), "router.address.invalid_weight");
    }

    #[test]
    fn no_route_message_names_cause() {
        let err = RouteError::NoRoute {
            cause: NoRouteCause::Neg,
        };
        assert_eq!(err.to_string(), "no routable destination (neg)");
    }
}
