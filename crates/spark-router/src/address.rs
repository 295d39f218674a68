//! 后端地址与响应式输入的数据模型。
//!
//! ## 设计目标（Why）
//! - 地址是分区归组的最小单元：端点标识 + 权重 + 元数据（其中必须能取出可选的分片标识）；
//! - 权重参与相等性与排序，使“权重变化”在归组层面等价于“节点身份变化”，
//!   从而保证负载均衡器工厂在权重变化时一定会被重新调用。
//!
//! ## 契约说明（What）
//! - [`Observed`] 是地址流与分片状态流中的单个元素：`Pending`/`Failed` 均表示“本轮无更新”；
//! - 地址集合在归组前被规约为 `BTreeSet`，重复地址天然去重，迭代顺序稳定。

use std::{cmp::Ordering, collections::BTreeMap, fmt, sync::Arc};

/// 逻辑分区标识。
pub type PartitionId = i32;

/// 物理端点上携带的分片标识。
pub type ShardId = i32;

/// 地址元数据。
///
/// - `shard_id`：反向映射到逻辑分区所需的分片号，缺失时该地址无法参与归组；
/// - `labels`：其余键值标签（机房、版本等），使用 `BTreeMap` 保证迭代与比较顺序确定。
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressMetadata {
    pub shard_id: Option<ShardId>,
    pub labels: BTreeMap<String, String>,
}

/// 后端地址。
///
/// # 教案式说明
/// - **意图 (Why)**：以不透明的端点字符串表达身份，避免本层绑定具体的 Socket 地址类型；
/// - **契约 (What)**：
///   - `weight` 应为非负有限值，默认 `1.0`；构造时不做校验，
///     归组时负数或非有限权重的地址以 [`ShardError::InvalidWeight`](crate::error::ShardError::InvalidWeight) 剔除，
///     不会交给负载均衡器工厂；
///   - 相等性比较包含 `weight` 的位模式，`1.0` 与 `2.0` 的同名地址被视为两个不同节点；
/// - **风险 (Trade-offs)**：`-0.0` 与 `0.0` 的位模式不同会被视为不同地址，
///   调用方应避免在权重中产生负零。
#[derive(Clone)]
pub struct Address {
    endpoint: Arc<str>,
    weight: f64,
    metadata: AddressMetadata,
}

impl Address {
    /// 以默认权重与空元数据构造地址。
    pub fn new(endpoint: impl Into<Arc<str>>) -> Self {
        Self {
            endpoint: endpoint.into(),
            weight: 1.0,
            metadata: AddressMetadata::default(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_shard_id(mut self, shard_id: ShardId) -> Self {
        self.metadata.shard_id = Some(shard_id);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 端点标识的共享引用，供错误与日志零拷贝复用。
    pub fn endpoint_arc(&self) -> &Arc<str> {
        &self.endpoint
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn metadata(&self) -> &AddressMetadata {
        &self.metadata
    }

    /// 从元数据中提取分片标识。
    pub fn shard_id(&self) -> Option<ShardId> {
        self.metadata.shard_id
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("endpoint", &self.endpoint)
            .field("weight", &self.weight)
            .field("shard_id", &self.metadata.shard_id)
            .finish()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Address {}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.endpoint
            .cmp(&other.endpoint)
            .then_with(|| self.weight.total_cmp(&other.weight))
            .then_with(|| self.metadata.cmp(&other.metadata))
    }
}

/// 响应式输入流中的单个观测值。
///
/// # 教案式说明
/// - **意图 (Why)**：成员发现与分片配置都可能处于“尚未就绪”或“暂时失败”的状态，
///   路由器需要把这些状态与真正的新值区分开；
/// - **契约 (What)**：
///   - `Pending`：输入尚未就绪，本轮不更新；
///   - `Ready(T)`：新的完整值；
///   - `Failed(reason)`：输入源暂时失败，本轮不更新，原因仅用于日志；
/// - **风险 (Trade-offs)**：地址流若以 `Ready(vec![])` 表达“名字不存在”，由于空归组不会发布，
///   路由器会继续使用旧快照，这正是“绝不因瞬时解析故障而丢流量”的目标行为。
#[derive(Clone, Debug, PartialEq)]
pub enum Observed<T> {
    Pending,
    Ready(T),
    Failed(Arc<str>),
}

impl<T> Observed<T> {
    /// 构造失败观测值的便捷方法。
    pub fn failed(reason: impl Into<Arc<str>>) -> Self {
        Observed::Failed(reason.into())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Observed::Ready(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn weight_participates_in_identity() {
        let light = Address::new("10.0.0.1:80").with_shard_id(1);
        let heavy = light.clone().with_weight(2.0);
        assert_ne!(light, heavy);
        assert_eq!(light, Address::new("10.0.0.1:80").with_shard_id(1));
    }

    #[test]
    fn duplicate_addresses_collapse_in_sets() {
        let set: BTreeSet<Address> = [
            Address::new("b").with_shard_id(2),
            Address::new("a").with_shard_id(1),
            Address::new("b").with_shard_id(2),
        ]
        .into_iter()
        .collect();
        let endpoints: Vec<&str> = set.iter().map(Address::endpoint).collect();
        assert_eq!(endpoints, ["a", "b"]);
    }

    #[test]
    fn shard_id_is_read_from_metadata() {
        let address = Address::new("a").with_label("zone", "eu-1");
        assert_eq!(address.shard_id(), None);
        assert_eq!(address.with_shard_id(7).shard_id(), Some(7));
    }
}
