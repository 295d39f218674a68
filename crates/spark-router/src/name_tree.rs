//! 名字树求值：把递归的加权命名结构编译为单个可路由句柄。
//!
//! ## 设计动机（Why）
//! - 名字解析的结果往往不是单一目的地，而是带权重的组合（灰度、跨机房分流等）；
//! - 求值在树变化时执行一次，派发时只做 O(1) 的别名抽样，不再遍历树。
//!
//! ## 求值规则（What）
//! - `Leaf(key)`：交给 [`LeafResolver`]，句柄由解析器（通常是 [`LeafCache`](crate::leaf_cache::LeafCache)）拥有；
//! - `Neg` / `Fail` / `Empty`：得到永远失败的句柄，状态为 `Closed`；
//! - `Alt`：上游解析器应在此之前消解所有备选分支，遇到即为不变量破坏；
//! - `Union`：剪掉“不可路由且权重恰为 0”的分支后按权重构建别名采样器；
//!   全部被剪掉时退化为失败句柄，只剩一个分支时直接返回该分支。

use std::fmt;

use futures::{
    FutureExt,
    future::{self, BoxFuture},
};
use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    error::{NoRouteCause, RouteError},
    handle::{RoutableHandle, SharedHandle, Status},
    sampler::AliasSampler,
};

/// 递归的加权命名树。
#[derive(Clone, Debug, PartialEq)]
pub enum NameTree<K> {
    Leaf(K),
    Union(Vec<Weighted<K>>),
    Alt(Vec<NameTree<K>>),
    Neg,
    Fail,
    Empty,
}

/// 加权联合中的一个分支。
#[derive(Clone, Debug, PartialEq)]
pub struct Weighted<K> {
    pub weight: f64,
    pub tree: NameTree<K>,
}

impl<K> Weighted<K> {
    pub fn new(weight: f64, tree: NameTree<K>) -> Self {
        Self { weight, tree }
    }
}

impl<K> NameTree<K> {
    /// 由 `(权重, 子树)` 序列构造加权联合。
    pub fn union<I>(branches: I) -> Self
    where
        I: IntoIterator<Item = (f64, NameTree<K>)>,
    {
        NameTree::Union(
            branches
                .into_iter()
                .map(|(weight, tree)| Weighted::new(weight, tree))
                .collect(),
        )
    }

    /// 语法上不可路由的节点对应的原因；其余节点返回 `None`。
    pub fn dead_cause(&self) -> Option<NoRouteCause> {
        match self {
            NameTree::Neg => Some(NoRouteCause::Neg),
            NameTree::Fail => Some(NoRouteCause::Fail),
            NameTree::Empty => Some(NoRouteCause::Empty),
            NameTree::Leaf(_) | NameTree::Union(_) | NameTree::Alt(_) => None,
        }
    }
}

/// 叶子解析器：把名字树叶子的键映射为可路由句柄。
///
/// 解析器拥有返回的句柄，名字树求值出的 [`TreeHandle`] 关闭时不会关闭叶子句柄。
pub trait LeafResolver<K, Req, Rep>: Send + Sync {
    fn resolve(&self, key: &K) -> SharedHandle<Req, Rep>;
}

impl<K, Req, Rep, F> LeafResolver<K, Req, Rep> for F
where
    F: Fn(&K) -> SharedHandle<Req, Rep> + Send + Sync,
{
    fn resolve(&self, key: &K) -> SharedHandle<Req, Rep> {
        self(key)
    }
}

/// 名字树求值器。
///
/// # 教案式说明
/// - **意图 (Why)**：将“树的形状”与“叶子如何建连”解耦，求值器只负责组合；
/// - **契约 (What)**：[`Self::build`] 是同步的纯组合过程，除叶子解析外没有副作用；
/// - **错误**：树中任意位置出现 `Alt` 返回 [`RouteError::InvariantViolation`]；
///   联合分支的权重为负或非有限值时返回 [`RouteError::Sampler`]。
#[derive(Debug)]
pub struct NameTreeRouter<R> {
    resolver: R,
}

impl<R> NameTreeRouter<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn build<K, Req, Rep>(&self, tree: &NameTree<K>) -> Result<TreeHandle<Req, Rep>, RouteError>
    where
        R: LeafResolver<K, Req, Rep>,
    {
        match tree {
            NameTree::Leaf(key) => Ok(TreeHandle::Leaf(self.resolver.resolve(key))),
            NameTree::Neg => Ok(TreeHandle::Failed(NoRouteCause::Neg)),
            NameTree::Fail => Ok(TreeHandle::Failed(NoRouteCause::Fail)),
            NameTree::Empty => Ok(TreeHandle::Failed(NoRouteCause::Empty)),
            NameTree::Alt(branches) => Err(RouteError::InvariantViolation {
                detail: format!(
                    "alternation with {} branch(es) must be resolved before evaluation",
                    branches.len()
                )
                .into(),
            }),
            NameTree::Union(branches) => self.build_union(branches),
        }
    }

    fn build_union<K, Req, Rep>(
        &self,
        branches: &[Weighted<K>],
    ) -> Result<TreeHandle<Req, Rep>, RouteError>
    where
        R: LeafResolver<K, Req, Rep>,
    {
        let survivors: Vec<&Weighted<K>> = branches
            .iter()
            .filter(|branch| !(branch.weight == 0.0 && branch.tree.dead_cause().is_some()))
            .collect();
        let pruned = branches.len() - survivors.len();

        if survivors.is_empty() {
            debug!(pruned, "every union branch pruned");
            return Ok(TreeHandle::Failed(NoRouteCause::PrunedUnion));
        }

        // 单一幸存分支同样要经过权重校验。
        let weights: Vec<f64> = survivors.iter().map(|branch| branch.weight).collect();
        let sampler = AliasSampler::from_weights(&weights)?;
        if let [only] = survivors.as_slice() {
            return self.build(&only.tree);
        }

        let children = survivors
            .iter()
            .map(|branch| self.build(&branch.tree))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(branches = children.len(), pruned, "built weighted union");
        Ok(TreeHandle::Weighted(WeightedHandle { sampler, children }))
    }
}

/// 名字树求值结果。
pub enum TreeHandle<Req, Rep> {
    /// 不可路由；每次派发都返回 [`RouteError::NoRoute`]。
    Failed(NoRouteCause),
    /// 解析器拥有的叶子句柄。
    Leaf(SharedHandle<Req, Rep>),
    /// 按权重抽样的联合。
    Weighted(WeightedHandle<Req, Rep>),
}

/// 加权联合句柄：一个别名采样器加上与其下标一一对应的子句柄。
pub struct WeightedHandle<Req, Rep> {
    sampler: AliasSampler,
    children: Vec<TreeHandle<Req, Rep>>,
}

impl<Req, Rep> WeightedHandle<Req, Rep> {
    pub fn sampler(&self) -> &AliasSampler {
        &self.sampler
    }

    pub fn children(&self) -> &[TreeHandle<Req, Rep>] {
        &self.children
    }

    /// 以调用方提供的随机源抽取一个子句柄。
    pub fn select<G>(&self, rng: &mut G) -> &TreeHandle<Req, Rep>
    where
        G: Rng + ?Sized,
    {
        &self.children[self.sampler.sample(rng)]
    }
}

impl<Req, Rep> TreeHandle<Req, Rep> {
    /// 执行一层抽样：加权联合返回被抽中的子句柄，其余变体返回自身。
    pub fn select<G>(&self, rng: &mut G) -> &TreeHandle<Req, Rep>
    where
        G: Rng + ?Sized,
    {
        match self {
            TreeHandle::Weighted(weighted) => weighted.select(rng),
            TreeHandle::Failed(_) | TreeHandle::Leaf(_) => self,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TreeHandle::Failed(_))
    }
}

impl<Req, Rep> RoutableHandle<Req, Rep> for TreeHandle<Req, Rep>
where
    Req: Send + 'static,
    Rep: Send + 'static,
{
    fn dispatch(&self, request: Req) -> BoxFuture<'static, Result<Rep, RouteError>> {
        match self {
            TreeHandle::Failed(cause) => {
                future::ready(Err(RouteError::NoRoute { cause: *cause })).boxed()
            }
            TreeHandle::Leaf(handle) => handle.dispatch(request),
            TreeHandle::Weighted(weighted) => weighted.select(&mut rand::rng()).dispatch(request),
        }
    }

    fn status(&self) -> Status {
        match self {
            TreeHandle::Failed(_) => Status::Closed,
            TreeHandle::Leaf(handle) => handle.status(),
            TreeHandle::Weighted(weighted) => {
                Status::worst_of(weighted.children.iter().map(|child| child.status()))
            }
        }
    }

    fn close(&self, deadline: Instant) -> BoxFuture<'static, Result<(), RouteError>> {
        match self {
            TreeHandle::Failed(_) | TreeHandle::Leaf(_) => future::ready(Ok(())).boxed(),
            TreeHandle::Weighted(weighted) => {
                let closes: Vec<_> = weighted
                    .children
                    .iter()
                    .map(|child| child.close(deadline))
                    .collect();
                async move {
                    future::join_all(closes)
                        .await
                        .into_iter()
                        .collect::<Result<(), RouteError>>()
                }
                .boxed()
            }
        }
    }
}

impl<Req, Rep> fmt::Debug for TreeHandle<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeHandle::Failed(cause) => f.debug_tuple("Failed").field(cause).finish(),
            TreeHandle::Leaf(_) => f.write_str("Leaf(..)"),
            TreeHandle::Weighted(weighted) => f
                .debug_struct("Weighted")
                .field("probabilities", &weighted.sampler.probabilities())
                .field("children", &weighted.children)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SamplerError;
    use std::sync::Arc;

    struct Fixed(Status);

    impl RoutableHandle<(), &'static str> for Fixed {
        fn dispatch(&self, _request: ()) -> BoxFuture<'static, Result<&'static str, RouteError>> {
            future::ready(Ok(self.0.as_str())).boxed()
        }

        fn status(&self) -> Status {
            self.0
        }

        fn close(&self, _deadline: Instant) -> BoxFuture<'static, Result<(), RouteError>> {
            future::ready(Ok(())).boxed()
        }
    }

    /// 叶子键即句柄上报的状态。
    struct Fixtures;

    impl LeafResolver<Status, (), &'static str> for Fixtures {
        fn resolve(&self, status: &Status) -> SharedHandle<(), &'static str> {
            Arc::new(Fixed(*status))
        }
    }

    fn build(tree: &NameTree<Status>) -> Result<TreeHandle<(), &'static str>, RouteError> {
        NameTreeRouter::new(Fixtures).build(tree)
    }

    #[test]
    fn dead_leaves_become_failed_handles() {
        for (tree, cause) in [
            (NameTree::Neg, NoRouteCause::Neg),
            (NameTree::Fail, NoRouteCause::Fail),
            (NameTree::Empty, NoRouteCause::Empty),
        ] {
            let handle = build(&tree).unwrap();
            assert!(matches!(handle, TreeHandle::Failed(c) if c == cause));
            assert_eq!(handle.status(), Status::Closed);
        }
    }

    #[test]
    fn zero_weight_dead_branches_are_pruned() {
        let tree = NameTree::union([
            (0.0, NameTree::Neg),
            (0.0, NameTree::Fail),
            (2.0, NameTree::Leaf(Status::Open)),
        ]);
        let handle = build(&tree).unwrap();
        assert!(matches!(handle, TreeHandle::Leaf(_)));
        assert_eq!(handle.status(), Status::Open);
    }

    #[test]
    fn weighted_dead_branch_survives_pruning() {
        let tree = NameTree::union([(1.0, NameTree::Neg), (1.0, NameTree::Leaf(Status::Open))]);
        let handle = build(&tree).unwrap();
        let TreeHandle::Weighted(weighted) = &handle else {
            panic!("expected weighted union, got {handle:?}");
        };
        assert_eq!(weighted.children().len(), 2);
        assert_eq!(handle.status(), Status::Closed);
    }

    #[test]
    fn fully_pruned_union_fails() {
        let tree: NameTree<Status> =
            NameTree::union([(0.0, NameTree::Empty), (0.0, NameTree::Neg)]);
        let handle = build(&tree).unwrap();
        assert!(matches!(handle, TreeHandle::Failed(NoRouteCause::PrunedUnion)));

        let empty: NameTree<Status> = NameTree::Union(Vec::new());
        assert!(build(&empty).unwrap().is_failed());
    }

    #[test]
    fn nested_alternation_is_rejected() {
        let tree = NameTree::union([
            (1.0, NameTree::Leaf(Status::Open)),
            (
                1.0,
                NameTree::union([(1.0, NameTree::Alt(vec![NameTree::Leaf(Status::Busy)]))]),
            ),
        ]);
        let err = build(&tree).unwrap_err();
        assert_eq!(err.code(), "router.tree.invariant");
    }

    #[test]
    fn negative_branch_weight_is_a_sampler_error() {
        let tree = NameTree::union([
            (-1.0, NameTree::Leaf(Status::Open)),
            (1.0, NameTree::Leaf(Status::Open)),
        ]);
        assert!(matches!(build(&tree), Err(RouteError::Sampler(_))));
    }

    #[test]
    fn lone_surviving_branch_still_has_its_weight_checked() {
        let negative = NameTree::union([(-1.0, NameTree::Leaf(Status::Open))]);
        assert!(matches!(
            build(&negative),
            Err(RouteError::Sampler(SamplerError::InvalidWeight { index: 0, .. }))
        ));

        let nan = NameTree::union([
            (f64::NAN, NameTree::Leaf(Status::Open)),
            (0.0, NameTree::Neg),
        ]);
        assert!(matches!(
            build(&nan),
            Err(RouteError::Sampler(SamplerError::InvalidWeight { index: 0, .. }))
        ));

        let zero = NameTree::union([(0.0, NameTree::Leaf(Status::Busy))]);
        assert_eq!(build(&zero).unwrap().status(), Status::Busy);
    }
}
