//! 可路由句柄契约与健康状态。
//!
//! ## 设计目标（Why）
//! - 句柄是派发的最小单元：能接收请求、报告健康度、在截止时间前关闭；
//! - 分区路由器与名字树求值器只依赖本模块的对象安全接口，负载均衡器与叶子缓存作为外部协作方注入。
//!
//! ## 契约说明（What）
//! - [`Status`] 的排序即“劣化程度”：`Open < Busy < Closed`，聚合时取最大值；
//! - [`RoutableHandle`] 返回 `'static` 的 [`BoxFuture`]，实现者需在构造 Future 前克隆所需的共享状态。

use std::sync::Arc;

use futures::{StreamExt, future::BoxFuture, stream::FuturesUnordered};
use tokio::time::Instant;
use tracing::warn;

use crate::error::{CloseError, RouteError};

/// 句柄健康状态。
///
/// # 教案式说明
/// - **意图 (Why)**：状态汇报与派发选择相互独立；汇报时总取最差者，派发时仍按权重抽样；
/// - **契约 (What)**：
///   - `Open`：完全健康；
///   - `Busy`：劣化但可用；
///   - `Closed`：不可用；
/// - **设计权衡 (Trade-offs)**：仅保留三态，不携带原因；需要原因时应由具体负载均衡器通过日志暴露。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Open,
    Busy,
    Closed,
}

impl Status {
    /// 返回两者中更差的状态。
    pub fn worst(self, other: Status) -> Status {
        self.max(other)
    }

    /// 聚合一组状态中最差者；空集合视为 `Open`。
    pub fn worst_of<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        statuses.into_iter().fold(Status::Open, Status::worst)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Busy => "busy",
            Status::Closed => "closed",
        }
    }
}

/// 可路由句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：统一抽象“负载均衡后的分区服务”“名字树叶子”“加权联合”等派发目标；
/// - **契约 (What)**：
///   - `dispatch`：提交一次请求，失败以 [`RouteError`] 同步交还调用方；
///   - `status`：无阻塞地返回当前健康度；
///   - `close`：截止时间为建议性的，已接受的在途请求允许自然完成；多次调用应保持幂等；
/// - **线程安全**：实现必须满足 `Send + Sync`，以便在 `Arc` 中被多个派发线程共享。
pub trait RoutableHandle<Req, Rep>: Send + Sync {
    fn dispatch(&self, request: Req) -> BoxFuture<'static, Result<Rep, RouteError>>;

    fn status(&self) -> Status;

    fn close(&self, deadline: Instant) -> BoxFuture<'static, Result<(), RouteError>>;
}

/// 共享句柄的类型别名，简化调用方签名。
pub type SharedHandle<Req, Rep> = Arc<dyn RoutableHandle<Req, Rep>>;

impl<Req, Rep, H> RoutableHandle<Req, Rep> for Arc<H>
where
    H: RoutableHandle<Req, Rep> + ?Sized,
{
    fn dispatch(&self, request: Req) -> BoxFuture<'static, Result<Rep, RouteError>> {
        (**self).dispatch(request)
    }

    fn status(&self) -> Status {
        (**self).status()
    }

    fn close(&self, deadline: Instant) -> BoxFuture<'static, Result<(), RouteError>> {
        (**self).close(deadline)
    }
}

/// 关闭一组句柄的结果统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// 成功关闭的句柄数。
    pub closed: usize,
    /// 关闭时返回错误的句柄数。
    pub failed: usize,
}

/// 并发关闭一组句柄，直到全部完成或 `deadline` 到达。
///
/// - 单个句柄关闭失败只计数并记录日志，不影响其余句柄；
/// - 截止时间到达时返回 [`CloseError::DeadlineElapsed`]，未完成的关闭 Future 随之被丢弃。
pub(crate) async fn close_handles<Req, Rep>(
    owner: &str,
    handles: Vec<SharedHandle<Req, Rep>>,
    deadline: Instant,
) -> Result<CloseReport, CloseError> {
    let total = handles.len();
    let mut closing: FuturesUnordered<_> =
        handles.iter().map(|handle| handle.close(deadline)).collect();
    let mut report = CloseReport::default();
    loop {
        match tokio::time::timeout_at(deadline, closing.next()).await {
            Ok(Some(Ok(()))) => report.closed += 1,
            Ok(Some(Err(err))) => {
                report.failed += 1;
                warn!(owner, code = err.code(), error = %err, "handle failed to close");
            }
            Ok(None) => return Ok(report),
            Err(_) => {
                let pending = total - report.closed - report.failed;
                warn!(owner, closed = report.closed, pending, "close deadline elapsed");
                return Err(CloseError::DeadlineElapsed {
                    closed: report.closed,
                    pending,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_worse_than_busy_is_worse_than_open() {
        assert!(Status::Closed > Status::Busy);
        assert!(Status::Busy > Status::Open);
        assert_eq!(Status::Open.worst(Status::Busy), Status::Busy);
        assert_eq!(Status::Closed.worst(Status::Open), Status::Closed);
    }

    #[test]
    fn worst_of_aggregates() {
        assert_eq!(Status::worst_of([]), Status::Open);
        assert_eq!(
            Status::worst_of([Status::Open, Status::Busy, Status::Open]),
            Status::Busy
        );
        assert_eq!(
            Status::worst_of([Status::Busy, Status::Closed, Status::Open]),
            Status::Closed
        );
    }
}
