//! 日志订阅器安装入口。
//!
//! 路由核心只通过 `tracing` 宏输出结构化事件；宿主可以自行组装订阅器，
//! 也可以调用 [`install`] 获得“`EnvFilter` + `fmt`”的默认组合。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 未设置 `RUST_LOG` 时使用的过滤指令。
pub const DEFAULT_FILTER: &str = "info";

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 订阅器安装失败。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// [`install`] 已成功执行过。
    #[error("router telemetry is already installed")]
    AlreadyInstalled,

    /// 外部已经设置了全局 `tracing` 订阅器。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,

    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl TelemetryError {
    pub fn code(&self) -> &'static str {
        match self {
            TelemetryError::AlreadyInstalled => "router.telemetry.installed",
            TelemetryError::SubscriberAlreadySet => "router.telemetry.subscriber_set",
            TelemetryError::SetGlobalSubscriber(_) => "router.telemetry.set_global",
        }
    }
}

/// 安装全局日志订阅器。
///
/// # 教案式说明
/// - **意图 (Why)**：让只嵌入路由核心的小型宿主一行代码即可看到归组与关闭日志；
/// - **逻辑 (How)**：`tracing_subscriber::registry()` 叠加 `EnvFilter`（优先读取 `RUST_LOG`，
///   缺省为 [`DEFAULT_FILTER`]）与 `fmt` 层，设置为全局默认订阅器；
/// - **契约 (What)**：进程内只能成功一次，重复调用返回 [`TelemetryError::AlreadyInstalled`]；
///   若宿主已自行设置订阅器，返回 [`TelemetryError::SubscriberAlreadySet`]。
pub fn install() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
