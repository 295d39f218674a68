//! 路由参数与 TOML 加载。
//!
//! ## 设计目标（Why）
//! - 分区路由器的运行参数需要由控制面下发，同一份参数也会原样交给负载均衡器工厂；
//! - 使用 `serde` 派生 + `toml` 解析，缺省字段回落到 [`RouterParams::default`]，
//!   控制面只需声明与默认值不同的部分。
//!
//! ## 契约说明（What）
//! - 未知字段被拒绝（`deny_unknown_fields`），避免拼写错误被静默忽略；
//! - `close_grace_ms` 以毫秒表达，通过 [`RouterParams::close_grace`] 转为 `Duration`。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 分区路由器参数。
///
/// # 教案式说明
/// - **字段语义 (What)**：
///   - `label`：路由器名称，出现在日志字段与错误信息中；
///   - `skip_identical_rounds`：地址集合与分片状态均未变化时跳过重建，默认开启；
///   - `verify_determinism`：对每个分片的分区映射求值两次，结果不一致时剔除该地址并记录错误，
///     用于在测试/预发环境捕捉非纯函数实现；
///   - `close_grace_ms`：`close_with_grace` 使用的默认截止时长；
/// - **风险 (Trade-offs)**：`verify_determinism` 会让映射函数调用次数翻倍，生产环境默认关闭。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterParams {
    pub label: String,
    pub skip_identical_rounds: bool,
    pub verify_determinism: bool,
    pub close_grace_ms: u64,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            label: "partitioned".to_owned(),
            skip_identical_rounds: true,
            verify_determinism: false,
            close_grace_ms: 5_000,
        }
    }
}

impl RouterParams {
    /// 以指定名称构造其余字段为默认值的参数。
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// 从 TOML 文本解析参数。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}
