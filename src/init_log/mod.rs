//! 日志初始化, 通过 feature 选择实现

#[cfg(feature = "use_env_logger")]
pub mod env_logger;
#[cfg(feature = "use_tracing_subscriber")]
pub mod tracing;

/// 没有设置 `RUST_LOG` 时使用的过滤规则
pub fn default_filter(crate_name: &str) -> String {
    format!("{crate_name}=info,tower_http=warn")
}
