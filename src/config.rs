//! 启动参数, 每个参数都可以通过环境变量设置

use std::time::Duration;

use clap::Parser;

/// 状态页服务
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// 监听端口
    #[arg(long, short, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// 部署环境, 作为 `app_info` 的 env 标签
    #[arg(long, env = "APP_ENV", default_value = "dev")]
    pub environment: String,

    /// 应用版本, 作为 `app_info` 的 version 标签
    #[arg(long, env = "APP_VERSION", default_value = "1.0.0")]
    pub app_version: String,

    /// 状态页上展示的服务名
    #[arg(long, env = "SERVICE_NAME", default_value = "My Awesome EKS Microservice")]
    pub service_name: String,

    /// 连接空闲超时 (秒)
    #[arg(long = "idle-timeout", env = "IDLE_TIMEOUT_SECS", default_value_t = 120)]
    pub idle_timeout_secs: u64,

    /// 收到退出信号后, 就绪探针返回 503 到开始关闭监听之间的等待时间 (秒)
    #[arg(long = "shutdown-delay", env = "SHUTDOWN_DELAY_SECS", default_value_t = 5)]
    pub shutdown_delay_secs: u64,
}

impl Config {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.shutdown_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "status-page",
            "--port",
            "8080",
            "--environment",
            "prod",
            "--app-version",
            "2.3.4",
            "--service-name",
            "checkout",
            "--idle-timeout",
            "15",
            "--shutdown-delay",
            "0",
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, "prod");
        assert_eq!(config.app_version, "2.3.4");
        assert_eq!(config.service_name, "checkout");
        assert_eq!(config.idle_timeout(), Duration::from_secs(15));
        assert_eq!(config.shutdown_delay(), Duration::ZERO);
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(Config::try_parse_from(["status-page", "--port", "70000"]).is_err());
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }
}
