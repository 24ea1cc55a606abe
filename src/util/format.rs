//! 格式化工具

/// 把 `SocketAddr` 格式化为 `ip port`, IPv4 映射的 IPv6 地址会还原成 IPv4
///
/// ```
/// use status_page::util::format::SocketAddrFormat;
/// use std::net::SocketAddr;
///
/// let addr: SocketAddr = "[::ffff:127.0.0.1]:8080".parse().unwrap();
/// assert_eq!(SocketAddrFormat(&addr).to_string(), "127.0.0.1 8080");
/// ```
pub struct SocketAddrFormat<'a>(pub &'a std::net::SocketAddr);

impl std::fmt::Display for SocketAddrFormat<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0.ip().to_canonical(), self.0.port())
    }
}
