//! Test utilities for Socksd
//!
//! Echo targets, a running server and raw SOCKS5 client messages used across
//! integration tests.

#![allow(dead_code)]

use socksd::config::{Config, UserConfig};
use socksd::Server;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;

/// Username accepted by [`TestConfigBuilder::with_user`]
pub const TEST_USER: &str = "testuser";

/// Password accepted by [`TestConfigBuilder::with_user`]
pub const TEST_PASS: &str = "testpass";

/// A server running in the background
pub struct TestServer {
    /// Listening address
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<bool>,
}

impl TestServer {
    /// Bind on an ephemeral loopback port and start serving
    pub async fn start(config: Config) -> Self {
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.run(shutdown_rx));
        TestServer { addr, shutdown_tx }
    }

    /// Open a client connection
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Test configuration builder
pub struct TestConfigBuilder {
    config: Config,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:0".to_string();
        TestConfigBuilder { config }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Require username/password with the test credentials
    pub fn with_user(mut self) -> Self {
        self.config.socks.auth_required = true;
        self.config.socks.users.push(UserConfig {
            username: TEST_USER.to_string(),
            password: TEST_PASS.to_string(),
        });
        self
    }

    /// Seconds to wait for the BIND peer
    pub fn bind_accept_timeout(mut self, secs: u64) -> Self {
        self.config.socks.timeouts.bind_accept = secs;
        self
    }

    /// Allow UDP
    pub fn allow_udp(mut self, allow: bool) -> Self {
        self.config.socks.allow_udp = allow;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

/// Spawn a TCP server that echoes every connection back
pub async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Spawn a UDP socket that echoes every datagram back
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });

    addr
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Send a method-selection message and return the server's choice
pub async fn negotiate(stream: &mut TcpStream, methods: &[u8]) -> [u8; 2] {
    stream
        .write_all(&socks5_mock::method_request(methods))
        .await
        .unwrap();
    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await.unwrap();
    selection
}

/// Read a reply, returning its status and bound address
pub async fn read_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05);
    assert_eq!(head[2], 0x00);

    let ip = match head[3] {
        0x01 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await.unwrap();
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x04 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await.unwrap();
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => panic!("unexpected reply address type {}", other),
    };
    let port = stream.read_u16().await.unwrap();

    (head[1], SocketAddr::new(ip, port))
}

/// Raw SOCKS5 client messages
pub mod socks5_mock {
    use socksd::socks::consts::*;
    use std::net::SocketAddr;

    /// Method-selection request offering `methods`
    pub fn method_request(methods: &[u8]) -> Vec<u8> {
        let mut req = vec![SOCKS5_VERSION, methods.len() as u8];
        req.extend_from_slice(methods);
        req
    }

    /// RFC 1929 username/password request
    pub fn password_request(username: &str, password: &str) -> Vec<u8> {
        let mut req = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        req.extend_from_slice(username.as_bytes());
        req.push(password.len() as u8);
        req.extend_from_slice(password.as_bytes());
        req
    }

    /// Request for `cmd` to an IP address
    pub fn request(cmd: u8, addr: SocketAddr) -> Vec<u8> {
        let mut req = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED];
        match addr {
            SocketAddr::V4(v4) => {
                req.push(SOCKS5_ADDR_TYPE_IPV4);
                req.extend_from_slice(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                req.push(SOCKS5_ADDR_TYPE_IPV6);
                req.extend_from_slice(&v6.ip().octets());
            }
        }
        req.extend_from_slice(&addr.port().to_be_bytes());
        req
    }

    /// CONNECT to a domain name
    pub fn connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut req = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        req.extend_from_slice(domain.as_bytes());
        req.extend_from_slice(&port.to_be_bytes());
        req
    }

    /// UDP request header plus payload, addressed to an IPv4 destination
    pub fn udp_datagram(dest: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut datagram = vec![0x00, 0x00, 0x00];
        datagram.extend_from_slice(&request(0, dest)[3..]);
        datagram.extend_from_slice(payload);
        datagram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socksd::socks::consts::*;

    #[test]
    fn test_request_ipv4() {
        let req = socks5_mock::request(SOCKS5_CMD_TCP_CONNECT, "127.0.0.1:80".parse().unwrap());
        assert_eq!(req, vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50]);
    }

    #[test]
    fn test_udp_datagram_header() {
        let datagram = socks5_mock::udp_datagram("10.0.0.1:53".parse().unwrap(), b"q");
        assert_eq!(datagram, vec![0, 0, 0, 0x01, 10, 0, 0, 1, 0, 53, b'q']);
    }

    #[tokio::test]
    async fn test_closed_port_refuses() {
        let addr = closed_port().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
