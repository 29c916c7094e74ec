//! UDP association
//!
//! The association lives exactly as long as its TCP control connection.
//! The client's UDP address comes from the UDP ASSOCIATE request. A fully
//! specified address is used as-is. An unspecified IP falls back to the
//! control peer's IP (or to anyone, with source validation off) and a zero
//! port is learned from the first matching datagram. After that only that
//! exact address is treated as the client.
//!
//! Domain destinations are resolved on spawned tasks so a slow lookup never
//! holds up other datagrams or the control connection.

use super::packet::{encode_udp_packet, parse_udp_packet};
use crate::error::Socks5Error;
use crate::socks::consts::MAX_UDP_PACKET;
use crate::socks::handler::SocksContext;
use crate::socks::resolver::AddressResolver;
use crate::socks::types::TargetAddr;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Domain lookups allowed in flight per association
const MAX_PENDING_LOOKUPS: usize = 64;

type LookupResult = (TargetAddr, Result<Option<(usize, SocketAddr)>, Socks5Error>);

/// Bind the relay endpoint on `local_ip` with an ephemeral port
pub async fn bind_endpoint(local_ip: IpAddr) -> Result<UdpSocket, Socks5Error> {
    UdpSocket::bind(SocketAddr::new(local_ip, 0))
        .await
        .map_err(Socks5Error::Listen)
}

/// A UDP relay endpoint tied to its control connection
#[derive(Debug)]
pub struct UdpAssociation<S> {
    control: S,
    socket: Arc<UdpSocket>,
    client_addr: Option<SocketAddr>,
    expected_ip: Option<IpAddr>,
    expected_port: Option<u16>,
    resolver: AddressResolver,
    lookups: JoinSet<LookupResult>,
    forwarded: u64,
    returned: u64,
    dropped: u64,
}

impl<S> UdpAssociation<S>
where
    S: AsyncRead + Unpin,
{
    /// Tie `socket` to `control`, whose remote end is `control_peer`.
    ///
    /// `declared` is the address the client named in its UDP ASSOCIATE
    /// request.
    pub fn attach(
        control: S,
        socket: UdpSocket,
        control_peer: SocketAddr,
        declared: &TargetAddr,
        ctx: &SocksContext,
    ) -> Self {
        let declared = match declared {
            TargetAddr::Ip(addr) => Some(*addr),
            TargetAddr::Domain(..) => None,
        };

        let expected_port = declared.map(|addr| addr.port()).filter(|port| *port != 0);
        let expected_ip = match declared.map(|addr| addr.ip()).filter(|ip| !ip.is_unspecified()) {
            Some(ip) => Some(ip),
            None if ctx.config.udp_validate_source => Some(control_peer.ip()),
            None => None,
        };
        let client_addr = expected_ip
            .zip(expected_port)
            .map(|(ip, port)| SocketAddr::new(ip, port));

        if let Some(client) = client_addr {
            debug!("UDP client address is {}", client);
        }

        UdpAssociation {
            control,
            socket: Arc::new(socket),
            client_addr,
            expected_ip,
            expected_port,
            resolver: ctx.resolver.clone(),
            lookups: JoinSet::new(),
            forwarded: 0,
            returned: 0,
            dropped: 0,
        }
    }

    /// Client UDP address, once known
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// Relay datagrams until the control connection closes or fails.
    ///
    /// Bytes the client sends on the control connection are ignored. The
    /// socket is released and pending lookups are cancelled when this
    /// returns.
    pub async fn run(mut self) -> Result<(), Socks5Error> {
        let mut buf = vec![0u8; MAX_UDP_PACKET];
        let mut control_buf = [0u8; 64];

        loop {
            tokio::select! {
                read = self.control.read(&mut control_buf) => match read {
                    Ok(0) => {
                        debug!("UDP control connection closed");
                        break;
                    }
                    Ok(n) => debug!("Ignoring {} bytes on UDP control connection", n),
                    Err(e) => {
                        debug!("UDP control connection failed: {}", e);
                        break;
                    }
                },
                recv = self.socket.recv_from(&mut buf) => match recv {
                    Ok((n, from)) => {
                        if let Err(e) = self.on_datagram(from, &buf[..n]).await {
                            self.dropped += 1;
                            warn!("Dropped datagram from {}: {}", from, e);
                        }
                    }
                    Err(e) => debug!("UDP receive failed: {}", e),
                },
                Some(joined) = self.lookups.join_next(), if !self.lookups.is_empty() => match joined {
                    Ok((addr, Ok(sent))) => self.record(&addr, sent),
                    Ok((addr, Err(e))) => {
                        self.dropped += 1;
                        warn!("Dropped datagram for {}: {}", addr, e);
                    }
                    Err(e) => debug!("UDP lookup task failed: {}", e),
                },
            }
        }

        if !self.lookups.is_empty() {
            debug!("Cancelling {} pending UDP lookups", self.lookups.len());
            self.lookups.abort_all();
            while self.lookups.join_next().await.is_some() {}
        }

        info!(
            "UDP association closed: {} forwarded, {} returned, {} dropped",
            self.forwarded, self.returned, self.dropped
        );
        Ok(())
    }

    /// Handle one datagram received on the relay endpoint
    pub async fn on_datagram(&mut self, from: SocketAddr, payload: &[u8]) -> Result<(), Socks5Error> {
        if self.is_client(from) {
            self.forward(payload).await
        } else {
            self.send_back(from, payload).await
        }
    }

    fn is_client(&mut self, from: SocketAddr) -> bool {
        if let Some(client) = self.client_addr {
            return client == from;
        }

        let ip_matches = self.expected_ip.map_or(true, |ip| ip == from.ip());
        let port_matches = self.expected_port.map_or(true, |port| port == from.port());
        let may_learn = ip_matches && port_matches;
        if may_learn {
            debug!("Learned UDP client address {}", from);
            self.client_addr = Some(from);
        }
        may_learn
    }

    async fn forward(&mut self, payload: &[u8]) -> Result<(), Socks5Error> {
        let packet = parse_udp_packet(payload)?;

        if packet.is_fragmented() {
            self.dropped += 1;
            debug!("Dropping fragment {} for {}", packet.frag, packet.addr);
            return Ok(());
        }

        if packet.addr.port() == 0 {
            self.dropped += 1;
            debug!("Dropping datagram for port 0 on {}", packet.addr);
            return Ok(());
        }

        if let TargetAddr::Ip(_) = packet.addr {
            let sent = deliver(&self.socket, &self.resolver, &packet.addr, &packet.data).await?;
            self.record(&packet.addr, sent);
            return Ok(());
        }

        if self.lookups.len() >= MAX_PENDING_LOOKUPS {
            self.dropped += 1;
            debug!("Too many pending lookups, dropping datagram for {}", packet.addr);
            return Ok(());
        }

        let socket = Arc::clone(&self.socket);
        let resolver = self.resolver.clone();
        self.lookups.spawn(async move {
            let sent = deliver(&socket, &resolver, &packet.addr, &packet.data).await;
            (packet.addr, sent)
        });
        Ok(())
    }

    fn record(&mut self, addr: &TargetAddr, sent: Option<(usize, SocketAddr)>) {
        match sent {
            Some((len, dest)) => {
                self.forwarded += 1;
                debug!("Forwarded {} bytes to {}", len, dest);
            }
            None => {
                self.dropped += 1;
                debug!("Dropping datagram for unspecified address {}", addr);
            }
        }
    }

    async fn send_back(&mut self, from: SocketAddr, payload: &[u8]) -> Result<(), Socks5Error> {
        let Some(client) = self.client_addr else {
            self.dropped += 1;
            debug!("No UDP client yet, dropping datagram from {}", from);
            return Ok(());
        };

        let wrapped = encode_udp_packet(&TargetAddr::Ip(from), payload);
        self.socket
            .send_to(&wrapped, client)
            .await
            .map_err(Socks5Error::Relay)?;
        self.returned += 1;
        debug!("Returned {} bytes from {} to {}", payload.len(), from, client);
        Ok(())
    }
}

/// Resolve `addr` and send `data` to its first candidate.
///
/// Returns `None` when the destination resolves to an unspecified address.
async fn deliver(
    socket: &UdpSocket,
    resolver: &AddressResolver,
    addr: &TargetAddr,
    data: &[u8],
) -> Result<Option<(usize, SocketAddr)>, Socks5Error> {
    let dest = resolver
        .resolve(addr)
        .await?
        .into_iter()
        .next()
        .filter(|dest| !dest.ip().is_unspecified());

    let Some(dest) = dest else {
        return Ok(None);
    };

    socket.send_to(data, dest).await.map_err(Socks5Error::Relay)?;
    Ok(Some((data.len(), dest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocksConfig;
    use crate::socks::resolver::Resolver;
    use async_trait::async_trait;
    use std::io;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[derive(Debug)]
    struct StalledResolver;

    #[async_trait]
    impl Resolver for StalledResolver {
        async fn lookup(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn domain_request(host: &str, port: u16, payload: &[u8]) -> Vec<u8> {
        encode_udp_packet(&TargetAddr::domain(host, port), payload).to_vec()
    }

    async fn udp_echo() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], from).await;
            }
        });
        addr
    }

    fn request(dest: SocketAddr, frag: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = encode_udp_packet(&TargetAddr::Ip(dest), payload).to_vec();
        data[2] = frag;
        data
    }

    async fn recv_timeout(socket: &UdpSocket) -> Option<Vec<u8>> {
        let mut buf = [0u8; 1024];
        match tokio::time::timeout(Duration::from_millis(300), socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Some(buf[..n].to_vec()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let echo = udp_echo().await;
        let ctx = SocksContext::new(SocksConfig::default());
        let (mut control, server_side) = duplex(64);

        let socket = bind_endpoint(LOCALHOST).await.unwrap();
        let relay_addr = socket.local_addr().unwrap();
        let control_peer = SocketAddr::new(LOCALHOST, 40000);
        let association = UdpAssociation::attach(server_side, socket, control_peer, &TargetAddr::default(), &ctx);
        let handle = tokio::spawn(association.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&request(echo, 0, b"ping"), relay_addr).await.unwrap();

        let reply = recv_timeout(&client).await.unwrap();
        assert_eq!(reply, encode_udp_packet(&TargetAddr::Ip(echo), b"ping").to_vec());

        control.shutdown().await.unwrap();
        drop(control);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_udp_drops_fragments_and_port_zero() {
        let echo = udp_echo().await;
        let ctx = SocksContext::new(SocksConfig::default());
        let (_control, server_side) = duplex(64);

        let socket = bind_endpoint(LOCALHOST).await.unwrap();
        let relay_addr = socket.local_addr().unwrap();
        let association =
            UdpAssociation::attach(server_side, socket, SocketAddr::new(LOCALHOST, 1), &TargetAddr::default(), &ctx);
        tokio::spawn(association.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&request(echo, 1, b"frag"), relay_addr).await.unwrap();
        assert!(recv_timeout(&client).await.is_none());

        let port_zero = SocketAddr::new(LOCALHOST, 0);
        client.send_to(&request(port_zero, 0, b"zero"), relay_addr).await.unwrap();
        assert!(recv_timeout(&client).await.is_none());

        client.send_to(&request(echo, 0, b"ok"), relay_addr).await.unwrap();
        assert!(recv_timeout(&client).await.is_some());
    }

    #[tokio::test]
    async fn test_udp_source_validation() {
        let ctx = SocksContext::new(SocksConfig::default());
        let (_control, server_side) = duplex(64);
        let socket = bind_endpoint(LOCALHOST).await.unwrap();

        // Control peer is on a different host than the datagram sender
        let control_peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 5000);
        let mut association = UdpAssociation::attach(server_side, socket, control_peer, &TargetAddr::default(), &ctx);

        let stranger = SocketAddr::new(LOCALHOST, 6000);
        association.on_datagram(stranger, b"not a request").await.unwrap();
        assert_eq!(association.client_addr(), None);
    }

    #[tokio::test]
    async fn test_udp_learns_first_sender_without_validation() {
        let mut config = SocksConfig::default();
        config.udp_validate_source = false;
        let ctx = SocksContext::new(config);
        let (_control, server_side) = duplex(64);
        let socket = bind_endpoint(LOCALHOST).await.unwrap();

        let control_peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 5000);
        let mut association = UdpAssociation::attach(server_side, socket, control_peer, &TargetAddr::default(), &ctx);

        let sender = SocketAddr::new(LOCALHOST, 6000);
        let dest = SocketAddr::new(LOCALHOST, 9);
        association
            .on_datagram(sender, &request(dest, 0, b"x"))
            .await
            .unwrap();
        assert_eq!(association.client_addr(), Some(sender));
    }

    #[tokio::test]
    async fn test_udp_ends_with_control_connection() {
        let ctx = SocksContext::new(SocksConfig::default());
        let (control, server_side) = duplex(64);
        let socket = bind_endpoint(LOCALHOST).await.unwrap();
        let relay_addr = socket.local_addr().unwrap();

        let association =
            UdpAssociation::attach(server_side, socket, SocketAddr::new(LOCALHOST, 1), &TargetAddr::default(), &ctx);
        let handle = tokio::spawn(association.run());

        drop(control);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Endpoint was released: the port can be bound again
        UdpSocket::bind(relay_addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_declared_client_address() {
        let echo = udp_echo().await;
        let ctx = SocksContext::new(SocksConfig::default());
        let (_control, server_side) = duplex(64);
        let socket = bind_endpoint(LOCALHOST).await.unwrap();
        let relay_addr = socket.local_addr().unwrap();

        // Client's UDP socket lives on a different loopback IP than its
        // control connection
        let client = UdpSocket::bind("127.0.0.2:0").await.unwrap();
        let declared = TargetAddr::Ip(client.local_addr().unwrap());
        let control_peer = SocketAddr::new(LOCALHOST, 40000);
        let association = UdpAssociation::attach(server_side, socket, control_peer, &declared, &ctx);
        assert_eq!(association.client_addr(), Some(client.local_addr().unwrap()));
        tokio::spawn(association.run());

        client.send_to(&request(echo, 0, b"hello"), relay_addr).await.unwrap();
        let reply = recv_timeout(&client).await.unwrap();
        assert_eq!(reply, encode_udp_packet(&TargetAddr::Ip(echo), b"hello").to_vec());
    }

    #[tokio::test]
    async fn test_udp_declared_ip_with_zero_port() {
        let ctx = SocksContext::new(SocksConfig::default());
        let (_control, server_side) = duplex(64);
        let socket = bind_endpoint(LOCALHOST).await.unwrap();

        let declared_ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2));
        let declared = TargetAddr::Ip(SocketAddr::new(declared_ip, 0));
        let control_peer = SocketAddr::new(LOCALHOST, 40000);
        let mut association = UdpAssociation::attach(server_side, socket, control_peer, &declared, &ctx);
        assert_eq!(association.client_addr(), None);

        // Same IP as the control peer, but not the declared one
        let from_control_ip = SocketAddr::new(LOCALHOST, 6000);
        association.on_datagram(from_control_ip, b"reply").await.unwrap();
        assert_eq!(association.client_addr(), None);

        let from_declared_ip = SocketAddr::new(declared_ip, 6001);
        let dest = SocketAddr::new(LOCALHOST, 9);
        association
            .on_datagram(from_declared_ip, &request(dest, 0, b"x"))
            .await
            .unwrap();
        assert_eq!(association.client_addr(), Some(from_declared_ip));
    }

    #[tokio::test]
    async fn test_udp_slow_lookup_does_not_block_relay() {
        let echo = udp_echo().await;
        let ctx = SocksContext::new(SocksConfig::default()).with_resolver(Arc::new(StalledResolver));
        let (_control, server_side) = duplex(64);
        let socket = bind_endpoint(LOCALHOST).await.unwrap();
        let relay_addr = socket.local_addr().unwrap();

        let association = UdpAssociation::attach(
            server_side,
            socket,
            SocketAddr::new(LOCALHOST, 40000),
            &TargetAddr::default(),
            &ctx,
        );
        tokio::spawn(association.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&domain_request("stalled.example", 53, b"query"), relay_addr)
            .await
            .unwrap();
        client.send_to(&request(echo, 0, b"direct"), relay_addr).await.unwrap();

        let reply = recv_timeout(&client).await.unwrap();
        assert_eq!(reply, encode_udp_packet(&TargetAddr::Ip(echo), b"direct").to_vec());
    }

    #[tokio::test]
    async fn test_udp_teardown_cancels_pending_lookups() {
        let ctx = SocksContext::new(SocksConfig::default()).with_resolver(Arc::new(StalledResolver));
        let (control, server_side) = duplex(64);
        let socket = bind_endpoint(LOCALHOST).await.unwrap();
        let relay_addr = socket.local_addr().unwrap();

        let association = UdpAssociation::attach(
            server_side,
            socket,
            SocketAddr::new(LOCALHOST, 40000),
            &TargetAddr::default(),
            &ctx,
        );
        let handle = tokio::spawn(association.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..3 {
            client
                .send_to(&domain_request("stalled.example", 53, b"query"), relay_addr)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        drop(control);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Cancelled lookups no longer hold the endpoint
        UdpSocket::bind(relay_addr).await.unwrap();
    }
}
