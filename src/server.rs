//! Listener/acceptor
//!
//! Accepts client connections and runs a [`Session`] for each in its own
//! task. The accept loop stops on the shutdown signal; sessions already
//! running are left to finish on their own.

use crate::config::Config;
use crate::socks::{Resolver, Session, SocksContext};
use crate::transport::{bind_listener, SocketOpts};
use anyhow::{anyhow, Context, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pause after a failed accept so a full fd table doesn't spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// SOCKS5 server bound to its listening socket
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    ctx: SocksContext,
}

impl Server {
    /// Bind the listening socket described by `config`
    pub async fn bind(config: Config) -> Result<Self> {
        let listen_addr = &config.server.listen_addr;
        let addr = lookup_host(listen_addr.as_str())
            .await
            .with_context(|| format!("Failed to resolve listen address {}", listen_addr))?
            .next()
            .ok_or_else(|| anyhow!("Listen address {} resolved to nothing", listen_addr))?;

        let listener = bind_listener(addr, config.server.backlog)
            .with_context(|| format!("Failed to listen on {}", addr))?;

        let socket_opts = SocketOpts::from_tcp_config(&config.server.tcp);
        let ctx = SocksContext::new(config.socks).with_socket_opts(socket_opts);

        Ok(Server { listener, ctx })
    }

    /// Replace the DNS backend used by every session
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.ctx = self.ctx.with_resolver(resolver);
        self
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let Server { listener, ctx } = self;
        let ctx = Arc::new(ctx);
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        spawn_session(next_id, stream, peer, Arc::clone(&ctx));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn spawn_session(id: u64, stream: TcpStream, peer: SocketAddr, ctx: Arc<SocksContext>) {
    ctx.socket_opts.hint(&stream);

    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Dropping connection from {}: {}", peer, e);
            return;
        }
    };

    let span = info_span!("session", id, %peer);
    tokio::spawn(
        async move {
            debug!("Accepted connection on {}", local);
            let mut session = Session::new(id, stream, peer, local, ctx);
            match session.run().await {
                Ok(()) => debug!("Session {} finished", session.id()),
                Err(e) if e.is_disconnect() => debug!("Client went away: {}", e),
                Err(e) => warn!("Session {} failed: {}", session.id(), e),
            }
        }
        .instrument(span),
    );
}

/// Bind the listener from `config` and serve until shutdown
pub async fn run_server(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    let server = Server::bind(config).await?;
    info!("SOCKS5 server listening on {}", server.local_addr()?);
    server.run(shutdown_rx).await
}
