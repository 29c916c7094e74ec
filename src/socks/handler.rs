//! SOCKS5 session
//!
//! One [`Session`] per accepted connection. It walks
//! `AwaitHandshake -> AwaitAuth -> AwaitRequest -> Dispatch -> Relay -> Closed`,
//! skipping `AwaitAuth` when the negotiated method has no sub-negotiation.
//! Every read stage is bounded by its own timeout.
//!
//! Failures are settled here: a dispatch failure is answered with exactly one
//! reply carrying the mapped status, malformed input and timeouts close the
//! connection silently.

use super::auth::{AuthMethod, AuthOutcome, Authenticator, Credentials};
use super::codec::{self, Request};
use super::command::{handle_bind, handle_connect, send_failure, send_success};
use super::frame;
use super::relay::{RelayPair, TerminationReason};
use super::resolver::{AddressResolver, Resolver};
use super::types::{SocksCommand, TargetAddr};
use super::udp::{bind_endpoint, UdpAssociation};
use crate::config::SocksConfig;
use crate::error::{Socks5Error, Stage};
use crate::transport::SocketOpts;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Read-only state shared by every session
#[derive(Debug)]
pub struct SocksContext {
    /// SOCKS configuration
    pub config: SocksConfig,
    /// Method negotiation and credential checks
    pub authenticator: Authenticator,
    /// Target resolution
    pub resolver: AddressResolver,
    /// Options applied to upstream sockets
    pub socket_opts: SocketOpts,
}

impl SocksContext {
    /// Build the context for `config` with system DNS and default socket options
    pub fn new(config: SocksConfig) -> Self {
        SocksContext {
            authenticator: Authenticator::from_config(&config),
            resolver: AddressResolver::from_config(&config),
            socket_opts: SocketOpts::default(),
            config,
        }
    }

    /// Replace the DNS backend
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = self.resolver.with_resolver(resolver);
        self
    }

    /// Replace the upstream socket options
    pub fn with_socket_opts(mut self, socket_opts: SocketOpts) -> Self {
        self.socket_opts = socket_opts;
        self
    }
}

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the method-selection message
    AwaitHandshake,
    /// Waiting for the auth sub-negotiation
    AwaitAuth,
    /// Waiting for the request
    AwaitRequest,
    /// Executing the command
    Dispatch,
    /// Relaying data
    Relay,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitHandshake => "await-handshake",
            SessionState::AwaitAuth => "await-auth",
            SessionState::AwaitRequest => "await-request",
            SessionState::Dispatch => "dispatch",
            SessionState::Relay => "relay",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One client connection
pub struct Session<S> {
    id: u64,
    peer: SocketAddr,
    local: SocketAddr,
    stream: Option<S>,
    state: SessionState,
    method: Option<AuthMethod>,
    command: Option<SocksCommand>,
    target: Option<TargetAddr>,
    ctx: Arc<SocksContext>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an accepted connection.
    ///
    /// `local` is the address the client reached; BIND and UDP ASSOCIATE
    /// endpoints are opened on its IP.
    pub fn new(id: u64, stream: S, peer: SocketAddr, local: SocketAddr, ctx: Arc<SocksContext>) -> Self {
        Session {
            id,
            peer,
            local,
            stream: Some(stream),
            state: SessionState::AwaitHandshake,
            method: None,
            command: None,
            target: None,
            ctx,
        }
    }

    /// Session identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current protocol state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Method agreed in the handshake
    pub fn method(&self) -> Option<AuthMethod> {
        self.method
    }

    /// Requested command
    pub fn command(&self) -> Option<SocksCommand> {
        self.command
    }

    /// Requested target
    pub fn target(&self) -> Option<&TargetAddr> {
        self.target.as_ref()
    }

    /// Run the session to completion.
    ///
    /// The session is `Closed` afterwards whatever the outcome. An error owed
    /// a reply has already been answered when it is returned.
    pub async fn run(&mut self) -> Result<(), Socks5Error> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let result = self.drive().await;

        if let Err(ref e) = result {
            if let (Some(code), Some(stream)) = (e.reply_code(), self.stream.as_mut()) {
                debug!("Replying {:?} after: {}", code, e);
                if let Err(write_err) = send_failure(stream, code).await {
                    debug!("Failed to send failure reply: {}", write_err);
                }
            }
        }

        let reached = self.state;
        self.close().await;
        debug!("Session {} closed in state {}", self.id, reached);
        result
    }

    /// Release the client connection. Calling this again has no effect.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.state = SessionState::Closed;
    }

    async fn drive(&mut self) -> Result<(), Socks5Error> {
        let ctx = Arc::clone(&self.ctx);
        let timeouts = &ctx.config.timeouts;
        let stream = self.stream.as_mut().ok_or_else(session_closed)?;

        self.state = SessionState::AwaitHandshake;
        let method = bounded(
            Stage::Handshake,
            timeouts.handshake(),
            negotiate_method(stream, &ctx.authenticator),
        )
        .await?;
        self.method = Some(method);
        debug!("Negotiated auth method {:?}", method);

        if method.has_subnegotiation() {
            self.state = SessionState::AwaitAuth;
            bounded(
                Stage::Auth,
                timeouts.auth(),
                authenticate_client(stream, &ctx.authenticator, method),
            )
            .await?;
        }

        self.state = SessionState::AwaitRequest;
        let request = bounded(Stage::Request, timeouts.request(), read_request(stream)).await?;
        self.command = Some(request.command);
        self.target = Some(request.target.clone());

        if !command_allowed(&ctx.config, request.command) {
            warn!("{} rejected by configuration", request.command);
            return Err(Socks5Error::UnsupportedCommand(request.command.to_byte()));
        }

        self.state = SessionState::Dispatch;
        info!("{} request to {}", request.command, request.target);

        match request.command {
            SocksCommand::Connect => {
                let upstream = handle_connect(stream, &ctx, &request.target).await?;
                self.relay(upstream).await
            }
            SocksCommand::Bind => {
                let upstream = handle_bind(stream, &ctx, self.local.ip(), &request.target).await?;
                self.relay(upstream).await
            }
            SocksCommand::UdpAssociate => {
                let socket = bind_endpoint(self.local.ip()).await?;
                let bound = socket.local_addr().map_err(Socks5Error::Listen)?;
                send_success(stream, bound).await?;
                info!("UDP relay on {}", bound);

                self.state = SessionState::Relay;
                let control = self.stream.take().ok_or_else(session_closed)?;
                UdpAssociation::attach(control, socket, self.peer, &request.target, &ctx)
                    .run()
                    .await
            }
        }
    }

    async fn relay(&mut self, upstream: TcpStream) -> Result<(), Socks5Error> {
        self.state = SessionState::Relay;
        let client = self.stream.take().ok_or_else(session_closed)?;

        let mut pair = RelayPair::new(client, upstream)
            .with_buffer_size(self.ctx.config.relay_buffer_size)
            .with_grace(self.ctx.config.timeouts.shutdown_grace());
        let outcome = pair.pump().await;

        info!(
            "Relay closed: {} bytes sent, {} bytes received, {:?}",
            outcome.a_to_b, outcome.b_to_a, outcome.reason
        );

        match outcome.reason {
            TerminationReason::Error { kind, .. } => Err(Socks5Error::Relay(io::Error::from(kind))),
            _ => Ok(()),
        }
    }
}

fn session_closed() -> Socks5Error {
    Socks5Error::Io(io::Error::new(io::ErrorKind::NotConnected, "session closed"))
}

fn command_allowed(config: &SocksConfig, command: SocksCommand) -> bool {
    match command {
        SocksCommand::Connect => true,
        SocksCommand::Bind => config.allow_bind,
        SocksCommand::UdpAssociate => config.allow_udp,
    }
}

async fn bounded<T, F>(stage: Stage, limit: Duration, fut: F) -> Result<T, Socks5Error>
where
    F: Future<Output = Result<T, Socks5Error>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Socks5Error::Timeout(stage))?
}

async fn negotiate_method<S>(stream: &mut S, authenticator: &Authenticator) -> Result<AuthMethod, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = frame::read_handshake(stream).await?;
    let handshake = codec::decode_handshake(&frame)?;

    let selected = authenticator.negotiate(&handshake.methods);
    let reply = codec::encode_method_selection(selected.as_ref().ok().copied());
    stream.write_all(&reply).await?;
    stream.flush().await?;

    if selected.is_err() {
        warn!("No acceptable auth method among {:?}", handshake.methods);
    }
    selected
}

async fn authenticate_client<S>(
    stream: &mut S,
    authenticator: &Authenticator,
    method: AuthMethod,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = frame::read_password_auth(stream).await?;
    let credentials = codec::decode_auth(&frame, method)?;
    let outcome = authenticator.authenticate(method, &credentials);

    stream
        .write_all(&codec::encode_auth_result(outcome == AuthOutcome::Authorized))
        .await?;
    stream.flush().await?;

    match (outcome, credentials) {
        (AuthOutcome::Authorized, _) => Ok(()),
        (AuthOutcome::Denied, Credentials::UsernamePassword { username, .. }) => {
            warn!("Authentication failed for user {}", username);
            Err(Socks5Error::AuthDenied(username))
        }
        (AuthOutcome::Denied, Credentials::None) => Err(Socks5Error::AuthDenied(String::new())),
    }
}

async fn read_request<S>(stream: &mut S) -> Result<Request, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let frame = frame::read_request(stream).await?;
    codec::decode_request(&frame)
}
