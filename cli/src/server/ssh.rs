// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SSH transport
//!
//! Accepts TCP connections and runs a `russh` session per connection.
//! Authentication is public key only and is decided by the configured
//! [`PublicKeyAuthenticator`] on every attempt. Each session channel that
//! asks for a shell or an exec command is bridged into
//! [`IntakeServices::serve`] over a pair of in-memory pipes:
//!
//! ```text
//! client data ─▶ Handler::data ─▶ stdin pipe ─▶ IntakeServices::serve ─▶ stdout pipe ─▶ Handle::data
//! ```
//!
//! When `serve` returns, the channel gets its exit status, EOF and close.

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::server::{self, Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet, Pty};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use term_apply_core::domain::auth::PublicKeyAuthenticator;
use term_apply_core::domain::identity::Identity;
use term_apply_core::presentation::IntakeServices;

/// Buffer size of each direction of a channel bridge.
const CHANNEL_BUFFER: usize = 64 * 1024;

/// Exit status reported when a session outlives its time limit.
const SESSION_TIMEOUT_STATUS: u32 = 124;

#[derive(Debug, Clone)]
pub struct SshServerSettings {
    pub bind_address: String,
    pub host_key_path: PathBuf,
    /// Idle and overall limit for a session
    pub max_session: Duration,
}

pub struct SshServer {
    settings: SshServerSettings,
    config: Arc<server::Config>,
    services: IntakeServices,
    authenticator: Arc<dyn PublicKeyAuthenticator>,
}

impl SshServer {
    /// Load the host key and prepare the server configuration
    pub fn new(
        settings: SshServerSettings,
        services: IntakeServices,
        authenticator: Arc<dyn PublicKeyAuthenticator>,
    ) -> Result<Self> {
        let host_key = russh_keys::load_secret_key(&settings.host_key_path, None)
            .with_context(|| format!("Failed to load SSH host key from {:?}", settings.host_key_path))?;

        let config = server::Config {
            inactivity_timeout: Some(settings.max_session),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            methods: MethodSet::PUBLICKEY,
            keys: vec![host_key],
            ..Default::default()
        };

        Ok(Self {
            settings,
            config: Arc::new(config),
            services,
            authenticator,
        })
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Sessions already running are not interrupted.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.settings.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.settings.bind_address))?;
        info!("SSH server listening on {}", self.settings.bind_address);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("SSH server no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Connection accepted");

                    let handler = SessionHandler::new(
                        self.services.clone(),
                        self.authenticator.clone(),
                        peer,
                        self.settings.max_session,
                    );
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        match server::run_stream(config, stream, handler).await {
                            Ok(session) => {
                                if let Err(e) = session.await {
                                    debug!(peer = %peer, error = %e, "SSH session ended with an error");
                                }
                            }
                            Err(e) => debug!(peer = %peer, error = %e, "SSH handshake failed"),
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

struct ChannelState {
    /// Held so the channel stays registered with the session
    _channel: Channel<Msg>,
    stdin: Option<DuplexStream>,
    started: bool,
}

/// Per-connection handler
pub struct SessionHandler {
    services: IntakeServices,
    authenticator: Arc<dyn PublicKeyAuthenticator>,
    peer: SocketAddr,
    max_session: Duration,
    identity: Option<Identity>,
    channels: HashMap<ChannelId, ChannelState>,
}

impl SessionHandler {
    fn new(
        services: IntakeServices,
        authenticator: Arc<dyn PublicKeyAuthenticator>,
        peer: SocketAddr,
        max_session: Duration,
    ) -> Self {
        Self {
            services,
            authenticator,
            peer,
            max_session,
            identity: None,
            channels: HashMap::new(),
        }
    }

    /// Bridge a channel into the intake services
    fn start(&mut self, channel: ChannelId, command: Option<String>, session: &mut Session) {
        let Some(identity) = self.identity.clone() else {
            session.channel_failure(channel);
            return;
        };
        let Some(state) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel);
            return;
        };
        if state.started {
            warn!(identity = %identity, "Channel already running a session");
            session.channel_failure(channel);
            return;
        }

        let (stdin_writer, stdin_reader) = tokio::io::duplex(CHANNEL_BUFFER);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(CHANNEL_BUFFER);
        state.stdin = Some(stdin_writer);
        state.started = true;
        session.channel_success(channel);

        let handle = session.handle();
        let services = self.services.clone();
        let max_session = self.max_session;
        let peer = self.peer;

        tokio::spawn(async move {
            let serve = async {
                let serve = services.serve(&identity, command.as_deref(), stdin_reader, stdout_writer);
                match tokio::time::timeout(max_session, serve).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(identity = %identity, peer = %peer, "Session time limit reached");
                        SESSION_TIMEOUT_STATUS
                    }
                }
            };
            let (status, ()) = tokio::join!(serve, pump_output(&handle, channel, stdout_reader));

            debug!(identity = %identity, status, "Channel finished");
            finish_channel(&handle, channel, status).await;
        });
    }
}

/// Forward everything the session writes to the client
async fn pump_output(handle: &Handle, channel: ChannelId, mut output: DuplexStream) {
    let mut buf = vec![0u8; CHANNEL_BUFFER];
    loop {
        match output.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if handle.data(channel, CryptoVec::from_slice(&buf[..n])).await.is_err() {
                    debug!("Client went away while sending output");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read session output");
                break;
            }
        }
    }
}

async fn finish_channel(handle: &Handle, channel: ChannelId, status: u32) {
    // The client may already be gone; nothing to do about failures here.
    let _ = handle.exit_status_request(channel, status).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

#[async_trait]
impl server::Handler for SessionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        let key_blob = public_key.public_key_bytes();
        if self.authenticator.authenticate(user, &key_blob).await {
            if let Ok(identity) = Identity::parse(user) {
                info!(identity = %identity, peer = %self.peer, "Public key accepted");
                self.identity = Some(identity);
                return Ok(Auth::Accept);
            }
        }

        debug!(user = %user, peer = %self.peer, "Public key rejected");
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, _session: &mut Session) -> Result<bool, Self::Error> {
        if self.identity.is_none() {
            return Ok(false);
        }
        self.channels.insert(
            channel.id(),
            ChannelState {
                _channel: channel,
                stdin: None,
                started: false,
            },
        );
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.start(channel, None, session);
        Ok(())
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        self.start(channel, Some(command), session);
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        let Some(state) = self.channels.get_mut(&channel) else {
            return Ok(());
        };
        if let Some(stdin) = state.stdin.as_mut() {
            if let Err(e) = stdin.write_all(data).await {
                // The session stopped reading; later input is discarded.
                debug!(error = %e, "Dropping client input");
                state.stdin = None;
            }
        }
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.stdin = None;
        }
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        Ok(())
    }
}
