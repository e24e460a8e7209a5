//! Hub transport.
//!
//! [`HubConnector`] opens a connection and [`HubClient`] drives it. The
//! session only talks to these traits, so it can run against the SignalR
//! WebSocket transport or an in-process fake.
//!
//! The SignalR client owns the socket inside a spawned driver task. Callers
//! talk to it through a command channel; inbound events and lifecycle
//! changes are pushed to the session through a bounded event channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde_json::Value as JsonValue;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::protocol::{self, HubMessage, NegotiateResponse};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        };
        f.write_str(s)
    }
}

/// Pushed from the transport to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// Server-to-client method call.
    Invocation {
        target: String,
        arguments: Vec<JsonValue>,
    },
    /// The connection dropped and automatic reconnect started.
    Reconnecting { error: Option<String> },
    /// Automatic reconnect succeeded.
    Reconnected { connection_id: Option<String> },
    /// The connection is closed for good.
    Closed { error: Option<String> },
}

/// Opens hub connections.
#[async_trait]
pub trait HubConnector: Send + Sync {
    /// Connect to `url`, delivering events to `events` until the client is
    /// stopped or the connection closes.
    async fn connect(&self, url: &str, events: mpsc::Sender<HubEvent>) -> HubResult<Box<dyn HubClient>>;
}

/// One open hub connection.
#[async_trait]
pub trait HubClient: Send + Sync {
    fn connection_id(&self) -> Option<String>;

    fn state(&self) -> ConnectionState;

    /// Invoke a hub method and wait for its completion.
    async fn invoke(&self, target: &str, arguments: Vec<JsonValue>) -> HubResult<JsonValue>;

    /// Close the connection gracefully.
    async fn stop(&self) -> HubResult<()>;

    /// Release transport resources after `stop`.
    async fn release(&self) -> HubResult<()>;

    /// Tear down immediately without waiting. Never fails.
    fn abort(&self);
}

/// State shared between a client handle and its driver task.
#[derive(Debug)]
struct Shared {
    state: RwLock<ConnectionState>,
    connection_id: RwLock<Option<String>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

enum Command {
    Invoke {
        target: String,
        arguments: Vec<JsonValue>,
        reply: oneshot::Sender<HubResult<JsonValue>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Connects to ASP.NET Core SignalR hubs over WebSocket.
#[derive(Debug, Clone)]
pub struct SignalRConnector {
    http: reqwest::Client,
    skip_negotiation: bool,
    keepalive_interval: Duration,
    server_timeout: Duration,
    reconnect_delays: Vec<Duration>,
}

impl SignalRConnector {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            skip_negotiation: config.skip_negotiation,
            keepalive_interval: config.keepalive_interval,
            server_timeout: config.server_timeout,
            reconnect_delays: config.reconnect_delays.clone(),
        }
    }
}

#[async_trait]
impl HubConnector for SignalRConnector {
    async fn connect(&self, url: &str, events: mpsc::Sender<HubEvent>) -> HubResult<Box<dyn HubClient>> {
        let base = protocol::parse_hub_url(url)?;
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Connecting),
            connection_id: RwLock::new(None),
        });

        let (socket, connection_id, backlog) =
            open(&self.http, &base, self.skip_negotiation).await?;
        *shared.connection_id.write() = connection_id;
        shared.set_state(ConnectionState::Connected);

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let driver = Driver {
            http: self.http.clone(),
            base,
            skip_negotiation: self.skip_negotiation,
            keepalive_interval: self.keepalive_interval,
            server_timeout: self.server_timeout,
            reconnect_delays: self.reconnect_delays.clone(),
            shared: Arc::clone(&shared),
            events,
            cancel: cancel.clone(),
            pending: HashMap::new(),
            next_invocation_id: 0,
        };
        let task = tokio::spawn(driver.run(socket, commands_rx, backlog));

        Ok(Box::new(SignalRClient {
            commands: commands_tx,
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Handle to a running SignalR connection.
pub struct SignalRClient {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl HubClient for SignalRClient {
    fn connection_id(&self) -> Option<String> {
        self.shared.connection_id.read().clone()
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    async fn invoke(&self, target: &str, arguments: Vec<JsonValue>) -> HubResult<JsonValue> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Invoke {
                target: target.to_string(),
                arguments,
                reply,
            })
            .await
            .map_err(|_| HubError::ConnectionClosed)?;
        rx.await.map_err(|_| HubError::ConnectionClosed)?
    }

    async fn stop(&self) -> HubResult<()> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_err() {
            // Driver already gone.
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    async fn release(&self) -> HubResult<()> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }

    fn abort(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for SignalRClient {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Negotiate (unless skipped), open the socket and complete the handshake.
///
/// Returns the socket, the connection id and any messages that arrived in
/// the same frame as the handshake response.
async fn open(
    http: &reqwest::Client,
    base: &Url,
    skip_negotiation: bool,
) -> HubResult<(Socket, Option<String>, Vec<String>)> {
    let (ws_url, connection_id) = if skip_negotiation {
        (protocol::websocket_url(base, None)?, None)
    } else {
        let negotiated = negotiate(http, base).await?;
        let ws_url = protocol::websocket_url(base, negotiated.transport_id())?;
        (ws_url, negotiated.connection_id)
    };

    tracing::debug!("Opening hub socket {}", ws_url);
    let (mut socket, _) = connect_async(ws_url.as_str())
        .await
        .map_err(|e| HubError::ConnectionFailed(e.to_string()))?;

    socket
        .send(Message::Text(protocol::handshake_request()))
        .await?;

    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                let mut frames = protocol::split_frames(&text);
                let handshake = frames
                    .next()
                    .ok_or_else(|| HubError::Handshake("empty handshake response".to_string()))?;
                protocol::parse_handshake_response(handshake)?;
                let backlog = frames.map(str::to_string).collect();
                return Ok((socket, connection_id, backlog));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(HubError::Handshake("socket closed during handshake".to_string()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn negotiate(http: &reqwest::Client, base: &Url) -> HubResult<NegotiateResponse> {
    let url = protocol::negotiate_url(base);
    tracing::debug!("Negotiating with {}", url);

    let response = http
        .post(url)
        .send()
        .await
        .map_err(|e| HubError::Negotiation(e.to_string()))?;
    if !response.status().is_success() {
        return Err(HubError::Negotiation(format!(
            "server returned {}",
            response.status()
        )));
    }

    let body: NegotiateResponse = response
        .json()
        .await
        .map_err(|e| HubError::Negotiation(e.to_string()))?;
    if let Some(error) = body.error {
        return Err(HubError::Negotiation(error));
    }
    if body.url.is_some() {
        return Err(HubError::Negotiation(
            "redirect negotiation is not supported".to_string(),
        ));
    }
    Ok(body)
}

/// What ended a connected read loop.
enum Interrupt {
    Stopped,
    Aborted,
    Lost(Option<String>),
    Closed(Option<String>),
}

struct Driver {
    http: reqwest::Client,
    base: Url,
    skip_negotiation: bool,
    keepalive_interval: Duration,
    server_timeout: Duration,
    reconnect_delays: Vec<Duration>,
    shared: Arc<Shared>,
    events: mpsc::Sender<HubEvent>,
    cancel: CancellationToken,
    pending: HashMap<String, oneshot::Sender<HubResult<JsonValue>>>,
    next_invocation_id: u64,
}

impl Driver {
    async fn run(mut self, socket: Socket, mut commands: mpsc::Receiver<Command>, backlog: Vec<String>) {
        let mut socket = socket;
        let mut backlog = backlog;

        loop {
            let interrupt = self.serve(&mut socket, &mut commands, std::mem::take(&mut backlog)).await;
            self.fail_pending();

            match interrupt {
                Interrupt::Stopped | Interrupt::Aborted => break,
                Interrupt::Closed(error) => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.emit(HubEvent::Closed { error }).await;
                    break;
                }
                Interrupt::Lost(error) => {
                    self.shared.set_state(ConnectionState::Reconnecting);
                    self.emit(HubEvent::Reconnecting {
                        error: error.clone(),
                    })
                    .await;

                    match self.reconnect(&mut commands).await {
                        Some((new_socket, connection_id, new_backlog)) => {
                            socket = new_socket;
                            backlog = new_backlog;
                            *self.shared.connection_id.write() = connection_id.clone();
                            self.shared.set_state(ConnectionState::Connected);
                            self.emit(HubEvent::Reconnected { connection_id }).await;
                        }
                        None => {
                            let stopped = self.cancel.is_cancelled() || commands.is_closed();
                            self.shared.set_state(ConnectionState::Disconnected);
                            if !stopped {
                                self.emit(HubEvent::Closed { error }).await;
                            }
                            break;
                        }
                    }
                }
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        tracing::debug!("Hub driver stopped");
    }

    /// Serve one connected socket until it is interrupted.
    async fn serve(
        &mut self,
        socket: &mut Socket,
        commands: &mut mpsc::Receiver<Command>,
        backlog: Vec<String>,
    ) -> Interrupt {
        for message in backlog {
            if let Some(interrupt) = self.handle_message(socket, &message).await {
                return interrupt;
            }
        }

        let mut keepalive = tokio::time::interval(self.keepalive_interval);
        keepalive.tick().await;
        let mut last_received = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Interrupt::Aborted,

                command = commands.recv() => match command {
                    Some(Command::Invoke { target, arguments, reply }) => {
                        let id = self.next_invocation_id.to_string();
                        self.next_invocation_id += 1;
                        let frame = protocol::encode_invocation(&id, &target, &arguments);
                        match socket.send(Message::Text(frame)).await {
                            Ok(()) => {
                                self.pending.insert(id, reply);
                            }
                            Err(e) => {
                                let _ = reply.send(Err(HubError::ConnectionLost(e.to_string())));
                                return Interrupt::Lost(Some(e.to_string()));
                            }
                        }
                    }
                    Some(Command::Stop { reply }) => {
                        let _ = socket.send(Message::Text(protocol::encode_close())).await;
                        let _ = socket.close(None).await;
                        self.shared.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return Interrupt::Stopped;
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return Interrupt::Stopped;
                    }
                },

                frame = socket.next() => {
                    last_received = Instant::now();
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            for message in protocol::split_frames(&text) {
                                if let Some(interrupt) = self.handle_message(socket, message).await {
                                    return interrupt;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Interrupt::Lost(frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Interrupt::Lost(Some(e.to_string())),
                        None => return Interrupt::Lost(None),
                    }
                }

                _ = keepalive.tick() => {
                    if last_received.elapsed() >= self.server_timeout {
                        return Interrupt::Lost(Some(format!(
                            "Server timeout elapsed without receiving a message from the server ({:?})",
                            self.server_timeout
                        )));
                    }
                    if let Err(e) = socket.send(Message::Text(protocol::encode_ping())).await {
                        return Interrupt::Lost(Some(e.to_string()));
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, socket: &mut Socket, message: &str) -> Option<Interrupt> {
        let message = match protocol::decode(message) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Ignoring undecodable hub message: {}", e);
                return None;
            }
        };

        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                self.emit(HubEvent::Invocation { target, arguments }).await;
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                if let Some(reply) = self.pending.remove(&invocation_id) {
                    let outcome = match error {
                        Some(error) => Err(HubError::Invocation(error)),
                        None => Ok(result.unwrap_or(JsonValue::Null)),
                    };
                    let _ = reply.send(outcome);
                }
            }
            HubMessage::Ping => {
                if let Err(e) = socket.send(Message::Text(protocol::encode_ping())).await {
                    return Some(Interrupt::Lost(Some(e.to_string())));
                }
            }
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                return Some(if allow_reconnect {
                    Interrupt::Lost(error)
                } else {
                    Interrupt::Closed(error)
                });
            }
            HubMessage::Other(kind) => {
                tracing::trace!("Ignoring hub message type {}", kind);
            }
        }
        None
    }

    /// Retry per the reconnect policy. Returns `None` when retries are
    /// exhausted or the client was stopped meanwhile.
    async fn reconnect(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Option<(Socket, Option<String>, Vec<String>)> {
        for (attempt, delay) in self.reconnect_delays.clone().into_iter().enumerate() {
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = &mut sleep => break,
                    command = commands.recv() => match command {
                        Some(Command::Invoke { reply, .. }) => {
                            let _ = reply.send(Err(HubError::NotConnected));
                        }
                        Some(Command::Stop { reply }) => {
                            let _ = reply.send(());
                            return None;
                        }
                        None => return None,
                    },
                }
            }

            tracing::debug!("Reconnect attempt {} to {}", attempt + 1, self.base);
            match open(&self.http, &self.base, self.skip_negotiation).await {
                Ok(opened) => return Some(opened),
                Err(e) => tracing::debug!("Reconnect attempt {} failed: {}", attempt + 1, e),
            }
        }
        None
    }

    fn fail_pending(&mut self) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(HubError::ConnectionLost(
                "connection interrupted".to_string(),
            )));
        }
    }

    async fn emit(&self, event: HubEvent) {
        // The session may already be gone during teardown.
        let _ = self.events.send(event).await;
    }
}
