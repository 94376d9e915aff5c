//! WebSocket transport
//!
//! One task per connection:
//! - Read the request URI during the handshake: `/ws?token=T` or
//!   `/ws/{chat_id}?token=T` (joins that chat right away).
//! - Verify the token before the channel is admitted. A refused token gets a
//!   policy-violation close frame and never reaches the registry.
//! - A writer task drains the channel's bounded queue into the socket, so
//!   frames for one channel leave in the order they were queued.
//! - Every inbound frame renews the user's heartbeat.
//! - Presence transitions of the user's contacts are forwarded as
//!   `presence` frames.
//! - On close the channel is released; when it was the user's last one the
//!   user's subscriptions are dropped and presence is signed off.
//! - If the broker drops the channel first (backlogged queue,
//!   `disconnect_all`), the socket is closed with code 1013 so the client
//!   reconnects.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, warn};
use tungstenite::http::Uri;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;

use crate::auth::Authenticator;
use crate::broker::Broker;
use crate::broker::topic::{TopicId, UserId};
use crate::channel::Channel;
use crate::directory::ContactDirectory;
use crate::presence::{ContactWatch, PresenceTracker};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::{AuthError, Result};

/// Everything a connection handler needs, built once at startup.
pub struct ServerState {
    pub broker: Arc<Broker>,
    pub presence: Arc<PresenceTracker>,
    pub auth: Arc<dyn Authenticator>,
    pub contacts: Arc<dyn ContactDirectory>,
    pub channel_capacity: usize,
}

/// Where a client asked to connect.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Route {
    pub chat: Option<TopicId>,
    pub token: Option<String>,
}

impl Route {
    /// Parses `/ws[/{chat_id}][?token=T]`.
    pub fn parse(uri: &Uri) -> Option<Route> {
        let mut segments = uri.path().split('/').filter(|s| !s.is_empty());
        let chat = match (segments.next(), segments.next(), segments.next()) {
            (None, _, _) | (Some("ws"), None, _) => None,
            (Some("ws"), Some(id), None) => Some(id.parse::<TopicId>().ok()?),
            _ => return None,
        };

        let token = uri.query().and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("token="))
                .map(str::to_string)
        });

        Some(Route { chat, token })
    }
}

pub async fn start_websocket_server(addr: String, state: Arc<ServerState>) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket server listening on ws://{addr}");
    serve(listener, state).await
}

/// Accepts connections on `listener` forever.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let mut uri = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        uri = Some(req.uri().clone());
        Ok(resp)
    };
    let mut ws_stream = accept_hdr_async(stream, callback).await?;

    let route = uri.as_ref().and_then(Route::parse);
    let verified = match &route {
        Some(Route {
            token: Some(token), ..
        }) => state.auth.verify(token),
        _ => Err(AuthError::MissingToken),
    };
    let user = match verified {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "rejecting websocket connection");
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: "Authentication failed".into(),
            };
            let _ = ws_stream.close(Some(frame)).await;
            return Ok(());
        }
    };
    let auto_join = route.and_then(|r| r.chat);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (channel, mut rx) = Channel::new(state.channel_capacity);
    let channel_id = channel.id();

    // contacts watch starts before the first reply, so a client that saw any
    // reply will also see every later contact transition
    let contacts = state.contacts.contacts_of(user).await;
    let mut watch = ContactWatch::new(&state.presence, contacts);

    state.broker.connect(user, channel.clone());
    info!(user, channel = %channel_id, "client connected");

    let writer_channel = channel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = ws_sender.send(msg).await {
                        debug!(channel = %channel_id, error = %e, "failed to write to socket");
                        break;
                    }
                }
                _ = writer_channel.closed() => {
                    let frame = CloseFrame {
                        code: CloseCode::Again,
                        reason: "Connection dropped by server".into(),
                    };
                    let _ = ws_sender.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            }
        }
        let _ = ws_sender.close().await;
        debug!(channel = %channel_id, "send loop closed");
    });

    let watcher = {
        let channel = channel.clone();
        tokio::spawn(async move {
            while let Some(event) = watch.next().await {
                if !reply(&channel, &ServerMessage::Presence(event)) {
                    break;
                }
            }
        })
    };

    touch(&state, user).await;

    if let Some(chat_id) = auto_join {
        join(&state, user, &channel, chat_id).await;
    }

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = channel.closed() => {
                info!(user, channel = %channel_id, "channel dropped by broker");
                break;
            }
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(user, channel = %channel_id, error = %e, "read error");
                break;
            }
            None => break,
        };
        match msg {
            WsMessage::Text(text) => {
                touch(&state, user).await;
                handle_client_message(&state, user, &channel, &text).await;
            }
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) => {
                touch(&state, user).await;
            }
            WsMessage::Close(_) => break,
            WsMessage::Frame(_) => {}
        }
    }

    watcher.abort();
    let last_channel = state.broker.disconnect(user, channel_id);
    // stops the writer, which holds a clone of the sender
    channel.close();
    drop(channel);
    if last_channel {
        sign_off(&state, user).await;
    }
    info!(user, channel = %channel_id, "client disconnected");
    Ok(())
}

/// Clears the user's heartbeat after their last channel closed.
///
/// A new connection for the same user may race this close. Its own heartbeat
/// can be skipped by the renewal throttle, so if the user is connected again
/// once the key is gone the heartbeat is written afresh.
async fn sign_off(state: &ServerState, user: UserId) {
    if state.broker.registry().is_connected(user) {
        return;
    }
    if let Err(e) = state.presence.sign_off(user).await {
        warn!(user, error = %e, "failed to sign off presence");
    }
    if state.broker.registry().is_connected(user) {
        touch(state, user).await;
    }
}

async fn handle_client_message(state: &ServerState, user: UserId, channel: &Channel, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { chat_id }) => join(state, user, channel, chat_id).await,
        Ok(ClientMessage::Unsubscribe { chat_id }) => {
            state.broker.unsubscribe(user, chat_id);
            reply(channel, &ServerMessage::Unsubscribed { chat_id });
        }
        Ok(ClientMessage::Heartbeat) => {}
        Ok(ClientMessage::Status { user_id }) => match state.presence.status(user_id).await {
            Ok(status) => {
                reply(
                    channel,
                    &ServerMessage::Status {
                        user_id,
                        status: status.status,
                        last_seen: status.last_seen,
                    },
                );
            }
            Err(e) => {
                warn!(user, user_id, error = %e, "status lookup failed");
                reply(
                    channel,
                    &ServerMessage::Error {
                        message: "status unavailable".to_string(),
                    },
                );
            }
        },
        Err(err) => {
            warn!(
                user,
                "Invalid client message: {err} | {}",
                text.chars().take(100).collect::<String>()
            );
            reply(
                channel,
                &ServerMessage::Error {
                    message: "invalid message".to_string(),
                },
            );
        }
    }
}

async fn join(state: &ServerState, user: UserId, channel: &Channel, chat_id: TopicId) {
    match state.broker.join_chat(user, chat_id).await {
        Ok(()) => {
            info!(user, chat_id, "joined chat");
            reply(channel, &ServerMessage::Subscribed { chat_id });
        }
        Err(e) => {
            warn!(user, chat_id, error = %e, "join refused");
            reply(
                channel,
                &ServerMessage::Error {
                    message: e.to_string(),
                },
            );
        }
    }
}

async fn touch(state: &ServerState, user: UserId) {
    if let Err(e) = state.presence.heartbeat(user).await {
        warn!(user, error = %e, "heartbeat not renewed");
    }
}

/// Queues a server frame on `channel`; returns `false` if the channel is gone
/// or full.
fn reply(channel: &Channel, msg: &ServerMessage) -> bool {
    let text = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize server message");
            return false;
        }
    };
    match channel.try_deliver(WsMessage::text(text)) {
        Ok(()) => true,
        Err(e) => {
            debug!(channel = %channel.id(), error = %e, "reply dropped");
            false
        }
    }
}
