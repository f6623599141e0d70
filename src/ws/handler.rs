//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ClientId, Frame, RoomError, RoomHandle};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, InputEvent, InputKind, ProtocolError, ServerMsg};

type WsSink = SplitSink<WebSocket, Message>;

/// Reasons a session ends early
#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("websocket send failed: {0}")]
    Send(#[from] axum::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Room membership of a connection once a join was accepted
struct Session {
    room: RoomHandle,
    client_id: ClientId,
    frames: broadcast::Receiver<Frame>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let span = info_span!("conn", conn = %conn_id);
    async move {
        info!("new websocket connection");
        let (ws_sink, ws_stream) = socket.split();
        run_session(&state, ws_sink, ws_stream).await;
        info!("websocket connection closed");
    }
    .instrument(span)
    .await
}

async fn run_session(state: &AppState, mut ws_sink: WsSink, mut ws_stream: SplitStream<WebSocket>) {
    let rate_limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);
    let mut session: Option<Session> = None;

    loop {
        tokio::select! {
            inbound = ws_stream.next() => {
                let Some(inbound) = inbound else {
                    debug!("client stream ended");
                    break;
                };
                match inbound {
                    Ok(Message::Text(text)) => {
                        let msg = match ClientMsg::decode(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(error = %e, "dropping connection");
                                break;
                            }
                        };
                        if let Err(e) = handle_client_msg(msg, state, &rate_limiter, &mut session, &mut ws_sink).await {
                            debug!(error = %e, "ending session");
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        warn!(error = %ProtocolError::Binary, "dropping connection");
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => {
                        info!("client initiated close");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "websocket error");
                        break;
                    }
                }
            }
            frame = next_frame(&mut session) => {
                match frame {
                    Ok(frame) => {
                        if let Err(e) = ws_sink.send(Message::Text(frame.to_string())).await {
                            debug!(error = %e, "websocket send failed");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client lagged, skipping snapshots");
                    }
                    Err(RecvError::Closed) => {
                        info!("room closed");
                        break;
                    }
                }
            }
        }
    }

    if let Some(session) = session {
        session.room.leave(session.client_id).await;
        state.rooms.detach(&session.room).await;
    }
    let _ = ws_sink.close().await;
}

/// Next outbound frame of the joined room; pending forever before a join
async fn next_frame(session: &mut Option<Session>) -> Result<Frame, RecvError> {
    match session {
        Some(session) => session.frames.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_client_msg(
    msg: ClientMsg,
    state: &AppState,
    rate_limiter: &ConnectionRateLimiter,
    session: &mut Option<Session>,
    ws_sink: &mut WsSink,
) -> Result<(), SessionError> {
    match msg {
        ClientMsg::Join { room, player_name } => {
            if session.is_some() {
                warn!(room = %room, "join on a connection that already joined");
                return reject(ws_sink, &RoomError::AlreadyJoined).await;
            }
            join_room(room, player_name, state, session, ws_sink).await
        }
        ClientMsg::GameEvent { events } => {
            let Some(session) = session else {
                warn!("game_event before join, ignoring");
                return Ok(());
            };
            let events = admit_events(rate_limiter.check_frame(), events);
            forward_events(session, events).await
        }
    }
}

async fn join_room(
    room: String,
    player_name: String,
    state: &AppState,
    session: &mut Option<Session>,
    ws_sink: &mut WsSink,
) -> Result<(), SessionError> {
    let handle = match state.rooms.attach(&room) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(room = %room, error = %e, "failed to start room");
            return reject(ws_sink, &e).await;
        }
    };

    match handle.join(player_name.clone()).await {
        Ok(accepted) => {
            let client_id = accepted.client_id;
            info!(room = %room, client_id, player_name = %player_name, "joined room");
            *session = Some(Session {
                room: handle,
                client_id,
                frames: accepted.frames,
            });
            send_msg(ws_sink, &ServerMsg::Joined { client_id }).await
        }
        Err(reason) => {
            info!(room = %room, player_name = %player_name, reason = %reason, "join rejected");
            state.rooms.detach(&handle).await;
            reject(ws_sink, &reason).await
        }
    }
}

/// Over the limit only key releases get through, so no key stays held down
fn admit_events(within_limit: bool, mut events: Vec<InputEvent>) -> Vec<InputEvent> {
    if !within_limit {
        let received = events.len();
        events.retain(|event| event.kind == InputKind::Keyup);
        warn!(received, kept = events.len(), "rate limited game_event");
    }
    events
}

async fn forward_events(session: &Session, events: Vec<InputEvent>) -> Result<(), SessionError> {
    if events.is_empty() {
        return Ok(());
    }
    session.room.send_events(session.client_id, events).await?;
    Ok(())
}

async fn reject(ws_sink: &mut WsSink, reason: &RoomError) -> Result<(), SessionError> {
    send_msg(
        ws_sink,
        &ServerMsg::JoinRejected {
            reason: reason.to_string(),
        },
    )
    .await
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), SessionError> {
    let json = msg.encode()?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::admit_events;
    use crate::app::AppState;
    use crate::config::Config;
    use crate::http::build_router;
    use crate::ws::protocol::{InputEvent, InputKind, Key};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_server() -> (SocketAddr, AppState) {
        start_server_with(Config::default()).await
    }

    async fn start_server_with(config: Config) -> (SocketAddr, AppState) {
        let state = AppState::new(config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, state)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, value: Value) {
        ws.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    /// Next JSON message of the given type, skipping anything else
    async fn recv_type(ws: &mut Client, ty: &str) -> Value {
        loop {
            let msg = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == ty {
                    return value;
                }
            }
        }
    }

    fn join(room: &str, name: &str) -> Value {
        json!({ "type": "join", "room": room, "player_name": name })
    }

    #[tokio::test]
    async fn join_then_receive_snapshots() {
        let (addr, _state) = start_server().await;
        let mut ws = connect(addr).await;

        send(&mut ws, join("lobby", "ann")).await;
        let joined = recv_type(&mut ws, "joined").await;
        assert_eq!(joined["client_id"], 0);

        // the tank is staged on the join tick and shows up a snapshot later
        let snapshot = loop {
            let snapshot = recv_type(&mut ws, "game_state").await;
            if snapshot["state"]["current_player"] == 0 {
                break snapshot;
            }
        };
        let objects = snapshot["state"]["objects"].as_object().unwrap();
        assert_eq!(objects.len(), 1);
        let tank = objects.values().next().unwrap();
        assert_eq!(tank["class"], "Tank");
        assert_eq!(tank["name"], "ann");
    }

    #[tokio::test]
    async fn full_room_rejects_and_keeps_connection() {
        let (addr, _state) = start_server().await;
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        let mut c = connect(addr).await;

        send(&mut a, join("cave", "a")).await;
        assert_eq!(recv_type(&mut a, "joined").await["client_id"], 0);
        send(&mut b, join("cave", "b")).await;
        assert_eq!(recv_type(&mut b, "joined").await["client_id"], 1);

        send(&mut c, join("cave", "c")).await;
        let rejected = recv_type(&mut c, "join-rejected").await;
        assert_eq!(rejected["reason"], "Room is full");

        send(&mut c, join("elsewhere", "c")).await;
        assert_eq!(recv_type(&mut c, "joined").await["client_id"], 0);
    }

    #[tokio::test]
    async fn second_join_on_same_connection_is_rejected() {
        let (addr, _state) = start_server().await;
        let mut ws = connect(addr).await;

        send(&mut ws, join("lobby", "ann")).await;
        recv_type(&mut ws, "joined").await;
        send(&mut ws, join("other", "ann")).await;
        let rejected = recv_type(&mut ws, "join-rejected").await;
        assert_eq!(rejected["reason"], "Already joined a room");
    }

    #[test]
    fn throttled_batches_keep_key_releases() {
        let events = vec![
            InputEvent {
                kind: InputKind::Keydown,
                value: Some(Key::Left.code()),
            },
            InputEvent {
                kind: InputKind::Keyup,
                value: Some(Key::Right.code()),
            },
        ];
        assert_eq!(admit_events(true, events.clone()), events);
        assert_eq!(admit_events(false, events.clone()), vec![events[1]]);
    }

    #[tokio::test]
    async fn join_is_not_rate_limited() {
        let config = Config {
            input_rate_limit: 1,
            ..Config::default()
        };
        let (addr, _state) = start_server_with(config).await;
        let mut ws = connect(addr).await;

        for _ in 0..5 {
            send(&mut ws, json!({ "type": "game_event", "events": [] })).await;
        }
        send(&mut ws, join("lobby", "ann")).await;
        assert_eq!(recv_type(&mut ws, "joined").await["client_id"], 0);
    }

    #[tokio::test]
    async fn malformed_frame_drops_connection() {
        let (addr, _state) = start_server().await;
        let mut ws = connect(addr).await;

        ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
        let closed = timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "connection was not dropped");
    }

    #[tokio::test]
    async fn disconnect_tears_down_the_room() {
        let (addr, state) = start_server().await;
        let mut ws = connect(addr).await;

        send(&mut ws, join("lobby", "ann")).await;
        recv_type(&mut ws, "joined").await;
        assert_eq!(state.rooms.active_rooms(), 1);

        ws.close(None).await.unwrap();
        drop(ws);

        timeout(Duration::from_secs(5), async {
            while state.rooms.active_rooms() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("room was not cleaned up");
    }
}
