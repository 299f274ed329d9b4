//! 룰렛 방 동기화 서버
//!
//! 여러 브라우저 클라이언트가 이름 있는 방 안에서 룰렛 섹션과 결과 기록을
//! 공유한다. 스핀 결과는 스핀을 시작한 클라이언트 하나만 기록할 수 있고,
//! 마지막 참가자가 나간 방은 24시간 동안 아카이브된다.

pub mod archive;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod spin;
pub mod state;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use state::AppState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// 라우터 설정
pub fn router(state: Arc<AppState>) -> Router {
    // CORS 설정
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>Roulette Sync Server</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "roulette-sync-rs",
        "rooms": state.rooms.len(),
        "sessions": state.sessions.len(),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 연결 처리
    let session_id = handlers::handle_connection(&state, tx.clone()).await;

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode outbound message"),
            }
        }
    });

    // 수신 처리. 한 연결의 메시지는 순서대로 처리된다.
    let mut shutdown = state.subscribe_shutdown();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let result = tokio::select! {
            _ = shutdown.changed() => break,
            next = ws_receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
        };
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(&state, &session_id, &tx, msg).await,
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Dropped malformed message");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // 연결 해제
    handlers::handle_disconnect(&state, &session_id).await;
    send_task.abort();
}

async fn handle_client_message(
    state: &AppState,
    session_id: &str,
    sender: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Ping => {
            handlers::handle_heartbeat(sender);
        }
        ClientMessage::SetUsername { username } => {
            handlers::handle_set_username(state, session_id, &username).await;
        }
        ClientMessage::JoinRoom { room, username } => {
            handlers::handle_join_room(state, session_id, &room, username.as_deref()).await;
        }
        ClientMessage::UserLeft { room } => {
            handlers::handle_leave_room(state, session_id, room.as_deref()).await;
        }
        ClientMessage::Spin { spin_data } => {
            handlers::handle_spin(state, session_id, spin_data).await;
        }
        ClientMessage::UpdateParameters { parameters } => {
            handlers::handle_update_parameters(state, session_id, parameters).await;
        }
        ClientMessage::SaveResult { result, spin_id } => {
            handlers::handle_save_result(state, session_id, result, spin_id.as_deref()).await;
        }
        ClientMessage::ResetResult => {
            handlers::handle_reset_result(state, session_id).await;
        }
    }
}
