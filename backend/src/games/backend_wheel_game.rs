use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Extension, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use shared::constants::{ROSTER_CHANNEL, WHEEL_CHANNEL};
use shared::roster::Participant;
use shared::shared_wheel_game::*;
use tracing::{error, info, warn};
use validator::Validate;

use crate::auth::middleware::{require_auth, UserId};
use crate::auth::{bearer_token, validate_jwt};
use crate::error::Error;
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/state", get(get_state))
        .route("/participants", get(get_participants))
        .route("/history", get(get_history))
        .route("/register", post(register))
        .route("/cancel", post(cancel))
        .route("/accept/:id", post(accept))
        .route("/accept-all", post(accept_all))
        .route("/demote/:id", post(demote))
        .route("/demote-all", post(demote_all))
        .route("/spin", post(spin))
        .layer(axum::middleware::from_fn_with_state(state.clone(), crate::rate_limit_middleware))
        .layer(axum::middleware::from_fn_with_state(state, require_auth))
        // browsers can't set headers on the upgrade; the socket authenticates itself
        .route("/ws", get(ws_handler))
}

async fn get_state(State(state): State<AppState>) -> Json<WheelSnapshot> {
    Json(state.wheel.snapshot().await)
}

async fn get_participants(State(state): State<AppState>) -> Json<Vec<Participant>> {
    Json(state.wheel.accepted_participants().await)
}

async fn get_history(State(state): State<AppState>) -> Json<Vec<WinnerRecord>> {
    Json(state.wheel.history().await)
}

#[axum::debug_handler]
async fn register(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<ActionResponse>, Error> {
    request.validate()?;
    let actor = state.config.actor_for(user_id);
    Ok(Json(state.wheel.register(&actor, &request.display_name).await?))
}

async fn cancel(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    request: Option<Json<CancelRequest>>,
) -> Result<Json<ActionResponse>, Error> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let actor = state.config.actor_for(user_id);
    Ok(Json(
        state
            .wheel
            .cancel(&actor, request.participant_id.as_deref())
            .await?,
    ))
}

async fn accept(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(participant_id): Path<String>,
) -> Result<Json<ActionResponse>, Error> {
    let actor = state.config.actor_for(user_id);
    Ok(Json(state.wheel.accept(&actor, &participant_id).await?))
}

async fn accept_all(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
) -> Result<Json<ActionResponse>, Error> {
    let actor = state.config.actor_for(user_id);
    Ok(Json(state.wheel.accept_all(&actor).await?))
}

async fn demote(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(participant_id): Path<String>,
    request: Option<Json<DemoteRequest>>,
) -> Result<Json<ActionResponse>, Error> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let actor = state.config.actor_for(user_id);
    Ok(Json(
        state
            .wheel
            .demote(&actor, &participant_id, request.mode)
            .await?,
    ))
}

async fn demote_all(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    request: Option<Json<DemoteRequest>>,
) -> Result<Json<ActionResponse>, Error> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let actor = state.config.actor_for(user_id);
    Ok(Json(state.wheel.demote_all(&actor, request.mode).await?))
}

async fn spin(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
) -> Result<Json<SpinStarted>, Error> {
    let actor = state.config.actor_for(user_id);
    match state.wheel.spin(&actor).await {
        Ok(started) => Ok(Json(started)),
        Err(e) => {
            warn!("Spin rejected for {}: {:?}", actor.user_id, e);
            Err(e)
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // first frame must be "Bearer <token>"
    let user_id = match socket.recv().await {
        Some(Ok(Message::Text(text))) => match bearer_token(&text) {
            Some(token) => match validate_jwt(token, &state.config.jwt_secret) {
                Ok(id) => id,
                Err(e) => {
                    error!("Invalid auth token on wheel socket: {:?}", e);
                    return;
                }
            },
            None => {
                error!("Expected auth token as Text message starting with 'Bearer '");
                return;
            }
        },
        other => {
            error!("Expected auth token as Text message, but received: {:?}", other);
            return;
        }
    };
    info!("Viewer {} connected to the wheel", user_id);

    let mut updates = state
        .wheel
        .broadcaster()
        .on_message(&[WHEEL_CHANNEL, ROSTER_CHANNEL]);
    let (mut sender, mut receiver) = socket.split();

    let snapshot = WheelMessage::Snapshot(state.wheel.snapshot().await);
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            if let Err(e) = sender.send(Message::Text(json)).await {
                error!("WebSocket send error: {:?}", e);
                return;
            }
        }
        Err(e) => {
            error!("Failed to serialize wheel snapshot: {}", e);
            return;
        }
    }

    // Forward broadcasts to the socket
    let mut forward = tokio::spawn(async move {
        while let Some(message) = updates.recv().await {
            if let Err(e) = sender.send(Message::Text(message.payload)).await {
                error!("WebSocket send error: {:?} - Connection will be closed", e);
                break;
            }
        }
        if let Err(e) = sender.close().await {
            error!("Failed to close WebSocket connection gracefully: {:?}", e);
        }
    });

    // viewers only listen; anything else they send is ignored until they hang up
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut forward => inbound.abort(),
        _ = &mut inbound => forward.abort(),
    }
    info!("Viewer {} left the wheel", user_id);
}
