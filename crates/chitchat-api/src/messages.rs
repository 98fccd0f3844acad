use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};

use chitchat_types::MessageId;
use chitchat_types::api::{
    Claims, ConversationQuery, DeleteMessageResponse, EditMessageRequest, SendMessageRequest,
};
use chitchat_types::models::Message;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let message = state.delivery.send_message(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /messages?peer_id=` — the conversation with one peer.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<ConversationQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Message>>> {
    let Query(q) = query?;
    let messages = state.delivery.get_messages(claims.sub, q.peer_id).await?;
    Ok(Json(messages))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult<Json<Message>> {
    let Path(id) = id?;
    Ok(Json(state.lifecycle.mark_delivered(id, claims.sub).await?))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult<Json<Message>> {
    let Path(id) = id?;
    Ok(Json(state.lifecycle.mark_read(id, claims.sub).await?))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<MessageId>, PathRejection>,
    payload: Result<Json<EditMessageRequest>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    let Path(id) = id?;
    let Json(req) = payload?;
    Ok(Json(state.lifecycle.edit(id, claims.sub, req.content).await?))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult<Json<DeleteMessageResponse>> {
    let Path(id) = id?;
    let deleted = state.lifecycle.delete(id, claims.sub).await?;
    Ok(Json(DeleteMessageResponse {
        message: "Message deleted".into(),
        id: deleted.id,
    }))
}
