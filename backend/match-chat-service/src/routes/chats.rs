use crate::error::AppError;
use crate::middleware::guards::User;
use crate::state::AppState;
use actix_web::{delete, get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenChatRequest {
    pub match_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub is_typing: bool,
}

/// Open the chat thread of a match, creating it on first use
///
/// **Endpoint**: `POST /chats`
#[post("/chats")]
pub async fn open_chat(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<OpenChatRequest>,
) -> Result<HttpResponse, AppError> {
    let chat_id = state
        .chats
        .open_chat_for_match(user.id, body.match_id)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "chatId": chat_id })))
}

#[get("/chats/{id}")]
pub async fn get_chat(
    state: web::Data<AppState>,
    user: User,
    chat_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let thread = state.chats.get_chat(chat_id.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "chat": thread,
        "unreadCount": thread.unread_for(user.id),
    })))
}

/// Delete a chat thread and cascade to its messages
///
/// **Endpoint**: `DELETE /chats/{id}`
#[delete("/chats/{id}")]
pub async fn delete_chat(
    state: web::Data<AppState>,
    user: User,
    chat_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let report = state
        .chats
        .delete_chat(chat_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/chats/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    chat_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .chats
        .list_messages(chat_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "messages": messages })))
}

#[post("/chats/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    chat_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .chats
        .send_message(chat_id.into_inner(), user.id, &body.text)
        .await?;
    Ok(HttpResponse::Created().json(message))
}

#[post("/chats/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    chat_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state.chats.mark_read(chat_id.into_inner(), user.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/chats/{id}/typing")]
pub async fn set_typing(
    state: web::Data<AppState>,
    user: User,
    chat_id: web::Path<Uuid>,
    body: web::Json<TypingRequest>,
) -> Result<HttpResponse, AppError> {
    state
        .chats
        .set_typing(chat_id.into_inner(), user.id, body.is_typing)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
