use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::MatchStatus;
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: MatchStatus,
}

/// Run a full discovery pass for the caller
///
/// **Endpoint**: `POST /matches/discover`
#[post("/matches/discover")]
pub async fn discover(state: web::Data<AppState>, user: User) -> Result<HttpResponse, AppError> {
    let report = state.discovery.find_mutual_matches(user.id).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/matches")]
pub async fn list_matches(state: web::Data<AppState>, user: User) -> Result<HttpResponse, AppError> {
    let matches = state.discovery.list_matches(user.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "matches": matches })))
}

#[get("/matches/{id}")]
pub async fn get_match(
    state: web::Data<AppState>,
    user: User,
    match_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let record = state
        .discovery
        .get_match(match_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

/// Accept, decline or expire a match
///
/// **Endpoint**: `POST /matches/{id}/status`
#[post("/matches/{id}/status")]
pub async fn update_status(
    state: web::Data<AppState>,
    user: User,
    match_id: web::Path<Uuid>,
    body: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, AppError> {
    let record = state
        .discovery
        .transition_match(match_id.into_inner(), user.id, body.status)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}
