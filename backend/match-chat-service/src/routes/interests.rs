use crate::error::AppError;
use crate::middleware::guards::User;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareInterestRequest {
    pub event_id: Uuid,
}

/// Declare interest in an event and check it for reciprocity
///
/// **Endpoint**: `POST /interests`
#[post("/interests")]
pub async fn declare_interest(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<DeclareInterestRequest>,
) -> Result<HttpResponse, AppError> {
    let matches = state
        .discovery
        .declare_interest(user.id, body.event_id)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "matches": matches })))
}
