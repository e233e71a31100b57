mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use common::RecordingDispatcher;
use match_chat_service::config::Config;
use match_chat_service::middleware::guards::USER_ID_HEADER;
use match_chat_service::routes;
use match_chat_service::state::AppState;
use match_chat_service::store::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

fn state() -> AppState {
    AppState::build(
        Arc::new(Config::default()),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingDispatcher::default()),
    )
}

#[actix_web::test]
async fn test_missing_user_header_is_unauthenticated() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state()))
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/interests")
        .set_json(json!({ "eventId": Uuid::new_v4() }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "NOT_AUTHENTICATED");
    assert_eq!(body["retryable"], false);
}

#[actix_web::test]
async fn test_health() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn test_match_and_chat_flow() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state()))
            .configure(routes::configure),
    )
    .await;
    let (a, b, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    for user in [a, b] {
        let req = test::TestRequest::post()
            .uri("/interests")
            .insert_header((USER_ID_HEADER, user.to_string()))
            .set_json(json!({ "eventId": event }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let req = test::TestRequest::get()
        .uri("/matches")
        .insert_header((USER_ID_HEADER, a.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let matches = body["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["status"], "pending");
    assert_eq!(matches[0]["strength"], 50);
    let match_id = matches[0]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/chats")
        .insert_header((USER_ID_HEADER, b.to_string()))
        .set_json(json!({ "matchId": match_id }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let chat_id = body["chatId"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/chats/{chat_id}/messages"))
        .insert_header((USER_ID_HEADER, a.to_string()))
        .set_json(json!({ "text": "hello" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::get()
        .uri(&format!("/chats/{chat_id}"))
        .insert_header((USER_ID_HEADER, b.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["unreadCount"], 1);

    let req = test::TestRequest::post()
        .uri(&format!("/chats/{chat_id}/read"))
        .insert_header((USER_ID_HEADER, b.to_string()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri(&format!("/chats/{chat_id}/messages"))
        .insert_header((USER_ID_HEADER, b.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "hello");
    assert_eq!(messages[0]["read"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/chats/{chat_id}"))
        .insert_header((USER_ID_HEADER, Uuid::new_v4().to_string()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::delete()
        .uri(&format!("/chats/{chat_id}"))
        .insert_header((USER_ID_HEADER, a.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["messagesDeleted"], 1);
    assert_eq!(body["matchExpired"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/matches/{match_id}"))
        .insert_header((USER_ID_HEADER, b.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "expired");
}

#[actix_web::test]
async fn test_invalid_transition_maps_to_conflict() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state()))
            .configure(routes::configure),
    )
    .await;
    let (a, b, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    for user in [a, b] {
        let req = test::TestRequest::post()
            .uri("/interests")
            .insert_header((USER_ID_HEADER, user.to_string()))
            .set_json(json!({ "eventId": event }))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::post()
        .uri("/matches/discover")
        .insert_header((USER_ID_HEADER, a.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["failures"], 0);
    let match_id = body["candidates"][0]["matchId"].as_str().unwrap().to_string();

    let decline = |user: Uuid| {
        test::TestRequest::post()
            .uri(&format!("/matches/{match_id}/status"))
            .insert_header((USER_ID_HEADER, user.to_string()))
            .set_json(json!({ "status": "declined" }))
            .to_request()
    };

    let resp = test::call_service(&app, decline(a)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, decline(b)).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "INVALID_TRANSITION");
}
