pub mod chats;
pub mod interests;
pub mod matches;
pub mod wsroute;

use crate::metrics::metrics_handler;
use actix_web::web;

/// Register every HTTP and WebSocket route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(interests::declare_interest)
        .service(matches::discover)
        .service(matches::list_matches)
        .service(matches::get_match)
        .service(matches::update_status)
        .service(chats::open_chat)
        .service(chats::get_chat)
        .service(chats::delete_chat)
        .service(chats::list_messages)
        .service(chats::send_message)
        .service(chats::mark_read)
        .service(chats::set_typing)
        .service(wsroute::ws_handler)
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics_handler));
}
