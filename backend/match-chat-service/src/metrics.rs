use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("failed to create counter");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register counter");
    counter
}

pub static MATCHES_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "match_chat_matches_created_total",
        "Canonical match records created by discovery",
    )
});

/// Labelled by the strategy that failed over
pub static DISCOVERY_FALLBACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "match_chat_discovery_fallbacks_total",
            "Discovery passes that fell back from the primary strategy",
        ),
        &["strategy"],
    )
    .expect("failed to create match_chat_discovery_fallbacks_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register match_chat_discovery_fallbacks_total");
    counter
});

pub static DISCOVERY_CANDIDATE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "match_chat_discovery_candidate_failures_total",
        "Per-candidate discovery failures that were skipped",
    )
});

pub static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter("match_chat_messages_sent_total", "Chat messages persisted")
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
