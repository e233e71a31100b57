use tracing_subscriber::{fmt, EnvFilter};

/// `LOG_FORMAT=json` switches to JSON lines for log shipping.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,actix_server=warn,rdkafka=warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}
