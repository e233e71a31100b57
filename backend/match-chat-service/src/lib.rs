//! Mutual-interest match discovery and real-time chat coordination.
//!
//! Users declare interest in events; reciprocal interest between two users
//! becomes one canonical match, and matched pairs converse in a single chat
//! thread with ordered messages, unread counters and typing presence.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
