// cuelink-relay: keeps one presenting player and its remote controls in
// step within a named session.
//
// Module layout:
// - session: per-session device slots and the session registry
// - hub: single-task event loop, connection lifecycle and broadcast routing
// - ws: WebSocket upgrade, keepalive and framing
// - server: HTTP router, middleware and listener
// - config, error, metrics: ambient plumbing

pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod session;
pub mod ws;
