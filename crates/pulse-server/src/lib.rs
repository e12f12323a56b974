//! # pulse-server
//!
//! Realtime WebSocket session layer.
//!
//! - Per-connection read/write pumps with a single-writer egress queue
//! - Ping/pong heartbeat with deadline-based liveness detection
//! - Central session registry with typed event routing
//! - Axum HTTP surface: `/ws` upgrade, `/health`, `/metrics`
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod ws;
