//! # tars-server
//!
//! HTTP and WebSocket server for the TARS host-monitoring backend.
//!
//! The WebSocket side is the canonical interface:
//!
//! - [`websocket::registry`]: live sessions, their topics and background task slot
//! - [`websocket::channel`]: per-session outbound queue
//! - [`websocket::handler`]: sequential per-session message dispatch
//! - [`websocket::supervisor`]: cancellable container actions and log fetches
//! - [`websocket::publisher`]: periodic fan-out to topic subscribers
//!
//! [`api`] is a thin REST surface over the same host collaborators.

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
