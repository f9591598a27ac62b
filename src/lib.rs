//! Offline-first edge cache and request replay agent.
//!
//! The agent sits between an application and the network. Each outgoing
//! request is classified into a resource class and served with the matching
//! strategy from versioned response caches. Mutations that fail while offline
//! are persisted and replayed in order once connectivity returns.

pub mod agent;
pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod event;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod network;
pub mod notify;
pub mod router;
pub mod state;
pub mod sync;

pub use agent::{Agent, AgentStatus};
pub use config::AgentConfig;
pub use http::{Headers, Method, Request, RequestMode, Response};
