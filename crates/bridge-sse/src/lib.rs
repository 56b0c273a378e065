//! HTTP/SSE front end for a shared stdio JSON-RPC backend.
//!
//! Clients open `GET /sse` to receive every backend output line as an SSE
//! `message` event, and `POST /sse` raw JSON-RPC bodies which are written to
//! the backend's stdin unchanged.

pub mod handler;
pub mod server;

pub use server::{router, start_server, AppState};
