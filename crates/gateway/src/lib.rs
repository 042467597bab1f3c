//! Library surface for the voice-agent gateway binary: the `/session`
//! WebSocket handler, the per-connection orchestrator, and everything they
//! share. Split from `main.rs` so the binary is just wiring (config,
//! tracing, router, bind) over this crate's public types.

pub mod normalize;
pub mod protocol;
pub mod session;
pub mod state;
pub mod ws;
