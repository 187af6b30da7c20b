//! Turnstream assembles an assistant conversation turn from an asynchronous,
//! out-of-order, multi-part event stream into an append-only message list
//! with correctly correlated mutation (tool-call) lifecycles.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the message model and store, the chunk reducer, and the
//!   streaming session controller that drives a turn end to end.
//! - [`channel`] defines the event-channel seam the engine consumes chunks
//!   through, plus an SSE-backed reference client.
//! - [`api`] defines the wire payloads and the turn-initiation call.
//! - [`cli`] runs an interactive session from the terminal.
//!
//! The runtime entrypoint lives in the binary crate (`src/main.rs`) and
//! routes through [`cli::run`].

pub mod api;
pub mod channel;
pub mod cli;
pub mod core;
pub mod utils;
