//! console-relay library crate.
//!
//! Keeps one upstream WebSocket session per game server, turns the console
//! output of every server into classified, bounded history, and routes
//! operator commands back upstream while correlating the replies.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Operator (CLI / embedding application)
//!         ↕
//! [console-relay]
//!   ├── domain/           ConsoleConfig, ConsoleError, ServerRegistry seam
//!   ├── application/      Console store (classify → filter → correlate →
//!   │                     buffer), shared rate limiter
//!   ├── infrastructure/
//!   │     ├── upstream/       WebSocket transport (tokio-tungstenite)
//!   │     ├── protocol_client/ Session handshake, command framing
//!   │     ├── supervisor/     One worker task per server, reconnects
//!   │     └── storage/        TOML configuration file
//!   └── manager           ConsoleManager facade wiring it all together
//!         ↕
//! Upstream control plane (GraphQL over WebSocket)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `console-core`; it uses tokio
//!   only for its sync primitives and the rate limiter's sleep.
//! - `infrastructure` owns every socket and every spawned task.
//! - `manager` is the composition root.

/// Domain layer: configuration, errors and the server registry seam.
pub mod domain;

/// Application layer: the per-server console pipeline and the rate limiter.
pub mod application;

/// Infrastructure layer: upstream transport, supervision, config storage.
pub mod infrastructure;

/// The operator-facing facade.
pub mod manager;

pub use domain::{ConsoleConfig, ConsoleError, RateLimitMode, ServerRegistry, StaticRegistry};
pub use manager::{CommandReply, ConnectResult, ConsoleManager, DiagnosticReport, ProbeOutcome, ProbeResult};
