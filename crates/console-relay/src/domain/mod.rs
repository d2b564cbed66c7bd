//! Domain layer for the relay.
//!
//! Pure types only: the runtime configuration, the error surface of the
//! facade, and the trait through which the relay learns which region a
//! server lives in.

pub mod config;
pub mod error;
pub mod registry;

pub use config::{ConsoleConfig, RateLimitMode};
pub use error::ConsoleError;
pub use registry::{RegisteredServer, ServerRegistry, StaticRegistry};
