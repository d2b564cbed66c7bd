//! Infrastructure layer: everything that touches a socket, a task or a file.
//!
//! - [`upstream`] – transport traits plus the tokio-tungstenite connector.
//! - [`protocol_client`] – session handshake and the split reader/writer
//!   halves of one upstream session.
//! - [`supervisor`] – one worker task per server with reconnect/backoff.
//! - [`storage`] – the TOML configuration file.

pub mod protocol_client;
pub mod storage;
pub mod supervisor;
pub mod upstream;

pub use protocol_client::{ClientHandle, ProtocolClient};
pub use supervisor::{ConnectionSupervisor, SupervisorSettings};
pub use upstream::{
    FrameSink, FrameStream, TransportError, UpstreamConnector, UpstreamLink, WsConnector,
};
