//! JSON-RPC over WebSocket to the chain node.
//!
//! - [`RpcSocket`]: one open socket, correlating replies to requests by id.
//! - [`SocketConnection`]: the long-lived socket and its observable state.
//! - [`SingleShotExecutor`] / [`SharedSocketExecutor`]: the two execution
//!   modes behind [`RpcExecutor`], combined with a [`ResponseMapper`] by
//!   [`execute`].
//! - [`spawn_reconnector`], [`HealthChecker`] and [`bind_lifecycle`]: the
//!   policies layered on top of the connection.

pub mod connection;
pub mod correlator;
pub mod error;
pub mod executor;
pub mod health;
pub mod lifecycle;
pub mod mapper;
pub mod reconnect;
pub mod socket;

pub use connection::{ConnectionState, SocketConnection, StateTransition};
pub use correlator::Correlator;
pub use error::RpcError;
pub use executor::{execute, RpcExecutor, SharedSocketExecutor, SingleShotExecutor};
pub use health::{HealthChecker, HealthSignal, HealthSink};
pub use lifecycle::{bind_lifecycle, AppState};
pub use mapper::{HexBytesMapper, JsonMapper, MapperError, ResponseMapper};
pub use reconnect::{spawn_reconnector, ReconnectBackoff};
pub use socket::{RpcSocket, SocketOptions};
