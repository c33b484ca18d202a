//! In-memory transports and log capture for exercising
//! [`Connection`](tsrpc::Connection)s in tests.
//!
//! [`memory_socket`] hands back a socket transport together with a
//! [`MemoryPeer`] that plays the far end; [`socket_pair`] wires two
//! transports back to back so two connections can talk to each other.
//!
//! ```rust
//! use tsrpc::{CallOptions, Connection, ConnectionConfig};
//! use tsrpc_testing::socket_pair;
//!
//! # async fn example() -> tsrpc::OpResult<()> {
//! let (client_side, server_side) = socket_pair();
//! let client = Connection::socket(client_side, ConnectionConfig::default());
//! let server = Connection::socket(server_side, ConnectionConfig::default());
//! server.connect().await?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod logging;
pub mod loopback;
pub mod memory;

pub use http::{RecordedRequest, ScriptedHttpTransport, response_reply};
pub use logging::{CapturingLogger, LoggerHandle, logger};
pub use loopback::{LoopbackTransport, socket_pair};
pub use memory::{MemoryPeer, MemorySocketTransport, memory_socket};
