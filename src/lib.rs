//! Client for the Janus WebRTC gateway's HTTP transport, driving the
//! streaming plugin.
//!
//! ```no_run
//! # async fn demo() -> Result<(), janus_stream::JanusError> {
//! use janus_stream::{JanusConfig, Session};
//!
//! let session = Session::new(JanusConfig::new("127.0.0.1:8088", "secret"))?;
//! session.init().await;
//! let mountpoints = session.list().await?;
//! println!("{mountpoints:?}");
//! session.kill();
//! session.delete().await?;
//! session.join().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::{JanusConfig, PollPolicy, StatusCheck};
pub use error::{JanusError, TransportError};
pub use handle::Handle;
pub use protocol::{Envelope, JanusId, MountpointSpec};
pub use registry::{TransactionRegistry, Waiter};
pub use session::{PollStats, Session, SessionState, Watching};
pub use transport::{HttpClient, ReqwestHttpClient, TransactionIds, Transport, UuidTransactions};
