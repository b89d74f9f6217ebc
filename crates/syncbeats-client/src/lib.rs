pub mod actuator;
pub mod client;
pub mod config;
pub mod connection;
pub mod delayed;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod requests;
pub mod role_gate;
pub mod scheduler;
mod session;
pub mod ws;

pub use actuator::{MediaError, PlaybackActuator, PlayerEvent, VirtualActuator};
pub use client::SyncClient;
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use error::{ActuationError, Rejection, SyncError};
pub use reconciler::{Role, RoleTransition};
pub use role_gate::CommandKind;
pub use session::{JoinedRoom, SessionEvent, SessionSnapshot};
pub use ws::WsConnector;
