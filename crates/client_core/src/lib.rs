//! Client agent core: keeps the control channel to the orchestrator alive and
//! provisions a sandboxed simulation instance when asked to.

pub mod backoff;
pub mod controller;
pub mod error;
pub mod events;
pub mod provisioning;
pub mod transport;
pub mod types;

pub use backoff::BackoffPolicy;
pub use controller::SessionController;
pub use error::{ChannelError, ProvisioningError, SessionError};
pub use events::ControllerEvent;
pub use provisioning::{HttpProvisioningClient, ProvisioningBackend};
pub use transport::{ChannelSignal, ControlChannelConnector, WebSocketConnector};
pub use types::{ControllerConfig, SessionSnapshot};
