//! wmux-comms: the communication subsystem of the wmux workspace runtime.
//!
//! Two long-lived workers, the Workspace Manager ([`WorkspaceManager`])
//! and the Server Communication Manager ([`ServerComms`]), cooperate
//! through a thread-safe [`Broker`] that carries control and data envelopes
//! between them, throttles WM-bound deliveries ("quench"), and anchors the
//! per-server connection lifecycle. Concrete transports plug in through the
//! [`Tunnel`] / [`TunnelFactory`] traits.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wmux_comms::testing::ScriptedFactory;
//! use wmux_comms::{Broker, CommsConfig, ServerComms, WorkspaceEvents, WorkspaceManager};
//! use wmux_core::{CommsError, Frame, ServerId};
//!
//! struct Workspaces;
//!
//! impl WorkspaceEvents for Workspaces {
//!     fn server_connected(&mut self, _server: &ServerId, _minor: u32) {}
//!     fn server_disconnected(&mut self, _server: &ServerId, _error: Option<&CommsError>) {}
//!     fn server_message(&mut self, _server: &ServerId, _frame: Frame) {}
//! }
//!
//! # async fn example() {
//! let config = CommsConfig::default();
//! let broker = Arc::new(Broker::new(&config));
//! let factory = Arc::new(ScriptedFactory::default());
//! ServerComms::new(Arc::clone(&broker), Box::new(factory), config).spawn();
//!
//! let mut wm = WorkspaceManager::new(broker, Workspaces);
//! wm.request_connect(&ServerId::new("as1.example.net", 5900));
//! loop {
//!     wm.poll().await;
//! }
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod envelope;
mod record;
pub mod scm;
pub mod testing;
pub mod tunnel;
pub mod wm;

// Re-export primary public types.
pub use broker::{Broker, Quench, ScmBatch};
pub use config::CommsConfig;
pub use envelope::{ControlMsg, DataMsg};
pub use scm::ServerComms;
pub use tunnel::{Interest, Tunnel, TunnelFactory};
pub use wm::{WorkspaceEvents, WorkspaceManager};

// Re-export wmux-core error types for convenience.
pub use wmux_core::{CommsError, CommsResult};
