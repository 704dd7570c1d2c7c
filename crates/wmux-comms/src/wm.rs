//! Workspace Manager side of the Broker.
//!
//! The WM loop consumes what the Broker delivers and hands lifecycle events
//! and data frames to a [`WorkspaceEvents`] implementation, which owns all
//! workspace-level state. Connection and disconnection notices are
//! authoritative: once a server's departure has been dispatched, no further
//! data flows to it until a fresh [`WorkspaceManager::request_connect`].

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use wmux_core::{CommsError, CommsResult, Frame, ServerId};

use crate::broker::Broker;
use crate::envelope::{ControlMsg, DataMsg};

/// Workspace-level callbacks invoked by the WM loop.
///
/// Per record lifetime the loop guarantees the order: at most one
/// `server_connected`, then any number of `server_message`, then exactly one
/// `server_disconnected`.
pub trait WorkspaceEvents: Send {
    fn server_connected(&mut self, server: &ServerId, minor: u32);
    fn server_disconnected(&mut self, server: &ServerId, error: Option<&CommsError>);
    fn server_message(&mut self, server: &ServerId, frame: Frame);
}

/// The WM worker: drains the Broker and submits requests on behalf of the
/// workspace layer.
pub struct WorkspaceManager<E: WorkspaceEvents> {
    broker: Arc<Broker>,
    events: E,
    /// Servers with a connect requested and no disconnection notice yet.
    active: HashSet<ServerId>,
}

impl<E: WorkspaceEvents> WorkspaceManager<E> {
    pub fn new(broker: Arc<Broker>, events: E) -> Self {
        Self {
            broker,
            events,
            active: HashSet::new(),
        }
    }

    /// Ask the SCM to open a connection to `server`.
    pub fn request_connect(&mut self, server: &ServerId) {
        info!(server = %server, "requesting connection");
        self.active.insert(server.clone());
        self.broker.request_connect(server);
    }

    /// Ask the SCM to tear down the connection to `server`. Valid at any
    /// time, including before the connection notice has arrived.
    pub fn request_disconnect(&self, server: &ServerId) {
        info!(server = %server, "requesting disconnection");
        self.broker.request_disconnect(server);
    }

    /// Submit one outbound frame for `server`.
    ///
    /// Fails for servers that were never requested or whose departure has
    /// already been dispatched; a fresh [`Self::request_connect`] re-opens
    /// the gate.
    pub fn send_data(&self, server: &ServerId, frame: Frame) -> CommsResult<()> {
        if !self.active.contains(server) {
            return Err(CommsError::NotConnected(server.clone()));
        }
        self.broker.send_data_to_scm(DataMsg::new(server.clone(), frame));
        Ok(())
    }

    /// Wait for the next Broker wake-up, then drain and dispatch one batch.
    pub async fn poll(&mut self) {
        self.broker.wm_notified().await;
        self.drain();
    }

    /// Drain and dispatch whatever the Broker holds right now. Control is
    /// processed before data so connect/disconnect semantics hold within a
    /// batch.
    pub fn drain(&mut self) {
        let (control, data) = self.broker.drain_for_wm();
        for msg in control {
            self.dispatch_control(msg);
        }
        for msg in data {
            self.dispatch_data(msg);
        }
    }

    /// Run the WM loop forever. Cancellation is task abort.
    pub async fn run(mut self) {
        loop {
            self.poll().await;
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()>
    where
        E: 'static,
    {
        tokio::spawn(self.run())
    }

    fn dispatch_control(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::ConnectionNotice { server, minor } => {
                info!(server = %server, minor, "workspace link up");
                self.events.server_connected(&server, minor);
            }
            ControlMsg::DisconnectionNotice { server, error } => {
                self.active.remove(&server);
                match &error {
                    Some(err) => warn!(server = %server, error = %err, "workspace link lost"),
                    None => info!(server = %server, "workspace link closed"),
                }
                self.events.server_disconnected(&server, error.as_ref());
            }
            ControlMsg::ConnectRequest { server, .. } => {
                debug_assert!(false, "SCM-bound control message on the WM queue");
                warn!(server = %server, "ignoring misdirected connect request");
            }
        }
    }

    fn dispatch_data(&mut self, msg: DataMsg) {
        if !self.active.contains(&msg.server) {
            debug!(server = %msg.server, "dropping frame for a departed server");
            return;
        }
        self.events.server_message(&msg.server, msg.frame);
    }
}
