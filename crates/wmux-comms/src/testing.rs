//! Scripted tunnel for exercising the SCM without a real transport.
//!
//! A [`ScriptedFactory`] hands the SCM [`ScriptedTunnel`]s whose behavior is
//! driven from the test through a shared [`TunnelScript`] handle: the test
//! scripts establishment, injects inbound frames, forces failures, and
//! inspects what the SCM sent or registered.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use wmux_core::{CommsError, CommsResult, Frame, ServerId};

use crate::tunnel::{Interest, Tunnel, TunnelFactory};

#[derive(Default)]
struct ScriptState {
    connect_ready: bool,
    fail_transfer: Option<String>,
    inbound: VecDeque<Frame>,
    sent: Vec<Frame>,
    in_flight: Option<Frame>,
    received: Option<Frame>,
    interest: Interest,
    disconnected: bool,
    wake: Option<Arc<Notify>>,
}

/// Shared handle scripting one server's tunnel and recording what the SCM
/// did with it. Survives reconnects: every incarnation opened for the same
/// server shares this state.
#[derive(Clone, Default)]
pub struct TunnelScript {
    state: Arc<Mutex<ScriptState>>,
}

impl TunnelScript {
    /// Let the next `check_connect` report the tunnel as up.
    pub fn set_connect_ready(&self) {
        self.state.lock().connect_ready = true;
        self.notify();
    }

    /// Queue one inbound frame and wake the SCM.
    pub fn push_inbound(&self, frame: Frame) {
        self.state.lock().inbound.push_back(frame);
        self.notify();
    }

    /// Make the next `do_transfer` fail with `reason`.
    pub fn fail_transfer(&self, reason: &str) {
        self.state.lock().fail_transfer = Some(reason.to_string());
        self.notify();
    }

    /// Every frame the SCM has fully written out, in order.
    pub fn sent(&self) -> Vec<Frame> {
        self.state.lock().sent.clone()
    }

    /// Whether the SCM tore the tunnel down.
    pub fn was_disconnected(&self) -> bool {
        self.state.lock().disconnected
    }

    /// The interest set most recently registered by the SCM.
    pub fn last_interest(&self) -> Interest {
        self.state.lock().interest
    }

    fn notify(&self) {
        if let Some(wake) = &self.state.lock().wake {
            wake.notify_one();
        }
    }
}

/// The [`Tunnel`] half of a script: what the SCM holds and drives.
pub struct ScriptedTunnel {
    state: Arc<Mutex<ScriptState>>,
}

impl Tunnel for ScriptedTunnel {
    fn begin_connect(&mut self) -> CommsResult<()> {
        Ok(())
    }

    fn check_connect(&mut self) -> CommsResult<bool> {
        Ok(self.state.lock().connect_ready)
    }

    fn update_select(&mut self, interest: Interest) {
        self.state.lock().interest = interest;
    }

    fn is_sending(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    fn send_frame(&mut self, frame: Frame) -> CommsResult<()> {
        let mut state = self.state.lock();
        debug_assert!(state.in_flight.is_none(), "send started while sending");
        state.in_flight = Some(frame);
        Ok(())
    }

    fn do_transfer(&mut self) -> CommsResult<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_transfer.take() {
            return Err(CommsError::Tunnel(reason));
        }
        if let Some(frame) = state.in_flight.take() {
            state.sent.push(frame);
        }
        if state.received.is_none() {
            state.received = state.inbound.pop_front();
        }
        Ok(())
    }

    fn has_received(&self) -> bool {
        self.state.lock().received.is_some()
    }

    fn take_frame(&mut self) -> Option<Frame> {
        self.state.lock().received.take()
    }

    fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.received.is_some()
            || !state.inbound.is_empty()
            || state.in_flight.is_some()
            || state.fail_transfer.is_some()
    }

    fn disconnect(&mut self) {
        self.state.lock().disconnected = true;
    }
}

/// Factory handing out scripted tunnels, keyed by server.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<ServerId, TunnelScript>>,
    open_failures: Mutex<HashMap<ServerId, String>>,
}

impl ScriptedFactory {
    /// The script for `server`, created on first use so tests can script a
    /// tunnel before the SCM opens it.
    pub fn script(&self, server: &ServerId) -> TunnelScript {
        self.scripts
            .lock()
            .entry(server.clone())
            .or_default()
            .clone()
    }

    /// Make the next `open` for `server` fail with `reason`.
    pub fn fail_next_open(&self, server: &ServerId, reason: &str) {
        self.open_failures
            .lock()
            .insert(server.clone(), reason.to_string());
    }
}

impl TunnelFactory for ScriptedFactory {
    fn open(&self, server: &ServerId, wake: Arc<Notify>) -> CommsResult<Box<dyn Tunnel>> {
        if let Some(reason) = self.open_failures.lock().remove(server) {
            return Err(CommsError::Tunnel(reason));
        }
        let script = self.script(server);
        script.state.lock().wake = Some(wake);
        Ok(Box::new(ScriptedTunnel {
            state: script.state,
        }))
    }
}
