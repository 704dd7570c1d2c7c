//! Message envelopes carried across the Broker.

use wmux_core::{CommsError, Frame, ServerId};

/// Control-plane envelope exchanged between the WM and SCM sides.
#[derive(Debug)]
pub enum ControlMsg {
    /// WM → SCM: create (`connect = true`) or tear down (`connect = false`)
    /// the record for `server`.
    ConnectRequest { server: ServerId, connect: bool },
    /// SCM → WM: `server` reached the `Connected` state. `minor` is the
    /// negotiated protocol minor.
    ConnectionNotice { server: ServerId, minor: u32 },
    /// SCM → WM: the record for `server` is gone for good. `error` is
    /// present iff the disconnection was caused by a failure.
    DisconnectionNotice {
        server: ServerId,
        error: Option<CommsError>,
    },
}

/// A data-plane frame in flight. Direction is implied by the queue it sits
/// in; the communication layer never interprets the frame beyond the
/// reply/event classification below.
#[derive(Debug)]
pub struct DataMsg {
    pub server: ServerId,
    pub frame: Frame,
}

impl DataMsg {
    pub fn new(server: ServerId, frame: Frame) -> Self {
        Self { server, frame }
    }

    /// Whether the frame is a server reply, as opposed to an event.
    pub fn is_reply(&self) -> bool {
        self.frame.is_reply()
    }
}
