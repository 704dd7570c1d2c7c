//! Per-server connection record, owned exclusively by the SCM.

use std::collections::VecDeque;

use wmux_core::{Frame, ServerId};

use crate::tunnel::Tunnel;

/// Where one incarnation of a server connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// Connect requested; tunnel not yet opened.
    Scheduled,
    /// Tunnel establishment in progress.
    Connecting,
    /// Role selection sent; waiting for the server's reply.
    RoleReply,
    /// Handshake complete; data flows both ways.
    Connected,
    /// Terminal. A new connection to the same server is a new record.
    Disconnected,
}

/// One incarnation of a connection to an Application Server.
///
/// The tunnel is live exactly while the status is `Connecting`, `RoleReply`
/// or `Connected`; it is taken and closed on the transition to
/// `Disconnected`.
pub(crate) struct ServerRecord {
    pub id: ServerId,
    pub status: Status,
    pub tunnel: Option<Box<dyn Tunnel>>,
    /// Outbound frames held until the record is `Connected` and the tunnel
    /// is idle. Frames queued before the handshake completes are kept, not
    /// dropped.
    pub send_queue: VecDeque<Frame>,
    /// Negotiated protocol minor, set on the transition to `Connected`.
    pub minor: u32,
    /// Last failure observed on this record, kept for diagnostics.
    pub last_error: Option<String>,
}

impl ServerRecord {
    pub fn new(id: ServerId) -> Self {
        Self {
            id,
            status: Status::Scheduled,
            tunnel: None,
            send_queue: VecDeque::new(),
            minor: 0,
            last_error: None,
        }
    }
}
