//! Wire frames and protocol constants for the workspace session protocol.
//!
//! The communication layer treats frame contents as opaque except for the
//! role handshake: the first frame a client sends selects its role, and the
//! first frame the server answers with carries a response code plus the
//! server's protocol minor.

use serde::{Deserialize, Serialize};

/// Protocol major version, sent in every role-selection message.
pub const PROTOCOL_MAJOR: u32 = 1;
/// Protocol minor version of this build.
pub const PROTOCOL_MINOR: u32 = 6;
/// Oldest server minor this build can still talk to.
pub const LAST_COMPATIBLE_MINOR: u32 = 3;

/// Role requested by a workspace client during the handshake.
pub const ROLE_WORKSPACE: u32 = 1;

/// Kind bit set on every server reply.
pub const KIND_REPLY: u32 = 0x8000;
/// Kind bit set on every server-initiated event.
pub const KIND_EVENT: u32 = 0x4000;

/// Role-selection request sent by the client once the tunnel is up.
pub const MSG_SELECT_ROLE: u32 = 0x01;

/// Role reply: the server accepted the requested role.
pub const RSP_OK: u32 = KIND_REPLY | 0x01;
/// Role reply: the client protocol is too old for this server.
pub const RSP_MUST_UPGRADE: u32 = KIND_REPLY | 0x02;
/// Role reply: the server refused the role for another reason.
pub const RSP_REFUSED: u32 = KIND_REPLY | 0x03;

/// One element of a frame's argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    U32(u32),
    Str(String),
    Bytes(Vec<u8>),
}

/// A framed protocol message.
///
/// `kind` carries the message type tag with the reply/event bits folded in;
/// `minor` is the sender's protocol minor, which only matters on the role
/// reply where it drives compatibility negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub major: u32,
    pub minor: u32,
    pub kind: u32,
    pub id: u32,
    pub args: Vec<Arg>,
}

impl Frame {
    /// The role-selection message: protocol version from the compile-time
    /// constants, `id` 0, and a single argument naming the workspace role.
    pub fn select_role() -> Self {
        Self {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            kind: MSG_SELECT_ROLE,
            id: 0,
            args: vec![Arg::U32(ROLE_WORKSPACE)],
        }
    }

    pub fn is_reply(&self) -> bool {
        self.kind & KIND_REPLY != 0
    }

    pub fn is_event(&self) -> bool {
        self.kind & KIND_EVENT != 0
    }

    /// Human-readable reason carried by a failed role reply, if present.
    ///
    /// Servers put the reason in the second argument slot; a reply that is
    /// too short yields `None` and callers fall back to a generic message.
    pub fn reason(&self) -> Option<&str> {
        match self.args.get(1) {
            Some(Arg::Str(s)) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_role_carries_protocol_constants() {
        let frame = Frame::select_role();
        assert_eq!(frame.major, PROTOCOL_MAJOR);
        assert_eq!(frame.minor, PROTOCOL_MINOR);
        assert_eq!(frame.id, 0);
        assert_eq!(frame.args, vec![Arg::U32(ROLE_WORKSPACE)]);
        assert!(!frame.is_reply());
    }

    #[test]
    fn reply_and_event_bits_are_distinct() {
        let reply = Frame {
            major: 1,
            minor: 6,
            kind: RSP_OK,
            id: 0,
            args: vec![],
        };
        assert!(reply.is_reply());
        assert!(!reply.is_event());

        let event = Frame {
            kind: KIND_EVENT | 0x20,
            ..reply.clone()
        };
        assert!(event.is_event());
        assert!(!event.is_reply());
    }

    #[test]
    fn reason_reads_second_argument_only_when_a_string() {
        let mut frame = Frame {
            major: 1,
            minor: 6,
            kind: RSP_REFUSED,
            id: 0,
            args: vec![Arg::U32(0), Arg::Str("room full".into())],
        };
        assert_eq!(frame.reason(), Some("room full"));

        frame.args.truncate(1);
        assert_eq!(frame.reason(), None);

        frame.args.push(Arg::U32(9));
        assert_eq!(frame.reason(), None);
    }
}
