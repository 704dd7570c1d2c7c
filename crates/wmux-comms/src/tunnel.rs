//! Tunnel collaborator traits.
//!
//! A tunnel is a non-blocking, framed transport to one Application Server.
//! The SCM drives every tunnel through [`Tunnel`]; concrete transports (a
//! TLS subprocess pipe, a library stream, the in-process scripted tunnel in
//! [`crate::testing`]) plug in via [`TunnelFactory`].

use std::sync::Arc;

use tokio::sync::Notify;

use wmux_core::{CommsResult, Frame, ServerId};

/// Read/write interest registered by the SCM before it blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };
}

/// One non-blocking, framed connection to an Application Server.
///
/// Every method must return without blocking; establishment and I/O make
/// incremental progress across calls.
pub trait Tunnel: Send + Sync {
    /// Start tunnel establishment.
    fn begin_connect(&mut self) -> CommsResult<()>;

    /// Poll establishment progress. `Ok(true)` once the tunnel is up.
    fn check_connect(&mut self) -> CommsResult<bool>;

    /// Record which directions the SCM will react to until its next wake.
    fn update_select(&mut self, interest: Interest);

    /// Whether a previously submitted frame is still being written out.
    fn is_sending(&self) -> bool;

    /// Submit one frame for transmission. Only valid while `!is_sending()`.
    fn send_frame(&mut self, frame: Frame) -> CommsResult<()>;

    /// Advance I/O: at most one send and one receive make progress.
    fn do_transfer(&mut self) -> CommsResult<()>;

    /// True exactly until [`Tunnel::take_frame`] consumes the frame.
    fn has_received(&self) -> bool;

    /// Consume the received frame, if any.
    fn take_frame(&mut self) -> Option<Frame>;

    /// Whether the socket currently has actionable work for the registered
    /// interest set.
    fn is_ready(&self) -> bool;

    /// Tear the tunnel down. Idempotent.
    fn disconnect(&mut self);
}

/// Creates tunnels on demand for the SCM.
pub trait TunnelFactory: Send + Sync {
    /// Open a tunnel to `server`. Implementations must post `wake` whenever
    /// the tunnel's socket becomes ready so the SCM loop re-runs its select.
    fn open(&self, server: &ServerId, wake: Arc<Notify>) -> CommsResult<Box<dyn Tunnel>>;
}

impl<T: TunnelFactory + Send + Sync> TunnelFactory for Arc<T> {
    fn open(&self, server: &ServerId, wake: Arc<Notify>) -> CommsResult<Box<dyn Tunnel>> {
        (**self).open(server, wake)
    }
}
