//! Thread-safe mailbox and flow controller between the WM and SCM.
//!
//! The Broker is the only shared mutable state between the two sides. Every
//! operation takes one short-lived mutex for O(queue splice) work and never
//! blocks waiting for a consumer; each direction is woken through a
//! posted-once token, so any number of posts between two drains collapse
//! into a single wake.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use wmux_core::ServerId;

use crate::config::CommsConfig;
use crate::envelope::{ControlMsg, DataMsg};

/// Admission verdict for WM-bound deliveries, derived under the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quench {
    /// WM-bound depth is at the cap; no tunnel reads until the WM drains.
    Blocked,
    /// No throttle in effect.
    Unlimited,
    /// Rate envelope exhausted; no tunnel reads before this instant.
    Until(Instant),
}

impl Quench {
    /// Whether tunnel reads are suspended at `now`.
    pub fn is_active(&self, now: Instant) -> bool {
        match self {
            Quench::Blocked => true,
            Quench::Unlimited => false,
            Quench::Until(deadline) => *deadline > now,
        }
    }
}

struct Mailbox {
    to_wm_control: VecDeque<ControlMsg>,
    to_wm_data: VecDeque<DataMsg>,
    to_scm_control: VecDeque<ControlMsg>,
    to_scm_data: VecDeque<DataMsg>,
    /// Data messages delivered WM-bound since `batch_start`.
    batch_count: u64,
    batch_start: Instant,
}

/// What [`Broker::drain_for_scm`] hands back in one atomic move.
pub struct ScmBatch {
    pub control: VecDeque<ControlMsg>,
    pub data: VecDeque<DataMsg>,
    pub quench: Quench,
}

/// Mailbox and flow controller joining the WM and SCM workers.
pub struct Broker {
    inner: Mutex<Mailbox>,
    wm_wake: Notify,
    scm_wake: Notify,
    queue_max: usize,
    batch_max: u64,
    rate_per_msg: Duration,
}

impl Broker {
    pub fn new(config: &CommsConfig) -> Self {
        Self {
            inner: Mutex::new(Mailbox {
                to_wm_control: VecDeque::new(),
                to_wm_data: VecDeque::new(),
                to_scm_control: VecDeque::new(),
                to_scm_data: VecDeque::new(),
                batch_count: 0,
                batch_start: Instant::now(),
            }),
            wm_wake: Notify::new(),
            scm_wake: Notify::new(),
            queue_max: config.quench_queue_max,
            batch_max: config.quench_batch_count,
            rate_per_msg: Duration::from_millis(config.quench_rate_ms_per_msg),
        }
    }

    /// WM → SCM: ask the SCM to create and drive a record for `server`.
    ///
    /// Any SCM-bound data still queued for `server` is purged first, so a
    /// disconnect-then-reconnect never hands the new incarnation frames
    /// meant for the previous one.
    pub fn request_connect(&self, server: &ServerId) {
        {
            let mut inner = self.inner.lock();
            let before = inner.to_scm_data.len();
            inner.to_scm_data.retain(|msg| msg.server != *server);
            let purged = before - inner.to_scm_data.len();
            if purged > 0 {
                debug!(server = %server, purged, "purged stale data before reconnect");
            }
            inner.to_scm_control.push_back(ControlMsg::ConnectRequest {
                server: server.clone(),
                connect: true,
            });
        }
        self.scm_wake.notify_one();
    }

    /// WM → SCM: ask the SCM to tear down the record for `server`.
    pub fn request_disconnect(&self, server: &ServerId) {
        self.inner
            .lock()
            .to_scm_control
            .push_back(ControlMsg::ConnectRequest {
                server: server.clone(),
                connect: false,
            });
        self.scm_wake.notify_one();
    }

    /// WM → SCM: submit one outbound frame.
    pub fn send_data_to_scm(&self, msg: DataMsg) {
        self.inner.lock().to_scm_data.push_back(msg);
        self.scm_wake.notify_one();
    }

    /// Atomically move both WM-bound queues out.
    ///
    /// If the data queue was at or above the depth cap, the SCM is woken so
    /// it re-evaluates a `Blocked` verdict.
    pub fn drain_for_wm(&self) -> (VecDeque<ControlMsg>, VecDeque<DataMsg>) {
        let (control, data, was_at_cap) = {
            let mut inner = self.inner.lock();
            let was_at_cap = inner.to_wm_data.len() >= self.queue_max;
            (
                std::mem::take(&mut inner.to_wm_control),
                std::mem::take(&mut inner.to_wm_data),
                was_at_cap,
            )
        };
        if was_at_cap {
            self.scm_wake.notify_one();
        }
        (control, data)
    }

    /// Atomically move both SCM-bound queues out, with a fresh verdict.
    pub fn drain_for_scm(&self) -> ScmBatch {
        let mut inner = self.inner.lock();
        let control = std::mem::take(&mut inner.to_scm_control);
        let data = std::mem::take(&mut inner.to_scm_data);
        let quench = self.quench_verdict(&mut inner, Instant::now());
        ScmBatch {
            control,
            data,
            quench,
        }
    }

    /// SCM → WM: append one flushed batch and return the fresh verdict.
    pub fn deliver_to_wm(&self, control: Vec<ControlMsg>, data: Vec<DataMsg>) -> Quench {
        let quench = {
            let mut inner = self.inner.lock();
            inner.batch_count += data.len() as u64;
            inner.to_wm_control.extend(control);
            inner.to_wm_data.extend(data);
            self.quench_verdict(&mut inner, Instant::now())
        };
        self.wm_wake.notify_one();
        quench
    }

    /// Wait for the next WM-bound wake-up.
    pub async fn wm_notified(&self) {
        self.wm_wake.notified().await;
    }

    /// Wait for the next SCM-bound wake-up.
    pub async fn scm_notified(&self) {
        self.scm_wake.notified().await;
    }

    /// Depth cap first, then the batch trigger, then the rate envelope.
    /// An elapsed envelope resets the batch window on the spot.
    fn quench_verdict(&self, inner: &mut Mailbox, now: Instant) -> Quench {
        if inner.to_wm_data.len() >= self.queue_max {
            return Quench::Blocked;
        }
        if inner.batch_count < self.batch_max {
            return Quench::Unlimited;
        }
        let deadline = inner.batch_start + self.rate_per_msg * inner.batch_count as u32;
        if deadline <= now {
            inner.batch_count = 0;
            inner.batch_start = now;
            Quench::Unlimited
        } else {
            Quench::Until(deadline)
        }
    }

    #[cfg(test)]
    pub(crate) fn wm_data_depth(&self) -> usize {
        self.inner.lock().to_wm_data.len()
    }
}
