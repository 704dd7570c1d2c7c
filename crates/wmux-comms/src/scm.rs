//! Server Communication Manager: the worker that drives every tunnel.
//!
//! One `ServerComms` instance owns all per-server records and runs a single
//! loop: drain the Broker, walk every record to advance its state machine,
//! block until something is ready, then transfer frames in both directions.
//! A record failure never takes the loop down; it is caught, the record is
//! announced as disconnected, and the loop moves on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use wmux_core::messages::{LAST_COMPATIBLE_MINOR, PROTOCOL_MAJOR, PROTOCOL_MINOR, RSP_MUST_UPGRADE, RSP_OK};
use wmux_core::{CommsError, CommsResult, Frame, ServerId};

use crate::broker::{Broker, Quench, ScmBatch};
use crate::config::CommsConfig;
use crate::envelope::{ControlMsg, DataMsg};
use crate::record::{ServerRecord, Status};
use crate::tunnel::{Interest, TunnelFactory};

/// WM-bound output accumulated during one loop pass.
#[derive(Default)]
struct WmBatch {
    control: Vec<ControlMsg>,
    data: Vec<DataMsg>,
}

impl WmBatch {
    fn is_empty(&self) -> bool {
        self.control.is_empty() && self.data.is_empty()
    }
}

/// The SCM worker. Owns every [`ServerRecord`]; nothing here is shared with
/// the WM side except the Broker.
pub struct ServerComms {
    broker: Arc<Broker>,
    factory: Box<dyn TunnelFactory>,
    config: CommsConfig,
    /// Posted by tunnels when their socket becomes ready.
    io_wake: Arc<Notify>,
    records: BTreeMap<ServerId, ServerRecord>,
    /// Records already announced as disconnected; cleared from the map on
    /// the next flush.
    pending_removal: Vec<ServerId>,
    outbound: WmBatch,
    quench: Quench,
    drain_pending: bool,
}

impl ServerComms {
    pub fn new(broker: Arc<Broker>, factory: Box<dyn TunnelFactory>, config: CommsConfig) -> Self {
        Self {
            broker,
            factory,
            config,
            io_wake: Arc::new(Notify::new()),
            records: BTreeMap::new(),
            pending_removal: Vec::new(),
            outbound: WmBatch::default(),
            quench: Quench::Unlimited,
            drain_pending: true,
        }
    }

    /// Run the SCM loop forever. Cancellation is task abort.
    pub async fn run(mut self) {
        loop {
            self.turn().await;
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// One full pass: drain, prepare, block, transfer, flush.
    async fn turn(&mut self) {
        // An elapsed rate deadline means the verdict is stale; re-query the
        // Broker for a fresh one.
        if let Quench::Until(deadline) = self.quench {
            if deadline <= Instant::now() {
                self.drain_pending = true;
            }
        }

        if self.drain_pending {
            self.drain_pending = false;
            self.drain_broker();
        }

        let quenched = self.quench.is_active(Instant::now());
        let mut connect_watch = false;
        let ids: Vec<ServerId> = self.records.keys().cloned().collect();
        for id in &ids {
            if let Err(err) = self.prepare_record(id, quenched, &mut connect_watch) {
                self.disconnect_record(id, Some(err));
            }
        }

        // Anything preparation produced goes out before blocking, and the
        // next pass starts from fresh Broker state.
        if !self.outbound.is_empty() {
            self.flush();
            self.drain_pending = true;
            return;
        }

        if self.block(quenched, connect_watch).await {
            self.drain_pending = true;
        }

        if !self.quench.is_active(Instant::now()) {
            for id in &ids {
                if let Err(err) = self.transfer_record(id) {
                    self.disconnect_record(id, Some(err));
                }
                if self.quench.is_active(Instant::now()) {
                    break;
                }
            }
        }
        self.flush();
    }

    /// Move both SCM-bound queues out of the Broker and apply them.
    fn drain_broker(&mut self) {
        let ScmBatch {
            control,
            data,
            quench,
        } = self.broker.drain_for_scm();
        for msg in control {
            self.apply_control(msg);
        }
        for msg in data {
            self.route_outbound(msg);
        }
        if self.outbound.is_empty() {
            self.quench = quench;
        } else {
            // Disconnect notices produced while applying control go out
            // right away; delivery hands back an even fresher verdict.
            self.flush();
        }
    }

    fn apply_control(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::ConnectRequest {
                server,
                connect: true,
            } => {
                let live = self
                    .records
                    .get(&server)
                    .is_some_and(|rec| rec.status != Status::Disconnected);
                if live {
                    debug!(server = %server, "connect requested for a live record, ignoring");
                } else {
                    info!(server = %server, "scheduling connection");
                    self.records
                        .insert(server.clone(), ServerRecord::new(server));
                }
            }
            ControlMsg::ConnectRequest {
                server,
                connect: false,
            } => {
                let live = self
                    .records
                    .get(&server)
                    .is_some_and(|rec| rec.status != Status::Disconnected);
                if live {
                    self.disconnect_record(&server, None);
                } else {
                    debug!(server = %server, "disconnect requested for an unknown or departed server");
                }
            }
            other => {
                debug_assert!(false, "WM-bound control message on the SCM queue");
                warn!(message = ?other, "ignoring misdirected control message");
            }
        }
    }

    /// Queue an outbound frame on its record. Frames for records that are
    /// not yet connected are held; frames for absent or departed records
    /// are dropped.
    fn route_outbound(&mut self, msg: DataMsg) {
        match self.records.get_mut(&msg.server) {
            Some(rec) if rec.status != Status::Disconnected => {
                rec.send_queue.push_back(msg.frame);
            }
            _ => debug!(server = %msg.server, "dropping frame for an absent server"),
        }
    }

    /// Advance one record's state machine ahead of the select.
    fn prepare_record(
        &mut self,
        id: &ServerId,
        quenched: bool,
        connect_watch: &mut bool,
    ) -> CommsResult<()> {
        let Some(rec) = self.records.get_mut(id) else {
            return Ok(());
        };
        match rec.status {
            Status::Scheduled => {
                let mut tunnel = self.factory.open(id, Arc::clone(&self.io_wake))?;
                tunnel.begin_connect()?;
                rec.tunnel = Some(tunnel);
                rec.status = Status::Connecting;
                *connect_watch = true;
                debug!(server = %id, "tunnel establishment started");
            }
            Status::Connecting => {
                let tunnel = rec.tunnel.as_mut().ok_or_else(|| {
                    CommsError::Protocol("connecting record without a tunnel".into())
                })?;
                if tunnel.check_connect()? {
                    tunnel.send_frame(Frame::select_role())?;
                    rec.status = Status::RoleReply;
                    debug!(server = %id, "tunnel up, role selection sent");
                } else {
                    *connect_watch = true;
                }
            }
            Status::RoleReply => {
                if let Some(tunnel) = rec.tunnel.as_mut() {
                    tunnel.update_select(Interest {
                        read: !quenched,
                        write: tunnel.is_sending(),
                    });
                }
            }
            Status::Connected => {
                let tunnel = rec.tunnel.as_mut().ok_or_else(|| {
                    CommsError::Protocol("connected record without a tunnel".into())
                })?;
                if !tunnel.is_sending() {
                    if let Some(frame) = rec.send_queue.pop_front() {
                        tunnel.send_frame(frame)?;
                    }
                }
                tunnel.update_select(Interest {
                    read: !quenched,
                    write: tunnel.is_sending(),
                });
            }
            Status::Disconnected => {}
        }
        Ok(())
    }

    /// Block until the Broker posts a wake, a tunnel reports readiness, or
    /// the computed timeout elapses. Returns whether the Broker woke us.
    async fn block(&self, quenched: bool, connect_watch: bool) -> bool {
        // A ready tunnel with reads allowed means there is work right now.
        if !quenched && self.has_ready_tunnel() {
            return false;
        }

        let now = Instant::now();
        let mut timeout = match self.quench {
            Quench::Blocked | Quench::Unlimited => None,
            Quench::Until(deadline) => Some(deadline.saturating_duration_since(now)),
        };
        if connect_watch && self.quench != Quench::Blocked {
            let watch = Duration::from_millis(self.config.connect_poll_ms);
            timeout = Some(timeout.map_or(watch, |t| t.min(watch)));
        }

        tokio::select! {
            _ = self.broker.scm_notified() => true,
            _ = self.io_wake.notified() => false,
            _ = sleep_maybe(timeout) => false,
        }
    }

    fn has_ready_tunnel(&self) -> bool {
        self.records.values().any(|rec| {
            matches!(rec.status, Status::RoleReply | Status::Connected)
                && rec.tunnel.as_ref().is_some_and(|t| t.is_ready())
        })
    }

    /// Post-select transfer for one record: bounded micro-loop moving at
    /// most one send and one receive per step.
    fn transfer_record(&mut self, id: &ServerId) -> CommsResult<()> {
        for _ in 0..self.config.transfer_burst {
            let Some(rec) = self.records.get_mut(id) else {
                return Ok(());
            };
            if !matches!(rec.status, Status::RoleReply | Status::Connected) {
                return Ok(());
            }
            let connected = rec.status == Status::Connected;
            let tunnel = rec
                .tunnel
                .as_mut()
                .ok_or_else(|| CommsError::Protocol("transfer on a record without a tunnel".into()))?;
            if !tunnel.is_ready() {
                return Ok(());
            }

            if connected && !tunnel.is_sending() {
                if let Some(frame) = rec.send_queue.pop_front() {
                    tunnel.send_frame(frame)?;
                }
            }
            let send_in_progress = tunnel.is_sending();
            tunnel.do_transfer()?;

            match tunnel.take_frame() {
                Some(frame) => {
                    self.handle_server_frame(id, frame)?;
                    // Reads stop the moment quench engages.
                    if self.quench.is_active(Instant::now()) {
                        return Ok(());
                    }
                }
                None => {
                    if !send_in_progress {
                        return Ok(());
                    }
                    let still_sending = self
                        .records
                        .get(id)
                        .and_then(|rec| rec.tunnel.as_ref())
                        .is_some_and(|t| t.is_sending());
                    if still_sending {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one frame received from a server.
    ///
    /// In `RoleReply` this is the handshake response; in `Connected` it is
    /// application data bound for the WM.
    fn handle_server_frame(&mut self, id: &ServerId, frame: Frame) -> CommsResult<()> {
        let Some(rec) = self.records.get_mut(id) else {
            return Ok(());
        };
        match rec.status {
            Status::RoleReply => {
                if frame.kind == RSP_MUST_UPGRADE {
                    return Err(CommsError::Handshake(
                        "server requires a newer protocol, client upgrade needed".into(),
                    ));
                }
                if frame.kind != RSP_OK {
                    let reason = frame.reason().unwrap_or("role selection refused");
                    return Err(CommsError::Handshake(reason.to_string()));
                }
                if frame.minor < LAST_COMPATIBLE_MINOR {
                    return Err(CommsError::Handshake(format!(
                        "server protocol {}.{} is too old, {}.{} or newer required",
                        frame.major, frame.minor, PROTOCOL_MAJOR, LAST_COMPATIBLE_MINOR
                    )));
                }
                rec.status = Status::Connected;
                rec.minor = frame.minor.min(PROTOCOL_MINOR);
                info!(server = %rec.id, minor = rec.minor, "connected");
                self.outbound.control.push(ControlMsg::ConnectionNotice {
                    server: rec.id.clone(),
                    minor: rec.minor,
                });
                Ok(())
            }
            Status::Connected => {
                self.outbound.data.push(DataMsg::new(rec.id.clone(), frame));
                // Data is delivered per message so the depth cap holds
                // exactly; the verdict comes back with each delivery.
                self.flush();
                Ok(())
            }
            status => Err(CommsError::Protocol(format!(
                "unsolicited frame in state {status:?}"
            ))),
        }
    }

    /// Terminal transition for one record: close the tunnel, announce the
    /// departure, and mark the record for removal on the next flush.
    ///
    /// `error` is `None` for WM-requested disconnects. Repeated calls for a
    /// record already `Disconnected` are no-ops.
    fn disconnect_record(&mut self, id: &ServerId, error: Option<CommsError>) {
        let Some(rec) = self.records.get_mut(id) else {
            return;
        };
        if rec.status == Status::Disconnected {
            return;
        }
        if let Some(mut tunnel) = rec.tunnel.take() {
            tunnel.disconnect();
        }
        rec.status = Status::Disconnected;
        rec.send_queue.clear();
        rec.last_error = error.as_ref().map(|e| e.to_string());
        match &error {
            Some(err) => warn!(server = %id, error = %err, "server disconnected"),
            None => info!(server = %id, "server disconnected"),
        }
        self.outbound.control.push(ControlMsg::DisconnectionNotice {
            server: id.clone(),
            error,
        });
        self.pending_removal.push(id.clone());
    }

    /// Deliver the accumulated batch and clear records whose departure has
    /// now been handed to the Broker.
    fn flush(&mut self) {
        if !self.outbound.is_empty() {
            let control = std::mem::take(&mut self.outbound.control);
            let data = std::mem::take(&mut self.outbound.data);
            self.quench = self.broker.deliver_to_wm(control, data);
        }
        for id in std::mem::take(&mut self.pending_removal) {
            // A reconnect may already have replaced the record; only the
            // announced incarnation is cleared.
            if let Some(rec) = self.records.get(&id) {
                if rec.status == Status::Disconnected {
                    debug!(server = %id, error = ?rec.last_error, "record cleared");
                    self.records.remove(&id);
                }
            }
        }
    }
}

async fn sleep_maybe(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use wmux_core::messages::{Arg, KIND_EVENT, MSG_SELECT_ROLE, ROLE_WORKSPACE, RSP_REFUSED};

    struct Rig {
        broker: Arc<Broker>,
        factory: Arc<ScriptedFactory>,
        scm: tokio::task::JoinHandle<()>,
    }

    impl Rig {
        fn start(config: CommsConfig) -> Self {
            let broker = Arc::new(Broker::new(&config));
            let factory = Arc::new(ScriptedFactory::default());
            let scm = ServerComms::new(
                Arc::clone(&broker),
                Box::new(Arc::clone(&factory)),
                config,
            )
            .spawn();
            Self {
                broker,
                factory,
                scm,
            }
        }

        /// Let the SCM run until it parks; the paused clock auto-advances
        /// through connect polls and rate deadlines.
        async fn settle(&self) {
            tokio::time::sleep(Duration::from_millis(700)).await;
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            self.scm.abort();
        }
    }

    fn server(host: &str) -> ServerId {
        ServerId::new(host, 4040)
    }

    fn role_ok(minor: u32) -> Frame {
        Frame {
            major: PROTOCOL_MAJOR,
            minor,
            kind: RSP_OK,
            id: 0,
            args: vec![],
        }
    }

    fn event(tag: &str) -> Frame {
        Frame {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            kind: KIND_EVENT | 0x10,
            id: 7,
            args: vec![Arg::Str(tag.into())],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_connect_send_receive_disconnect() {
        let rig = Rig::start(CommsConfig::default());
        let a = server("alpha");
        let script = rig.factory.script(&a);
        script.set_connect_ready();
        script.push_inbound(role_ok(5));

        rig.broker.request_connect(&a);
        rig.settle().await;

        let (control, data) = rig.broker.drain_for_wm();
        assert_eq!(control.len(), 1);
        assert!(matches!(
            &control[0],
            ControlMsg::ConnectionNotice { server, minor: 5 } if *server == a
        ));
        assert!(data.is_empty());

        let sent = script.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MSG_SELECT_ROLE);
        assert_eq!(sent[0].id, 0);
        assert_eq!(sent[0].args, vec![Arg::U32(ROLE_WORKSPACE)]);

        rig.broker.send_data_to_scm(DataMsg::new(a.clone(), event("x")));
        rig.settle().await;
        let sent = script.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], event("x"));

        script.push_inbound(event("e"));
        rig.settle().await;
        let (control, data) = rig.broker.drain_for_wm();
        assert!(control.is_empty());
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].server, a);
        assert_eq!(data[0].frame, event("e"));

        rig.broker.request_disconnect(&a);
        rig.settle().await;
        let (control, data) = rig.broker.drain_for_wm();
        assert!(data.is_empty());
        assert!(matches!(
            &control[0],
            ControlMsg::DisconnectionNotice { server, error: None } if *server == a
        ));
        assert!(script.was_disconnected());

        // Sends after the departure are dropped on the floor.
        rig.broker.send_data_to_scm(DataMsg::new(a.clone(), event("late")));
        rig.settle().await;
        assert_eq!(script.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn data_queued_before_the_handshake_is_held_not_dropped() {
        let rig = Rig::start(CommsConfig::default());
        let a = server("alpha");
        let script = rig.factory.script(&a);
        script.set_connect_ready();
        script.push_inbound(role_ok(6));

        rig.broker.request_connect(&a);
        rig.broker.send_data_to_scm(DataMsg::new(a.clone(), event("early")));
        rig.settle().await;

        let sent = script.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, MSG_SELECT_ROLE);
        assert_eq!(sent[1], event("early"));
    }

    #[tokio::test(start_paused = true)]
    async fn version_below_compatibility_floor_fails_the_record() {
        let rig = Rig::start(CommsConfig::default());
        let b = server("beta");
        let script = rig.factory.script(&b);
        script.set_connect_ready();
        script.push_inbound(role_ok(1));

        rig.broker.request_connect(&b);
        rig.settle().await;

        let (control, data) = rig.broker.drain_for_wm();
        assert!(data.is_empty());
        assert_eq!(control.len(), 1);
        match &control[0] {
            ControlMsg::DisconnectionNotice {
                server,
                error: Some(err),
            } => {
                assert_eq!(server, &b);
                assert!(err.to_string().contains("too old"));
            }
            other => panic!("expected a failed disconnection notice, got {other:?}"),
        }
        assert!(script.was_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn must_upgrade_reply_fails_the_record() {
        let rig = Rig::start(CommsConfig::default());
        let c = server("gamma");
        let script = rig.factory.script(&c);
        script.set_connect_ready();
        script.push_inbound(Frame {
            major: PROTOCOL_MAJOR,
            minor: 9,
            kind: RSP_MUST_UPGRADE,
            id: 0,
            args: vec![],
        });

        rig.broker.request_connect(&c);
        rig.settle().await;

        let (control, _) = rig.broker.drain_for_wm();
        match &control[0] {
            ControlMsg::DisconnectionNotice {
                error: Some(err), ..
            } => assert!(err.to_string().contains("upgrade")),
            other => panic!("expected a failed disconnection notice, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refusal_reply_surfaces_the_server_reason() {
        let rig = Rig::start(CommsConfig::default());
        let c = server("gamma");
        let script = rig.factory.script(&c);
        script.set_connect_ready();
        script.push_inbound(Frame {
            major: PROTOCOL_MAJOR,
            minor: 6,
            kind: RSP_REFUSED,
            id: 0,
            args: vec![Arg::U32(0), Arg::Str("workspace quota exceeded".into())],
        });

        rig.broker.request_connect(&c);
        rig.settle().await;

        let (control, _) = rig.broker.drain_for_wm();
        match &control[0] {
            ControlMsg::DisconnectionNotice {
                error: Some(err), ..
            } => assert!(err.to_string().contains("workspace quota exceeded")),
            other => panic!("expected a failed disconnection notice, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_never_sees_data_from_the_previous_incarnation() {
        let rig = Rig::start(CommsConfig::default());
        let d = server("delta");
        let script = rig.factory.script(&d);
        script.set_connect_ready();
        script.push_inbound(role_ok(6));

        rig.broker.request_connect(&d);
        rig.settle().await;
        let (control, _) = rig.broker.drain_for_wm();
        assert!(matches!(&control[0], ControlMsg::ConnectionNotice { .. }));

        // Submit data, then disconnect and reconnect before the SCM can run.
        rig.broker.send_data_to_scm(DataMsg::new(d.clone(), event("y")));
        rig.broker.request_disconnect(&d);
        script.push_inbound(role_ok(6));
        rig.broker.request_connect(&d);
        rig.settle().await;

        let (control, data) = rig.broker.drain_for_wm();
        assert!(data.is_empty());
        assert_eq!(control.len(), 2);
        assert!(matches!(
            &control[0],
            ControlMsg::DisconnectionNotice { server, error: None } if *server == d
        ));
        assert!(matches!(
            &control[1],
            ControlMsg::ConnectionNotice { server, .. } if *server == d
        ));

        // The purged frame never reached any tunnel incarnation.
        assert!(script.sent().iter().all(|frame| *frame != event("y")));
    }

    #[tokio::test(start_paused = true)]
    async fn quench_caps_wm_bound_depth_until_the_wm_drains() {
        let config = CommsConfig::default();
        let cap = config.quench_queue_max;
        let rig = Rig::start(config);
        let e = server("epsilon");
        let script = rig.factory.script(&e);
        script.set_connect_ready();
        script.push_inbound(role_ok(6));

        rig.broker.request_connect(&e);
        rig.settle().await;
        let (control, _) = rig.broker.drain_for_wm();
        assert!(matches!(&control[0], ControlMsg::ConnectionNotice { .. }));

        for tag in 0..200 {
            script.push_inbound(event(&format!("e{tag}")));
        }

        // A WM that never drains: depth saturates at the cap and stays there.
        rig.settle().await;
        assert_eq!(rig.broker.wm_data_depth(), cap);
        rig.settle().await;
        assert!(rig.broker.wm_data_depth() <= cap + 1);

        // Draining releases the SCM; everything arrives, in order.
        let mut seen = Vec::new();
        for _ in 0..100 {
            if seen.len() == 200 {
                break;
            }
            let (_, data) = rig.broker.drain_for_wm();
            assert!(data.len() <= cap + 1);
            seen.extend(data.into_iter().map(|msg| msg.frame));
            rig.settle().await;
        }
        let expected: Vec<Frame> = (0..200).map(|tag| event(&format!("e{tag}"))).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_for_an_unknown_server_is_a_no_op() {
        let rig = Rig::start(CommsConfig::default());
        let z = server("zeta");

        rig.broker.request_disconnect(&z);
        rig.settle().await;

        let (control, data) = rig.broker.drain_for_wm();
        assert!(control.is_empty());
        assert!(data.is_empty());
        assert!(!rig.scm.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn tunnel_failure_surfaces_as_a_failed_disconnection() {
        let rig = Rig::start(CommsConfig::default());
        let a = server("alpha");
        let script = rig.factory.script(&a);
        script.set_connect_ready();
        script.push_inbound(role_ok(6));

        rig.broker.request_connect(&a);
        rig.settle().await;
        rig.broker.drain_for_wm();

        script.fail_transfer("link reset by peer");
        rig.settle().await;

        let (control, _) = rig.broker.drain_for_wm();
        match &control[0] {
            ControlMsg::DisconnectionNotice {
                server,
                error: Some(err),
            } => {
                assert_eq!(server, &a);
                assert!(err.to_string().contains("link reset by peer"));
            }
            other => panic!("expected a failed disconnection notice, got {other:?}"),
        }
        assert!(script.was_disconnected());

        // One failure never takes the loop down.
        let b = server("beta");
        let script_b = rig.factory.script(&b);
        script_b.set_connect_ready();
        script_b.push_inbound(role_ok(6));
        rig.broker.request_connect(&b);
        rig.settle().await;
        let (control, _) = rig.broker.drain_for_wm();
        assert!(matches!(&control[0], ControlMsg::ConnectionNotice { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tunnel_open_fails_the_record() {
        let rig = Rig::start(CommsConfig::default());
        let a = server("alpha");
        rig.factory.fail_next_open(&a, "no route to host");

        rig.broker.request_connect(&a);
        rig.settle().await;

        let (control, _) = rig.broker.drain_for_wm();
        assert_eq!(control.len(), 1);
        match &control[0] {
            ControlMsg::DisconnectionNotice {
                error: Some(err), ..
            } => assert!(err.to_string().contains("no route to host")),
            other => panic!("expected a failed disconnection notice, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reads_pause_under_quench_and_interest_reflects_it() {
        let mut config = CommsConfig::default();
        config.quench_queue_max = 4;
        let rig = Rig::start(config);
        let a = server("alpha");
        let script = rig.factory.script(&a);
        script.set_connect_ready();
        script.push_inbound(role_ok(6));

        rig.broker.request_connect(&a);
        rig.settle().await;
        rig.broker.drain_for_wm();

        for tag in 0..10 {
            script.push_inbound(event(&format!("q{tag}")));
        }
        rig.settle().await;

        assert_eq!(rig.broker.wm_data_depth(), 4);
        assert!(!script.last_interest().read);

        // Draining releases the SCM; once the backlog is through, read
        // interest comes back.
        let mut seen = 0;
        for _ in 0..20 {
            if seen == 10 {
                break;
            }
            let (_, data) = rig.broker.drain_for_wm();
            seen += data.len();
            rig.settle().await;
        }
        assert_eq!(seen, 10);
        assert!(script.last_interest().read);
    }
}
