//! A transport that plays back canned replies, for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use harvestar_geom::Pose;
use harvestar_protocol::{
    MoveRequest, ReadyReply, ReplayStatus, StartReplayReply, StartReplayRequest, TelemetryEvent,
};
use serde_json::Value;
use tokio::sync::{watch, Notify};

use crate::dispatcher::DispatchState;
use crate::transport::{ArmTransport, TransportError};

/// Replies are taken from per-endpoint queues. An empty move or start queue
/// answers with a 503; an empty status queue answers with an empty batch
/// that isn't done yet.
#[derive(Default)]
pub struct ScriptedArm {
    ready: Mutex<VecDeque<Result<ReadyReply, TransportError>>>,
    moves: Mutex<VecDeque<Result<Value, TransportError>>>,
    starts: Mutex<VecDeque<Result<StartReplayReply, TransportError>>>,
    statuses: Mutex<VecDeque<Result<ReplayStatus, TransportError>>>,

    sent: Mutex<Vec<MoveRequest>>,
    replays: Mutex<Vec<u32>>,
    move_calls: AtomicUsize,
    status_calls: AtomicUsize,

    dispatch_state: Mutex<Option<watch::Receiver<DispatchState>>>,
    observed: Mutex<Vec<DispatchState>>,

    hold: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl ScriptedArm {
    pub fn unavailable() -> TransportError {
        TransportError::Status(503)
    }

    pub fn push_ready(&self, r: Result<ReadyReply, TransportError>) {
        self.ready.lock().unwrap().push_back(r);
    }

    pub fn push_move(&self, r: Result<Value, TransportError>) {
        self.moves.lock().unwrap().push_back(r);
    }

    pub fn push_start(&self, r: Result<StartReplayReply, TransportError>) {
        self.starts.lock().unwrap().push_back(r);
    }

    pub fn ack(&self) {
        self.push_start(Ok(StartReplayReply {
            success: true,
            error: None,
        }));
    }

    pub fn push_status(&self, r: Result<ReplayStatus, TransportError>) {
        self.statuses.lock().unwrap().push_back(r);
    }

    pub fn push_batch(&self, messages: Vec<TelemetryEvent>, done: bool) {
        self.push_status(Ok(ReplayStatus { messages, done }));
    }

    /// Makes every following move, start or status request wait for
    /// [`ScriptedArm::release`].
    pub fn hold_requests(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub async fn wait_for_request(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn watch_dispatch(&self, rx: watch::Receiver<DispatchState>) {
        *self.dispatch_state.lock().unwrap() = Some(rx);
    }

    pub fn observed_attempts(&self) -> Vec<u32> {
        self.observed
            .lock()
            .unwrap()
            .iter()
            .filter_map(DispatchState::attempt)
            .collect()
    }

    /// The firmware-frame poses that went out, in order.
    pub fn sent_moves(&self) -> Vec<Pose> {
        self.sent.lock().unwrap().iter().map(|r| r.0 .0).collect()
    }

    pub fn replays(&self) -> Vec<u32> {
        self.replays.lock().unwrap().clone()
    }

    pub fn move_calls(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) {
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
    }
}

impl ArmTransport for ScriptedArm {
    async fn arm_ready(&self) -> Result<ReadyReply, TransportError> {
        let next = self.ready.lock().unwrap().pop_front();
        next.unwrap_or(Ok(ReadyReply {
            ready: true,
            error: None,
        }))
    }

    async fn move_arm(&self, req: MoveRequest) -> Result<Value, TransportError> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(req);
        let state = self
            .dispatch_state
            .lock()
            .unwrap()
            .as_ref()
            .map(|rx| rx.borrow().clone());
        if let Some(state) = state {
            self.observed.lock().unwrap().push(state);
        }

        self.gate().await;
        let next = self.moves.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(Self::unavailable()))
    }

    async fn start_replay(
        &self,
        req: StartReplayRequest,
    ) -> Result<StartReplayReply, TransportError> {
        self.replays.lock().unwrap().push(req.index);
        self.gate().await;
        let next = self.starts.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(Self::unavailable()))
    }

    async fn replay_status(&self) -> Result<ReplayStatus, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await;
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ReplayStatus::default()))
    }
}
