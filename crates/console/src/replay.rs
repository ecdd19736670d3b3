use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use harvestar_protocol::{ReplayStatus, StartReplayRequest, TelemetryEvent};
use log::{debug, info, warn};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::config::ReplayConfig;
use crate::history::{HistorySample, TelemetryHistory};
use crate::transport::{ArmTransport, TransportError};

/// A pre-recorded sequence that the backend knows how to play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplaySequence {
    pub id: u32,
    pub name: &'static str,
}

pub const SEQUENCES: &[ReplaySequence] = &[
    ReplaySequence {
        id: 0,
        name: "Harvest the Plant",
    },
    ReplaySequence {
        id: 1,
        name: "Draw a Circle",
    },
    ReplaySequence {
        id: 2,
        name: "Wave Hello",
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
}

impl ReplayState {
    pub fn is_active(self) -> bool {
        matches!(self, ReplayState::Starting | ReplayState::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReplayState::Completed | ReplayState::Failed)
    }
}

/// A telemetry event, stamped with when we received it.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggedEvent {
    /// Time since the session started.
    pub elapsed: Duration,
    pub event: TelemetryEvent,
}

/// What a view of the replay needs to draw itself.
#[derive(Clone, Debug)]
pub struct ReplaySnapshot {
    pub state: ReplayState,
    pub status: String,
    pub error: Option<String>,
    /// Every event received during this session, in arrival order.
    pub log: Vec<LoggedEvent>,
    /// The latest reported position, in the operator frame.
    pub live: Option<HistorySample>,
    pub history: TelemetryHistory,
}

impl ReplaySnapshot {
    fn new(config: &ReplayConfig) -> Self {
        ReplaySnapshot {
            state: ReplayState::Idle,
            status: "Idle".to_owned(),
            error: None,
            log: Vec::new(),
            live: None,
            history: TelemetryHistory::new(config.history),
        }
    }

    fn clear(&mut self) {
        self.log.clear();
        self.history.clear();
        self.live = None;
        self.error = None;
    }

    fn fail(&mut self, status: &str, error: String) {
        warn!("{status}: {error}");
        self.state = ReplayState::Failed;
        self.status = status.to_owned();
        self.error = Some(error);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("no replay sequence selected")]
    NoSelection,
    #[error("a replay is already running")]
    AlreadyRunning,
    #[error("replay was refused: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Bookkeeping that the view doesn't need to see.
#[derive(Default)]
struct Control {
    // Bumped every time the session is started or stopped. Work belonging to
    // an older generation is thrown away when it completes.
    generation: u64,
    started_at: Option<Instant>,
    // Dropping this cancels the poll loop's next tick.
    stop_poll: Option<oneshot::Sender<()>>,
}

struct Shared<T> {
    transport: Arc<T>,
    config: ReplayConfig,
    // Lock order: `control`, then `view`.
    control: Mutex<Control>,
    view: watch::Sender<ReplaySnapshot>,
}

/// Runs replays on the backend and follows their telemetry.
pub struct ReplaySession<T> {
    shared: Arc<Shared<T>>,
}

impl<T: ArmTransport> ReplaySession<T> {
    pub fn new(transport: Arc<T>, config: ReplayConfig) -> Self {
        let (view, _) = watch::channel(ReplaySnapshot::new(&config));
        ReplaySession {
            shared: Arc::new(Shared {
                transport,
                config,
                control: Mutex::new(Control::default()),
                view,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReplaySnapshot> {
        self.shared.view.subscribe()
    }

    pub fn snapshot(&self) -> ReplaySnapshot {
        self.shared.view.borrow().clone()
    }

    pub fn state(&self) -> ReplayState {
        self.shared.view.borrow().state
    }

    /// Starts sequence `sequence` on the backend and begins following it.
    ///
    /// On success the session is running and a background task polls the
    /// backend until the replay finishes, fails, or [`ReplaySession::stop`]
    /// is called.
    pub async fn start(&self, sequence: Option<u32>) -> Result<(), ReplayError> {
        let index = sequence.ok_or(ReplayError::NoSelection)?;

        let generation = {
            let mut control = self.shared.control();
            let active = self.shared.view.borrow().state.is_active();
            if active {
                return Err(ReplayError::AlreadyRunning);
            }
            control.generation += 1;
            control.started_at = Some(Instant::now());
            control.stop_poll = None;
            self.shared.view.send_modify(|v| {
                v.clear();
                v.state = ReplayState::Starting;
                v.status = "Sending replay request...".to_owned();
            });
            control.generation
        };

        info!("starting replay {index}");
        let reply = self
            .shared
            .transport
            .start_replay(StartReplayRequest { index })
            .await;

        let mut control = self.shared.control();
        if control.generation != generation {
            debug!("replay {index} was stopped before the backend answered");
            return Ok(());
        }

        match reply {
            Ok(r) if r.success => {
                let (tx, rx) = oneshot::channel();
                control.stop_poll = Some(tx);
                self.shared.view.send_modify(|v| {
                    v.state = ReplayState::Running;
                    v.status = "Replay started!".to_owned();
                });
                drop(control);

                tokio::spawn(poll(self.shared.clone(), generation, rx));
                Ok(())
            }
            Ok(r) => {
                let reason = r
                    .error
                    .unwrap_or_else(|| "Failed to start replay".to_owned());
                self.shared
                    .view
                    .send_modify(|v| v.fail("Failed to start replay", reason.clone()));
                Err(ReplayError::Rejected(reason))
            }
            Err(e) => {
                self.shared
                    .view
                    .send_modify(|v| v.fail("Failed to start replay", e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Forgets everything received so far: the log, the trail and any error.
    /// A running replay keeps being followed.
    pub fn clear(&self) {
        let _control = self.shared.control();
        self.shared.view.send_modify(ReplaySnapshot::clear);
    }

    /// Stops following the current replay and resets the session.
    ///
    /// This only affects the console. The backend keeps playing the
    /// sequence; a status request that is already in flight is allowed to
    /// finish, but its result is dropped.
    pub fn stop(&self) {
        let mut control = self.shared.control();
        control.generation += 1;
        control.started_at = None;
        if control.stop_poll.take().is_some() {
            debug!("cancelled replay polling");
        }
        self.shared.view.send_modify(|v| {
            v.clear();
            v.state = ReplayState::Idle;
            v.status = "Idle".to_owned();
        });
    }
}

impl<T> Shared<T> {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds one poll result into the session. Returns whether to keep polling.
    fn ingest(&self, generation: u64, reply: Result<ReplayStatus, TransportError>) -> bool {
        let mut control = self.control();
        let Some(started_at) = control.started_at.filter(|_| control.generation == generation)
        else {
            debug!("dropping status from a stopped replay");
            return false;
        };
        let elapsed = started_at.elapsed();
        let now_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let mut keep_polling = true;
        self.view.send_modify(|v| {
            let batch = match reply {
                Ok(batch) => batch,
                Err(e) => {
                    v.fail("Error polling status", e.to_string());
                    keep_polling = false;
                    return;
                }
            };

            let mut failure = None;
            for event in &batch.messages {
                match event {
                    TelemetryEvent::Bounds { message } => {
                        v.status = match message {
                            Some(m) => format!("Out of bounds! {m}"),
                            None => "Out of bounds!".to_owned(),
                        };
                    }
                    TelemetryEvent::Error { message } => {
                        failure = Some(
                            message
                                .clone()
                                .unwrap_or_else(|| "replay error".to_owned()),
                        );
                    }
                    _ => {}
                }
                v.log.push(LoggedEvent {
                    elapsed,
                    event: event.clone(),
                });
            }

            // Only the freshest position is plotted.
            let latest = batch
                .messages
                .iter()
                .rev()
                .find_map(TelemetryEvent::firmware_pose);
            if let Some(fw) = latest {
                let sample = HistorySample::from_pose(&fw.to_operator_frame(), now_ms);
                v.live = Some(sample);
                v.history.append(sample, now_ms);
            }

            if let Some(err) = failure {
                v.fail("Replay failed", err);
                keep_polling = false;
            } else if batch.done {
                info!("replay complete after {:.2}s", elapsed.as_secs_f64());
                v.state = ReplayState::Completed;
                v.status = "Replay complete".to_owned();
                keep_polling = false;
            }
        });

        if !keep_polling {
            control.stop_poll = None;
        }
        keep_polling
    }
}

/// The poll loop. The next tick is only scheduled once the previous
/// request has settled, so a slow backend slows the loop down instead of
/// piling up requests.
async fn poll<T: ArmTransport>(
    shared: Arc<Shared<T>>,
    generation: u64,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => return,
            _ = tokio::time::sleep(shared.config.poll_interval) => {}
        }

        let reply = shared.transport.replay_status().await;
        if !shared.ingest(generation, reply) {
            return;
        }
    }
}
