use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use harvestar_geom::{FirmwarePose, Pose, ValidationError};
use harvestar_protocol::{MoveReply, MoveRequest};
use log::{debug, info, warn};
use serde::Deserialize as _;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::RetryPolicy;
use crate::transport::ArmTransport;

/// How a single move command turned out.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandResult {
    /// The arm got there. The pose is the one it reported, in the operator frame.
    Moved(Pose),
    OutOfBounds(String),
    RemoteError(String),
    /// The reply didn't look like anything we know; this is the raw body.
    Unrecognized(String),
    TransportFailure(String),
    ValidationFailed(ValidationError),
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Moved(p) => write!(f, "Arm moved to ({}, {}, {})", p.x, p.y, p.z),
            CommandResult::OutOfBounds(msg) => write!(f, "OUT OF BOUNDS: {msg}"),
            CommandResult::RemoteError(msg) => write!(f, "Arm reported an error: {msg}"),
            CommandResult::Unrecognized(_) => write!(f, "Unknown response."),
            CommandResult::TransportFailure(msg) => write!(f, "Network or server error: {msg}"),
            CommandResult::ValidationFailed(e) => write!(f, "Invalid coordinates: {e}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchState {
    Idle,
    /// The first attempt is on the wire.
    Sending { attempt: u32 },
    /// An earlier attempt failed; this one is waiting out the backoff or
    /// on the wire.
    Retrying { attempt: u32 },
    Finished(CommandResult),
}

impl DispatchState {
    pub fn attempt(&self) -> Option<u32> {
        match self {
            DispatchState::Sending { attempt } | DispatchState::Retrying { attempt } => {
                Some(*attempt)
            }
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.attempt().is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("a move command is already in flight")]
    Busy,
}

/// Everything we need to know about one command while it's being retried.
#[derive(Clone, Copy, Debug)]
struct Attempt {
    number: u32,
    pose: Pose,
}

impl Attempt {
    fn first(pose: Pose) -> Self {
        Attempt { number: 1, pose }
    }

    fn next(self) -> Self {
        Attempt {
            number: self.number + 1,
            ..self
        }
    }
}

struct BusyGuard<'a> {
    flag: &'a AtomicBool,
    state: &'a watch::Sender<DispatchState>,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool, state: &'a watch::Sender<DispatchState>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag, state })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        // A send that was dropped mid-flight never got to publish a result.
        self.state.send_if_modified(|s| {
            if s.is_busy() {
                *s = DispatchState::Idle;
                true
            } else {
                false
            }
        });
        self.flag.store(false, Ordering::Release);
    }
}

/// Sends move commands to the arm, one at a time.
pub struct CommandDispatcher<T> {
    transport: Arc<T>,
    policy: RetryPolicy,
    busy: AtomicBool,
    state: watch::Sender<DispatchState>,
}

impl<T: ArmTransport> CommandDispatcher<T> {
    pub fn new(transport: Arc<T>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(DispatchState::Idle);
        CommandDispatcher {
            transport,
            policy,
            busy: AtomicBool::new(false),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DispatchState {
        self.state.borrow().clone()
    }

    /// Moves the arm to `pose`.
    ///
    /// Poses that fail validation never reach the network. Transport
    /// failures are retried with the same pose according to the retry
    /// policy; every other reply is final. Calling this while another
    /// command is still in flight fails with [`DispatchError::Busy`] and
    /// leaves that command alone.
    pub async fn send(&self, pose: Pose) -> Result<CommandResult, DispatchError> {
        let _busy = BusyGuard::acquire(&self.busy, &self.state).ok_or(DispatchError::Busy)?;

        let result = match pose.validate() {
            Err(e) => {
                info!("not sending {pose:?}: {e}");
                CommandResult::ValidationFailed(e)
            }
            Ok(()) => self.dispatch(Attempt::first(pose)).await,
        };

        self.state.send_replace(DispatchState::Finished(result.clone()));
        Ok(result)
    }

    async fn dispatch(&self, mut attempt: Attempt) -> CommandResult {
        let firmware = attempt.pose.to_firmware_frame();
        self.state.send_replace(DispatchState::Sending {
            attempt: attempt.number,
        });

        loop {
            debug!("move attempt {}: {firmware:?}", attempt.number);
            match self.transport.move_arm(MoveRequest::from(firmware)).await {
                Ok(body) => return classify(body, firmware),
                Err(e) if attempt.number <= self.policy.max_retries => {
                    attempt = attempt.next();
                    warn!("connection error: {e}, retrying (attempt {})...", attempt.number);
                    self.state.send_replace(DispatchState::Retrying {
                        attempt: attempt.number,
                    });
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    warn!("giving up after {} attempts: {e}", attempt.number);
                    return CommandResult::TransportFailure(e.to_string());
                }
            }
        }
    }
}

fn classify(body: Value, sent: FirmwarePose) -> CommandResult {
    let result = match MoveReply::deserialize(&body) {
        Ok(MoveReply::Update { data }) => CommandResult::Moved(
            FirmwarePose(Pose::new(data.x, data.y, data.z, sent.0.effector)).to_operator_frame(),
        ),
        Ok(reply @ MoveReply::Bounds { .. }) => {
            CommandResult::OutOfBounds(reply.bounds_message().unwrap_or_default().to_owned())
        }
        Ok(MoveReply::Error { message }) => {
            CommandResult::RemoteError(message.unwrap_or_else(|| "unknown error".to_owned()))
        }
        Err(_) => CommandResult::Unrecognized(body.to_string()),
    };
    info!("{result}");
    result
}
