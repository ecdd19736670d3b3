use std::sync::Arc;

use harvestar_geom::{Axis, Pose};
use log::{info, warn};
use tokio::sync::watch;

use crate::config::ConsoleConfig;
use crate::dispatcher::{CommandDispatcher, CommandResult, DispatchError};
use crate::replay::ReplaySession;
use crate::transport::{ArmTransport, TransportError};

/// Where the arm starts out: centred, on the table, gripper half open.
pub const INITIAL_TARGET: Pose = Pose::new(0.0, 0.0, 0.0, 45.0);

#[derive(Debug, thiserror::Error)]
pub enum ReadyError {
    #[error("arm is not ready: {0}")]
    NotReady(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything the operator can do to the arm, over one transport.
pub struct Console<T> {
    transport: Arc<T>,
    dispatcher: CommandDispatcher<T>,
    replay: ReplaySession<T>,
    target: watch::Sender<Pose>,
}

impl<T: ArmTransport> Console<T> {
    pub fn new(transport: T, config: &ConsoleConfig) -> Self {
        let transport = Arc::new(transport);
        let (target, _) = watch::channel(INITIAL_TARGET);
        Console {
            dispatcher: CommandDispatcher::new(transport.clone(), config.retry),
            replay: ReplaySession::new(transport.clone(), config.replay),
            transport,
            target,
        }
    }

    /// Asks the backend whether the arm has finished booting. The backend
    /// may hold this request open for a long time.
    pub async fn check_ready(&self) -> Result<(), ReadyError> {
        let reply = self.transport.arm_ready().await?;
        if reply.ready {
            info!("arm is ready");
            Ok(())
        } else {
            let reason = reply.error.unwrap_or_else(|| "no reason given".to_owned());
            warn!("arm not ready: {reason}");
            Err(ReadyError::NotReady(reason))
        }
    }

    pub fn target(&self) -> Pose {
        *self.target.borrow()
    }

    pub fn subscribe_target(&self) -> watch::Receiver<Pose> {
        self.target.subscribe()
    }

    /// Changes one axis of the pending target. Nothing is validated or sent.
    pub fn edit(&self, axis: Axis, value: f64) -> Pose {
        self.target.send_modify(|t| *t = t.with(axis, value));
        self.target()
    }

    pub async fn send_target(&self) -> Result<CommandResult, DispatchError> {
        self.dispatcher.send(self.target()).await
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<T> {
        &self.dispatcher
    }

    pub fn replay(&self) -> &ReplaySession<T> {
        &self.replay
    }
}

#[cfg(test)]
mod tests {
    use harvestar_geom::ValidationError;
    use harvestar_protocol::ReadyReply;
    use serde_json::json;

    use super::*;
    use crate::testing::ScriptedArm;

    fn console() -> Console<ScriptedArm> {
        Console::new(ScriptedArm::default(), &ConsoleConfig::default())
    }

    #[tokio::test]
    async fn readiness() {
        let c = console();
        c.transport.push_ready(Ok(ReadyReply {
            ready: false,
            error: Some("Timeout.".to_owned()),
        }));
        c.transport.push_ready(Err(ScriptedArm::unavailable()));

        assert!(matches!(c.check_ready().await, Err(ReadyError::NotReady(r)) if r == "Timeout."));
        assert!(matches!(c.check_ready().await, Err(ReadyError::Transport(_))));
        c.check_ready().await.unwrap();
    }

    #[tokio::test]
    async fn edits_accumulate_into_the_target() {
        let c = console();
        let mut rx = c.subscribe_target();
        assert_eq!(c.target(), INITIAL_TARGET);

        c.edit(Axis::X, -12.0);
        assert!(rx.has_changed().unwrap());
        assert_eq!(c.edit(Axis::Y, 22.5), Pose::new(-12.0, 22.5, 0.0, 45.0));

        c.transport
            .push_move(Ok(json!({"type": "update", "data": {"x": 22.5, "y": -12.0, "z": 0.0}})));
        let res = c.send_target().await.unwrap();
        assert_eq!(res, CommandResult::Moved(Pose::new(-12.0, 22.5, 0.0, 45.0)));
        assert_eq!(c.transport.sent_moves(), vec![Pose::new(22.5, -12.0, 0.0, 45.0)]);
    }

    #[tokio::test]
    async fn bad_edits_are_caught_on_send() {
        let c = console();
        c.edit(Axis::Z, 25.0);
        let res = c.send_target().await.unwrap();
        assert_eq!(
            res,
            CommandResult::ValidationFailed(ValidationError::ZOutOfRange)
        );
        assert_eq!(c.transport.move_calls(), 0);
    }
}
