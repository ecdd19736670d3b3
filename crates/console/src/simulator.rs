//! An arm that lives in memory, for running the console without hardware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use harvestar_geom::{FirmwarePose, Pose};
use harvestar_protocol::{
    BoundsDetail, MoveReply, MoveRequest, Position, ReadyReply, ReplayStatus, StartReplayReply,
    StartReplayRequest, TelemetryEvent,
};
use log::{debug, info};
use serde_json::Value;

use crate::transport::{ArmTransport, TransportError};

/// How far from the base the gripper can get, in cm.
const REACH: f64 = 35.0;

struct Step {
    // Firmware frame.
    pose: [f64; 4],
    hold: Duration,
}

fn step(pose: [f64; 4], hold_ms: u64) -> Step {
    Step {
        pose,
        hold: Duration::from_millis(hold_ms),
    }
}

fn harvest() -> Vec<Step> {
    let mut steps = Vec::new();
    // Pick a leaf, carry it to the basket, drop it. Three times over.
    for (pick, basket) in [
        (
            [
                [16.5, 20.5, 3.5, 45.0],
                [20.0, 24.0, 2.5, 45.0],
                [19.0, 23.0, 2.5, 40.0],
                [17.0, 23.0, 6.0, 45.0],
            ],
            [25.5, -16.0],
        ),
        (
            [
                [16.5, 20.5, 3.5, 45.0],
                [20.0, 24.0, 2.5, 45.0],
                [19.0, 23.0, 2.5, 35.0],
                [16.0, 22.0, 6.0, 45.0],
            ],
            [28.5, -12.5],
        ),
        (
            [
                [16.5, 20.5, 6.0, 45.0],
                [21.0, 25.0, 5.5, 45.0],
                [21.0, 25.0, 5.5, 50.0],
                [16.0, 21.0, 6.0, 45.0],
            ],
            [31.5, -9.5],
        ),
    ] {
        for (pose, hold) in pick.into_iter().zip([500, 400, 200, 200]) {
            steps.push(step(pose, hold));
        }
        let [bx, by] = basket;
        steps.push(step([bx, by, 8.0, 45.0], 800));
        steps.push(step([bx, by, 8.0, 90.0], 200));
        steps.push(step([bx, by, 10.0, 90.0], 200));
    }
    steps.push(step([25.0, 0.0, 10.0, 90.0], 200));
    steps
}

fn circle() -> Vec<Step> {
    const POINTS: usize = 24;
    (0..=POINTS)
        .map(|i| {
            let theta = i as f64 / POINTS as f64 * std::f64::consts::TAU;
            step([25.0 + 6.0 * theta.cos(), 6.0 * theta.sin(), 4.0, 45.0], 150)
        })
        .collect()
}

fn wave() -> Vec<Step> {
    [
        [28.0, -10.0, 15.0, 45.0],
        [28.0, 0.0, 10.0, 40.0],
        [28.0, 10.0, 15.0, 45.0],
        [28.0, 0.0, 10.0, 40.0],
        [28.0, -10.0, 15.0, 45.0],
        [28.0, 0.0, 10.0, 40.0],
        [28.0, 10.0, 15.0, 45.0],
        [28.0, 0.0, 15.0, 40.0],
    ]
    .into_iter()
    .map(|p| step(p, 200))
    .collect()
}

fn sequence(index: u32) -> Option<Vec<Step>> {
    match index {
        0 => Some(harvest()),
        1 => Some(circle()),
        2 => Some(wave()),
        _ => None,
    }
}

#[derive(Default)]
struct SimState {
    running: bool,
    // Telemetry not yet collected by a status request.
    outbox: Vec<TelemetryEvent>,
    visited: Vec<FirmwarePose>,
}

/// Answers like the real backend does, with a perfectly obedient arm behind it.
///
/// Replays run in the background on tokio's clock and report each step as
/// it's reached.
#[derive(Clone, Default)]
pub struct SimulatedArm {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedArm {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every pose the arm has been driven to, in the firmware frame.
    pub fn visited(&self) -> Vec<FirmwarePose> {
        self.state().visited.clone()
    }

    fn reach(&self, target: FirmwarePose) -> Result<Position, String> {
        target.to_operator_frame().validate().map_err(|e| e.to_string())?;
        let p = target.0;
        let dist = p.x.hypot(p.y);
        if dist > REACH {
            return Err(format!("({}, {}) is {dist:.1}cm from the base", p.x, p.y));
        }
        self.state().visited.push(target);
        Ok(Position {
            x: p.x,
            y: p.y,
            z: p.z,
        })
    }

    async fn play(self, index: u32, steps: Vec<Step>) {
        for Step { pose, hold } in steps {
            let [x, y, z, effector] = pose;
            let event = match self.reach(FirmwarePose(Pose::new(x, y, z, effector))) {
                Ok(_) => TelemetryEvent::Position {
                    data: pose.to_vec(),
                },
                Err(message) => TelemetryEvent::Bounds {
                    message: Some(message),
                },
            };
            self.state().outbox.push(event);
            tokio::time::sleep(hold).await;
        }

        info!("simulated replay {index} finished");
        let mut state = self.state();
        state.outbox.push(TelemetryEvent::Done {
            message: Some(format!("Replay {index} completed!")),
        });
        state.running = false;
    }
}

impl ArmTransport for SimulatedArm {
    async fn arm_ready(&self) -> Result<ReadyReply, TransportError> {
        Ok(ReadyReply {
            ready: true,
            error: None,
        })
    }

    async fn move_arm(&self, req: MoveRequest) -> Result<Value, TransportError> {
        let MoveRequest(target) = req;
        debug!("simulated move to {target:?}");
        let reply = match self.reach(target) {
            Ok(data) => MoveReply::Update { data },
            Err(message) => MoveReply::Bounds {
                data: Some(BoundsDetail {
                    message: Some(message),
                }),
            },
        };
        Ok(serde_json::to_value(reply)?)
    }

    async fn start_replay(
        &self,
        req: StartReplayRequest,
    ) -> Result<StartReplayReply, TransportError> {
        let Some(steps) = sequence(req.index) else {
            return Ok(StartReplayReply {
                success: false,
                error: Some(format!("Replay index {} not defined", req.index)),
            });
        };

        {
            let mut state = self.state();
            state.running = true;
            state.outbox.clear();
        }
        tokio::spawn(self.clone().play(req.index, steps));
        Ok(StartReplayReply {
            success: true,
            error: None,
        })
    }

    async fn replay_status(&self) -> Result<ReplayStatus, TransportError> {
        let mut state = self.state();
        Ok(ReplayStatus {
            messages: std::mem::take(&mut state.outbox),
            done: !state.running,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{ReplayConfig, RetryPolicy};
    use crate::dispatcher::{CommandDispatcher, CommandResult};
    use crate::replay::{ReplaySession, ReplayState, SEQUENCES};

    #[test]
    fn every_sequence_is_reachable() {
        for s in SEQUENCES {
            let steps = sequence(s.id).unwrap();
            assert!(!steps.is_empty());
            for Step { pose, .. } in steps {
                let fw = FirmwarePose(Pose::new(pose[0], pose[1], pose[2], pose[3]));
                assert!(pose[0].hypot(pose[1]) <= REACH, "{} {pose:?}", s.name);
                fw.to_operator_frame().validate().unwrap();
            }
        }
        assert!(sequence(3).is_none());
    }

    #[tokio::test]
    async fn moves_and_bounds() {
        let arm = Arc::new(SimulatedArm::new());
        let d = CommandDispatcher::new(arm.clone(), RetryPolicy::default());

        let res = d.send(Pose::new(-10.0, 25.0, 5.0, 30.0)).await.unwrap();
        assert_eq!(res, CommandResult::Moved(Pose::new(-10.0, 25.0, 5.0, 30.0)));

        let res = d.send(Pose::new(30.0, 40.0, 5.0, 30.0)).await.unwrap();
        assert!(matches!(res, CommandResult::OutOfBounds(_)), "{res:?}");
        assert_eq!(arm.visited(), vec![FirmwarePose(Pose::new(25.0, -10.0, 5.0, 30.0))]);
    }

    #[tokio::test]
    async fn unknown_sequence_is_refused() {
        let arm = SimulatedArm::new();
        let reply = arm.start_replay(StartReplayRequest { index: 9 }).await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("Replay index 9 not defined"));
    }

    #[tokio::test(start_paused = true)]
    async fn wave_plays_through_a_session() {
        let arm = Arc::new(SimulatedArm::new());
        let session = ReplaySession::new(arm.clone(), ReplayConfig::default());

        session.start(Some(2)).await.unwrap();
        let snap = session
            .subscribe()
            .wait_for(|v| v.state.is_terminal())
            .await
            .unwrap()
            .clone();

        assert_eq!(snap.state, ReplayState::Completed);
        let positions = snap
            .log
            .iter()
            .filter(|e| matches!(e.event, TelemetryEvent::Position { .. }))
            .count();
        assert_eq!(positions, wave().len());
        assert_eq!(
            snap.log.last().map(|e| &e.event),
            Some(&TelemetryEvent::Done {
                message: Some("Replay 2 completed!".to_owned())
            })
        );
        // Last wave pose, firmware (28, 0, 15) seen from the operator's side.
        let live = snap.live.unwrap();
        assert_eq!((live.x, live.y, live.z), (0.0, 28.0, 15.0));
    }
}
