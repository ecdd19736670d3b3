use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use harvestar_protocol::{
    MoveRequest, ReadyReply, ReplayStatus, StartReplayReply, StartReplayRequest, ARM_READY_PATH,
    MOVE_ARM_PATH, REPLAY_STATUS_PATH, START_REPLAY_PATH,
};
use log::debug;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("backend answered with status {0}")]
    Status(u16),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The four endpoints of the arm's backend.
///
/// Each call is exactly one exchange with the backend; retrying is up to
/// the caller.
pub trait ArmTransport: Send + Sync + 'static {
    fn arm_ready(&self) -> impl Future<Output = Result<ReadyReply, TransportError>> + Send;

    /// Sends a move command, returning the reply body undecoded so that
    /// unexpected shapes can be reported as-is.
    fn move_arm(
        &self,
        req: MoveRequest,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    fn start_replay(
        &self,
        req: StartReplayRequest,
    ) -> impl Future<Output = Result<StartReplayReply, TransportError>> + Send;

    fn replay_status(&self) -> impl Future<Output = Result<ReplayStatus, TransportError>> + Send;
}

struct Endpoints {
    arm_ready: Url,
    move_arm: Url,
    start_replay: Url,
    replay_status: Url,
}

/// The arm, as reached over its HTTP backend.
pub struct HttpArm {
    client: reqwest::Client,
    endpoints: Endpoints,
    request_timeout: Duration,
}

impl HttpArm {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let mut base =
            Url::parse(base_url).with_context(|| format!("bad backend url {base_url:?}"))?;
        // Endpoints are joined relative to the base, so any path prefix on it
        // is kept. That needs a trailing slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = |path: &str| base.join(path.trim_start_matches('/'));
        let endpoints = Endpoints {
            arm_ready: endpoint(ARM_READY_PATH)?,
            move_arm: endpoint(MOVE_ARM_PATH)?,
            start_replay: endpoint(START_REPLAY_PATH)?,
            replay_status: endpoint(REPLAY_STATUS_PATH)?,
        };

        Ok(HttpArm {
            client: reqwest::Client::new(),
            endpoints,
            request_timeout,
        })
    }

    async fn exchange(&self, req: RequestBuilder) -> Result<(StatusCode, Vec<u8>), TransportError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        debug!("{} {} bytes", status, body.len());
        Ok((status, body.to_vec()))
    }

    /// Decodes a reply. Error statuses are transport failures unless the
    /// body is a well-formed reply that `accept_on_error` recognizes; the
    /// backend reports some semantic rejections that way.
    fn decode<T: DeserializeOwned>(
        status: StatusCode,
        body: &[u8],
        accept_on_error: impl Fn(&T) -> bool,
    ) -> Result<T, TransportError> {
        if status.is_success() {
            return Ok(serde_json::from_slice(body)?);
        }
        match serde_json::from_slice::<T>(body) {
            Ok(reply) if accept_on_error(&reply) => Ok(reply),
            _ => Err(TransportError::Status(status.as_u16())),
        }
    }
}

impl ArmTransport for HttpArm {
    // No timeout here: the backend holds this open until the arm reports in.
    async fn arm_ready(&self) -> Result<ReadyReply, TransportError> {
        let (status, body) = self
            .exchange(self.client.get(self.endpoints.arm_ready.clone()))
            .await?;
        Self::decode(status, &body, |r: &ReadyReply| !r.ready)
    }

    async fn move_arm(&self, req: MoveRequest) -> Result<Value, TransportError> {
        let (status, body) = self
            .exchange(
                self.client
                    .post(self.endpoints.move_arm.clone())
                    .json(&req)
                    .timeout(self.request_timeout),
            )
            .await?;
        Self::decode(status, &body, |v: &Value| {
            v.get("type").and_then(Value::as_str) == Some("error")
        })
    }

    async fn start_replay(
        &self,
        req: StartReplayRequest,
    ) -> Result<StartReplayReply, TransportError> {
        let (status, body) = self
            .exchange(
                self.client
                    .post(self.endpoints.start_replay.clone())
                    .json(&req)
                    .timeout(self.request_timeout),
            )
            .await?;
        Self::decode(status, &body, |r: &StartReplayReply| !r.success)
    }

    async fn replay_status(&self) -> Result<ReplayStatus, TransportError> {
        let (status, body) = self
            .exchange(
                self.client
                    .get(self.endpoints.replay_status.clone())
                    .timeout(self.request_timeout),
            )
            .await?;
        Self::decode(status, &body, |_: &ReplayStatus| false)
    }
}
