//! Command serializer
//!
//! One worker task owns the `CommandExecutor`, so at most one command is on
//! the wire at any time. Callers hold a cloneable `DroneController` and talk
//! to the worker over two queues: a FIFO for everything and a priority
//! queue used only by Emergency, which overtakes queued-but-unsent commands.

use super::executor::{CommandExecutor, CommandOutcome, Request};
use crate::connection::SessionStatus;
use crate::telemetry::{TelemetryReader, TelemetrySample};
use crate::transport::TransportConnector;
use crate::video::{VideoFrame, VideoStream};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tello_link_shared::{
    now_ms, BatteryReading, Command, CommandKind, CommandStatus, DroneError, FlightStatus,
    MoveDirection, Result, RotateDirection, SafetyPolicy,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const QUEUE_DEPTH: usize = 32;

/// Tracks one request from submission to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    pub request: String,
    pub caller_id: String,
    pub status: CommandStatus,
    pub enqueued_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
}

/// State published by the worker after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneSnapshot {
    pub session: SessionStatus,
    /// Failed handshake attempts before the current session came up
    pub retry_count: u32,
    /// Wall-clock time the device last answered
    pub last_contact_ms: Option<u64>,
    pub flight_status: FlightStatus,
    pub battery: Option<BatteryReading>,
    pub last_updated_ms: u64,
    pub in_flight: Option<PendingRequest>,
    pub last_completed: Option<PendingRequest>,
}

/// Snapshot plus the parts that live outside the worker
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub drone: DroneSnapshot,
    /// Requests waiting behind the in-flight one
    pub queued: usize,
    pub video_streaming: bool,
    pub telemetry: Option<TelemetrySample>,
}

/// Counts a request as pending until dropped
struct PendingSlot(Arc<AtomicUsize>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Job {
    request: Request,
    caller_id: String,
    enqueued_at_ms: u64,
    respond_to: oneshot::Sender<Result<CommandOutcome>>,
    slot: PendingSlot,
}

/// Handle to the serializer worker
#[derive(Clone)]
pub struct DroneController {
    normal_tx: mpsc::Sender<Job>,
    priority_tx: mpsc::Sender<Job>,
    pending: Arc<AtomicUsize>,
    state_rx: watch::Receiver<DroneSnapshot>,
    policy: SafetyPolicy,
    telemetry: Option<Arc<TelemetryReader>>,
    video: Arc<VideoStream>,
}

impl DroneController {
    /// Move the executor into a worker task and return its handle
    pub fn spawn<C: TransportConnector>(executor: CommandExecutor<C>) -> Self {
        let (normal_tx, normal_rx) = mpsc::channel(QUEUE_DEPTH);
        let (priority_tx, priority_rx) = mpsc::channel(QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(snapshot(&executor, None, None));

        let policy = executor.policy();
        let telemetry = executor.connection().telemetry();
        let video = executor.video();

        tokio::spawn(async move {
            run_worker(executor, normal_rx, priority_rx, state_tx).await;
        });

        Self {
            normal_tx,
            priority_tx,
            pending: Arc::new(AtomicUsize::new(0)),
            state_rx,
            policy,
            telemetry,
            video,
        }
    }

    /// Queue a request behind anything already submitted
    pub async fn execute(&self, request: Request, caller_id: &str) -> Result<CommandOutcome> {
        self.submit(request, caller_id, false).await
    }

    /// Like `execute`, but fail with `Busy` instead of waiting.
    ///
    /// Emergency is never refused.
    pub async fn try_execute(&self, request: Request, caller_id: &str) -> Result<CommandOutcome> {
        self.submit(request, caller_id, true).await
    }

    async fn submit(&self, request: Request, caller_id: &str, nowait: bool) -> Result<CommandOutcome> {
        // Range checks never wait for the queue
        if let Request::Drone(cmd) = &request {
            self.policy.check_parameters(&cmd.kind())?;
        }

        let priority = request.is_emergency();
        if nowait && !priority {
            self.pending
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .map_err(|_| DroneError::Busy)?;
        } else {
            self.pending.fetch_add(1, Ordering::SeqCst);
        }
        let slot = PendingSlot(self.pending.clone());

        let (respond_to, response) = oneshot::channel();
        let job = Job {
            request,
            caller_id: caller_id.to_string(),
            enqueued_at_ms: now_ms(),
            respond_to,
            slot,
        };

        let queue = if priority {
            &self.priority_tx
        } else {
            &self.normal_tx
        };
        queue
            .send(job)
            .await
            .map_err(|_| DroneError::connection("drone controller stopped"))?;

        response
            .await
            .map_err(|_| DroneError::connection("drone controller stopped"))?
    }

    fn drone(kind: CommandKind, caller_id: &str) -> Request {
        Request::Drone(Command::new(kind, caller_id))
    }

    pub async fn connect(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Request::Connect, caller_id).await
    }

    pub async fn disconnect(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Request::Disconnect, caller_id).await
    }

    /// Battery query
    pub async fn query(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Self::drone(CommandKind::Query, caller_id), caller_id)
            .await
    }

    pub async fn takeoff(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Self::drone(CommandKind::Takeoff, caller_id), caller_id)
            .await
    }

    pub async fn land(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Self::drone(CommandKind::Land, caller_id), caller_id)
            .await
    }

    pub async fn emergency(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Self::drone(CommandKind::Emergency, caller_id), caller_id)
            .await
    }

    pub async fn move_by(
        &self,
        direction: MoveDirection,
        distance_cm: u32,
        caller_id: &str,
    ) -> Result<CommandOutcome> {
        let kind = CommandKind::Move {
            direction,
            distance_cm,
        };
        self.execute(Self::drone(kind, caller_id), caller_id).await
    }

    pub async fn rotate(
        &self,
        direction: RotateDirection,
        degrees: u32,
        caller_id: &str,
    ) -> Result<CommandOutcome> {
        let kind = CommandKind::Rotate { direction, degrees };
        self.execute(Self::drone(kind, caller_id), caller_id).await
    }

    pub async fn video_start(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Request::VideoStart, caller_id).await
    }

    pub async fn video_stop(&self, caller_id: &str) -> Result<CommandOutcome> {
        self.execute(Request::VideoStop, caller_id).await
    }

    /// Latest still image; served without the serializer
    pub async fn video_frame(&self) -> Result<VideoFrame> {
        self.video.latest_frame().await
    }

    /// Requests submitted but not finished, including the in-flight one
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> DroneSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Notified whenever the worker publishes a new snapshot
    pub fn subscribe(&self) -> watch::Receiver<DroneSnapshot> {
        self.state_rx.clone()
    }

    /// Current state without touching the device
    pub async fn status(&self) -> StatusReport {
        let drone = self.snapshot();
        let in_flight = usize::from(drone.in_flight.is_some());
        let telemetry = match &self.telemetry {
            Some(t) => t.latest().await,
            None => None,
        };

        StatusReport {
            queued: self.pending().saturating_sub(in_flight),
            video_streaming: self.video.is_running().await,
            telemetry,
            drone,
        }
    }
}

fn snapshot<C: TransportConnector>(
    executor: &CommandExecutor<C>,
    in_flight: Option<PendingRequest>,
    last_completed: Option<PendingRequest>,
) -> DroneSnapshot {
    let state = executor.drone_state();
    DroneSnapshot {
        session: executor.session_status(),
        retry_count: executor.connection().retry_count(),
        last_contact_ms: executor.connection().last_contact_ms(),
        flight_status: state.flight_status,
        battery: state.battery,
        last_updated_ms: state.last_updated_ms,
        in_flight,
        last_completed,
    }
}

async fn run_worker<C: TransportConnector>(
    mut executor: CommandExecutor<C>,
    mut normal_rx: mpsc::Receiver<Job>,
    mut priority_rx: mpsc::Receiver<Job>,
    state_tx: watch::Sender<DroneSnapshot>,
) {
    let mut last_completed: Option<PendingRequest> = None;

    loop {
        let job = tokio::select! {
            biased;
            Some(job) = priority_rx.recv() => job,
            Some(job) = normal_rx.recv() => job,
            else => break,
        };

        let Job {
            request,
            caller_id,
            enqueued_at_ms,
            respond_to,
            slot,
        } = job;

        // Emergency goes out even when nobody waits for the answer
        if respond_to.is_closed() && !request.is_emergency() {
            debug!("Dropping {} from {}: caller went away", request.name(), caller_id);
            continue;
        }

        let mut pending = PendingRequest {
            request: request.describe(),
            caller_id,
            status: CommandStatus::InFlight,
            enqueued_at_ms,
            started_at_ms: Some(now_ms()),
            finished_at_ms: None,
        };
        let _ = state_tx.send(snapshot(&executor, Some(pending.clone()), last_completed.clone()));

        let result = executor.execute(request).await;

        pending.finished_at_ms = Some(now_ms());
        pending.status = match &result {
            Ok(outcome) => {
                info!("{} for {}: {}", pending.request, pending.caller_id, outcome.message);
                CommandStatus::Completed
            }
            Err(e @ DroneError::Timeout { .. }) => {
                warn!("{} for {}: {}", pending.request, pending.caller_id, e);
                CommandStatus::TimedOut
            }
            Err(e) => {
                warn!("{} for {} failed: {}", pending.request, pending.caller_id, e);
                CommandStatus::Failed
            }
        };

        let _ = state_tx.send(snapshot(&executor, None, Some(pending.clone())));
        last_completed = Some(pending);

        drop(slot);
        let _ = respond_to.send(result);
    }

    info!("Drone controller stopped");
}
