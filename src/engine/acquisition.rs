//! The acquisition engine and its background task.
//!
//! The engine owns the stage, the capture device, the configured plan and route, and
//! at most one acquisition task. Observers read two `watch` channels:
//!
//! - status ([`EngineStatus`]): lifecycle state, run id, last fault;
//! - progress (`Arc<MeasurementProgress>`): replaced after every step, never mutated
//!   once published.
//!
//! # Step atomicity
//!
//! One loop iteration is "reposition, capture, store, publish". The cancellation token
//! is checked once per iteration, before the step starts. A stop request therefore lets
//! the in-flight step finish and publish, and the next run resumes right after it.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut engine = AcquisitionEngine::initialize(transport, capture, &config.stage).await?;
//! engine.run_measurement(plan, &hydrophone).await?;
//!
//! let mut progress = engine.subscribe_progress();
//! while progress.changed().await.is_ok() {
//!     if let Some(p) = progress.borrow().as_ref() {
//!         println!("{}%", p.percent);
//!     }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::progress::{MeasurementProgress, MeasurementResult};
use super::state::{EngineStatus, XyzSystemState};
use crate::config::StageConfig;
use crate::error::{AppResult, TankError};
use crate::geometry::{Probe, SafetyChecker, Vec3};
use crate::hardware::{CaptureDevice, MotorTransport, Reading, Stage};
use crate::plan::{MeasurementPlan, DEFAULT_MAX_GRID_POINTS};
use crate::route::{ScanRoute, ScanRoutePlanner};
use crate::storage::ResultWriter;

/// Plan and route produced by `configure`, shared read-only with the task.
#[derive(Clone)]
struct Session {
    plan: Arc<MeasurementPlan>,
    route: Arc<ScanRoute>,
}

struct RunTask {
    cancel: CancellationToken,
    handle: JoinHandle<AppResult<()>>,
}

/// Drives the stage along the configured route and collects one reading per point.
pub struct AcquisitionEngine {
    stage: Arc<Mutex<Stage>>,
    capture: Arc<dyn CaptureDevice>,
    session: Option<Session>,
    status_tx: watch::Sender<EngineStatus>,
    progress_tx: watch::Sender<Option<Arc<MeasurementProgress>>>,
    task: Option<RunTask>,
    max_grid_points: usize,
}

impl AcquisitionEngine {
    /// Build the stage, home every axis and return an engine in `AtOrigin`.
    pub async fn initialize(
        transport: Arc<dyn MotorTransport>,
        capture: Arc<dyn CaptureDevice>,
        stage_config: &StageConfig,
    ) -> AppResult<Self> {
        let mut stage = Stage::new(transport, stage_config.origin, stage_config.max_travel);
        stage.home().await?;
        Ok(Self::with_stage(stage, capture).with_max_grid_points(stage_config.max_grid_points))
    }

    /// Wrap an already homed stage.
    pub fn with_stage(stage: Stage, capture: Arc<dyn CaptureDevice>) -> Self {
        let (status_tx, _) = watch::channel(EngineStatus::default());
        let (progress_tx, _) = watch::channel(None);
        Self {
            stage: Arc::new(Mutex::new(stage)),
            capture,
            session: None,
            status_tx,
            progress_tx,
            task: None,
            max_grid_points: DEFAULT_MAX_GRID_POINTS,
        }
    }

    /// Refuse plans whose grid has more than `max_points` points.
    pub fn with_max_grid_points(mut self, max_points: usize) -> Self {
        self.max_grid_points = max_points;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> XyzSystemState {
        self.status_tx.borrow().state
    }

    /// Current status snapshot.
    pub fn status(&self) -> EngineStatus {
        self.status_tx.borrow().clone()
    }

    /// Latest progress snapshot, if a run has started since the last configure.
    pub fn progress(&self) -> Option<Arc<MeasurementProgress>> {
        self.progress_tx.borrow().clone()
    }

    /// Receive every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Receive every published progress snapshot.
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<Arc<MeasurementProgress>>> {
        self.progress_tx.subscribe()
    }

    /// The configured plan.
    pub fn plan(&self) -> Option<Arc<MeasurementPlan>> {
        self.session.as_ref().map(|s| s.plan.clone())
    }

    /// The route of the configured plan.
    pub fn route(&self) -> Option<Arc<ScanRoute>> {
        self.session.as_ref().map(|s| s.route.clone())
    }

    /// Tracked motor positions (local frame). Waits for an in-flight step to finish.
    pub async fn motor_positions(&self) -> Vec3 {
        self.stage.lock().await.positions()
    }

    /// Validate `plan` for `probe`, expand its grid and build the route.
    ///
    /// Nothing moves. Any previous progress is discarded.
    #[instrument(skip_all, fields(plan = %plan.name))]
    pub async fn configure(&mut self, mut plan: MeasurementPlan, probe: &Probe) -> AppResult<()> {
        self.state().ensure_idle("configure")?;
        SafetyChecker::validate(&plan, probe)?;
        plan.materialize_grid_limited(self.max_grid_points)?;
        let route = ScanRoutePlanner::plan(&plan)?;

        self.join_task().await;
        self.stage.lock().await.set_at_step(None);
        self.progress_tx.send_replace(None);

        info!(
            steps = route.len(),
            vertical = plan.is_vertical,
            "measurement plan configured"
        );
        self.session = Some(Session {
            plan: Arc::new(plan),
            route: Arc::new(route),
        });
        Ok(())
    }

    /// Configure `plan`, then start it.
    pub async fn run_measurement(&mut self, plan: MeasurementPlan, probe: &Probe) -> AppResult<()> {
        self.configure(plan, probe).await?;
        self.start().await
    }

    /// Launch the acquisition task.
    ///
    /// From `Stopped` the run resumes after the last completed step, reusing the
    /// data collected so far. From any other idle state a fresh run starts at step 0.
    pub async fn start(&mut self) -> AppResult<()> {
        let state = self.state();
        state.begin_run()?;
        let session = self.session.clone().ok_or(TankError::NotConfigured)?;

        // a stopped task may still be finishing its last step
        self.join_task().await;

        let resumable = match (state, self.progress()) {
            (XyzSystemState::Stopped, Some(progress))
                if progress.total_steps == session.route.len() =>
            {
                Some(progress)
            }
            _ => None,
        };

        let (progress, run_id) = match resumable {
            Some(progress) => {
                let run_id = self.status_tx.borrow().run_id;
                info!(from = progress.next_index(), "resuming measurement");
                (progress, run_id.unwrap_or_else(Uuid::new_v4))
            }
            None => {
                let grid = session.plan.grid().ok_or(TankError::NotConfigured)?;
                let fresh = Arc::new(MeasurementProgress::new(grid.shape(), session.route.len()));
                self.progress_tx.send_replace(Some(fresh.clone()));
                let run_id = Uuid::new_v4();
                info!(%run_id, steps = session.route.len(), "starting measurement");
                (fresh, run_id)
            }
        };

        self.status_tx.send_modify(|status| {
            status.state = XyzSystemState::Running;
            status.run_id = Some(run_id);
            status.last_error = None;
        });

        let cancel = CancellationToken::new();
        let run = AcquisitionRun {
            session,
            stage: self.stage.clone(),
            capture: self.capture.clone(),
            status_tx: self.status_tx.clone(),
            progress_tx: self.progress_tx.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(run.execute(progress));
        self.task = Some(RunTask { cancel, handle });
        Ok(())
    }

    /// Request the running task to stop after its current step.
    ///
    /// Outside `Running` this is a no-op that only logs a warning.
    pub fn stop(&mut self) {
        // the task may finish between a read and a write, so decide inside the update
        let stopped = self
            .status_tx
            .send_if_modified(|status| match status.state.request_stop() {
                Some(next) => {
                    status.state = next;
                    true
                }
                None => false,
            });
        if !stopped {
            warn!(state = %self.state(), "stop requested but no measurement is running");
            return;
        }
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
        info!("measurement stop requested");
    }

    /// Continue a stopped measurement.
    pub async fn resume(&mut self) -> AppResult<()> {
        match self.state() {
            XyzSystemState::Stopped => self.start().await,
            XyzSystemState::Running => Err(TankError::AlreadyRunning),
            state => {
                warn!(%state, "resume requested but no measurement is stopped");
                Ok(())
            }
        }
    }

    /// Wait for the acquisition task to end and report how it ended.
    pub async fn wait_until_idle(&mut self) -> AppResult<XyzSystemState> {
        if let Some(task) = self.task.take() {
            match task.handle.await {
                Ok(result) => result?,
                Err(e) => return Err(TankError::TaskFailed(e.to_string())),
            }
        }
        Ok(self.state())
    }

    /// Build the result from the latest progress and hand it to `writer`.
    ///
    /// Allowed in every state; a partial measurement is saved with a warning.
    pub async fn save(
        &self,
        path: &Path,
        writer: &dyn ResultWriter,
    ) -> AppResult<MeasurementResult> {
        let session = self.session.as_ref().ok_or(TankError::NoProgress)?;
        let progress = self
            .progress()
            .filter(|p| p.last_index.is_some())
            .ok_or(TankError::NoProgress)?;

        if !progress.is_complete() {
            warn!(
                percent = progress.percent,
                "measurement not finished, saving partial data"
            );
        }

        let run_id = self.status_tx.borrow().run_id;
        let result = MeasurementResult::new((*session.plan).clone(), &progress, run_id);
        writer.write(&result, path).await?;
        Ok(result)
    }

    /// Stop a running measurement, wait for the task and release the session.
    pub async fn exit(&mut self) {
        if self.state().is_running() {
            self.stop();
        }
        self.join_task().await;
        self.session = None;
        info!("acquisition engine shut down");
    }

    async fn join_task(&mut self) {
        if let Some(task) = self.task.take() {
            match task.handle.await {
                Ok(Ok(())) => {}
                // already logged and published by the task
                Ok(Err(e)) => debug!(error = %e, "previous run ended with an error"),
                Err(e) => error!(error = %e, "acquisition task panicked"),
            }
        }
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
    }
}

/// Everything the background task needs, moved into it at spawn.
struct AcquisitionRun {
    session: Session,
    stage: Arc<Mutex<Stage>>,
    capture: Arc<dyn CaptureDevice>,
    status_tx: watch::Sender<EngineStatus>,
    progress_tx: watch::Sender<Option<Arc<MeasurementProgress>>>,
    cancel: CancellationToken,
}

impl AcquisitionRun {
    #[instrument(skip_all, fields(plan = %self.session.plan.name))]
    async fn execute(self, mut progress: Arc<MeasurementProgress>) -> AppResult<()> {
        let total = self.session.route.len();

        for index in progress.next_index()..total {
            if self.cancel.is_cancelled() {
                info!(completed = progress.completed(), "measurement stopped");
                return Ok(());
            }

            let outcome = match self.step(index).await {
                Ok(reading) => self.publish(&mut progress, index, reading),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                error!(step = index, error = %e, "measurement aborted");
                let message = e.to_string();
                self.status_tx.send_modify(|status| {
                    status.state = XyzSystemState::Stopped;
                    status.last_error = Some(message);
                });
                return Err(e);
            }
        }

        self.status_tx
            .send_modify(|status| status.state = XyzSystemState::Finished);
        info!(steps = total, "measurement finished");
        Ok(())
    }

    /// Bring the stage to route step `index` and take a reading there.
    async fn step(&self, index: usize) -> AppResult<Reading> {
        let route = &self.session.route;
        let plan = &self.session.plan;
        let target = route
            .step(index)
            .ok_or_else(|| TankError::TaskFailed(format!("route has no step {index}")))?;

        {
            let mut stage = self.stage.lock().await;
            match stage.at_step() {
                Some(at) if at == index => {}
                Some(at) if at + 1 == index => {
                    let code = route.codes()[at];
                    stage.apply(code, plan).await?;
                }
                _ => {
                    // fresh run, or the carriage was moved since: go straight to the point
                    let grid = plan.grid().ok_or(TankError::NotConfigured)?;
                    let point = grid.point(target.ix, target.iy, target.iz);
                    debug!(step = index, ?point, "repositioning stage");
                    stage.move_to_global(point).await?;
                }
            }
            stage.set_at_step(Some(index));
        }

        // captured without holding the stage lock
        self.capture.capture().await.map_err(TankError::capture)
    }

    fn publish(
        &self,
        progress: &mut Arc<MeasurementProgress>,
        index: usize,
        reading: Reading,
    ) -> AppResult<()> {
        let target = self
            .session
            .route
            .step(index)
            .ok_or_else(|| TankError::TaskFailed(format!("route has no step {index}")))?;
        let previous = progress.percent;

        let next = Arc::make_mut(progress);
        if !next.data.set(target.ix, target.iy, target.iz, reading) {
            return Err(TankError::TaskFailed(format!(
                "step {index} at ({}, {}, {}) lies outside the data grid {:?}",
                target.ix,
                target.iy,
                target.iz,
                next.data.shape()
            )));
        }
        next.last_index = Some(index);
        next.percent = MeasurementProgress::percent_of(index + 1, next.total_steps);

        if next.percent / 10 > previous / 10 {
            info!(percent = next.percent, step = index, "measurement progress");
        }
        self.progress_tx.send_replace(Some(progress.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Tank;
    use crate::hardware::mock::{RecordingTransport, SimulatedCapture};
    use crate::storage::JsonResultWriter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn plan(max: Vec3) -> MeasurementPlan {
        let tank = Tank::new("t", [0.5, 0.5, 0.5], [0.0; 3]).unwrap();
        MeasurementPlan::new("engine", tank, true, [0.1; 3], max, [0.01; 3]).unwrap()
    }

    fn probe() -> Probe {
        Probe::hydrophone("h", [0.02, 0.02, 0.02], [0.0; 3], 0.01)
    }

    async fn engine(latency: Duration) -> (AcquisitionEngine, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new().with_latency(latency));
        let capture = Arc::new(SimulatedCapture::new(transport.clone()));
        let engine = AcquisitionEngine::initialize(
            transport.clone(),
            capture,
            &StageConfig::default(),
        )
        .await
        .unwrap();
        (engine, transport)
    }

    #[tokio::test]
    async fn initialize_homes_every_axis() {
        let (engine, transport) = engine(Duration::ZERO).await;
        assert_eq!(engine.state(), XyzSystemState::AtOrigin);
        assert_eq!(transport.commands().await.len(), 3);
        assert_eq!(engine.motor_positions().await, [0.0; 3]);
    }

    #[tokio::test]
    async fn configure_is_idempotent_and_does_not_move() {
        let (mut engine, transport) = engine(Duration::ZERO).await;
        let before = transport.commands().await.len();

        engine.configure(plan([0.13, 0.12, 0.11]), &probe()).await.unwrap();
        let first = engine.route().unwrap();
        engine.configure(plan([0.13, 0.12, 0.11]), &probe()).await.unwrap();
        let second = engine.route().unwrap();

        assert_eq!(*first, *second);
        assert_eq!(first.len(), 4 * 3 * 2);
        assert_eq!(transport.commands().await.len(), before);
        assert_eq!(engine.state(), XyzSystemState::AtOrigin);
    }

    #[tokio::test]
    async fn unsafe_plan_is_rejected_without_state_change() {
        let (mut engine, _) = engine(Duration::ZERO).await;
        let err = engine
            .configure(plan([0.49, 0.12, 0.11]), &probe())
            .await
            .unwrap_err();
        assert!(matches!(err, TankError::TooCloseToTankWall { .. }));
        assert!(engine.plan().is_none());
        assert!(matches!(engine.start().await, Err(TankError::NotConfigured)));
    }

    #[tokio::test]
    async fn runs_to_completion() {
        let (mut engine, _) = engine(Duration::ZERO).await;
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();
        assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Finished);

        let progress = engine.progress().unwrap();
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.last_index, Some(23));
        assert!(progress.is_complete());
        assert!(progress.data.values().iter().all(|v| v[0] > 0.0));
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_first_run_continues() {
        let (mut engine, _) = engine(Duration::from_millis(2)).await;
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();
        assert!(matches!(engine.start().await, Err(TankError::AlreadyRunning)));
        assert!(matches!(
            engine.configure(plan([0.13, 0.12, 0.11]), &probe()).await,
            Err(TankError::Busy(_))
        ));
        assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Finished);
    }

    #[tokio::test]
    #[traced_test]
    async fn stop_when_not_running_is_a_no_op() {
        let (mut engine, _) = engine(Duration::ZERO).await;
        engine.stop();
        assert_eq!(engine.state(), XyzSystemState::AtOrigin);
        assert!(engine.status().last_error.is_none());
        assert!(logs_contain("no measurement is running"));
    }

    #[tokio::test]
    async fn stop_keeps_the_last_published_step() {
        let (mut engine, _) = engine(Duration::from_millis(2)).await;
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.stop();
        assert_eq!(engine.state(), XyzSystemState::Stopped);
        assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Stopped);

        let progress = engine.progress().unwrap();
        assert!(!progress.is_complete());
        let stopped_at = progress.last_index;

        // a second stop is a no-op
        engine.stop();
        assert_eq!(engine.progress().unwrap().last_index, stopped_at);
    }

    #[tokio::test]
    async fn start_from_finished_restarts_from_scratch() {
        let (mut engine, _) = engine(Duration::ZERO).await;
        engine
            .run_measurement(plan([0.11, 0.11, 0.11]), &probe())
            .await
            .unwrap();
        engine.wait_until_idle().await.unwrap();
        let first_run = engine.status().run_id;

        engine.start().await.unwrap();
        assert_ne!(engine.status().run_id, first_run);
        assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Finished);
        assert_eq!(engine.progress().unwrap().percent, 100);
    }

    #[tokio::test]
    async fn transport_fault_stops_the_run() {
        // 3 homing commands, 3 to reach the first point, then two more steps
        let transport = Arc::new(RecordingTransport::new().fail_after(8));
        let capture = Arc::new(SimulatedCapture::new(transport.clone()));
        let mut engine =
            AcquisitionEngine::initialize(transport, capture, &StageConfig::default())
                .await
                .unwrap();
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();

        let err = engine.wait_until_idle().await.unwrap_err();
        assert!(matches!(err, TankError::Transport { .. }));
        assert_eq!(engine.state(), XyzSystemState::Stopped);
        assert!(engine.status().last_error.is_some());
        assert_eq!(engine.progress().unwrap().last_index, Some(2));
    }

    #[tokio::test]
    async fn out_of_range_plan_faults_the_run() {
        let transport = Arc::new(RecordingTransport::new());
        let capture = Arc::new(SimulatedCapture::new(transport.clone()));
        let stage = StageConfig {
            origin: [0.0; 3],
            max_travel: [0.12, 3.0, 3.0],
            ..StageConfig::default()
        };
        let mut engine = AcquisitionEngine::initialize(transport, capture, &stage)
            .await
            .unwrap();
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();

        let err = engine.wait_until_idle().await.unwrap_err();
        assert!(matches!(err, TankError::OutOfRange { .. }));
        assert_eq!(engine.state(), XyzSystemState::Stopped);
    }

    #[tokio::test]
    async fn save_requires_progress() {
        let (mut engine, _) = engine(Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        assert!(matches!(
            engine.save(&path, &JsonResultWriter).await,
            Err(TankError::NoProgress)
        ));

        engine
            .run_measurement(plan([0.11, 0.11, 0.11]), &probe())
            .await
            .unwrap();
        engine.wait_until_idle().await.unwrap();
        let result = engine.save(&path, &JsonResultWriter).await.unwrap();
        assert!(result.complete);
        assert!(path.exists());
        assert_eq!(engine.state(), XyzSystemState::Finished);
    }

    #[tokio::test]
    async fn exit_stops_a_running_measurement() {
        let (mut engine, _) = engine(Duration::from_millis(2)).await;
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();
        engine.exit().await;
        assert_eq!(engine.state(), XyzSystemState::Stopped);
        assert!(engine.plan().is_none());
    }

    /// Capture device that fails exactly once, on call number `fail_on` (0-based).
    struct FlakyCapture {
        inner: SimulatedCapture,
        fail_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CaptureDevice for FlakyCapture {
        async fn capture(&self) -> anyhow::Result<Reading> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                anyhow::bail!("trigger timed out");
            }
            self.inner.capture().await
        }
    }

    #[tokio::test]
    async fn capture_fault_stops_the_run_and_resume_does_not_move_twice() {
        let (mut reference, reference_transport) = engine(Duration::ZERO).await;
        reference
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();
        assert_eq!(reference.wait_until_idle().await.unwrap(), XyzSystemState::Finished);
        let expected_commands = reference_transport.commands().await;
        let expected_data = reference.progress().unwrap().data.clone();

        let transport = Arc::new(RecordingTransport::new());
        let capture = Arc::new(FlakyCapture {
            inner: SimulatedCapture::new(transport.clone()),
            fail_on: 5,
            calls: AtomicUsize::new(0),
        });
        let mut engine =
            AcquisitionEngine::initialize(transport.clone(), capture, &StageConfig::default())
                .await
                .unwrap();
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();

        let err = engine.wait_until_idle().await.unwrap_err();
        assert!(matches!(err, TankError::Capture(_)));
        assert_eq!(engine.state(), XyzSystemState::Stopped);
        let last_error = engine.status().last_error.unwrap();
        assert!(last_error.contains("trigger timed out"), "{last_error}");
        assert_eq!(engine.progress().unwrap().last_index, Some(4));

        // the stage already stands on step 5, so resuming only captures there again
        engine.resume().await.unwrap();
        assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Finished);
        assert!(engine.status().last_error.is_none());
        assert_eq!(transport.commands().await, expected_commands);
        assert_eq!(engine.progress().unwrap().data, expected_data);
    }

    #[tokio::test]
    async fn configure_rejects_nan_bounds_without_moving() {
        let (mut engine, transport) = engine(Duration::ZERO).await;
        let before = transport.commands().await;

        let mut bad = plan([0.13, 0.12, 0.11]);
        bad.min_position[1] = f64::NAN;
        bad.max_position[1] = f64::NAN;
        assert!(matches!(
            engine.configure(bad, &probe()).await,
            Err(TankError::InvalidPlan(_))
        ));
        assert!(engine.plan().is_none());
        assert_eq!(transport.commands().await, before);
        assert_eq!(engine.state(), XyzSystemState::AtOrigin);
    }

    #[tokio::test]
    async fn configure_rejects_grids_above_the_stage_limit() {
        let transport = Arc::new(RecordingTransport::new());
        let capture = Arc::new(SimulatedCapture::new(transport.clone()));
        let stage = StageConfig {
            max_grid_points: 23,
            ..StageConfig::default()
        };
        let mut engine = AcquisitionEngine::initialize(transport, capture, &stage)
            .await
            .unwrap();

        // 4 x 3 x 2 = 24 points
        assert!(matches!(
            engine.configure(plan([0.13, 0.12, 0.11]), &probe()).await,
            Err(TankError::InvalidPlan(_))
        ));
        engine.configure(plan([0.13, 0.12, 0.1]), &probe()).await.unwrap();
        assert_eq!(engine.route().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn stop_after_the_last_step_keeps_finished() {
        let (mut engine, _) = engine(Duration::ZERO).await;
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();
        let mut status = engine.subscribe_status();
        status
            .wait_for(|s| s.state == XyzSystemState::Finished)
            .await
            .unwrap();

        engine.stop();
        assert_eq!(engine.state(), XyzSystemState::Finished);
        assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Finished);
        assert_eq!(engine.progress().unwrap().percent, 100);
    }

    #[tokio::test]
    async fn motor_positions_do_not_wait_for_a_capture() {
        let transport = Arc::new(RecordingTransport::new());
        let capture = Arc::new(
            SimulatedCapture::new(transport.clone()).with_latency(Duration::from_millis(500)),
        );
        let mut engine =
            AcquisitionEngine::initialize(transport, capture, &StageConfig::default())
                .await
                .unwrap();
        engine
            .run_measurement(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();

        // step 0 moves at once, then sits in a half-second capture
        tokio::time::sleep(Duration::from_millis(50)).await;
        let positions = tokio::time::timeout(Duration::from_millis(200), engine.motor_positions())
            .await
            .expect("stage stayed locked during the capture");
        assert!((positions[0] - 0.1).abs() < 1e-9);

        engine.stop();
        assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Stopped);
    }

    #[tokio::test]
    async fn publish_rejects_a_step_outside_the_data_grid() {
        let (mut engine, _) = engine(Duration::ZERO).await;
        engine
            .configure(plan([0.13, 0.12, 0.11]), &probe())
            .await
            .unwrap();
        let session = engine.session.clone().unwrap();
        let total = session.route.len();
        let run = AcquisitionRun {
            session,
            stage: engine.stage.clone(),
            capture: engine.capture.clone(),
            status_tx: engine.status_tx.clone(),
            progress_tx: engine.progress_tx.clone(),
            cancel: CancellationToken::new(),
        };

        let mut progress = Arc::new(MeasurementProgress::new([1, 1, 1], total));
        let err = run
            .publish(&mut progress, 1, Reading::new(1.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, TankError::TaskFailed(_)));
        assert!(engine.progress().is_none());
    }
}
