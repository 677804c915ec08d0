//! Single-consumer command loop around the acquisition engine.
//!
//! The [`Controller`] is the sole owner of the [`AcquisitionEngine`]. It runs in its own
//! Tokio task and processes [`Command`]s strictly in arrival order, so concurrent start
//! and stop requests can never interleave. A failing command is logged and answered
//! with its error; the loop itself only ends on [`Command::Exit`] or when every
//! [`ControllerHandle`] is gone.
//!
//! # Example
//!
//! ```rust,ignore
//! let (handle, task) = Controller::new(engine, Arc::new(JsonResultWriter), &config).spawn();
//! handle.start("demos/short.toml").await?;
//! handle.stop().await?;
//! handle.save("short.json").await?;
//! handle.exit().await?;
//! task.await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::config::{AppConfig, ScanSettings};
use crate::engine::{AcquisitionEngine, EngineStatus, MeasurementProgress};
use crate::error::{AppResult, TankError};
use crate::geometry::Probe;
use crate::messages::{Command, StatusReport};
use crate::plan::MeasurementPlan;
use crate::storage::ResultWriter;

/// Owns the engine and serializes every operation on it.
pub struct Controller {
    engine: AcquisitionEngine,
    writer: Arc<dyn ResultWriter>,
    config: AppConfig,
}

impl Controller {
    /// Wrap `engine`; results are written with `writer`.
    pub fn new(engine: AcquisitionEngine, writer: Arc<dyn ResultWriter>, config: &AppConfig) -> Self {
        Self {
            engine,
            writer,
            config: config.clone(),
        }
    }

    /// Spawn the command loop and return a handle to it.
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.controller.mailbox_capacity.max(1));
        let handle = ControllerHandle {
            tx,
            status_rx: self.engine.subscribe_status(),
            progress_rx: self.engine.subscribe_progress(),
        };
        (handle, tokio::spawn(self.run(rx)))
    }

    /// Process commands until `Exit` or until the channel closes.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<Command>) {
        info!("controller started");

        while let Some(command) = command_rx.recv().await {
            let name = command.name();
            debug!(command = name, "dispatching command");

            match command {
                Command::Start { settings, response } => {
                    let result = self.start_from_settings(settings).await;
                    reply(name, response, result);
                }

                Command::StartPlan {
                    plan,
                    probe,
                    response,
                } => {
                    let result = self.engine.run_measurement(*plan, &probe).await;
                    reply(name, response, result);
                }

                Command::Stop { response } => {
                    self.engine.stop();
                    reply(name, response, Ok(()));
                }

                Command::Resume { response } => {
                    let result = self.engine.resume().await;
                    reply(name, response, result);
                }

                Command::Save { path, response } => {
                    let path = self.config.resolve_output(&path);
                    let result = self
                        .engine
                        .save(&path, self.writer.as_ref())
                        .await
                        .map(|_| path);
                    reply(name, response, result);
                }

                Command::Status { response } => {
                    let report = self.status_report().await;
                    reply(name, response, Ok(report));
                }

                Command::Exit { response } => {
                    self.engine.exit().await;
                    reply(name, response, Ok(()));
                    info!("controller stopped");
                    return;
                }
            }
        }

        info!("command channel closed, shutting down");
        self.engine.exit().await;
    }

    #[instrument(skip(self))]
    async fn start_from_settings(&mut self, settings: PathBuf) -> AppResult<()> {
        let settings = ScanSettings::load(&settings)?;
        let plan = settings.measurement_plan()?;
        if let Some(transducer) = settings.transducer() {
            debug!(transducer = %transducer.name, position = ?transducer.position, "transducer mounted");
        }
        self.engine
            .run_measurement(plan, &settings.hydrophone())
            .await
    }

    async fn status_report(&self) -> StatusReport {
        let progress = self.engine.progress();
        StatusReport {
            status: self.engine.status(),
            plan: self.engine.plan().map(|p| p.name.clone()),
            percent: progress.as_ref().map(|p| p.percent),
            last_index: progress.as_ref().and_then(|p| p.last_index),
            total_steps: progress.as_ref().map(|p| p.total_steps),
            positions: self.engine.motor_positions().await,
        }
    }
}

fn reply<T>(command: &'static str, response: oneshot::Sender<AppResult<T>>, result: AppResult<T>) {
    if let Err(e) = &result {
        error!(command, error = %e, kind = ?e.kind(), "command failed");
    }
    // the caller may have stopped waiting
    let _ = response.send(result);
}

/// Cloneable sender side of the controller, with typed request helpers.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<EngineStatus>,
    progress_rx: watch::Receiver<Option<Arc<MeasurementProgress>>>,
}

impl ControllerHandle {
    /// Send a raw command without waiting for its answer.
    pub async fn send(&self, command: Command) -> AppResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| TankError::ChannelClosed)
    }

    async fn request<T>(
        &self,
        (command, rx): (Command, oneshot::Receiver<AppResult<T>>),
    ) -> AppResult<T> {
        self.send(command).await?;
        rx.await.map_err(|_| TankError::ChannelClosed)?
    }

    /// Load a settings file and start measuring.
    pub async fn start(&self, settings: impl Into<PathBuf>) -> AppResult<()> {
        self.request(Command::start(settings)).await
    }

    /// Start an in-memory plan.
    pub async fn start_plan(&self, plan: MeasurementPlan, probe: Probe) -> AppResult<()> {
        self.request(Command::start_plan(plan, probe)).await
    }

    /// Stop the running measurement.
    pub async fn stop(&self) -> AppResult<()> {
        self.request(Command::stop()).await
    }

    /// Continue a stopped measurement.
    pub async fn resume(&self) -> AppResult<()> {
        self.request(Command::resume()).await
    }

    /// Save the latest data; returns where it was written.
    pub async fn save(&self, path: impl Into<PathBuf>) -> AppResult<PathBuf> {
        self.request(Command::save(path)).await
    }

    /// Engine status and progress.
    pub async fn status(&self) -> AppResult<StatusReport> {
        self.request(Command::status()).await
    }

    /// Shut everything down.
    pub async fn exit(&self) -> AppResult<()> {
        self.request(Command::exit()).await
    }

    /// Watch engine status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    /// Watch progress snapshots.
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<Arc<MeasurementProgress>>> {
        self.progress_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::XyzSystemState;
    use crate::error::ErrorKind;
    use crate::geometry::Tank;
    use crate::hardware::mock::{RecordingTransport, SimulatedCapture};
    use crate::storage::JsonResultWriter;
    use std::time::Duration;

    async fn controller(output_dir: PathBuf) -> (ControllerHandle, JoinHandle<()>) {
        let transport = Arc::new(RecordingTransport::new().with_latency(Duration::from_millis(1)));
        let capture = Arc::new(SimulatedCapture::new(transport.clone()));
        let mut config = AppConfig::default();
        config.storage.output_dir = output_dir;
        let engine = AcquisitionEngine::initialize(transport, capture, &config.stage)
            .await
            .unwrap();
        Controller::new(engine, Arc::new(JsonResultWriter), &config).spawn()
    }

    fn plan() -> (MeasurementPlan, Probe) {
        let tank = Tank::new("t", [0.5, 0.5, 0.5], [0.0; 3]).unwrap();
        let plan =
            MeasurementPlan::new("ctl", tank, true, [0.1; 3], [0.12, 0.12, 0.11], [0.01; 3])
                .unwrap();
        (plan, Probe::hydrophone("h", [0.02; 3], [0.0; 3], 0.01))
    }

    #[tokio::test]
    async fn failing_commands_do_not_end_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = controller(dir.path().to_path_buf()).await;

        let err = handle.save("early.json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Save);
        let err = handle.start(dir.path().join("missing.toml")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = handle.resume().await;
        assert!(err.is_ok(), "resume when idle only warns");

        let report = handle.status().await.unwrap();
        assert_eq!(report.status.state, XyzSystemState::AtOrigin);

        handle.exit().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.status().await, Err(TankError::ChannelClosed)));
    }

    #[tokio::test]
    async fn run_stop_resume_save() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = controller(dir.path().to_path_buf()).await;
        let (plan, probe) = plan();

        handle.start_plan(plan.clone(), probe.clone()).await.unwrap();
        assert!(matches!(
            handle.start_plan(plan, probe).await,
            Err(TankError::Busy(_))
        ));
        handle.stop().await.unwrap();
        assert_eq!(handle.status().await.unwrap().status.state, XyzSystemState::Stopped);

        handle.resume().await.unwrap();
        let mut status = handle.subscribe_status();
        status
            .wait_for(|s| s.state == XyzSystemState::Finished)
            .await
            .unwrap();

        let path = handle.save("ctl.json").await.unwrap();
        assert_eq!(path, dir.path().join("ctl.json"));
        assert!(path.exists());
        let progress = handle.subscribe_progress().borrow().clone().unwrap();
        assert_eq!(progress.percent, 100);

        handle.exit().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_plan_is_answered_and_the_loop_survives() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = controller(dir.path().to_path_buf()).await;

        let tank = Tank::new("t", [0.5, 0.5, 0.5], [0.0; 3]).unwrap();
        let fine =
            MeasurementPlan::new("fine", tank, true, [0.1; 3], [0.4; 3], [1e-7; 3]).unwrap();
        let probe = Probe::hydrophone("h", [0.02; 3], [0.0; 3], 0.01);
        let err = handle.start_plan(fine, probe).await.unwrap_err();
        assert!(matches!(err, TankError::InvalidPlan(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let report = handle.status().await.unwrap();
        assert_eq!(report.status.state, XyzSystemState::AtOrigin);
        assert!(report.plan.is_none());

        let (plan, probe) = plan();
        handle.start_plan(plan, probe).await.unwrap();

        handle.exit().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_every_handle_shuts_the_loop_down() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = controller(dir.path().to_path_buf()).await;
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
