//! Interrupting a scan any number of times must not change what it measures.

use std::sync::Arc;
use std::time::Duration;

use xyz_tank::config::StageConfig;
use xyz_tank::geometry::{Axis, Probe, Tank};
use xyz_tank::hardware::mock::{RecordingTransport, SimulatedCapture};
use xyz_tank::plan::MeasurementPlan;
use xyz_tank::{AcquisitionEngine, MeasurementProgress, XyzSystemState};

fn plan() -> MeasurementPlan {
    let tank = Tank::new("bench", [0.5, 0.5, 0.5], [0.0; 3]).unwrap();
    MeasurementPlan::new(
        "resume",
        tank,
        true,
        [0.1; 3],
        [0.14, 0.13, 0.12],
        [0.01; 3],
    )
    .unwrap()
}

fn probe() -> Probe {
    Probe::hydrophone("h", [0.02; 3], [0.0; 3], 0.01)
}

async fn engine() -> (AcquisitionEngine, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new().with_latency(Duration::from_millis(1)));
    let capture = Arc::new(SimulatedCapture::new(transport.clone()).with_source([0.12; 3]));
    let engine = AcquisitionEngine::initialize(transport.clone(), capture, &StageConfig::default())
        .await
        .unwrap();
    (engine, transport)
}

async fn uninterrupted() -> (Arc<MeasurementProgress>, Vec<(Axis, f64)>) {
    let (mut engine, transport) = engine().await;
    engine.run_measurement(plan(), &probe()).await.unwrap();
    assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Finished);
    (engine.progress().unwrap(), transport.commands().await)
}

#[tokio::test]
async fn stop_and_resume_reproduces_an_uninterrupted_run() {
    let (reference, reference_commands) = uninterrupted().await;
    assert_eq!(reference.total_steps, 60);

    let (mut engine, transport) = engine().await;
    engine.run_measurement(plan(), &probe()).await.unwrap();

    let mut interruptions = 0;
    let mut held: Option<(Arc<MeasurementProgress>, MeasurementProgress)> = None;
    loop {
        tokio::time::sleep(Duration::from_millis(7)).await;
        engine.stop();
        let state = engine.wait_until_idle().await.unwrap();
        if state == XyzSystemState::Finished {
            break;
        }
        assert_eq!(state, XyzSystemState::Stopped);
        interruptions += 1;

        if held.is_none() {
            if let Some(snapshot) = engine.progress() {
                let copy = (*snapshot).clone();
                held = Some((snapshot, copy));
            }
        }
        engine.resume().await.unwrap();
    }

    assert!(interruptions > 0, "the run finished before it could be stopped");
    let progress = engine.progress().unwrap();
    assert!(progress.is_complete());
    assert_eq!(progress.percent, 100);
    assert_eq!(progress.data, reference.data);
    assert_eq!(transport.commands().await, reference_commands);

    // a snapshot taken mid-run is never mutated afterwards
    let (snapshot, copy) = held.unwrap();
    assert_eq!(*snapshot, copy);
    assert!(!snapshot.is_complete());
}

#[tokio::test]
async fn reconfiguring_a_stopped_run_starts_over() {
    let (mut engine, _) = engine().await;
    engine.run_measurement(plan(), &probe()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.stop();
    assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Stopped);
    let stopped_run = engine.status().run_id;

    engine.configure(plan(), &probe()).await.unwrap();
    assert!(engine.progress().is_none());

    engine.start().await.unwrap();
    assert_ne!(engine.status().run_id, stopped_run);

    assert_eq!(engine.wait_until_idle().await.unwrap(), XyzSystemState::Finished);
    assert!(engine.progress().unwrap().is_complete());
}
