// Zenoh front-end for the motion controller, with a walking watchdog
// Note: the watchdog stops the gait if whoever is driving goes quiet.
// Without it, a crashed teleop would leave the robot walking at its last velocity.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Interval, interval};
use tracing::{info, warn};

use crate::actuator::{ActuatorBackend, HardwareBackend, StubBackend};
use crate::audio::ProcessAudioPlayer;
use crate::catalog::{ActionCatalog, CatalogError};
use crate::config::{
    BackendKind, LOOP_HZ, RuntimeConfig, TOPIC_ACK, TOPIC_CMD_MOTION, TOPIC_SENSE_FALL,
    TOPIC_STATUS,
};
use crate::controller::{MotionController, MotionError, MotionState};
use crate::messages::{CommandAck, MotionCommand, MotionStatus, RuntimeHealth};
use crate::recovery::{FallDirection, SharedFallSensor};

#[derive(Debug, thiserror::Error)]
pub enum BringUpError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Motion board unreachable: {0}")]
    Bus(#[from] crate::actuator::BusError),

    #[error("Invalid controller configuration: {0}")]
    Controller(#[from] MotionError),
}

/// Build the controller described by `config`
///
/// Returns the controller and the fall sensor slot the runtime feeds.
pub fn bring_up(
    config: &RuntimeConfig,
) -> Result<(MotionController, SharedFallSensor), BringUpError> {
    let catalog = match &config.motion_file {
        Some(path) => ActionCatalog::load(path)?,
        None => {
            warn!("No motion file configured, accepting every action page");
            ActionCatalog::with_pages(1..=255)
        }
    };

    let backend: Box<dyn ActuatorBackend> = match config.backend {
        BackendKind::Hardware => Box::new(HardwareBackend::open(
            &config.device,
            config.baudrate,
            config.board_id,
        )?),
        BackendKind::Stub => {
            warn!("Using stub backend, no motion will be performed");
            Box::new(StubBackend::new())
        }
    };

    let fall = SharedFallSensor::new();
    let mut controller = MotionController::new(backend, catalog, config.controller.clone())?
        .with_fall_sensor(Arc::new(fall.clone()));
    if let Some(program) = &config.audio_player {
        controller = controller.with_audio(Arc::new(
            ProcessAudioPlayer::new(program.clone()).with_args(config.audio_args.clone()),
        ));
    }

    Ok((controller, fall))
}

/// Run one command against the controller
pub fn dispatch(controller: &MotionController, command: &MotionCommand) -> bool {
    match command {
        MotionCommand::StartWalk => controller.start_walk(),
        MotionCommand::StopWalk => controller.stop_walk(),
        MotionCommand::SetVelocity {
            forward,
            turn,
            ramp_ms,
        } => controller.set_velocity(*forward, *turn, *ramp_ms),
        MotionCommand::PerformAction { index, audio } => {
            controller.perform_action(*index, audio.as_deref())
        }
        MotionCommand::AimHead { x, y, return_home } => controller.aim_head(*x, *y, *return_home),
        MotionCommand::RecoverFromFall => controller.recover_from_fall(),
    }
}

/// Executes commands one at a time, in arrival order, on a dedicated thread
fn spawn_worker(
    controller: Arc<MotionController>,
    mut commands: UnboundedReceiver<MotionCommand>,
    acks: UnboundedSender<CommandAck>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Some(command) = commands.blocking_recv() {
            let ok = dispatch(&controller, &command);
            if acks.send(CommandAck { command, ok }).is_err() {
                break;
            }
        }
    })
}

pub struct Runtime {
    cmd_timeout: Option<Duration>,
    drive_cmd_at: Instant,
    stop_requested: bool,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(cmd_timeout: Option<Duration>) -> Self {
        Self {
            cmd_timeout,
            drive_cmd_at: Instant::now(),
            stop_requested: false,
            health: RuntimeHealth::Ok,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: &MotionCommand) {
        info!("Received command: {:?}", cmd);
        if cmd.is_drive() {
            self.drive_cmd_at = Instant::now();
            self.stop_requested = false;
        }
    }

    /// Whether the watchdog should stop the gait now
    ///
    /// `state` is the latest controller state, `None` if it was busy.
    fn watchdog_expired(&mut self, state: Option<MotionState>) -> bool {
        let Some(timeout) = self.cmd_timeout else {
            return false;
        };

        let cmd_age = self.drive_cmd_at.elapsed();
        if cmd_age <= timeout {
            self.health = RuntimeHealth::Ok;
            return false;
        }

        if self.health != RuntimeHealth::CmdStale {
            warn!("Drive command stale ({:?} old)", cmd_age);
        }
        self.health = RuntimeHealth::CmdStale;

        match state {
            Some(MotionState::Walking) if !self.stop_requested => {
                warn!("Watchdog stopping gait");
                self.stop_requested = true;
                true
            }
            Some(MotionState::Walking) | None => false,
            Some(_) => {
                self.stop_requested = false;
                false
            }
        }
    }
}

/// Wait for the next loop tick; false once `shutdown` has completed
async fn next_tick<F: Future>(tick: &mut Interval, shutdown: Pin<&mut F>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown => false,
        _ = tick.tick() => true,
    }
}

pub async fn run(
    config: RuntimeConfig,
    controller: Arc<MotionController>,
    fall: SharedFallSensor,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing controller...");
    let init = Arc::clone(&controller);
    if !tokio::task::spawn_blocking(move || init.initialize()).await? {
        warn!("Start-up action failed, continuing");
    }

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let cmd_subscriber = session.declare_subscriber(TOPIC_CMD_MOTION).await?;
    let fall_subscriber = session.declare_subscriber(TOPIC_SENSE_FALL).await?;
    let pub_ack = session.declare_publisher(TOPIC_ACK).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    let worker = spawn_worker(Arc::clone(&controller), cmd_rx, ack_tx);

    let mut runtime = Runtime::new(config.watchdog_timeout());
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, watchdog {:?}",
        LOOP_HZ,
        config.watchdog_timeout()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_MOTION, TOPIC_SENSE_FALL);
    info!("Publishing to: {}, {}", TOPIC_ACK, TOPIC_STATUS);

    // One handler for the whole run, so a SIGINT during publishing is kept
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        if !next_tick(&mut tick, interrupted.as_mut()).await {
            info!("Interrupted, shutting down");
            break;
        }

        // 1. Latest fall direction from the IMU node
        while let Ok(Some(sample)) = fall_subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<FallDirection>(&payload) {
                Ok(direction) => fall.update(direction),
                Err(e) => warn!("Failed to parse fall direction: {}", e),
            }
        }

        // 2. Queue all pending commands (non-blocking), in order
        while let Ok(Some(sample)) = cmd_subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotionCommand>(&payload) {
                Ok(cmd) => {
                    runtime.on_command(&cmd);
                    cmd_tx.send(cmd)?;
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 3. Watchdog
        let snapshot = controller.try_snapshot();
        if runtime.watchdog_expired(snapshot.map(|s| s.state)) {
            cmd_tx.send(MotionCommand::StopWalk)?;
        }

        // 4. Publish finished commands
        while let Ok(ack) = ack_rx.try_recv() {
            pub_ack.put(serde_json::to_string(&ack)?).await?;
        }

        // 5. Publish status
        let status = MotionStatus {
            health: runtime.health(),
            motion: snapshot,
        };
        pub_status.put(serde_json::to_string(&status)?).await?;
    }

    // Let queued commands finish, then sit the robot down
    drop(cmd_tx);
    tokio::task::spawn_blocking(move || {
        if worker.join().is_err() {
            warn!("Command worker panicked");
        }
        controller.shutdown()
    })
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ActionIndex;
    use crate::controller::ControllerConfig;

    fn stub_controller() -> MotionController {
        MotionController::new(
            Box::new(StubBackend::new()),
            ActionCatalog::with_pages(1..=20),
            ControllerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_dispatch_on_stub() {
        let controller = stub_controller();
        assert!(!dispatch(&controller, &MotionCommand::StartWalk));
        assert!(dispatch(&controller, &MotionCommand::StopWalk));
        assert!(!dispatch(
            &controller,
            &MotionCommand::PerformAction {
                index: ActionIndex(99),
                audio: None
            }
        ));
        assert!(!dispatch(&controller, &MotionCommand::RecoverFromFall));
    }

    #[test]
    fn test_worker_acks_in_order() {
        let controller = Arc::new(stub_controller());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let worker = spawn_worker(controller, cmd_rx, ack_tx);

        cmd_tx.send(MotionCommand::StopWalk).unwrap();
        cmd_tx.send(MotionCommand::StartWalk).unwrap();
        drop(cmd_tx);
        worker.join().unwrap();

        let first = ack_rx.try_recv().unwrap();
        assert_eq!(first.command, MotionCommand::StopWalk);
        assert!(first.ok);
        let second = ack_rx.try_recv().unwrap();
        assert_eq!(second.command, MotionCommand::StartWalk);
        assert!(!second.ok);
    }

    #[test]
    fn test_watchdog_disabled() {
        let mut runtime = Runtime::new(None);
        assert!(!runtime.watchdog_expired(Some(MotionState::Walking)));
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_watchdog_fresh_command() {
        let mut runtime = Runtime::new(Some(Duration::from_secs(60)));
        runtime.on_command(&MotionCommand::StartWalk);
        assert!(!runtime.watchdog_expired(Some(MotionState::Walking)));
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_watchdog_stops_stale_gait_once() {
        let mut runtime = Runtime::new(Some(Duration::ZERO));
        thread::sleep(Duration::from_millis(2));

        assert!(runtime.watchdog_expired(Some(MotionState::Walking)));
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
        // Stop already requested
        assert!(!runtime.watchdog_expired(Some(MotionState::Walking)));
        // Not walking, nothing to stop
        assert!(!runtime.watchdog_expired(Some(MotionState::Idle)));
        // Busy controller is left alone
        assert!(!runtime.watchdog_expired(None));
    }

    #[test]
    fn test_non_drive_command_does_not_feed_watchdog() {
        let mut runtime = Runtime::new(Some(Duration::ZERO));
        thread::sleep(Duration::from_millis(2));
        runtime.on_command(&MotionCommand::AimHead {
            x: 0,
            y: 0,
            return_home: true,
        });
        assert!(runtime.watchdog_expired(Some(MotionState::Walking)));
    }

    #[tokio::test]
    async fn test_shutdown_fired_between_ticks_is_kept() {
        let mut tick = interval(Duration::from_millis(1));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::pin!(rx);

        assert!(next_tick(&mut tick, rx.as_mut()).await);
        // Fires while no tick is being awaited, like a SIGINT during publishing
        tx.send(()).unwrap();
        assert!(!next_tick(&mut tick, rx.as_mut()).await);
    }

    #[test]
    fn test_bring_up_stub_without_motion_file() {
        let config = RuntimeConfig::from_json(r#"{"backend": "stub"}"#).unwrap();
        let (controller, fall) = bring_up(&config).unwrap();
        assert!(controller.catalog().contains(ActionIndex(255)));

        fall.update(FallDirection::Forward);
        // Stub cannot stand up, but the fall is seen
        assert!(matches!(
            controller.try_recover_from_fall(),
            Err(MotionError::Actuator(_))
        ));
    }
}
