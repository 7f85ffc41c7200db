// Motion controller: serializes motion commands against one set of actuators
//
// Every command takes the controller lock, drives the backend, waits for
// the started primitive to settle, and only then releases the lock. At
// most one primitive owns a given joint at a time, and a new primitive
// never starts before the previous one has drained.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::actuator::{ActuatorBackend, ActuatorError, JointGroup, JointOwners};
use crate::audio::{AudioPlayer, SilentAudio};
use crate::catalog::{ActionCatalog, ActionIndex};
use crate::config::{DEFAULT_SETTLE_TIMEOUT_MS, TICK, TICK_MS};
use crate::ramp::Ramp;
use crate::recovery::{FallRecoveryPolicy, FallSensor, SharedFallSensor};

/// What the actuators are currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Idle,
    Walking,
    PerformingAction,
    AimingHead,
    Recovering,
}

/// Target gait amplitudes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub forward: i32,
    pub turn: i32,
}

/// Actions and timing the controller needs at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub forward_recovery_action: ActionIndex,
    pub backward_recovery_action: ActionIndex,
    /// Played by `initialize`, e.g. a slow stand-up
    pub init_action: Option<ActionIndex>,
    /// Played by `shutdown`, e.g. a sit-down
    pub shutdown_action: Option<ActionIndex>,
    /// Ready pose played before the gait takes over the limbs
    pub walk_ready_action: Option<ActionIndex>,
    pub settle_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            forward_recovery_action: ActionIndex(10),
            backward_recovery_action: ActionIndex(11),
            init_action: None,
            shutdown_action: None,
            walk_ready_action: None,
            settle_timeout_ms: DEFAULT_SETTLE_TIMEOUT_MS,
        }
    }
}

impl ControllerConfig {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn recovery_policy(&self) -> FallRecoveryPolicy {
        FallRecoveryPolicy::new(self.forward_recovery_action, self.backward_recovery_action)
    }

    fn configured_actions(&self) -> impl Iterator<Item = ActionIndex> {
        [
            Some(self.forward_recovery_action),
            Some(self.backward_recovery_action),
            self.init_action,
            self.shutdown_action,
            self.walk_ready_action,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("Robot is not walking")]
    NotWalking,

    #[error("Action {0} is not in the catalog")]
    UnknownAction(ActionIndex),

    #[error("No fall detected, nothing to recover from")]
    NoFallDetected,

    #[error("{primitive} did not settle within {waited:?}")]
    SettleTimeout {
        primitive: &'static str,
        waited: Duration,
    },

    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

pub type Result<T> = std::result::Result<T, MotionError>;

/// Point-in-time view of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionSnapshot {
    pub state: MotionState,
    pub velocity: VelocityCommand,
    pub joints: JointOwners,
}

/// Everything guarded by the controller lock
struct Inner {
    backend: Box<dyn ActuatorBackend>,
    state: MotionState,
    velocity: VelocityCommand,
    joints: JointOwners,
}

impl Inner {
    fn enable(&mut self, group: JointGroup) -> Result<()> {
        self.backend.enable_joints(group)?;
        self.joints.apply(group);
        Ok(())
    }

    /// Poll the backend every tick until it reports settled
    fn wait_settled(&mut self, primitive: &'static str, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.backend.settled()? {
                debug!("{} settled after {:?}", primitive, started.elapsed());
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= timeout {
                error!(
                    "{} still running after {:?} on {} backend",
                    primitive,
                    waited,
                    self.backend.name()
                );
                return Err(MotionError::SettleTimeout { primitive, waited });
            }
            thread::sleep(TICK);
        }
    }

    /// Stop the gait if it is running and drain until it has stopped
    fn halt_walking(&mut self, timeout: Duration) -> Result<()> {
        if self.state != MotionState::Walking {
            return Ok(());
        }
        self.backend.stop_walking()?;
        // The gait is winding down from here on, whether or not it settles in time
        self.state = MotionState::Idle;
        self.wait_settled("gait stop", timeout)
    }

    fn snapshot(&self) -> MotionSnapshot {
        MotionSnapshot {
            state: self.state,
            velocity: self.velocity,
            joints: self.joints,
        }
    }
}

/// Single point of control for the robot's actuators
///
/// Share it between threads behind an `Arc`. All commands block until the
/// motion they start has settled, and are applied in lock order.
pub struct MotionController {
    inner: Mutex<Inner>,
    catalog: ActionCatalog,
    policy: FallRecoveryPolicy,
    sensor: Arc<dyn FallSensor>,
    audio: Arc<dyn AudioPlayer>,
    config: ControllerConfig,
}

impl MotionController {
    /// Create a controller around `backend`
    ///
    /// Fails if an action named in `config` is missing from `catalog`.
    pub fn new(
        backend: Box<dyn ActuatorBackend>,
        catalog: ActionCatalog,
        config: ControllerConfig,
    ) -> Result<Self> {
        if let Some(missing) = config.configured_actions().find(|&a| !catalog.contains(a)) {
            return Err(MotionError::UnknownAction(missing));
        }

        info!(
            "Motion controller on {} backend, {} actions",
            backend.name(),
            catalog.len()
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                backend,
                state: MotionState::Idle,
                velocity: VelocityCommand::default(),
                joints: JointOwners::default(),
            }),
            catalog,
            policy: config.recovery_policy(),
            sensor: Arc::new(SharedFallSensor::new()),
            audio: Arc::new(SilentAudio),
            config,
        })
    }

    pub fn with_fall_sensor(mut self, sensor: Arc<dyn FallSensor>) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioPlayer>) -> Self {
        self.audio = audio;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Inner is left consistent before every fallible step, so a panic
        // elsewhere does not invalidate it
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn state(&self) -> MotionState {
        self.lock().state
    }

    pub fn velocity(&self) -> VelocityCommand {
        self.lock().velocity
    }

    pub fn joint_owners(&self) -> JointOwners {
        self.lock().joints
    }

    /// Snapshot without waiting; `None` while a command holds the lock
    pub fn try_snapshot(&self) -> Option<MotionSnapshot> {
        match self.inner.try_lock() {
            Ok(inner) => Some(inner.snapshot()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().snapshot()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    // === Boolean command surface ===

    pub fn initialize(&self) -> bool {
        self.report("initialize", self.try_initialize())
    }

    pub fn shutdown(&self) -> bool {
        self.report("shutdown", self.try_shutdown())
    }

    pub fn start_walk(&self) -> bool {
        self.report("start_walk", self.try_start_walk())
    }

    pub fn stop_walk(&self) -> bool {
        self.report("stop_walk", self.try_stop_walk())
    }

    pub fn set_velocity(&self, forward: i32, turn: i32, ramp_ms: u32) -> bool {
        self.report("set_velocity", self.try_set_velocity(forward, turn, ramp_ms))
    }

    pub fn perform_action(&self, index: ActionIndex, audio: Option<&Path>) -> bool {
        self.report("perform_action", self.try_perform_action(index, audio))
    }

    pub fn aim_head(&self, x: i32, y: i32, return_home: bool) -> bool {
        self.report("aim_head", self.try_aim_head(x, y, return_home))
    }

    pub fn recover_from_fall(&self) -> bool {
        self.report("recover_from_fall", self.try_recover_from_fall())
    }

    /// Log why a command failed and flatten the result to a bool
    fn report(&self, command: &'static str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                match &e {
                    MotionError::NoFallDetected
                    | MotionError::Actuator(ActuatorError::Unavailable { .. }) => {
                        info!("{} refused: {}", command, e)
                    }
                    MotionError::NotWalking | MotionError::UnknownAction(_) => {
                        warn!("{} rejected: {}", command, e)
                    }
                    MotionError::SettleTimeout { .. } | MotionError::Actuator(_) => {
                        error!("{} failed: {}", command, e)
                    }
                }
                false
            }
        }
    }

    // === Commands ===

    /// Play the configured start-up action
    pub fn try_initialize(&self) -> Result<()> {
        let mut inner = self.lock();
        if let Some(action) = self.config.init_action {
            info!("Initializing with action {}", action);
            self.run_action(&mut inner, action, None)?;
        }
        Ok(())
    }

    /// Stop walking and play the configured shutdown action
    pub fn try_shutdown(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.halt_walking(self.config.settle_timeout())?;
        if let Some(action) = self.config.shutdown_action {
            info!("Shutting down with action {}", action);
            self.run_action(&mut inner, action, None)?;
        }
        Ok(())
    }

    pub fn try_start_walk(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == MotionState::Walking {
            debug!("Already walking");
            return Ok(());
        }

        let timeout = self.config.settle_timeout();
        inner.wait_settled("previous primitive", timeout)?;
        if let Some(ready) = self.config.walk_ready_action {
            self.run_action(&mut inner, ready, None)?;
        }

        inner.enable(JointGroup::BodyWithoutHead)?;
        inner.backend.start_walking()?;
        inner.state = MotionState::Walking;
        info!("Walking");
        Ok(())
    }

    pub fn try_stop_walk(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != MotionState::Walking {
            debug!("Not walking, nothing to stop");
            return Ok(());
        }
        inner.halt_walking(self.config.settle_timeout())?;
        info!("Stopped walking");
        Ok(())
    }

    /// Change gait amplitudes, optionally ramping the forward amplitude
    ///
    /// With `ramp_ms > 0` the forward amplitude moves one tick at a time and
    /// the call blocks for roughly `ramp_ms`. The turn amplitude is held at
    /// its current value for the ramp and applied once the ramp is done.
    pub fn try_set_velocity(&self, forward: i32, turn: i32, ramp_ms: u32) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != MotionState::Walking {
            return Err(MotionError::NotWalking);
        }
        // A ramp must either reach its target or not start
        inner.backend.check_velocity(forward, turn)?;

        if ramp_ms == 0 {
            inner.backend.set_velocity(forward, turn)?;
            inner.velocity = VelocityCommand { forward, turn };
            debug!("Velocity set to forward={} turn={}", forward, turn);
            return Ok(());
        }

        let held_turn = inner.velocity.turn;
        let ramp = Ramp::new(inner.velocity.forward, forward, ramp_ms, TICK_MS);
        debug!(
            "Ramping forward {} -> {} over {} ticks",
            ramp.from(),
            ramp.to(),
            ramp.len()
        );
        for amplitude in &ramp {
            thread::sleep(TICK);
            inner.backend.set_velocity(amplitude, held_turn)?;
            inner.velocity.forward = amplitude;
        }

        if turn != held_turn {
            inner.backend.set_velocity(forward, turn)?;
            inner.velocity.turn = turn;
        }
        Ok(())
    }

    pub fn try_perform_action(&self, index: ActionIndex, audio: Option<&Path>) -> Result<()> {
        if !self.catalog.contains(index) {
            return Err(MotionError::UnknownAction(index));
        }

        let mut inner = self.lock();
        inner.halt_walking(self.config.settle_timeout())?;
        self.run_action(&mut inner, index, audio)
    }

    /// Point the head; locomotion keeps running on its own joints
    pub fn try_aim_head(&self, x: i32, y: i32, return_home: bool) -> Result<()> {
        let mut inner = self.lock();
        let prior = inner.state;
        inner.state = MotionState::AimingHead;
        let result = self.aim(&mut inner, x, y, return_home);
        inner.state = prior;
        result
    }

    pub fn try_recover_from_fall(&self) -> Result<()> {
        let mut inner = self.lock();
        let direction = self.sensor.fall_direction();
        let action = self
            .policy
            .select(direction)
            .ok_or(MotionError::NoFallDetected)?;

        warn!("Fall detected ({:?}), recovering with action {}", direction, action);
        let timeout = self.config.settle_timeout();
        inner.halt_walking(timeout)?;

        inner.state = MotionState::Recovering;
        let result = self.stand_up(&mut inner, action);
        inner.state = MotionState::Idle;
        result
    }

    // === Primitives, called with the lock held ===

    /// Play one action on the whole body and wait for it to finish
    fn run_action(&self, inner: &mut Inner, index: ActionIndex, audio: Option<&Path>) -> Result<()> {
        let prior = inner.state;
        inner.state = MotionState::PerformingAction;
        let result = self.play(inner, index, audio);
        inner.state = if prior == MotionState::Recovering {
            prior
        } else {
            MotionState::Idle
        };
        result
    }

    fn play(&self, inner: &mut Inner, index: ActionIndex, audio: Option<&Path>) -> Result<()> {
        inner.enable(JointGroup::Body)?;
        inner.backend.start_action(index)?;
        info!(
            "Playing action {} '{}'",
            index,
            self.catalog.name(index).unwrap_or_default()
        );
        if let Some(path) = audio {
            self.audio.play(path);
        }
        inner.wait_settled("action", self.config.settle_timeout())
    }

    fn aim(&self, inner: &mut Inner, x: i32, y: i32, return_home: bool) -> Result<()> {
        inner.enable(JointGroup::HeadOnly)?;
        if return_home {
            inner.backend.head_home()?;
        }
        inner.backend.move_head(x, y)?;
        inner.wait_settled("head", self.config.settle_timeout())
    }

    fn stand_up(&self, inner: &mut Inner, action: ActionIndex) -> Result<()> {
        self.run_action(inner, action, None)?;
        // Hand the joints back to the head tracker and the gait
        inner.enable(JointGroup::HeadOnly)?;
        inner.enable(JointGroup::BodyWithoutHead)?;
        info!("Recovered from fall");
        Ok(())
    }
}
