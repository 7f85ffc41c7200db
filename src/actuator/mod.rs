// Actuator backends for the legged motion controller
//
// Provides:
// - The capability set every backend exposes (ActuatorBackend)
// - Joint groups and the driver that owns them once enabled
// - A hardware backend talking to the motion sub-board over serial
// - A stub backend for running without hardware

mod bus;
mod hardware;
mod stub;

use serde::{Deserialize, Serialize};

use crate::catalog::ActionIndex;

pub use bus::{BoardStatus, BusError, DEFAULT_BAUDRATE, DEFAULT_BOARD_ID, MotionBoardBus, Register};
pub use hardware::{HardwareBackend, angle_to_raw};
pub use stub::StubBackend;

/// The motion engine that drives a set of joints once they are enabled for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    ActionPlayer,
    Gait,
    HeadTracker,
}

/// Mutually exclusive enable masks
///
/// Enabling a group hands its joints to one driver and takes them away
/// from whichever driver held them before. Joints outside the group keep
/// their current owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointGroup {
    /// Every joint, played by the action player
    Body,
    /// Head joints only, played by the action player
    Head,
    /// Arms and legs, driven by the gait
    BodyWithoutHead,
    /// Head joints, driven by the head tracker
    HeadOnly,
}

impl JointGroup {
    pub fn driver(self) -> Driver {
        match self {
            JointGroup::Body | JointGroup::Head => Driver::ActionPlayer,
            JointGroup::BodyWithoutHead => Driver::Gait,
            JointGroup::HeadOnly => Driver::HeadTracker,
        }
    }

    pub fn includes_head(self) -> bool {
        !matches!(self, JointGroup::BodyWithoutHead)
    }

    pub fn includes_limbs(self) -> bool {
        matches!(self, JointGroup::Body | JointGroup::BodyWithoutHead)
    }

    /// Value written to the board's joint-enable register
    pub fn code(self) -> u8 {
        match self {
            JointGroup::Body => 1,
            JointGroup::Head => 2,
            JointGroup::BodyWithoutHead => 3,
            JointGroup::HeadOnly => 4,
        }
    }
}

/// Which driver currently owns the head and the limb joints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JointOwners {
    pub head: Option<Driver>,
    pub limbs: Option<Driver>,
}

impl JointOwners {
    pub fn apply(&mut self, group: JointGroup) {
        let driver = group.driver();
        if group.includes_head() {
            self.head = Some(driver);
        }
        if group.includes_limbs() {
            self.limbs = Some(driver);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("No actuator hardware attached, cannot {operation}")]
    Unavailable { operation: &'static str },

    #[error("{what} value {value} is out of range")]
    OutOfRange { what: &'static str, value: i64 },

    #[error("Motion board error: {0}")]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, ActuatorError>;

/// Capability set over the physical joint subsystem
///
/// Every call returns once the command has been issued. Completion is
/// observed by polling `settled`.
pub trait ActuatorBackend: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn enable_joints(&mut self, group: JointGroup) -> Result<()>;

    fn start_walking(&mut self) -> Result<()>;

    /// Check that `set_velocity(forward, turn)` would be accepted, without writing
    fn check_velocity(&self, forward: i32, turn: i32) -> Result<()>;

    /// Set the gait's forward and turn amplitudes
    fn set_velocity(&mut self, forward: i32, turn: i32) -> Result<()>;

    /// Request the gait to stop; it finishes its current step first
    fn stop_walking(&mut self) -> Result<()>;

    fn start_action(&mut self, index: ActionIndex) -> Result<()>;

    /// Offset the head by `x` (pan) and `y` (tilt) degrees
    fn move_head(&mut self, x: i32, y: i32) -> Result<()>;

    fn head_home(&mut self) -> Result<()>;

    /// Whether the gait is currently stepping
    fn is_running(&mut self) -> Result<bool>;

    /// Whether every started primitive has physically completed
    fn settled(&mut self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_hand_joints_to_drivers() {
        let mut owners = JointOwners::default();

        owners.apply(JointGroup::Body);
        assert_eq!(owners.head, Some(Driver::ActionPlayer));
        assert_eq!(owners.limbs, Some(Driver::ActionPlayer));

        owners.apply(JointGroup::BodyWithoutHead);
        assert_eq!(owners.head, Some(Driver::ActionPlayer));
        assert_eq!(owners.limbs, Some(Driver::Gait));

        owners.apply(JointGroup::HeadOnly);
        assert_eq!(owners.head, Some(Driver::HeadTracker));
        assert_eq!(owners.limbs, Some(Driver::Gait));

        owners.apply(JointGroup::Head);
        assert_eq!(owners.head, Some(Driver::ActionPlayer));
        assert_eq!(owners.limbs, Some(Driver::Gait));
    }

    #[test]
    fn test_head_and_gait_groups_are_disjoint() {
        assert!(!JointGroup::HeadOnly.includes_limbs());
        assert!(!JointGroup::BodyWithoutHead.includes_head());
    }
}
