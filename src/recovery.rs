// Fall sensing and stand-up action selection

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::catalog::ActionIndex;

/// Direction the robot fell in, as reported by the sensing side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallDirection {
    #[default]
    None,
    Forward,
    Backward,
}

impl FallDirection {
    fn to_u8(self) -> u8 {
        match self {
            FallDirection::None => 0,
            FallDirection::Forward => 1,
            FallDirection::Backward => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => FallDirection::Forward,
            2 => FallDirection::Backward,
            _ => FallDirection::None,
        }
    }
}

/// Supplies the current fall direction on demand
///
/// Implementations answer synchronously and must not have side effects.
pub trait FallSensor: Send + Sync {
    fn fall_direction(&self) -> FallDirection;
}

/// Fall direction slot shared between a sensing task and the controller
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone, Default)]
pub struct SharedFallSensor {
    direction: Arc<AtomicU8>,
}

impl SharedFallSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest sensed direction
    pub fn update(&self, direction: FallDirection) {
        self.direction.store(direction.to_u8(), Ordering::Release);
    }
}

impl FallSensor for SharedFallSensor {
    fn fall_direction(&self) -> FallDirection {
        FallDirection::from_u8(self.direction.load(Ordering::Acquire))
    }
}

/// Maps a fall direction to the stand-up action that recovers from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallRecoveryPolicy {
    pub forward_action: ActionIndex,
    pub backward_action: ActionIndex,
}

impl FallRecoveryPolicy {
    pub fn new(forward_action: ActionIndex, backward_action: ActionIndex) -> Self {
        Self {
            forward_action,
            backward_action,
        }
    }

    /// Action to run for `direction`, or `None` when there is nothing to recover from
    pub fn select(&self, direction: FallDirection) -> Option<ActionIndex> {
        match direction {
            FallDirection::None => None,
            FallDirection::Forward => Some(self.forward_action),
            FallDirection::Backward => Some(self.backward_action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_selects_by_direction() {
        let policy = FallRecoveryPolicy::new(ActionIndex(10), ActionIndex(11));
        assert_eq!(policy.select(FallDirection::Forward), Some(ActionIndex(10)));
        assert_eq!(policy.select(FallDirection::Backward), Some(ActionIndex(11)));
        assert_eq!(policy.select(FallDirection::None), None);
    }

    #[test]
    fn test_shared_sensor_handles_see_updates() {
        let sensor = SharedFallSensor::new();
        let writer = sensor.clone();
        assert_eq!(sensor.fall_direction(), FallDirection::None);

        writer.update(FallDirection::Backward);
        assert_eq!(sensor.fall_direction(), FallDirection::Backward);

        writer.update(FallDirection::None);
        assert_eq!(sensor.fall_direction(), FallDirection::None);
    }

    #[test]
    fn test_direction_wire_format() {
        let json = serde_json::to_string(&FallDirection::Forward).unwrap();
        assert_eq!(json, "\"forward\"");
        let parsed: FallDirection = serde_json::from_str("\"backward\"").unwrap();
        assert_eq!(parsed, FallDirection::Backward);
    }
}
