// Wire types exchanged with teleop, behaviour scripts, and the IMU node

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::ActionIndex;
use crate::controller::MotionSnapshot;

// Command from teleop/scripts -> runtime
// Tagged by a "command" field, e.g. {"command": "set_velocity", "forward": 10, "turn": 0}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MotionCommand {
    StartWalk,
    StopWalk,
    SetVelocity {
        forward: i32,
        turn: i32,
        #[serde(default)]
        ramp_ms: u32,
    },
    PerformAction {
        index: ActionIndex,
        #[serde(default)]
        audio: Option<PathBuf>,
    },
    AimHead {
        x: i32,
        y: i32,
        #[serde(default)]
        return_home: bool,
    },
    RecoverFromFall,
}

impl MotionCommand {
    /// Commands that show an operator is actively driving the gait
    pub fn is_drive(&self) -> bool {
        matches!(
            self,
            MotionCommand::StartWalk | MotionCommand::SetVelocity { .. }
        )
    }
}

// Result of one command, published after it has finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(flatten)]
    pub command: MotionCommand,
    pub ok: bool,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

// Periodic status; `motion` is absent while a command holds the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionStatus {
    pub health: RuntimeHealth,
    pub motion: Option<MotionSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cmd: MotionCommand =
            serde_json::from_str(r#"{"command": "set_velocity", "forward": 10, "turn": -2}"#)
                .unwrap();
        assert_eq!(
            cmd,
            MotionCommand::SetVelocity {
                forward: 10,
                turn: -2,
                ramp_ms: 0
            }
        );

        let cmd: MotionCommand =
            serde_json::from_str(r#"{"command": "perform_action", "index": 4}"#).unwrap();
        assert_eq!(
            cmd,
            MotionCommand::PerformAction {
                index: ActionIndex(4),
                audio: None
            }
        );

        let cmd: MotionCommand = serde_json::from_str(r#"{"command": "start_walk"}"#).unwrap();
        assert!(cmd.is_drive());
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<MotionCommand>(r#"{"command": "dance"}"#).is_err());
    }

    #[test]
    fn test_ack_is_flat() {
        let ack = CommandAck {
            command: MotionCommand::StopWalk,
            ok: true,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["command"], "stop_walk");
        assert_eq!(json["ok"], true);
    }
}
