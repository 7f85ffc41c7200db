// Stub backend for running without hardware
//
// Every command is logged and refused. Nothing moves, so there is never
// anything to wait for.

use tracing::info;

use super::{ActuatorBackend, ActuatorError, JointGroup, Result};
use crate::catalog::ActionIndex;

#[derive(Debug, Clone, Copy, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

fn refuse(operation: &'static str) -> Result<()> {
    Err(ActuatorError::Unavailable { operation })
}

impl ActuatorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn enable_joints(&mut self, group: JointGroup) -> Result<()> {
        info!("[stub] enable joints {:?}", group);
        refuse("enable joints")
    }

    fn start_walking(&mut self) -> Result<()> {
        info!("[stub] start walking");
        refuse("start walking")
    }

    fn check_velocity(&self, _forward: i32, _turn: i32) -> Result<()> {
        Ok(())
    }

    fn set_velocity(&mut self, forward: i32, turn: i32) -> Result<()> {
        info!("[stub] set velocity forward={} turn={}", forward, turn);
        refuse("set velocity")
    }

    fn stop_walking(&mut self) -> Result<()> {
        info!("[stub] stop walking");
        refuse("stop walking")
    }

    fn start_action(&mut self, index: ActionIndex) -> Result<()> {
        info!("[stub] start action {}", index);
        refuse("start action")
    }

    fn move_head(&mut self, x: i32, y: i32) -> Result<()> {
        info!("[stub] move head x={} y={}", x, y);
        refuse("move head")
    }

    fn head_home(&mut self) -> Result<()> {
        info!("[stub] head home");
        refuse("move head home")
    }

    fn is_running(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn settled(&mut self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_refuses_state_changes() {
        let mut stub = StubBackend::new();
        assert!(matches!(
            stub.start_walking(),
            Err(ActuatorError::Unavailable { operation: "start walking" })
        ));
        assert!(stub.enable_joints(JointGroup::Body).is_err());
        assert!(stub.start_action(ActionIndex(1)).is_err());
        assert!(stub.move_head(10, 10).is_err());
    }

    #[test]
    fn test_stub_is_always_settled() {
        let mut stub = StubBackend::new();
        assert!(stub.settled().unwrap());
        assert!(!stub.is_running().unwrap());
    }
}
