// Hardware backend: drives the motion sub-board
//
// Each backend call maps onto one or two register writes. The board owns
// the gait and the action player; `settled` reads its status register.

use tracing::{debug, info, warn};

use super::bus::{BoardStatus, BusError, MotionBoardBus, Register};
use super::{ActuatorBackend, ActuatorError, JointGroup, Result};
use crate::catalog::ActionIndex;

/// Head servo resolution: 4096 steps per revolution
const STEPS_PER_REVOLUTION: f32 = 4096.0;
const STEPS_PER_DEG: f32 = STEPS_PER_REVOLUTION / 360.0;

/// Convert a head angle in degrees to raw servo steps
pub fn angle_to_raw(degrees: i32) -> i16 {
    let steps = (degrees as f32 * STEPS_PER_DEG).round() as i32;

    // Clamp to signed 16-bit range
    steps.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn amplitude(what: &'static str, value: i32) -> Result<i16> {
    i16::try_from(value).map_err(|_| ActuatorError::OutOfRange {
        what,
        value: value.into(),
    })
}

fn amplitudes(forward: i32, turn: i32) -> Result<(i16, i16)> {
    Ok((
        amplitude("forward amplitude", forward)?,
        amplitude("turn amplitude", turn)?,
    ))
}

/// Backend for a robot with the motion board attached
pub struct HardwareBackend {
    bus: MotionBoardBus,
    board_id: u8,
}

impl HardwareBackend {
    /// Connect to the board and check that it answers
    ///
    /// Failing here is a bring-up fault; callers should abort startup.
    pub fn open(port: &str, baudrate: u32, board_id: u8) -> std::result::Result<Self, BusError> {
        info!("Opening motion board bus on {} @ {} baud", port, baudrate);
        let bus = MotionBoardBus::open_with_baudrate(port, baudrate)?;
        let mut backend = Self { bus, board_id };
        backend.identify()?;
        Ok(backend)
    }

    fn identify(&mut self) -> std::result::Result<(), BusError> {
        if !self.bus.ping(self.board_id)? {
            warn!("Motion board {} not responding to ping", self.board_id);
            return Err(BusError::Timeout { id: self.board_id });
        }

        let model = self.bus.read_u16(self.board_id, Register::ModelNumber)?;
        let firmware = self.bus.read_u8(self.board_id, Register::FirmwareVersion)?;
        info!(
            "Motion board {} online (model {}, firmware {})",
            self.board_id, model, firmware
        );
        Ok(())
    }

    fn status(&mut self) -> Result<BoardStatus> {
        let status = self.bus.read_status(self.board_id)?;
        debug!("Board status: {:#04X}", status.0);
        Ok(status)
    }
}

impl ActuatorBackend for HardwareBackend {
    fn name(&self) -> &'static str {
        "hardware"
    }

    fn enable_joints(&mut self, group: JointGroup) -> Result<()> {
        debug!("Enabling joints {:?}", group);
        self.bus
            .write_u8(self.board_id, Register::JointEnable, group.code())?;
        Ok(())
    }

    fn start_walking(&mut self) -> Result<()> {
        info!("Starting gait");
        self.bus.write_u8(self.board_id, Register::WalkControl, 1)?;
        Ok(())
    }

    fn check_velocity(&self, forward: i32, turn: i32) -> Result<()> {
        amplitudes(forward, turn).map(|_| ())
    }

    fn set_velocity(&mut self, forward: i32, turn: i32) -> Result<()> {
        let (forward, turn) = amplitudes(forward, turn)?;
        self.bus
            .write_i16_pair(self.board_id, Register::ForwardAmplitude, forward, turn)?;
        Ok(())
    }

    fn stop_walking(&mut self) -> Result<()> {
        info!("Stopping gait");
        self.bus.write_u8(self.board_id, Register::WalkControl, 0)?;
        Ok(())
    }

    fn start_action(&mut self, index: ActionIndex) -> Result<()> {
        let page = u8::try_from(index.0).map_err(|_| ActuatorError::OutOfRange {
            what: "action page",
            value: index.0.into(),
        })?;
        info!("Starting action page {}", page);
        self.bus.write_u8(self.board_id, Register::ActionPage, page)?;
        Ok(())
    }

    fn move_head(&mut self, x: i32, y: i32) -> Result<()> {
        let (pan, tilt) = (angle_to_raw(x), angle_to_raw(y));
        debug!("Moving head to pan={} tilt={} (raw {}, {})", x, y, pan, tilt);
        self.bus
            .write_i16_pair(self.board_id, Register::HeadPan, pan, tilt)?;
        Ok(())
    }

    fn head_home(&mut self) -> Result<()> {
        debug!("Recentring head");
        self.bus.write_u8(self.board_id, Register::HeadHome, 1)?;
        Ok(())
    }

    fn is_running(&mut self) -> Result<bool> {
        Ok(self.status()?.walking())
    }

    fn settled(&mut self) -> Result<bool> {
        Ok(self.status()?.settled())
    }
}

impl Drop for HardwareBackend {
    fn drop(&mut self) {
        // Leave the robot standing still rather than mid-gait
        match self.is_running() {
            Ok(true) => {
                if let Err(e) = self.stop_walking() {
                    warn!("Failed to stop gait on drop: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to read board status on drop: {}", e),
        }
    }
}
