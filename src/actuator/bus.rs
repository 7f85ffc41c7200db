// Motion sub-board serial protocol
//
// Dynamixel Protocol 1.0 style framing:
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Status format: [0xFF, 0xFF, ID, Length, Error, Params..., Checksum]
//
// The board runs the gait and the action player itself; the host only
// writes the control registers below and polls the status register.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

/// Default serial configuration for the motion board
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Device ID of the motion board on the bus
pub const DEFAULT_BOARD_ID: u8 = 200;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Control table of the motion board
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    ModelNumber = 0,        // 2 bytes, read-only
    FirmwareVersion = 2,    // 1 byte, read-only
    JointEnable = 24,       // 1 byte: joint group code
    WalkControl = 26,       // 1 byte: 0=stop, 1=start
    ForwardAmplitude = 28,  // 2 bytes (signed), followed by TurnAmplitude
    TurnAmplitude = 30,     // 2 bytes (signed)
    ActionPage = 32,        // 1 byte: write starts the page
    HeadPan = 34,           // 2 bytes (signed raw steps), followed by HeadTilt
    HeadTilt = 36,          // 2 bytes (signed raw steps)
    HeadHome = 38,          // 1 byte: write 1 to recentre
    Status = 40,            // 1 byte, read-only, see BoardStatus
}

/// Error types for motion board communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from device {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for device {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Device {id} returned error status: 0x{status:02X}")]
    DeviceError { id: u8, status: u8 },

    #[error("Timeout waiting for response from device {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Snapshot of the board's status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardStatus(pub u8);

impl BoardStatus {
    pub const WALKING: u8 = 0x01;
    pub const STOPPING: u8 = 0x02;
    pub const ACTION_RUNNING: u8 = 0x04;
    pub const HEAD_MOVING: u8 = 0x08;

    pub fn walking(self) -> bool {
        self.0 & Self::WALKING != 0
    }

    /// No primitive is between start and completion
    ///
    /// A steadily stepping gait counts as settled; a gait finishing its
    /// last step after a stop request does not.
    pub fn settled(self) -> bool {
        self.0 & (Self::STOPPING | Self::ACTION_RUNNING | Self::HEAD_MOVING) == 0
    }
}

/// Serial link to the motion board
pub struct MotionBoardBus {
    port: Box<dyn SerialPort>,
}

impl MotionBoardBus {
    /// Open a connection to the board at `baudrate`
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Checksum over everything after the header
    fn checksum(data: &[u8]) -> u8 {
        let sum: u32 = data.iter().map(|&b| b as u32).sum();
        !(sum as u8)
    }

    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[2..]));

        packet
    }

    /// Validate the body of a status packet and return its parameters
    ///
    /// `body` is everything after the length byte: error, params, checksum.
    fn parse_status(expected_id: u8, id: u8, body: &[u8]) -> Result<Vec<u8>> {
        if id != expected_id {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if body.len() < 2 {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("Status packet too short ({} bytes)", body.len()),
            });
        }

        let (payload, checksum) = body.split_at(body.len() - 1);
        let mut checksum_data = vec![id, body.len() as u8];
        checksum_data.extend_from_slice(payload);
        if Self::checksum(&checksum_data) != checksum[0] {
            return Err(BusError::ChecksumMismatch { id });
        }

        if payload[0] != 0 {
            return Err(BusError::DeviceError {
                id,
                status: payload[0],
            });
        }

        Ok(payload[1..].to_vec())
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        trace!("TX {:02X?}", packet);
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BusError::Timeout { id: expected_id }
            } else {
                BusError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;

        let mut body = vec![0u8; id_length[1] as usize];
        self.port.read_exact(&mut body)?;
        trace!("RX id={} {:02X?}", id_length[0], body);

        Self::parse_status(expected_id, id_length[0], &body)
    }

    /// Ping a device to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(BusError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write consecutive bytes starting at a register
    pub fn write_bytes(&mut self, id: u8, register: Register, data: &[u8]) -> Result<()> {
        let mut params = Vec::with_capacity(data.len() + 1);
        params.push(register as u8);
        params.extend_from_slice(data);

        debug!("Write to device {}: reg={:?}, data={:02X?}", id, register, data);
        let packet = Self::build_packet(id, Instruction::Write, &params);
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        self.write_bytes(id, register, &[value])
    }

    /// Write two signed 16-bit values to a register and the one after it
    pub fn write_i16_pair(&mut self, id: u8, register: Register, first: i16, second: i16) -> Result<()> {
        let [a0, a1] = first.to_le_bytes();
        let [b0, b1] = second.to_le_bytes();
        self.write_bytes(id, register, &[a0, a1, b0, b1])
    }

    fn read_bytes(&mut self, id: u8, register: Register, len: u8) -> Result<Vec<u8>> {
        let packet = Self::build_packet(id, Instruction::Read, &[register as u8, len]);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < len as usize {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", len, response.len()),
            });
        }
        Ok(response)
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        Ok(self.read_bytes(id, register, 1)?[0])
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let response = self.read_bytes(id, register, 2)?;
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }

    pub fn read_status(&mut self, id: u8) -> Result<BoardStatus> {
        self.read_u8(id, Register::Status).map(BoardStatus)
    }
}
