// ODrive ASCII protocol over a serial port
//
// Commands are newline-terminated text:
//   `r <path>`         read a field, response is its value
//   `w <path> <value>` write a field, no response
//   `ss` / `sr`        save configuration / reboot
// A GCode-style checksum `*<n>` (decimal XOR of the preceding bytes) is
// appended to every command; the device then checksums its responses
// and we verify them.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use super::bus::{BusError, DeviceBus, Result};
use super::handle::{DeviceHandle, Discovery};

/// Default serial configuration for the controller's UART
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

const LINE_MAX: usize = 256;

/// Serial device bus speaking the ASCII protocol
pub struct AsciiBus {
    port: Mutex<Box<dyn SerialPort>>,
}

impl AsciiBus {
    /// Open a new connection to a device
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port: Mutex::new(port),
        })
    }

    /// XOR checksum over the command bytes (GCode convention)
    fn checksum(frame: &[u8]) -> u8 {
        frame.iter().fold(0, |acc, &b| acc ^ b)
    }

    /// Append checksum and newline terminator
    fn frame_command(command: &str) -> String {
        format!("{command}*{}\n", Self::checksum(command.as_bytes()))
    }

    /// Strip the terminator, verify and strip a `*<n>` checksum suffix
    /// if the device sent one.
    fn parse_response(line: &str) -> Result<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some((payload, given)) = line.rsplit_once('*') else {
            return Ok(line.trim().to_string());
        };
        let expected = Self::checksum(payload.as_bytes());
        let given: u8 = given
            .trim()
            .parse()
            .map_err(|_| BusError::Protocol(format!("malformed checksum in `{line}`")))?;
        if given != expected {
            return Err(BusError::Protocol(format!(
                "checksum mismatch in `{line}`: expected {expected}"
            )));
        }
        Ok(payload.trim().to_string())
    }

    /// Send one command; optionally wait for the single response line.
    fn transact(&self, command: &str, expect_response: bool) -> Result<Option<String>> {
        let framed = Self::frame_command(command);
        debug!("-> {}", command);

        let mut port = self.port.lock().unwrap_or_else(|e| e.into_inner());
        port.write_all(framed.as_bytes())?;
        port.flush()?;

        if !expect_response {
            return Ok(None);
        }

        let mut line = Vec::with_capacity(32);
        let mut byte = [0u8; 1];
        loop {
            port.read_exact(&mut byte).map_err(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    BusError::Unreachable(format!("no response to `{command}`"))
                } else {
                    BusError::Io(e)
                }
            })?;
            if byte[0] == b'\n' {
                break;
            }
            if line.len() >= LINE_MAX {
                return Err(BusError::Protocol(format!(
                    "unterminated response to `{command}`"
                )));
            }
            line.push(byte[0]);
        }

        let line = String::from_utf8(line)
            .map_err(|_| BusError::Protocol("non-UTF8 response".to_string()))?;
        debug!("<- {}", line);
        Self::parse_response(&line).map(Some)
    }
}

impl DeviceBus for AsciiBus {
    async fn read(&self, path: &str) -> Result<String> {
        let value = self
            .transact(&format!("r {path}"), true)?
            .unwrap_or_default();
        if value.is_empty() || value.starts_with("invalid") {
            return Err(BusError::Protocol(format!(
                "device rejected read of {path}: `{value}`"
            )));
        }
        Ok(value)
    }

    async fn write(&self, path: &str, value: &str) -> Result<()> {
        self.transact(&format!("w {path} {value}"), false)?;
        Ok(())
    }

    async fn reboot(&self) -> Result<()> {
        self.transact("sr", false)?;
        Ok(())
    }

    async fn save_configuration(&self) -> Result<()> {
        self.transact("ss", false)?;
        Ok(())
    }
}

/// Discovery over a fixed list of serial ports. Labels come from the
/// device serial number when it answers, the port basename otherwise.
pub struct SerialDiscovery {
    ports: Vec<String>,
    baudrate: u32,
}

impl SerialDiscovery {
    pub fn new(ports: Vec<String>, baudrate: u32) -> Self {
        Self { ports, baudrate }
    }
}

impl Discovery for SerialDiscovery {
    type Bus = AsciiBus;

    async fn discover(&self) -> Result<Vec<DeviceHandle<AsciiBus>>> {
        let mut devices = Vec::new();
        for port in &self.ports {
            info!("Opening device bus on {}", port);
            let bus = AsciiBus::open_with_baudrate(port, self.baudrate)?;
            let label = match bus.read("serial_number").await {
                Ok(serial) => format!("odrv-{serial}"),
                Err(e) => {
                    debug!("{}: no serial number ({}), labelling by port", port, e);
                    port.rsplit('/').next().unwrap_or(port).to_string()
                }
            };
            info!("Discovered {} on {}", label, port);
            devices.push(DeviceHandle::new(bus, label));
        }
        Ok(devices)
    }
}
