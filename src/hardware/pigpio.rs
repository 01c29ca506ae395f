//! pigpio daemon client over its TCP socket interface.
//!
//! Each request is four little-endian 32-bit words `(cmd, p1, p2, p3)`,
//! followed by `p3` extension bytes when the command carries a payload. The
//! daemon answers with four words, the last of which is the signed result;
//! negative results are pigpio error codes.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, info};

use super::{PinMode, Pull, PulseService};
use crate::error::{PuncherError, Result};
use crate::motion::Pulse;

const CMD_MODES: u32 = 0;
const CMD_PUD: u32 = 2;
const CMD_READ: u32 = 3;
const CMD_WRITE: u32 = 4;
const CMD_PWM: u32 = 5;
const CMD_WVCLR: u32 = 27;
const CMD_WVAG: u32 = 28;
const CMD_WVBSY: u32 = 32;
const CMD_WVSP: u32 = 35;
const CMD_WVCRE: u32 = 49;
const CMD_WVTX: u32 = 51;

/// `WVSP` selector for the maximum allowed pulse count.
const WVSP_MAX: u32 = 2;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to a running `pigpiod`.
pub struct PigpioClient {
    stream: TcpStream,
}

impl PigpioClient {
    /// Connect to the daemon at `address:port`.
    pub fn connect(address: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((address, port)).map_err(|e| {
            PuncherError::MotorService(format!(
                "cannot reach pigpiod on {address}:{port}, make sure it is running: {e}"
            ))
        })?;
        stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        stream.set_nodelay(true)?;
        info!("connected to pigpiod on {address}:{port}");
        Ok(Self { stream })
    }

    /// Send one command and return the daemon's result word.
    fn command(&mut self, name: &str, cmd: u32, p1: u32, p2: u32, ext: &[u8]) -> Result<i32> {
        let mut request = Vec::with_capacity(16 + ext.len());
        for word in [cmd, p1, p2, ext.len() as u32] {
            request.extend_from_slice(&word.to_le_bytes());
        }
        request.extend_from_slice(ext);

        let mut response = [0u8; 16];
        self.stream
            .write_all(&request)
            .and_then(|_| self.stream.read_exact(&mut response))
            .map_err(|e| PuncherError::MotorService(format!("{name}: {e}")))?;

        let result = i32::from_le_bytes([response[12], response[13], response[14], response[15]]);
        if result < 0 {
            return Err(PuncherError::MotorService(format!(
                "{name} failed with pigpio error {result}"
            )));
        }
        Ok(result)
    }
}

/// Pack pulses into the `WVAG` extension payload.
fn encode_pulses(pulses: &[Pulse]) -> Vec<u8> {
    let mut ext = Vec::with_capacity(pulses.len() * 12);
    for pulse in pulses {
        ext.extend_from_slice(&pulse.gpio_on.to_le_bytes());
        ext.extend_from_slice(&pulse.gpio_off.to_le_bytes());
        ext.extend_from_slice(&pulse.delay_us.to_le_bytes());
    }
    ext
}

impl PulseService for PigpioClient {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<()> {
        let mode = match mode {
            PinMode::Input => 0,
            PinMode::Output => 1,
        };
        self.command("set_mode", CMD_MODES, pin, mode, &[])?;
        Ok(())
    }

    fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> Result<()> {
        let pull = match pull {
            Pull::Off => 0,
            Pull::Down => 1,
            Pull::Up => 2,
        };
        self.command("set_pull_up_down", CMD_PUD, pin, pull, &[])?;
        Ok(())
    }

    fn read(&mut self, pin: u32) -> Result<bool> {
        Ok(self.command("read", CMD_READ, pin, 0, &[])? != 0)
    }

    fn write(&mut self, pin: u32, level: bool) -> Result<()> {
        self.command("write", CMD_WRITE, pin, u32::from(level), &[])?;
        Ok(())
    }

    fn set_pwm_dutycycle(&mut self, pin: u32, duty: u8) -> Result<()> {
        self.command("set_PWM_dutycycle", CMD_PWM, pin, u32::from(duty), &[])?;
        Ok(())
    }

    fn wave_clear(&mut self) -> Result<()> {
        self.command("wave_clear", CMD_WVCLR, 0, 0, &[])?;
        Ok(())
    }

    fn wave_add_generic(&mut self, pulses: &[Pulse]) -> Result<u32> {
        if pulses.is_empty() {
            return Ok(0);
        }
        let total = self.command("wave_add_generic", CMD_WVAG, 0, 0, &encode_pulses(pulses))?;
        debug!("added {} pulses, wave buffer holds {total}", pulses.len());
        Ok(total as u32)
    }

    fn wave_create(&mut self) -> Result<u32> {
        Ok(self.command("wave_create", CMD_WVCRE, 0, 0, &[])? as u32)
    }

    fn wave_send_once(&mut self, wave_id: u32) -> Result<u32> {
        Ok(self.command("wave_send_once", CMD_WVTX, wave_id, 0, &[])? as u32)
    }

    fn wave_tx_busy(&mut self) -> Result<bool> {
        Ok(self.command("wave_tx_busy", CMD_WVBSY, 0, 0, &[])? != 0)
    }

    fn wave_max_pulses(&mut self) -> Result<u32> {
        Ok(self.command("wave_get_max_pulses", CMD_WVSP, WVSP_MAX, 0, &[])? as u32)
    }
}
