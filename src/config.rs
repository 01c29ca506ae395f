//! Machine configuration — keyboard, pins, motion limits and strip geometry
//! loaded from YAML (default `~/.musicpuncher/config.yaml`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PuncherError, Result};
use crate::music::{Keyboard, Pitch};

/// One stepper motor and its driver pins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepperConfig {
    /// Start / stop rate in steps per second.
    pub min_sps: f64,
    /// Cruise rate in steps per second.
    pub max_sps: f64,
    /// Rate increase in steps per second per second.
    pub acceleration: f64,
    pub dir_pin: u32,
    pub step_pin: u32,
    /// Driver enable pin, if the driver has one wired.
    #[serde(default)]
    pub enable_pin: Option<u32>,
    /// Swap the direction pin level.
    #[serde(default, alias = "reverse-dir")]
    pub reverse: bool,
}

/// Home reference switch on the tone axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub pin: u32,
}

/// A solenoid driven high for `on-length` seconds, then low for `off-length`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SolenoidConfig {
    pub pin: u32,
    pub on_length: f64,
    pub off_length: f64,
}

/// RGB status LED with PWM duty cycles per state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusLedConfig {
    pub red_pin: u32,
    pub green_pin: u32,
    pub blue_pin: u32,
    pub rgb_on: [u8; 3],
    pub rgb_off: [u8; 3],
}

/// Where the pigpio daemon listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PigpioConfig {
    #[serde(default = "default_pigpio_address")]
    pub address: String,
    #[serde(default = "default_pigpio_port")]
    pub port: u16,
}

/// HTTP control surface bind address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_pigpio_address() -> String {
    "localhost".to_string()
}

fn default_pigpio_port() -> u16 {
    8888
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_homing_limit() -> u32 {
    20_000
}

impl Default for PigpioConfig {
    fn default() -> Self {
        Self {
            address: default_pigpio_address(),
            port: default_pigpio_port(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Complete machine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PuncherConfig {
    /// Punchable pitches in row order.
    pub keyboard: Vec<Pitch>,
    #[serde(default)]
    pub pigpio: PigpioConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub feed_stepper: StepperConfig,
    pub tone_stepper: StepperConfig,
    #[serde(default)]
    pub zero_button: Option<ButtonConfig>,
    #[serde(default)]
    pub status_led: Option<StatusLedConfig>,
    pub puncher: SolenoidConfig,
    pub cutter: SolenoidConfig,
    /// Tone-axis position to park at, in steps from home.
    pub idle_position: i64,
    /// Tone-axis position of the first row.
    pub row0: i64,
    /// Tone-axis steps between adjacent rows.
    pub tone_steps: f64,
    /// Feed-axis steps per second of music.
    pub feed_steps: f64,
    /// Feed distance between the punch and the cutter; negative cuts before
    /// the last hole.
    pub cutter_position: i64,
    /// Extra feed after cutting.
    pub end_feed: i64,
    /// Give up homing after this many slow steps.
    #[serde(default = "default_homing_limit")]
    pub homing_limit: u32,
}

impl PuncherConfig {
    /// Standard config location (~/.musicpuncher/config.yaml).
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".musicpuncher");
        path.push("config.yaml");
        path
    }

    /// Read and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PuncherError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| PuncherError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make motion planning meaningless.
    pub fn validate(&self) -> Result<()> {
        let steppers = [
            ("feed-stepper", &self.feed_stepper),
            ("tone-stepper", &self.tone_stepper),
        ];
        for (name, stepper) in steppers {
            if !positive(stepper.min_sps) || !positive(stepper.max_sps) {
                return Err(PuncherError::InvalidConfig(format!(
                    "{name}: step rates must be positive"
                )));
            }
            if !positive(stepper.acceleration) {
                return Err(PuncherError::InvalidConfig(format!(
                    "{name}: acceleration must be positive"
                )));
            }
        }
        if !positive(self.tone_steps) || !positive(self.feed_steps) {
            return Err(PuncherError::InvalidConfig(
                "tone-steps and feed-steps must be positive".into(),
            ));
        }
        for (name, solenoid) in [("puncher", &self.puncher), ("cutter", &self.cutter)] {
            let lengths = [solenoid.on_length, solenoid.off_length];
            if lengths.iter().any(|l| !l.is_finite() || *l < 0.0) {
                return Err(PuncherError::InvalidConfig(format!(
                    "{name}: on-length and off-length must be zero or more seconds"
                )));
            }
        }
        self.build_keyboard().map_err(|e| PuncherError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    pub fn build_keyboard(&self) -> Result<Keyboard> {
        Keyboard::new(self.keyboard.iter().copied())
    }

    /// Tone-axis position of the last row.
    pub fn last_row_position(&self) -> i64 {
        self.row_position(self.keyboard.len().saturating_sub(1))
    }

    /// Tone-axis position of row `index`.
    pub fn row_position(&self, index: usize) -> i64 {
        self.row0 + (index as f64 * self.tone_steps).round() as i64
    }

    /// Feed-axis steps for a delay in seconds.
    pub fn feed_for(&self, delay: f64) -> i64 {
        (delay * self.feed_steps).round() as i64
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl Default for PuncherConfig {
    fn default() -> Self {
        Self {
            //        c   d   e   f   g   a   b   c   d   e   f   g   a   b   c
            keyboard: vec![48, 50, 52, 53, 55, 57, 59, 60, 62, 64, 65, 67, 69, 71, 72],
            pigpio: PigpioConfig::default(),
            server: ServerConfig::default(),
            feed_stepper: StepperConfig {
                min_sps: 1000.0,
                max_sps: 3000.0,
                acceleration: 1000.0,
                dir_pin: 17,
                step_pin: 18,
                enable_pin: None,
                reverse: false,
            },
            tone_stepper: StepperConfig {
                min_sps: 1000.0,
                max_sps: 3000.0,
                acceleration: 1000.0,
                dir_pin: 22,
                step_pin: 23,
                enable_pin: None,
                reverse: false,
            },
            zero_button: None,
            status_led: None,
            puncher: SolenoidConfig {
                pin: 3,
                on_length: 0.2,
                off_length: 0.3,
            },
            cutter: SolenoidConfig {
                pin: 4,
                on_length: 0.2,
                off_length: 0.3,
            },
            idle_position: 0,
            row0: 100,
            tone_steps: 100.0,
            feed_steps: 100.0,
            cutter_position: 0,
            end_feed: 0,
            homing_limit: default_homing_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
keyboard: [60, 62, 64, 65, 67, 69, 71, 72]
pigpio:
  address: puncher.local
feed-stepper:
  min-sps: 500
  max-sps: 2500
  acceleration: 4000
  dir-pin: 17
  step-pin: 18
  enable-pin: 27
tone-stepper:
  min-sps: 500
  max-sps: 2000
  acceleration: 3000
  dir-pin: 22
  step-pin: 23
  reverse-dir: true
zero-button:
  pin: 2
puncher:
  pin: 3
  on-length: 0.05
  off-length: 0.1
cutter:
  pin: 4
  on-length: 0.3
  off-length: 0.3
idle-position: 50
row0: 120
tone-steps: 82.5
feed-steps: 200
cutter-position: -400
end-feed: 800
"#;

    #[test]
    fn default_config_is_valid() {
        let config = PuncherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keyboard.len(), 15);
    }

    #[test]
    fn parses_kebab_case_yaml() {
        let config = PuncherConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.keyboard, vec![60, 62, 64, 65, 67, 69, 71, 72]);
        assert_eq!(config.pigpio.address, "puncher.local");
        assert_eq!(config.pigpio.port, 8888);
        assert_eq!(config.feed_stepper.enable_pin, Some(27));
        assert!(!config.feed_stepper.reverse);
        assert!(config.tone_stepper.reverse);
        assert_eq!(config.zero_button, Some(ButtonConfig { pin: 2 }));
        assert!(config.status_led.is_none());
        assert_eq!(config.cutter_position, -400);
        assert_eq!(config.homing_limit, 20_000);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn serialize_deserialize() {
        let config = PuncherConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = PuncherConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn row_geometry() {
        let config = PuncherConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.row_position(0), 120);
        assert_eq!(config.row_position(2), 285);
        assert_eq!(config.last_row_position(), 120 + 578);
        assert_eq!(config.feed_for(0.25), 50);
    }

    #[test]
    fn rejects_zero_acceleration() {
        let yaml = SAMPLE.replace("acceleration: 4000", "acceleration: 0");
        assert!(matches!(
            PuncherConfig::from_yaml(&yaml),
            Err(PuncherError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_negative_solenoid_lengths() {
        let yaml = SAMPLE.replace("on-length: 0.05", "on-length: -0.1");
        let err = PuncherConfig::from_yaml(&yaml).unwrap_err();
        assert!(
            matches!(err, PuncherError::InvalidConfig(ref m) if m.starts_with("puncher:")),
            "{err}"
        );

        let mut config = PuncherConfig::default();
        config.cutter.off_length = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_rates() {
        let yaml = SAMPLE.replace("max-sps: 2500", "max-sps: .inf");
        assert!(matches!(
            PuncherConfig::from_yaml(&yaml),
            Err(PuncherError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let yaml = SAMPLE.replace("[60, 62, 64", "[60, 60, 64");
        assert!(matches!(
            PuncherConfig::from_yaml(&yaml),
            Err(PuncherError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_missing_sections() {
        assert!(PuncherConfig::from_yaml("keyboard: [60]\n").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = PuncherConfig::load(file.path()).unwrap();
        assert_eq!(config.row0, 120);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = PuncherConfig::load(Path::new("/nonexistent/musicpuncher.yaml")).unwrap_err();
        assert!(matches!(err, PuncherError::InvalidConfig(_)));
    }
}
