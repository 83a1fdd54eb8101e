use crate::prelude::*;

use serde::Deserialize;
use serde_yaml;
use std::sync::Arc;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: Serial,

    #[serde(default)]
    pub poller: Poller,

    #[serde(default)]
    pub rest: Rest,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append every published snapshot to, as JSON lines
    pub datalog_file: Option<String>,
}

// Serial {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => Err(format!("data_bits must be between 5 and 8, got {}", bits)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(format!("stop_bits must be 1 or 2, got {}", bits)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Serial {
    #[serde(default = "Config::default_device_paths")]
    pub device_paths: Vec<String>,

    pub baud_rate: Option<u32>,
    pub data_bits: Option<DataBits>,
    pub parity: Option<Parity>,
    pub stop_bits: Option<StopBits>,
    pub flow_control: Option<FlowControl>,

    pub read_timeout_ms: Option<u64>,
    pub probe_settle_ms: Option<u64>,
    pub probe_window_ms: Option<u64>,
    pub poll_step_ms: Option<u64>,
    pub reopen_settle_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
}

impl Default for Serial {
    fn default() -> Self {
        Self {
            device_paths: Config::default_device_paths(),
            baud_rate: None,
            data_bits: None,
            parity: None,
            stop_bits: None,
            flow_control: None,
            read_timeout_ms: None,
            probe_settle_ms: None,
            probe_window_ms: None,
            poll_step_ms: None,
            reopen_settle_ms: None,
            query_timeout_ms: None,
        }
    }
}

impl Serial {
    pub fn device_paths(&self) -> &[String] {
        &self.device_paths
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(2400)
    }

    pub fn data_bits(&self) -> DataBits {
        self.data_bits.unwrap_or(DataBits::Eight)
    }

    pub fn parity(&self) -> Parity {
        self.parity.unwrap_or(Parity::None)
    }

    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits.unwrap_or(StopBits::One)
    }

    pub fn flow_control(&self) -> FlowControl {
        self.flow_control.unwrap_or(FlowControl::None)
    }

    pub fn read_timeout_ms(&self) -> u64 {
        self.read_timeout_ms.unwrap_or(100)
    }

    pub fn probe_settle_ms(&self) -> u64 {
        self.probe_settle_ms.unwrap_or(500)
    }

    pub fn probe_window_ms(&self) -> u64 {
        self.probe_window_ms.unwrap_or(2000)
    }

    pub fn poll_step_ms(&self) -> u64 {
        self.poll_step_ms.unwrap_or(100)
    }

    pub fn reopen_settle_ms(&self) -> u64 {
        self.reopen_settle_ms.unwrap_or(200)
    }

    pub fn query_timeout_ms(&self) -> u64 {
        self.query_timeout_ms.unwrap_or(5000)
    }
} // }}}

// Poller {{{
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Poller {
    pub reconnect_cooldown_secs: Option<u64>,
    pub settle_ms: Option<u64>,
}

impl Poller {
    pub fn reconnect_cooldown_secs(&self) -> u64 {
        self.reconnect_cooldown_secs.unwrap_or(10)
    }

    pub fn settle_ms(&self) -> u64 {
        self.settle_ms.unwrap_or(100)
    }
} // }}}

// Rest {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Rest {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_rest_address")]
    pub address: String,

    #[serde(default = "Config::default_rest_port")]
    pub port: u16,
}

impl Default for Rest {
    fn default() -> Self {
        Self {
            enabled: Config::default_enabled(),
            address: Config::default_rest_address(),
            port: Config::default_rest_port(),
        }
    }
}

impl Rest {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
} // }}}

#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn serial(&self) -> &Serial {
        &self.config.serial
    }

    pub fn poller(&self) -> &Poller {
        &self.config.poller
    }

    pub fn rest(&self) -> &Rest {
        &self.config.rest
    }

    pub fn loglevel(&self) -> &str {
        &self.config.loglevel
    }

    pub fn datalog_file(&self) -> Option<&str> {
        self.config.datalog_file.as_deref()
    }

    pub fn log_summary(&self, file: &str) {
        self.config.log_summary(file)
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Logs the effective settings. Needs the logger installed first.
    pub fn log_summary(&self, file: &str) {
        info!("Configuration loaded from {}:", file);
        info!("  Serial:");
        info!("    Device paths: {}", self.serial.device_paths.join(", "));
        info!("    Baud rate: {}", self.serial.baud_rate());
        info!(
            "    Line: {:?} data bits, parity {:?}, {:?} stop bits, flow control {:?}",
            self.serial.data_bits(),
            self.serial.parity(),
            self.serial.stop_bits(),
            self.serial.flow_control()
        );
        info!("    Query timeout: {}ms", self.serial.query_timeout_ms());
        info!("  Poller:");
        info!("    Reconnect cooldown: {}s", self.poller.reconnect_cooldown_secs());
        info!("  REST: {}", if self.rest.enabled { "enabled" } else { "disabled" });
        if self.rest.enabled {
            info!("    Listen: {}:{}", self.rest.address, self.rest.port);
        }
        if let Some(datalog) = &self.datalog_file {
            info!("  Datalog file: {}", datalog);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.serial.device_paths.is_empty() {
            bail!("serial.device_paths must list at least one device");
        }
        if self.serial.device_paths.iter().any(|p| p.is_empty()) {
            return Err(anyhow!("config.rs:serial device path cannot be empty"));
        }
        if self.serial.baud_rate() == 0 {
            bail!("serial.baud_rate must be greater than 0");
        }
        if self.serial.query_timeout_ms() == 0 {
            return Err(anyhow!("config.rs:Invalid query timeout: 0"));
        }
        if self.serial.poll_step_ms() == 0 {
            return Err(anyhow!("config.rs:Invalid poll step: 0"));
        }

        if self.rest.enabled {
            if self.rest.port == 0 {
                bail!("rest.port must be between 1 and 65535");
            }
            if self.rest.address.is_empty() {
                return Err(anyhow!("config.rs:REST address cannot be empty"));
            }
        }

        Ok(())
    }

    fn default_device_paths() -> Vec<String> {
        vec!["/dev/ttyUSB0".to_string()]
    }

    fn default_rest_address() -> String {
        "0.0.0.0".to_string()
    }

    fn default_rest_port() -> u16 {
        8080
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_from_minimal_file() -> Result<()> {
        let config = Config::from_yaml("loglevel: debug\n")?;

        assert_eq!(config.serial.device_paths(), ["/dev/ttyUSB0".to_string()]);
        assert_eq!(config.serial.baud_rate(), 2400);
        assert_eq!(config.serial.data_bits(), DataBits::Eight);
        assert_eq!(config.serial.parity(), Parity::None);
        assert_eq!(config.serial.stop_bits(), StopBits::One);
        assert_eq!(config.serial.flow_control(), FlowControl::None);
        assert_eq!(config.serial.query_timeout_ms(), 5000);
        assert_eq!(config.poller.reconnect_cooldown_secs(), 10);
        assert!(config.rest.enabled());
        assert_eq!(config.rest.port(), 8080);
        assert_eq!(config.loglevel, "debug");
        assert_eq!(config.datalog_file, None);

        Ok(())
    }

    #[test]
    fn full_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            r#"
serial:
  device_paths: ["/dev/ttyUSB1", "/dev/ttyACM0"]
  baud_rate: 9600
  data_bits: 7
  parity: even
  stop_bits: 2
  flow_control: hardware
  query_timeout_ms: 3000
poller:
  reconnect_cooldown_secs: 30
rest:
  address: 127.0.0.1
  port: 9090
datalog_file: /tmp/solax.jsonl
"#
        )?;

        let config = ConfigWrapper::new(file.path().to_string_lossy().to_string())?;

        assert_eq!(config.serial().device_paths().len(), 2);
        assert_eq!(config.serial().baud_rate(), 9600);
        assert_eq!(config.serial().data_bits(), DataBits::Seven);
        assert_eq!(config.serial().parity(), Parity::Even);
        assert_eq!(config.serial().stop_bits(), StopBits::Two);
        assert_eq!(config.serial().flow_control(), FlowControl::Hardware);
        assert_eq!(config.serial().query_timeout_ms(), 3000);
        assert_eq!(config.serial().probe_window_ms(), 2000);
        assert_eq!(config.poller().reconnect_cooldown_secs(), 30);
        assert_eq!(config.rest().address(), "127.0.0.1");
        assert_eq!(config.rest().port(), 9090);
        assert_eq!(config.datalog_file(), Some("/tmp/solax.jsonl"));
        assert_eq!(config.loglevel(), "info");

        Ok(())
    }

    #[test]
    fn rejects_empty_device_list() {
        let err = Config::from_yaml("serial:\n  device_paths: []\n").unwrap_err();
        assert!(err.to_string().contains("device_paths"));
    }

    #[test]
    fn rejects_bad_data_bits() {
        assert!(Config::from_yaml("serial:\n  data_bits: 9\n").is_err());
    }

    #[test]
    fn rejects_zero_rest_port() {
        assert!(Config::from_yaml("rest:\n  port: 0\n").is_err());
        assert!(Config::from_yaml("rest:\n  enabled: false\n  port: 0\n").is_ok());
    }

    #[test]
    fn missing_file() {
        assert!(Config::new("/nonexistent/solax.yaml".to_string()).is_err());
    }
}
