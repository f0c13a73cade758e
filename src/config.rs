use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;

pub const DEFAULT_DOS_THRESHOLD: u64 = 100;
pub const DEFAULT_PORT_SCAN_THRESHOLD: usize = 20;
pub const DEFAULT_SENSITIVE_PORTS: [u16; 7] = [21, 22, 23, 3389, 5900, 1433, 3306];
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(300);
/// Used when `RUST_LOG` is unset. Every packet verdict is emitted at `info`,
/// so the default shows one line per packet and alerts at `warn`.
pub const DEFAULT_LOG_FILTER: &str = "netshield=info";

/// Static escalation thresholds shared by the tracker and the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdPolicy {
    /// Packets from one source to one destination, per epoch, above which the
    /// pair is treated as a DoS.
    pub dos_threshold: u64,
    /// Distinct destination ports per source, per epoch, above which the
    /// source is treated as scanning.
    pub port_scan_threshold: usize,
    pub sensitive_ports: Vec<u16>,
    pub reset_interval: Duration,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            dos_threshold: DEFAULT_DOS_THRESHOLD,
            port_scan_threshold: DEFAULT_PORT_SCAN_THRESHOLD,
            sensitive_ports: DEFAULT_SENSITIVE_PORTS.to_vec(),
            reset_interval: DEFAULT_RESET_INTERVAL,
        }
    }
}

impl ThresholdPolicy {
    pub fn is_sensitive(&self, port: u16) -> bool {
        self.sensitive_ports.contains(&port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dos_threshold == 0 {
            return Err(ConfigError::Zero { name: "dos threshold" });
        }
        if self.port_scan_threshold == 0 {
            return Err(ConfigError::Zero { name: "port scan threshold" });
        }
        if self.reset_interval.is_zero() {
            return Err(ConfigError::Zero { name: "reset interval" });
        }
        if self.sensitive_ports.contains(&0) {
            return Err(ConfigError::InvalidPorts(format!("{:?}", self.sensitive_ports)));
        }
        Ok(())
    }
}

/// What to do with a record when the sink queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OverflowPolicy {
    /// Evict the oldest queued record to make room.
    #[default]
    DropOldest,
    /// Discard the incoming record.
    DropNewest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Owner identity stamped on every record. `None` runs in demo mode.
    pub owner: Option<String>,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            owner: None,
            queue_capacity: 1024,
            overflow: OverflowPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    Device(Option<String>),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub policy: ThresholdPolicy,
    pub dispatch: DispatchSettings,
    pub sink: Option<SinkSettings>,
    pub source: CaptureSource,
    pub filter: String,
}

impl Settings {
    /// Records are only persisted when both an owner and a sink are known.
    pub fn demo_mode(&self) -> bool {
        self.dispatch.owner.is_none() || self.sink.is_none()
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "netshield",
    version,
    about = "Flag port scans, DoS bursts and sensitive-port access in live traffic"
)]
pub struct Cli {
    /// Capture interface (defaults to the system's default device)
    #[arg(short, long, conflicts_with = "pcap")]
    pub interface: Option<String>,

    /// Read packets from a capture file instead of a live interface
    #[arg(long)]
    pub pcap: Option<PathBuf>,

    /// BPF capture filter
    #[arg(long, default_value = "ip")]
    pub filter: String,

    /// Owner identity stamped on stored records; without it nothing is stored
    #[arg(long, env = "USER_ID")]
    pub user_id: Option<String>,

    /// Base URL of the REST sink
    #[arg(long, env = "SUPABASE_URL")]
    pub sink_url: Option<String>,

    /// API key sent to the REST sink
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub sink_key: Option<String>,

    /// Packets per source/destination pair before flagging a DoS
    #[arg(long, env = "DOS_THRESHOLD", default_value_t = DEFAULT_DOS_THRESHOLD)]
    pub dos_threshold: u64,

    /// Distinct destination ports per source before flagging a port scan
    #[arg(long, env = "PORT_SCAN_THRESHOLD", default_value_t = DEFAULT_PORT_SCAN_THRESHOLD)]
    pub port_scan_threshold: usize,

    /// Ports whose access is always suspicious
    #[arg(
        long,
        env = "SENSITIVE_PORTS",
        value_delimiter = ',',
        default_values_t = DEFAULT_SENSITIVE_PORTS.to_vec()
    )]
    pub sensitive_ports: Vec<u16>,

    /// Seconds between full resets of the traffic counters
    #[arg(long, env = "RESET_INTERVAL_SECS", default_value_t = DEFAULT_RESET_INTERVAL.as_secs())]
    pub reset_interval: u64,

    /// Records buffered for the sink before the overflow policy kicks in
    #[arg(long, env = "SINK_QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    #[arg(long, env = "SINK_OVERFLOW", value_enum, default_value_t = OverflowPolicy::DropOldest)]
    pub overflow: OverflowPolicy,

    /// Per-request sink timeout in seconds
    #[arg(long, env = "SINK_TIMEOUT_SECS", default_value_t = 5)]
    pub submit_timeout: u64,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let policy = ThresholdPolicy {
            dos_threshold: self.dos_threshold,
            port_scan_threshold: self.port_scan_threshold,
            sensitive_ports: self.sensitive_ports,
            reset_interval: Duration::from_secs(self.reset_interval),
        };
        policy.validate()?;

        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero { name: "queue capacity" });
        }
        if self.submit_timeout == 0 {
            return Err(ConfigError::Zero { name: "submit timeout" });
        }

        let sink = self
            .sink_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| SinkSettings {
                url: url.trim_end_matches('/').to_string(),
                api_key: self.sink_key,
                timeout: Duration::from_secs(self.submit_timeout),
            });

        let source = match self.pcap {
            Some(path) => CaptureSource::File(path),
            None => CaptureSource::Device(self.interface),
        };

        Ok(Settings {
            policy,
            dispatch: DispatchSettings {
                owner: self.user_id.filter(|id| !id.trim().is_empty()),
                queue_capacity: self.queue_capacity,
                overflow: self.overflow,
            },
            sink,
            source,
            filter: self.filter,
        })
    }
}
