use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ffmpeg_source::input::InputOptions;

pub const DEFAULT_SOURCE_URL: &str =
    "rtsp://10.0.0.104:554/cam/realmonitor?channel=1&subtype=0&unicast=true&proto=Onvif";

/// Relay an RTSP H.264 camera stream to WebRTC viewers.
#[derive(Debug, Clone, Parser)]
#[command(name = "rtsp-relay", version)]
pub struct RelayConfig {
    /// RTSP URL of the camera stream
    #[arg(long, env = "RELAY_SOURCE_URL", default_value = DEFAULT_SOURCE_URL)]
    pub source_url: String,

    /// Address serving the static files and the signaling endpoint
    #[arg(long, env = "RELAY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    #[arg(long, env = "RELAY_STATIC_DIR", default_value = "./static")]
    pub static_dir: PathBuf,

    #[arg(long, env = "RELAY_REPORT_PATH", default_value = "report.csv")]
    pub report_path: PathBuf,

    #[arg(long, env = "RELAY_REPORT_INTERVAL_SECS", default_value_t = 3)]
    pub report_interval_secs: u64,

    /// Wait before reconnecting after the source connection is lost
    #[arg(long, env = "RELAY_RECONNECT_DELAY_SECS", default_value_t = 5)]
    pub reconnect_delay_secs: u64,

    /// Upper bound on ICE candidate gathering per signaling request
    #[arg(long, env = "RELAY_GATHER_TIMEOUT_SECS", default_value_t = 10)]
    pub gather_timeout_secs: u64,

    /// Socket read timeout on the source; a silent camera counts as lost
    #[arg(long, env = "RELAY_READ_TIMEOUT_SECS", default_value_t = 10)]
    pub read_timeout_secs: u64,

    /// RTSP lower transport: tcp or udp
    #[arg(long, env = "RELAY_RTSP_TRANSPORT", default_value = "tcp")]
    pub rtsp_transport: String,

    /// STUN/TURN URLs offered to viewer peer connections
    #[arg(long = "ice-server", env = "RELAY_ICE_SERVERS", value_delimiter = ',')]
    pub ice_servers: Vec<String>,
}

impl RelayConfig {
    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            source_url: self.source_url.clone(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            input: InputOptions {
                rtsp_transport: self.rtsp_transport.clone(),
                read_timeout: Duration::from_secs(self.read_timeout_secs),
            },
        }
    }

    pub fn signaling(&self) -> SignalingConfig {
        SignalingConfig {
            ice_servers: self.ice_servers.clone(),
            gather_timeout: Duration::from_secs(self.gather_timeout_secs),
        }
    }

    pub fn report(&self) -> ReportConfig {
        ReportConfig {
            path: self.report_path.clone(),
            interval: Duration::from_secs(self.report_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub source_url: String,
    pub reconnect_delay: Duration,
    pub input: InputOptions,
}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub ice_servers: Vec<String>,
    pub gather_timeout: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            gather_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub path: PathBuf,
    pub interval: Duration,
}
