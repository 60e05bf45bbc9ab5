use clap::Parser;
use std::time::Duration;
use tracing::Level;

use crate::tcp::connection::Settings;

/// Runtime configuration of the stack, read from the command line.
#[derive(Debug, Clone, Parser)]
#[command(version, about = "User-space TCP over a TUN interface")]
pub struct Config {
    /// Name of the TUN interface to attach to
    #[arg(short, long, default_value = "tun0")]
    pub interface: String,
    /// Accept connections on this port only; repeat for more. Every port
    /// accepts when none is given
    #[arg(short, long = "port")]
    pub ports: Vec<u16>,
    /// Maximum segment lifetime in seconds; TimeWait lasts twice as long
    #[arg(long, default_value_t = 30)]
    pub msl_secs: u64,
    /// Retransmission timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub rto_ms: u64,
    /// Retransmissions before a connection is aborted
    #[arg(long, default_value_t = 5)]
    pub max_retransmits: u8,
    /// Largest payload sent in one segment
    #[arg(long, default_value_t = 1460)]
    pub mss: usize,
    /// Bytes a connection holds for sending, unsent and unacknowledged
    #[arg(long, default_value_t = 64 * 1024)]
    pub send_buffer: usize,
    /// Pick a random initial sequence number instead of 0
    #[arg(long)]
    pub random_iss: bool,
    /// Maximum level of log events printed
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["tuntcp"])
    }
}

impl Config {
    /// 2MSL
    pub fn time_wait(&self) -> Duration {
        Duration::from_secs(2 * self.msl_secs)
    }

    pub fn rto(&self) -> Duration {
        Duration::from_millis(self.rto_ms)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            mss: self.mss,
            max_retransmits: self.max_retransmits,
            send_buffer: self.send_buffer,
        }
    }
}
