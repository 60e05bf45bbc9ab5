use clap::Parser;
use tracing::info;

use tuntcp::{Config, ConnectionKey, Handler, Interface};

/// Writes every received byte back to its sender.
struct Echo;

impl Handler for Echo {
    fn on_receive(&mut self, key: &ConnectionKey, data: &[u8]) -> Vec<u8> {
        info!(%key, len = data.len(), "echo");
        data.to_vec()
    }

    fn on_peer_close(&mut self, key: &ConnectionKey) -> bool {
        info!(%key, "peer closed");
        true
    }
}

fn main() -> tuntcp::Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let mut iface = Interface::new(config)?;
    iface.run(&mut Echo)
}
