use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{debug, info};
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};

use peerlink::{PacketRef, Peer, PeerId, RegionConfig};

#[derive(Parser)]
#[clap(about = "Creates a peerlink region and exchanges packets with its client")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "peerlink-server.toml")]
    config: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct ServerConfig {
    region: RegionConfig,
    /// Packets sent per round.
    burst: usize,
    interval_ms: u64,
    peer: PeerId,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            region: RegionConfig::default(),
            burst: 100,
            interval_ms: 10,
            peer: 1,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: ServerConfig = confy::load_path(&opts.config)?;
    info!("{:?}", &cfg);

    let mut server = Peer::server(&cfg.region, |packet: &PacketRef<'_>| {
        info!(
            "server received {} from {}: {}",
            packet.id(),
            packet.from(),
            String::from_utf8_lossy(packet.payload())
        );
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&stop))?;
    run(&mut server, &cfg, &stop)
}

fn run(server: &mut Peer, cfg: &ServerConfig, stop: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let mut sent = 0u64;
    while !stop.load(Ordering::Relaxed) {
        for _ in 0..cfg.burst {
            let payload = format!("server #{}", sent + 1);
            match server.send_to(cfg.peer, payload.as_bytes()) {
                Ok(_) => sent += 1,
                Err(e) if e.is_backpressure() => {
                    debug!("{}; waiting for peer {} to drain", e, cfg.peer);
                    break;
                }
                Err(e) => return Err(Box::new(e)),
            }
        }
        server.process_incoming()?;
        thread::sleep(Duration::from_millis(cfg.interval_ms));
    }
    info!("server stopping after {} packets", sent);
    Ok(())
}
