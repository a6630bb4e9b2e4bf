use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{debug, info};
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};

use peerlink::{PacketRef, Peer, RegionConfig, SERVER_ID};

#[derive(Parser)]
#[clap(about = "Opens a peerlink region and exchanges packets with its server")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "peerlink-client.toml")]
    config: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct ClientConfig {
    region: RegionConfig,
    burst: usize,
    interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            region: RegionConfig::default(),
            burst: 10,
            interval_ms: 10,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: ClientConfig = confy::load_path(&opts.config)?;
    info!("{:?}", &cfg);

    let mut client = Peer::client(&cfg.region, |packet: &PacketRef<'_>| {
        info!(
            "client received {}: {}",
            packet.id(),
            String::from_utf8_lossy(packet.payload())
        );
    })?;
    info!("joined {} as peer {}", client.region().name(), client.peer_id());

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&stop))?;
    run(&mut client, &cfg, &stop)
}

fn run(client: &mut Peer, cfg: &ClientConfig, stop: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let mut sent = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let room = client.outgoing_stats()?.free();
        for _ in 0..cfg.burst {
            let payload = format!("client {} #{}", client.peer_id(), sent + 1);
            match client.send_to(SERVER_ID, payload.as_bytes()) {
                Ok(_) => sent += 1,
                Err(e) if e.is_backpressure() => {
                    debug!("{} ({} bytes were free this round)", e, room);
                    break;
                }
                Err(e) => return Err(Box::new(e)),
            }
        }
        client.process_incoming()?;
        thread::sleep(Duration::from_millis(cfg.interval_ms));
    }
    info!("client {} stopping after {} packets", client.peer_id(), sent);
    Ok(())
}
