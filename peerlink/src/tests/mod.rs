use std::error::Error;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::channel::{PacketRef, PeerId};
use crate::core::RegionConfig;

mod peer_tests;

#[derive(Clone, Debug, PartialEq)]
pub struct Received {
    pub from: PeerId,
    pub to: PeerId,
    pub id: u32,
    pub payload: Vec<u8>,
}

pub type Inbox = Arc<Mutex<Vec<Received>>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn region_config(
    dir: &TempDir,
    name: &str,
    incoming_size: usize,
    outgoing_size: usize,
) -> Result<RegionConfig, Box<dyn Error>> {
    init_logging();
    let cfg = RegionConfig::builder()
        .data_dir(dir.path().to_string_lossy().into_owned())
        .name(name.to_string())
        .incoming_size(incoming_size)
        .outgoing_size(outgoing_size)
        .build()?;
    Ok(cfg)
}

/// A callback that records every packet it is handed.
pub fn inbox() -> (Inbox, impl FnMut(&PacketRef<'_>) + Send + 'static) {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    let callback = move |packet: &PacketRef<'_>| {
        sink.lock().unwrap().push(Received {
            from: packet.from(),
            to: packet.to(),
            id: packet.id(),
            payload: packet.payload().to_vec(),
        });
    };
    (inbox, callback)
}

pub fn ignore(_: &PacketRef<'_>) {}
