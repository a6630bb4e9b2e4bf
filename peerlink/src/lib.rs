pub mod core;
pub mod channel;
pub mod peer;
mod errors;

#[cfg(test)]
mod tests;

pub use crate::channel::{ChannelStats, PacketHeader, PacketRef, PeerId, RECORD_HEADER_LEN, SERVER_ID};
pub use crate::core::{Region, RegionConfig, Role};
pub use crate::errors::{PeerlinkError, Result};
pub use crate::peer::{OnPacket, Peer};
