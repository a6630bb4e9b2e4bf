use log::{debug, trace};

use crate::channel::{ChannelStats, PacketHeader, PacketRef, PeerId, SERVER_ID};
use crate::core::{Region, RegionConfig, Role};
use crate::errors::Result;

/// Receives packets addressed to a peer.
///
/// Runs while the region lock is held, so every other peer's sends and scans
/// wait for it to return. It must be `Send` so a peer can be polled from a
/// thread other than the one that built it.
pub trait OnPacket {
    fn on_packet(&mut self, packet: &PacketRef<'_>);
}

impl<F> OnPacket for F
    where F: FnMut(&PacketRef<'_>),
{
    fn on_packet(&mut self, packet: &PacketRef<'_>) {
        self(packet)
    }
}

pub struct Peer {
    region: Region,
    role: Role,
    peer_id: PeerId,
    callback: Box<dyn OnPacket + Send>,
}

impl Peer {
    /// Creates the region and takes peer id 0.
    pub fn server<C>(cfg: &RegionConfig, callback: C) -> Result<Peer>
        where C: OnPacket + Send + 'static,
    {
        let region = Region::create(cfg)?;
        debug!("server attached to {}", region.name());
        Ok(Peer {
            region,
            role: Role::Server,
            peer_id: SERVER_ID,
            callback: Box::new(callback),
        })
    }

    /// Opens a region created by a server and takes the next client id.
    pub fn client<C>(cfg: &RegionConfig, callback: C) -> Result<Peer>
        where C: OnPacket + Send + 'static,
    {
        let region = Region::open(cfg)?;
        let peer_id = region.with_lock(|locked| locked.next_client_id())?;
        debug!("client {} attached to {}", peer_id, region.name());
        Ok(Peer {
            region,
            role: Role::Client,
            peer_id,
            callback: Box::new(callback),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Appends a packet for `to` to this peer's outbound channel and returns
    /// the header it was stamped with. A full channel yields
    /// `ChannelOverflow` and leaves the channel unchanged.
    pub fn send_to(&mut self, to: PeerId, payload: &[u8]) -> Result<PacketHeader> {
        let (from, role) = (self.peer_id, self.role);
        let header = self.region.with_lock(|locked| -> Result<PacketHeader> {
            let offset = locked.channels(role).1.reserve(payload.len())?;
            let header = PacketHeader {
                from,
                to,
                id: locked.next_packet_id(),
                extra_size: payload.len() as u32,
            };
            locked.channels(role).1.write_record(offset, &header, payload);
            Ok(header)
        })??;
        trace!("{} {} sent packet {} to {} ({} bytes)", role, from, header.id, to, payload.len());
        Ok(header)
    }

    /// Delivers every packet addressed to this peer to the callback, in send
    /// order, and compacts the rest. Returns how many were delivered.
    pub fn process_incoming(&mut self) -> Result<usize> {
        let Peer { region, role, peer_id, callback } = self;
        let delivered = region.with_lock(|locked| {
            locked
                .channels(*role)
                .0
                .drain_addressed(*peer_id, |packet| callback.on_packet(packet))
        })??;
        if delivered > 0 {
            trace!("{} {} received {} packets", role, peer_id, delivered);
        }
        Ok(delivered)
    }

    pub fn incoming_stats(&self) -> Result<ChannelStats> {
        let role = self.role;
        self.region.with_lock(|locked| locked.channels(role).0.stats())?
    }

    pub fn outgoing_stats(&self) -> Result<ChannelStats> {
        let role = self.role;
        self.region.with_lock(|locked| locked.channels(role).1.stats())?
    }
}
