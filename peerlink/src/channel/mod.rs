//! Packet framing and the channel scanner.
//!
//! A channel is a fixed-capacity byte buffer holding packet records back to
//! back from offset 0. Each record is a 16 byte fixed part
//! (`from`, `to`, `id`, `extra_size`, native endian `u32`s) followed by
//! `extra_size` payload bytes. A record whose `id` is 0 terminates the live
//! data, so zero-filled space reads as the end of the channel and a zero
//! length payload is still a real packet.

use std::convert::TryFrom;

use log::warn;

use crate::errors::{PeerlinkError, Result};

pub type PeerId = u32;

/// The server always owns peer id 0.
pub const SERVER_ID: PeerId = 0;

pub const RECORD_HEADER_LEN: usize = 16;

const TERMINATOR_ID: u32 = 0;

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub from: PeerId,
    pub to: PeerId,
    pub id: u32,
    pub extra_size: u32,
}

impl PacketHeader {
    #[inline]
    fn read(bytes: &[u8]) -> PacketHeader {
        let field = |i: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_ne_bytes(raw)
        };
        PacketHeader {
            from: field(0),
            to: field(1),
            id: field(2),
            extra_size: field(3),
        }
    }

    #[inline]
    fn write(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.from.to_ne_bytes());
        out[4..8].copy_from_slice(&self.to.to_ne_bytes());
        out[8..12].copy_from_slice(&self.id.to_ne_bytes());
        out[12..16].copy_from_slice(&self.extra_size.to_ne_bytes());
    }

    /// Size of the whole record, fixed part plus payload.
    pub fn record_len(&self) -> usize {
        RECORD_HEADER_LEN + self.extra_size as usize
    }

    #[inline]
    fn is_terminator(&self) -> bool {
        self.id == TERMINATOR_ID
    }
}

/// A packet borrowed from a channel while the region lock is held.
#[derive(Copy, Clone, Debug)]
pub struct PacketRef<'a> {
    header: PacketHeader,
    payload: &'a [u8],
}

impl<'a> PacketRef<'a> {
    pub fn header(&self) -> PacketHeader {
        self.header
    }

    pub fn from(&self) -> PeerId {
        self.header.from
    }

    pub fn to(&self) -> PeerId {
        self.header.to
    }

    pub fn id(&self) -> u32 {
        self.header.id
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Record<'a> {
    pub offset: usize,
    pub packet: PacketRef<'a>,
    raw: &'a [u8],
}

/// Bounds-checked cursor over the live records of a channel.
pub struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Records<'a> {
    pub fn new(buf: &'a [u8]) -> Records<'a> {
        Records { buf, offset: 0, done: false }
    }

    /// Offset just past the last record yielded so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.offset;
        if self.buf.len() - offset < RECORD_HEADER_LEN {
            // Too little room left for a record: the channel end is the terminator.
            self.done = true;
            return None;
        }
        let header = PacketHeader::read(&self.buf[offset..offset + RECORD_HEADER_LEN]);
        if header.is_terminator() {
            self.done = true;
            return None;
        }
        let end = match offset.checked_add(header.record_len()) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                self.done = true;
                return Some(Err(PeerlinkError::CorruptRecord { offset }));
            }
        };
        self.offset = end;
        Some(Ok(Record {
            offset,
            packet: PacketRef {
                header,
                payload: &self.buf[offset + RECORD_HEADER_LEN..end],
            },
            raw: &self.buf[offset..end],
        }))
    }
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    pub used: usize,
    pub records: usize,
}

impl ChannelStats {
    pub fn free(&self) -> usize {
        self.capacity - self.used
    }
}

pub struct Channel<'a> {
    buf: &'a mut [u8],
}

impl<'a> Channel<'a> {
    pub fn new(buf: &'a mut [u8]) -> Channel<'a> {
        Channel { buf }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn records(&self) -> Records<'_> {
        Records::new(&*self.buf)
    }

    /// Offset of the terminator, i.e. the number of live bytes.
    pub fn occupancy(&self) -> Result<usize> {
        let mut records = self.records();
        for record in records.by_ref() {
            record?;
        }
        Ok(records.offset())
    }

    pub fn stats(&self) -> Result<ChannelStats> {
        let mut records = self.records();
        let mut count = 0;
        for record in records.by_ref() {
            record?;
            count += 1;
        }
        Ok(ChannelStats {
            capacity: self.capacity(),
            used: records.offset(),
            records: count,
        })
    }

    /// Finds where a record carrying `payload_len` bytes would go.
    pub fn reserve(&self, payload_len: usize) -> Result<usize> {
        if u32::try_from(payload_len).is_err() {
            return Err(PeerlinkError::PayloadTooLarge(payload_len));
        }
        let offset = self.occupancy()?;
        let needed = offset + RECORD_HEADER_LEN + payload_len;
        if needed > self.capacity() {
            return Err(PeerlinkError::ChannelOverflow {
                needed,
                capacity: self.capacity(),
            });
        }
        Ok(offset)
    }

    /// Writes a record at an offset obtained from `reserve`.
    pub(crate) fn write_record(&mut self, offset: usize, header: &PacketHeader, payload: &[u8]) {
        debug_assert_ne!(header.id, TERMINATOR_ID, "id 0 is the terminator");
        let header = PacketHeader {
            extra_size: payload.len() as u32,
            ..*header
        };
        let body = offset + RECORD_HEADER_LEN;
        let end = body + payload.len();
        header.write(&mut self.buf[offset..body]);
        self.buf[body..end].copy_from_slice(payload);
        let tail = std::cmp::min(end + RECORD_HEADER_LEN, self.capacity());
        for b in &mut self.buf[end..tail] {
            *b = 0;
        }
    }

    pub(crate) fn append(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<usize> {
        if header.id == TERMINATOR_ID {
            return Err(PeerlinkError::ReservedPacketId);
        }
        let offset = self.reserve(payload.len())?;
        self.write_record(offset, header, payload);
        Ok(offset)
    }

    /// Hands every record addressed to `peer` to `f`, then compacts the rest
    /// to the front of the channel in their original order.
    pub fn drain_addressed<F>(&mut self, peer: PeerId, mut f: F) -> Result<usize>
        where F: FnMut(&PacketRef<'_>),
    {
        let capacity = self.capacity();
        let mut held = Vec::with_capacity(capacity);
        let mut delivered = 0usize;
        let mut failure = None;

        for record in Records::new(&*self.buf) {
            match record {
                Ok(record) if record.packet.to() == peer => {
                    f(&record.packet);
                    delivered += 1;
                }
                Ok(record) => held.extend_from_slice(record.raw),
                Err(e) => {
                    warn!("scan of peer {} stopped: {}", peer, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if held.len() > capacity {
            return Err(PeerlinkError::ChannelOverflow {
                needed: held.len(),
                capacity,
            });
        }
        if delivered == 0 && failure.is_none() {
            return Ok(0);
        }

        self.buf[..held.len()].copy_from_slice(&held);
        for b in &mut self.buf[held.len()..] {
            *b = 0;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }
}
