use std::mem;
use std::sync::atomic::AtomicU32;

/// Written last by the creator once the header and lock are usable.
pub const MAGIC: u32 = 0x504c_4e4b;

/// A shared counter handing out unique, increasing values.
///
/// `issue` takes `&mut self`, and the only `&mut Header` in existence is the
/// one behind a held region lock.
#[repr(transparent)]
#[derive(Debug)]
pub struct Ticket(u32);

impl Ticket {
    pub const fn starting_at(first: u32) -> Ticket {
        Ticket(first)
    }

    pub fn peek(&self) -> u32 {
        self.0
    }

    pub fn issue(&mut self) -> u32 {
        let value = self.0;
        self.0 = self.0.wrapping_add(1);
        value
    }

    /// Like `issue`, but never hands out 0.
    pub fn issue_nonzero(&mut self) -> u32 {
        match self.issue() {
            0 => self.issue(),
            value => value,
        }
    }
}

#[repr(C)]
pub struct Header {
    pub magic: AtomicU32,
    pub lock_len: u32,
    pub incoming_size: u32,
    pub outgoing_size: u32,
    pub last_client: Ticket,
    pub last_id: Ticket,
    _reserved: [u32; 2],
}

pub const HEADER_FIELDS_LEN: usize = mem::size_of::<Header>();

impl Header {
    pub fn new(lock_len: u32, incoming_size: u32, outgoing_size: u32) -> Header {
        Header {
            magic: AtomicU32::new(0),
            lock_len,
            incoming_size,
            outgoing_size,
            last_client: Ticket::starting_at(1),
            last_id: Ticket::starting_at(1),
            _reserved: [0; 2],
        }
    }
}

/// Byte offsets of everything inside a region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub lock_len: usize,
    pub incoming_size: usize,
    pub outgoing_size: usize,
}

impl Layout {
    pub fn lock_offset(&self) -> usize {
        HEADER_FIELDS_LEN
    }

    /// Header fields plus the lock area.
    pub fn header_len(&self) -> usize {
        HEADER_FIELDS_LEN + self.lock_len
    }

    /// Channel A: client to server.
    pub fn channel_a(&self) -> (usize, usize) {
        (self.header_len(), self.incoming_size)
    }

    /// Channel B: server to client.
    pub fn channel_b(&self) -> (usize, usize) {
        (self.header_len() + self.incoming_size, self.outgoing_size)
    }

    pub fn total_len(&self) -> usize {
        self.header_len() + self.incoming_size + self.outgoing_size
    }
}
