use std::{fmt, io};

use shared_memory::ShmemError;

// raw_sync reports failures as Box<dyn Error>, which is neither Send nor Sync.

#[derive(Debug)]
pub enum PeerlinkError {
    MappingCreateFailed(ShmemError),
    MappingOpenFailed(ShmemError),
    RegionNotInitialized,
    RegionTooSmall { required: usize, mapped: usize },
    IncompatibleLayout { expected: usize, found: usize },
    Lock(Box<dyn std::error::Error + 'static>),
    ChannelOverflow { needed: usize, capacity: usize },
    CorruptRecord { offset: usize },
    ReservedPacketId,
    PayloadTooLarge(usize),
    Io(io::Error),
    Config(String),
}

pub type Result<T> = std::result::Result<T, PeerlinkError>;

impl fmt::Display for PeerlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerlinkError::MappingCreateFailed(e) => write!(f, "Failed to create shared region: {}", e),
            PeerlinkError::MappingOpenFailed(e) => write!(f, "Failed to open shared region: {}", e),
            PeerlinkError::RegionNotInitialized => {
                write!(f, "Shared region was never initialized by its creator")
            }
            PeerlinkError::RegionTooSmall { required, mapped } => write!(
                f,
                "Shared region is {} bytes but its header describes {} bytes",
                mapped, required
            ),
            PeerlinkError::IncompatibleLayout { expected, found } => write!(
                f,
                "Lock area is {} bytes, this build expects {}",
                found, expected
            ),
            PeerlinkError::Lock(e) => write!(f, "Lock error: {}", e),
            PeerlinkError::ChannelOverflow { needed, capacity } => write!(
                f,
                "Channel overflow: {} bytes needed, capacity is {}",
                needed, capacity
            ),
            PeerlinkError::CorruptRecord { offset } => {
                write!(f, "Corrupt packet record at offset {}", offset)
            }
            PeerlinkError::ReservedPacketId => {
                write!(f, "Packet id 0 marks the end of a channel and cannot be sent")
            }
            PeerlinkError::PayloadTooLarge(len) => {
                write!(f, "Payload of {} bytes does not fit a packet record", len)
            }
            PeerlinkError::Io(e) => write!(f, "IO error: {}", e),
            PeerlinkError::Config(s) => write!(f, "Config error: {}", s),
        }
    }
}

impl std::error::Error for PeerlinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeerlinkError::MappingCreateFailed(e) => Some(e),
            PeerlinkError::MappingOpenFailed(e) => Some(e),
            PeerlinkError::Lock(e) => Some(e.as_ref()),
            PeerlinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PeerlinkError {
    fn from(err: io::Error) -> Self {
        PeerlinkError::Io(err)
    }
}

impl PeerlinkError {
    /// True for failures an application can recover from by retrying later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, PeerlinkError::ChannelOverflow { .. })
    }
}
