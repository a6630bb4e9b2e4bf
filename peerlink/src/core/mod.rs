use std::convert::TryFrom;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::ptr;
use std::slice;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::channel::{Channel, RECORD_HEADER_LEN};
use crate::errors::{PeerlinkError, Result};

pub mod header;
pub mod platform;

use self::header::{Header, Layout, HEADER_FIELDS_LEN, MAGIC};
use self::platform::{Mapping, RegionLock};

pub const DEFAULT_CHANNEL_SIZE: usize = 0x10000;
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub data_dir: String,
    pub name: String,
    /// Capacity of the client to server channel.
    pub incoming_size: usize,
    /// Capacity of the server to client channel.
    pub outgoing_size: usize,
    pub replace_stale: bool,
    pub open_timeout_ms: u64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        RegionConfig {
            data_dir: env::temp_dir().to_string_lossy().into_owned(),
            name: "peerlink".to_string(),
            incoming_size: DEFAULT_CHANNEL_SIZE,
            outgoing_size: DEFAULT_CHANNEL_SIZE,
            replace_stale: false,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
        }
    }
}

impl RegionConfig {
    pub fn builder() -> RegionConfigBuilder {
        RegionConfigBuilder { cfg: RegionConfig::default() }
    }

    pub fn link_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.name)
    }

    /// Checks what locating the region needs: its directory and name.
    pub fn validate_location(&self) -> Result<()> {
        if self.data_dir.is_empty() {
            return Err(PeerlinkError::Config("data_dir is empty".to_string()));
        }
        if self.name.is_empty() {
            return Err(PeerlinkError::Config("region name is empty".to_string()));
        }
        if !self.name.is_ascii() || self.name.contains(|c: char| c == '/' || c == '\\') {
            return Err(PeerlinkError::Config(format!(
                "region name {:?} must be ASCII without path separators",
                self.name
            )));
        }
        Ok(())
    }

    /// Checks everything a creator needs, channel capacities included.
    pub fn validate(&self) -> Result<()> {
        self.validate_location()?;
        for (label, size) in [("incoming_size", self.incoming_size), ("outgoing_size", self.outgoing_size)].iter() {
            if *size < RECORD_HEADER_LEN || u32::try_from(*size).is_err() {
                return Err(PeerlinkError::Config(format!(
                    "{} must be between {} and {} bytes, got {}",
                    label,
                    RECORD_HEADER_LEN,
                    u32::MAX,
                    size
                )));
            }
        }
        Ok(())
    }
}

pub struct RegionConfigBuilder {
    cfg: RegionConfig,
}

impl RegionConfigBuilder {
    pub fn data_dir(mut self, data_dir: String) -> Self {
        self.cfg.data_dir = data_dir;
        self
    }

    pub fn name(mut self, name: String) -> Self {
        self.cfg.name = name;
        self
    }

    pub fn incoming_size(mut self, size: usize) -> Self {
        self.cfg.incoming_size = size;
        self
    }

    pub fn outgoing_size(mut self, size: usize) -> Self {
        self.cfg.outgoing_size = size;
        self
    }

    pub fn replace_stale(mut self, replace: bool) -> Self {
        self.cfg.replace_stale = replace;
        self
    }

    pub fn open_timeout_ms(mut self, timeout: u64) -> Self {
        self.cfg.open_timeout_ms = timeout;
        self
    }

    pub fn build(self) -> Result<RegionConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

/// A mapped region: header, lock area, channel A, channel B.
pub struct Region {
    // Dropped before the mapping it points into.
    lock: RegionLock,
    shmem: Mapping,
    layout: Layout,
    name: String,
}

// The mapping and lock handle may move between threads; the lock itself is
// only ever taken and released inside one `with_lock` call.
unsafe impl Send for Region {}

/// Everything mutable in a region, reachable only while its lock is held.
pub struct Locked<'a> {
    header: &'a mut Header,
    channel_a: Channel<'a>,
    channel_b: Channel<'a>,
}

impl<'a> Locked<'a> {
    /// Never 0, which belongs to the server.
    pub fn next_client_id(&mut self) -> u32 {
        self.header.last_client.issue_nonzero()
    }

    pub fn next_packet_id(&mut self) -> u32 {
        self.header.last_id.issue_nonzero()
    }

    /// Returns `(inbound, outbound)` as seen by `role`.
    pub fn channels(&mut self, role: Role) -> (&mut Channel<'a>, &mut Channel<'a>) {
        match role {
            Role::Server => (&mut self.channel_a, &mut self.channel_b),
            Role::Client => (&mut self.channel_b, &mut self.channel_a),
        }
    }
}

impl Region {
    pub fn create(cfg: &RegionConfig) -> Result<Region> {
        cfg.validate()?;
        let layout = Layout {
            lock_len: platform::lock_len(),
            incoming_size: cfg.incoming_size,
            outgoing_size: cfg.outgoing_size,
        };
        let shmem = platform::create_region(cfg, layout.total_len())?;
        if shmem.len() < layout.total_len() {
            return Err(PeerlinkError::RegionTooSmall {
                required: layout.total_len(),
                mapped: shmem.len(),
            });
        }

        let base = shmem.as_ptr();
        let lock = unsafe {
            ptr::write_bytes(base, 0, layout.total_len());
            ptr::write(
                base as *mut Header,
                Header::new(
                    layout.lock_len as u32,
                    layout.incoming_size as u32,
                    layout.outgoing_size as u32,
                ),
            );
            platform::create_lock(base.add(layout.lock_offset()), base)?
        };
        let header = unsafe { &*(base as *const Header) };
        header.magic.store(MAGIC, Ordering::Release);

        debug!(
            "created region {} ({} bytes, channels {}/{})",
            cfg.name,
            layout.total_len(),
            layout.incoming_size,
            layout.outgoing_size
        );
        Ok(Region { lock, shmem, layout, name: cfg.name.clone() })
    }

    /// Opens a region created by another peer. Channel sizes come from the
    /// creator's header; the ones in `cfg` are ignored.
    pub fn open(cfg: &RegionConfig) -> Result<Region> {
        cfg.validate_location()?;
        let shmem = platform::open_region(cfg)?;
        if shmem.len() < HEADER_FIELDS_LEN {
            return Err(PeerlinkError::RegionTooSmall {
                required: HEADER_FIELDS_LEN,
                mapped: shmem.len(),
            });
        }

        let base = shmem.as_ptr();
        let header = base as *const Header;
        let deadline = Instant::now() + Duration::from_millis(cfg.open_timeout_ms);
        while unsafe { &*header }.magic.load(Ordering::Acquire) != MAGIC {
            if Instant::now() >= deadline {
                return Err(PeerlinkError::RegionNotInitialized);
            }
            thread::yield_now();
        }

        // Sizes are immutable after creation, so they can be read without the lock.
        let layout = unsafe {
            Layout {
                lock_len: ptr::addr_of!((*header).lock_len).read() as usize,
                incoming_size: ptr::addr_of!((*header).incoming_size).read() as usize,
                outgoing_size: ptr::addr_of!((*header).outgoing_size).read() as usize,
            }
        };
        if layout.lock_len != platform::lock_len() {
            return Err(PeerlinkError::IncompatibleLayout {
                expected: platform::lock_len(),
                found: layout.lock_len,
            });
        }
        if shmem.len() < layout.total_len() {
            return Err(PeerlinkError::RegionTooSmall {
                required: layout.total_len(),
                mapped: shmem.len(),
            });
        }

        let lock = unsafe { platform::open_lock(base.add(layout.lock_offset()), base)? };
        debug!(
            "opened region {} ({} bytes, channels {}/{})",
            cfg.name,
            layout.total_len(),
            layout.incoming_size,
            layout.outgoing_size
        );
        Ok(Region { lock, shmem, layout, name: cfg.name.clone() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS-level identifier of the backing mapping.
    pub fn os_id(&self) -> &str {
        self.shmem.get_os_id()
    }

    pub fn is_creator(&self) -> bool {
        self.shmem.is_owner()
    }

    /// `(incoming_size, outgoing_size)` as recorded by the creator.
    pub fn capacities(&self) -> (usize, usize) {
        (self.layout.incoming_size, self.layout.outgoing_size)
    }

    /// Runs `f` with the region locked. Blocks until the lock is free; the
    /// lock is released when `f` returns or unwinds. `f` must not lock this
    /// region again.
    pub fn with_lock<R, F>(&self, f: F) -> Result<R>
        where F: FnOnce(&mut Locked<'_>) -> R,
    {
        let _guard = self.lock.lock().map_err(PeerlinkError::Lock)?;
        let mut locked = unsafe { self.locked_view() };
        Ok(f(&mut locked))
    }

    /// # Safety
    /// Callers must hold the region lock for as long as the view lives.
    unsafe fn locked_view(&self) -> Locked<'_> {
        let base = self.shmem.as_ptr();
        let (a_offset, a_len) = self.layout.channel_a();
        let (b_offset, b_len) = self.layout.channel_b();
        Locked {
            header: &mut *(base as *mut Header),
            channel_a: Channel::new(slice::from_raw_parts_mut(base.add(a_offset), a_len)),
            channel_b: Channel::new(slice::from_raw_parts_mut(base.add(b_offset), b_len)),
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        debug!(
            "releasing region {}{}",
            self.name,
            if self.shmem.is_owner() { " (creator)" } else { "" }
        );
    }
}
