//! The OS-facing pieces of a region: named shared mappings and the
//! process-shared mutex. `shared_memory` and `raw_sync` carry one
//! implementation per target; nothing outside this file touches them.

use std::fs;

use log::{debug, warn};
use raw_sync::locks::{LockImpl, LockInit, Mutex};
use shared_memory::{Shmem, ShmemConf, ShmemError};

use super::RegionConfig;
use crate::errors::{PeerlinkError, Result};

pub type Mapping = Shmem;

pub type RegionLock = Box<dyn LockImpl>;

const LOCK_ALIGN: usize = 16;

/// Bytes reserved for the mutex, including worst-case alignment padding.
pub fn lock_len() -> usize {
    let raw = Mutex::size_of(None);
    (raw + LOCK_ALIGN - 1) / LOCK_ALIGN * LOCK_ALIGN
}

fn create_linked(cfg: &RegionConfig, size: usize) -> std::result::Result<Shmem, ShmemError> {
    ShmemConf::new().size(size).flink(cfg.link_path()).create()
}

pub fn create_region(cfg: &RegionConfig, size: usize) -> Result<Mapping> {
    match create_linked(cfg, size) {
        Ok(v) => Ok(v),
        Err(ShmemError::LinkExists) if cfg.replace_stale => {
            warn!("replacing stale region link {}", cfg.link_path().display());
            release_stale(cfg)?;
            create_linked(cfg, size).map_err(PeerlinkError::MappingCreateFailed)
        }
        Err(e) => Err(PeerlinkError::MappingCreateFailed(e)),
    }
}

/// Unlinks whatever a crashed creator left behind under `cfg`'s link.
fn release_stale(cfg: &RegionConfig) -> Result<()> {
    let link = cfg.link_path();
    match ShmemConf::new().flink(&link).open() {
        Ok(mut stale) => {
            // As owner, the drop unlinks the mapping and deletes the link.
            stale.set_owner(true);
            debug!("unlinking stale mapping {}", stale.get_os_id());
            drop(stale);
        }
        Err(e) => debug!("stale link {} has no mapping behind it: {}", link.display(), e),
    }
    if link.exists() {
        fs::remove_file(&link)?;
    }
    Ok(())
}

pub fn open_region(cfg: &RegionConfig) -> Result<Mapping> {
    ShmemConf::new()
        .flink(cfg.link_path())
        .open()
        .map_err(PeerlinkError::MappingOpenFailed)
}

/// # Safety
/// `mem` must point at `lock_len()` writable bytes inside a live mapping
/// that no other process is using yet, and `data` into the same mapping.
pub unsafe fn create_lock(mem: *mut u8, data: *mut u8) -> Result<RegionLock> {
    let (lock, _) = Mutex::new(mem, data).map_err(PeerlinkError::Lock)?;
    Ok(lock)
}

/// # Safety
/// `mem` must point at a lock area initialized by `create_lock`.
pub unsafe fn open_lock(mem: *mut u8, data: *mut u8) -> Result<RegionLock> {
    let (lock, _) = Mutex::from_existing(mem, data).map_err(PeerlinkError::Lock)?;
    Ok(lock)
}
