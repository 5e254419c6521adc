//! lottos block layer: the device seam and the buffer cache.
//!
//! Everything the file system above us sees of a disk goes through here.
//! `blockdev` is the driver boundary; `bcache` is the pool of in-memory
//! block copies that amortises I/O and serialises access per block.

#![no_std]

pub mod bcache;
pub mod blockdev;

#[cfg(test)]
mod tests;

#[cfg(test)]
extern crate std;

pub use bcache::{BufCache, BufFlags, BufId, CacheStats, SystemBufCache};
pub use blockdev::{BlockDevice, BlockDeviceError, MemoryBlockDevice};
