//! Filesystem core for a small hobby operating system.
//!
//! Two FAT-style on-disk drivers (12-bit and 32-bit cluster tables) unified
//! behind a VFS dispatch layer, running over an abstract 512-byte-sector
//! block device.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod device;
pub mod fs;
pub mod vfs;
