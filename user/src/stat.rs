//! Mirrors `kernel::stat`: the layout `fstat` copies into user space.
use zerocopy::{AsBytes, FromBytes};

pub const T_DIR: u32 = 1;
pub const T_FILE: u32 = 2;
pub const T_DEVICE: u32 = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Stat {
    pub dev: u32,
    pub ino: u32,
    pub itype: u32,
    pub nlink: u32,
    pub size: usize,
}
