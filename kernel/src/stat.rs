//! On-disk/`fstat` inode type tag and the `stat` struct syscalls copy out.
use zerocopy::AsBytes;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IType {
    None = 0,
    Dir = 1,
    File = 2,
    Device = 3,
}

impl Default for IType {
    fn default() -> Self {
        IType::None
    }
}

/// Mirrors what `sys_fstat`/`sys_stat` hand back to user space. `itype` and
/// `nlink` are widened to `u32` (rather than `short` as in the C layout) so
/// the struct has no interior padding for `zerocopy::AsBytes` to trip on.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes)]
pub struct Stat {
    pub dev: u32,
    pub ino: u32,
    pub itype: u32,
    pub nlink: u32,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn itype_default_is_none() {
        assert_eq!(IType::default(), IType::None);
    }

    #[test]
    fn stat_has_no_interior_padding() {
        // AsBytes requires this; spelled out here since it's the whole
        // reason itype/nlink were widened to u32 in the first place.
        assert_eq!(
            size_of::<Stat>(),
            size_of::<u32>() * 4 + size_of::<usize>()
        );
    }
}
