//! Small zerocopy helpers shared by the buffer cache and log: viewing a
//! `#[repr(C)]` struct as the raw bytes of a disk block and back.
use zerocopy::{AsBytes, FromBytes};

pub fn as_bytes<T: AsBytes + ?Sized>(t: &T) -> &[u8] {
    t.as_bytes()
}

pub fn as_bytes_mut<T: AsBytes + FromBytes + ?Sized>(t: &mut T) -> &mut [u8] {
    t.as_bytes_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, AsBytes, FromBytes)]
    #[repr(C)]
    struct Block {
        a: u32,
        b: u32,
    }

    #[test]
    fn round_trips_through_bytes() {
        let block = Block { a: 1, b: 2 };
        let bytes = as_bytes(&block);
        assert_eq!(bytes.len(), core::mem::size_of::<Block>());

        let mut copy = Block { a: 0, b: 0 };
        as_bytes_mut(&mut copy).copy_from_slice(bytes);
        assert_eq!(copy.a, 1);
        assert_eq!(copy.b, 2);
    }
}
