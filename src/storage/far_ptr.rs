//! 128-bit far pointer: a `(file_id, offset)` address spanning files.

use crate::config::FAR_PTR_SIZE;
use crate::error::Result;
use crate::io::{read_u64, write_u64, ByteIter};

/// Address of a byte anywhere in the repository: which file, and where in
/// it. The all-zero pointer is null; used as a tree root it denotes the
/// empty tree.
///
/// Wire form is 16 bytes big-endian, `file_id` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FarPtr {
    pub file_id: u64,
    pub offset: u64,
}

impl FarPtr {
    pub const NULL: FarPtr = FarPtr {
        file_id: 0,
        offset: 0,
    };

    pub fn new(file_id: u64, offset: u64) -> Self {
        Self { file_id, offset }
    }

    pub fn is_null(&self) -> bool {
        self.file_id == 0 && self.offset == 0
    }

    pub fn read_from<I: ByteIter>(it: &mut I) -> Result<Self> {
        let file_id = read_u64(it)?;
        let offset = read_u64(it)?;
        Ok(Self { file_id, offset })
    }

    pub fn write_to<I: ByteIter>(&self, it: &mut I) -> Result<()> {
        write_u64(it, self.file_id)?;
        write_u64(it, self.offset)
    }

    pub fn to_bytes(&self) -> [u8; FAR_PTR_SIZE] {
        let mut buf = [0u8; FAR_PTR_SIZE];
        buf[..8].copy_from_slice(&self.file_id.to_be_bytes());
        buf[8..].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; FAR_PTR_SIZE]) -> Self {
        let file_id = u64::from_be_bytes(buf[..8].try_into().unwrap());
        let offset = u64::from_be_bytes(buf[8..].try_into().unwrap());
        Self { file_id, offset }
    }
}

impl std::fmt::Display for FarPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.file_id, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SpanIter;

    #[test]
    fn null_pointer_is_all_zero() {
        assert!(FarPtr::NULL.is_null());
        assert!(FarPtr::new(0, 0).is_null());
        assert!(!FarPtr::new(0, 1).is_null());
        assert!(!FarPtr::new(1, 0).is_null());
    }

    #[test]
    fn wire_form_is_big_endian_file_id_first() {
        let ptr = FarPtr::new(0x0102, 0x0304);
        let bytes = ptr.to_bytes();

        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(&bytes[8..], &[0, 0, 0, 0, 0, 0, 3, 4]);
        assert_eq!(FarPtr::from_bytes(&bytes), ptr);
    }

    #[test]
    fn iterator_roundtrip() {
        let ptr = FarPtr::new(7, 8192);
        let mut buf = [0u8; 16];

        let mut it = SpanIter::new(&mut buf);
        ptr.write_to(&mut it).unwrap();

        let mut it = SpanIter::new(&mut buf);
        assert_eq!(FarPtr::read_from(&mut it).unwrap(), ptr);
    }
}
