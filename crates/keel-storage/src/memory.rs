use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

/// Byte buffer that is zeroed on drop when `wipe` is set.
///
/// Covers every exit path of the code holding it: success, `?` propagation and panics.
/// [`SecretBuffer::into_inner`] hands the bytes to the caller without wiping them.
pub(crate) struct SecretBuffer {
    bytes: Vec<u8>,
    wipe: bool,
}

impl SecretBuffer {
    pub(crate) fn new(bytes: Vec<u8>, wipe: bool) -> Self {
        Self { bytes, wipe }
    }

    pub(crate) fn into_inner(mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

impl Deref for SecretBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl DerefMut for SecretBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        if self.wipe {
            self.bytes.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_inner_keeps_contents() {
        let buf = SecretBuffer::new(b"secret".to_vec(), true);
        assert_eq!(buf.into_inner(), b"secret");
    }

    #[test]
    fn derefs_to_underlying_vec() {
        let mut buf = SecretBuffer::new(Vec::new(), false);
        buf.extend_from_slice(b"abc");
        assert_eq!(buf.len(), 3);
        assert_eq!(&buf[..], b"abc");
    }
}
