//! SHA-256d (double SHA-256) as used by the Ravencoin wire format.

use std::io;

use sha2::{Digest, Sha256};

/// Compute the SHA-256d digest of `data` in one shot.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// An `io::Write` adapter that computes a running SHA-256d digest of the
/// bytes written into it.
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl Writer {
    /// Consume the writer and return the SHA-256d digest.
    pub fn finish(self) -> [u8; 32] {
        let first = self.hash.finalize();
        let second = Sha256::digest(first);
        second.into()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A 4-byte checksum: the first four bytes of a SHA-256d digest.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(bytes: &'a [u8]) -> Self {
        let hash = digest(bytes);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash[0..4]);
        Checksum(checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_checksum() {
        // sha256d("") starts with 5df6e0e2, the well-known verack checksum.
        assert_eq!(Checksum::from(&b""[..]), Checksum([0x5d, 0xf6, 0xe0, 0xe2]));
    }

    #[test]
    fn writer_matches_one_shot() {
        use std::io::Write;

        let data = b"raven wire payload";
        let mut writer = Writer::default();
        writer.write_all(data).expect("writer is infallible");
        assert_eq!(writer.finish(), digest(data));
    }
}
