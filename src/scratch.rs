use crate::error::CopyError;

/// Default hard cap for the redaction scratch buffer (256 MiB).
pub const DEFAULT_SCRATCH_LIMIT: usize = 256 * 1024 * 1024;

/// Growable byte buffer sized to the largest cell seen so far.
///
/// The buffer never shrinks. Requests beyond `limit`, or allocations the
/// allocator refuses, are reported as [`CopyError::ResourceExhausted`].
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl ScratchBuffer {
    pub fn new(limit: usize) -> Self {
        ScratchBuffer {
            buf: Vec::new(),
            limit,
        }
    }

    /// Returns a slice of exactly `len` bytes, growing the buffer if needed.
    /// The contents are unspecified; callers overwrite them.
    pub fn ensure(&mut self, len: usize) -> Result<&mut [u8], CopyError> {
        if len > self.limit {
            return Err(CopyError::ResourceExhausted {
                requested: len,
                limit: self.limit,
            });
        }
        if len > self.buf.len() {
            self.buf
                .try_reserve_exact(len - self.buf.len())
                .map_err(|_| CopyError::ResourceExhausted {
                    requested: len,
                    limit: self.limit,
                })?;
            self.buf.resize(len, 0);
        }
        Ok(&mut self.buf[..len])
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        ScratchBuffer::new(DEFAULT_SCRATCH_LIMIT)
    }
}
