//! Exact-length cursor over a seekable byte stream.
//!
//! Every read either returns exactly the number of bytes asked for or fails
//! with `EngineError::TruncatedStream`; parsers depend on this to stay aligned
//! with segment boundaries. Skips are checked against the stream length too,
//! since seeking past the end of a stream does not fail on its own.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::EngineError;

pub struct SegmentReader<R> {
    inner: R,
    len: Option<u64>,
}

impl<R: Read + Seek> SegmentReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, len: None }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current offset from the start of the stream.
    pub fn position(&mut self) -> Result<u64, EngineError> {
        self.inner.stream_position().map_err(io_error)
    }

    /// Total stream length, measured once and remembered.
    pub fn stream_len(&mut self) -> Result<u64, EngineError> {
        if let Some(len) = self.len {
            return Ok(len);
        }
        let pos = self.position()?;
        let len = self.inner.seek(SeekFrom::End(0)).map_err(io_error)?;
        self.inner.seek(SeekFrom::Start(pos)).map_err(io_error)?;
        self.len = Some(len);
        Ok(len)
    }

    /// Bytes left between the current position and the end of the stream.
    pub fn remaining(&mut self) -> Result<u64, EngineError> {
        let len = self.stream_len()?;
        let pos = self.position()?;
        Ok(len.saturating_sub(pos))
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<(), EngineError> {
        let len = self.stream_len()?;
        if offset > len {
            return Err(EngineError::TruncatedStream {
                offset: len,
                needed: offset - len,
            });
        }
        self.inner.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        Ok(())
    }

    /// Read exactly `n` bytes.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, EngineError> {
        let mut buf = vec![0u8; n];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Read exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], EngineError> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, EngineError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16, EngineError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, EngineError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, EngineError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, EngineError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Advance `n` bytes without reading them.
    pub fn skip(&mut self, n: u64) -> Result<(), EngineError> {
        let remaining = self.remaining()?;
        if n > remaining {
            let offset = self.position()?;
            return Err(EngineError::TruncatedStream { offset, needed: n });
        }
        let offset = i64::try_from(n)
            .map_err(|_| EngineError::Io(format!("skip of {} bytes is too large", n)))?;
        self.inner.seek(SeekFrom::Current(offset)).map_err(io_error)?;
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), EngineError> {
        let offset = self.position()?;
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                EngineError::TruncatedStream {
                    offset,
                    needed: buf.len() as u64,
                }
            } else {
                io_error(e)
            }
        })
    }
}

fn io_error(e: std::io::Error) -> EngineError {
    EngineError::Io(e.to_string())
}
