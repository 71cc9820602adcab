//! Transfer capabilities throttled by the engine.

use std::io::{self, Read, Write};

/// Outcome of one underlying transfer step.
///
/// A step may move some bytes and still fail; both are honored.
#[derive(Debug)]
pub struct Chunk {
    /// Bytes actually moved
    pub moved: usize,
    /// Failure reported by the underlying source or sink
    pub error: Option<io::Error>,
}

impl Chunk {
    /// A step that moved `moved` bytes without failure.
    pub fn ok(moved: usize) -> Self {
        Self { moved, error: None }
    }

    /// A step that moved `moved` bytes and then failed.
    pub fn failed(moved: usize, error: io::Error) -> Self {
        Self {
            moved,
            error: Some(error),
        }
    }
}

impl From<io::Result<usize>> for Chunk {
    fn from(result: io::Result<usize>) -> Self {
        match result {
            Ok(n) => Chunk::ok(n),
            Err(e) => Chunk::failed(0, e),
        }
    }
}

/// A source of bytes.
///
/// Every [`std::io::Read`] is readable.
pub trait Readable: Send {
    /// Fill as much of `buf` as the source allows.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Chunk;
}

/// A sink of bytes.
///
/// Every [`std::io::Write`] is writable.
pub trait Writable: Send {
    /// Consume as much of `buf` as the sink allows.
    fn write_chunk(&mut self, buf: &[u8]) -> Chunk;

    /// Flush buffered bytes to the final destination.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: Read + Send> Readable for R {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Chunk {
        self.read(buf).into()
    }
}

impl<W: Write + Send> Writable for W {
    fn write_chunk(&mut self, buf: &[u8]) -> Chunk {
        self.write(buf).into()
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}
