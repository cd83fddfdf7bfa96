//! Trait abstraction for serial line I/O to enable testing

use async_trait::async_trait;
use std::io;

/// Trait for raw serial I/O under the line transport
#[async_trait]
pub trait LinePort: Send {
    /// Write all bytes to the port and flush
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Poll for available bytes, waiting at most a short fixed deadline
    ///
    /// `Ok(0)` means no data is currently available - it is not EOF. A
    /// closed port is reported as `Err(io::ErrorKind::UnexpectedEof)`.
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
