/// Result of a non-blocking [`Channel::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadStatus {
    /// This many bytes were read.
    Data(usize),
    /// No bytes are available right now; retry on readability.
    WouldBlock,
    /// The peer performed an orderly close.
    Eof,
}

/// A connected, non-blocking, full-duplex byte channel.
///
/// Every call is a single non-blocking operation; would-block is a value,
/// not an error. This is the same concept as the [`nb`] crate, localized to
/// avoid needless abstraction. The adapter never closes the channel;
/// lifecycle stays with the owner.
///
/// [`nb`]: https://docs.rs/nb/latest/nb/index.html
pub trait Channel {
    /// Transport error type.
    type Error: core::fmt::Debug;

    /// Read into `buf`. `buf` must be non-empty.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus, Self::Error>;

    /// Write from `buf`, returning the number of bytes accepted.
    /// `Ok(0)` means would-block; retry on writability.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
}

#[cfg(feature = "std")]
impl Channel for std::net::TcpStream {
    type Error = std::io::Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus, Self::Error> {
        match std::io::Read::read(self, buf) {
            Ok(0) => Ok(ReadStatus::Eof),
            Ok(n) => Ok(ReadStatus::Data(n)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(ReadStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match std::io::Write::write(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}
