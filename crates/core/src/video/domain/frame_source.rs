use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("frame read failed: {0}")]
    Read(String),
}

/// Produces live frames on demand.
///
/// Implementations own the device handle. A failed `read` is transient: the
/// caller backs off and retries, it never treats one failure as end of stream.
pub trait FrameSource: Send {
    /// Opens the underlying device. Failure here aborts the pipeline task.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Blocks until the next frame is available.
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// Releases the device.
    fn close(&mut self);
}
