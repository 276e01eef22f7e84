use crate::shared::frame::Frame;

/// Encodes an annotated frame into the byte format handed to consumers.
pub trait FrameEncoder: Send {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, Box<dyn std::error::Error>>;
}
