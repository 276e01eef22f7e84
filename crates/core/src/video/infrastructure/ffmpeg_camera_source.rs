use std::time::Duration;

use crate::shared::constants::CAMERA_WARMUP_FRAMES;
use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, SourceError};

/// Reads live frames from a V4L2 device or stream URL via ffmpeg-next.
///
/// Requested size and frame rate are passed as demuxer options for device
/// paths; network streams deliver whatever the sender encodes. Every decoded
/// frame is converted to RGB24.
pub struct FfmpegCameraSource {
    url: String,
    width: u32,
    height: u32,
    fps: u32,
    stream: Option<CameraStream>,
    frame_index: u64,
}

struct CameraStream {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
}

// Safety: FfmpegCameraSource is owned by the pipeline thread alone.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegCameraSource {}

impl FfmpegCameraSource {
    pub fn new(url: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            fps,
            stream: None,
            frame_index: 0,
        }
    }

    fn is_device(&self) -> bool {
        self.url.starts_with("/dev/")
    }

    fn open_stream(&self) -> Result<CameraStream, ffmpeg_next::Error> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let mut options = ffmpeg_next::Dictionary::new();
        if self.is_device() {
            options.set("video_size", &format!("{}x{}", self.width, self.height));
            options.set("framerate", &self.fps.to_string());
        }
        let ictx = ffmpeg_next::format::input_with_dictionary(&self.url, options)?;

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(ffmpeg_next::Error::StreamNotFound)?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(CameraStream {
            ictx,
            decoder,
            scaler,
            stream_index,
            width,
            height,
        })
    }
}

impl CameraStream {
    fn next_rgb(&mut self) -> Result<(Vec<u8>, u32, u32), SourceError> {
        loop {
            if let Some(pixels) = self.try_receive()? {
                return Ok((pixels, self.width, self.height));
            }

            let Some((stream, packet)) = self.ictx.packets().next() else {
                return Err(SourceError::Read("end of stream".into()));
            };
            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                log::debug!("Dropping undecodable packet: {e}");
            }
        }
    }

    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| SourceError::Read(e.to_string()))?;
        Ok(Some(extract_rgb_pixels(&rgb_frame, self.width, self.height)))
    }
}

impl FrameSource for FfmpegCameraSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let stream = self
            .open_stream()
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.url)))?;
        log::info!(
            "Camera opened {} at {}x{}@{}",
            self.url,
            stream.width,
            stream.height,
            self.fps
        );
        self.stream = Some(stream);

        for _ in 0..CAMERA_WARMUP_FRAMES {
            if self.read().is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SourceError::Unavailable("camera not opened".into()))?;
        let (pixels, width, height) = stream.next_rgb()?;
        let frame = Frame::new(pixels, width, height, 3, self.frame_index);
        self.frame_index += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_open_is_unavailable() {
        let mut source = FfmpegCameraSource::new("/dev/video99", 640, 480, 30);
        assert!(matches!(source.read(), Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let mut source = FfmpegCameraSource::new("/nonexistent/video", 640, 480, 30);
        assert!(matches!(source.open(), Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn test_device_paths_detected() {
        assert!(FfmpegCameraSource::new("/dev/video0", 1, 1, 1).is_device());
        assert!(!FfmpegCameraSource::new("rtsp://cam/live", 1, 1, 1).is_device());
    }
}
