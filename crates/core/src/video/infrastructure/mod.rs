pub mod ffmpeg_camera_source;
pub mod jpeg_frame_encoder;
