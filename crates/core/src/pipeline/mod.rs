pub mod capture_session;
pub mod frame_annotator;
pub mod pipeline_logger;
pub mod pipeline_loop;
pub mod recognition_service;
pub mod shared_state;
