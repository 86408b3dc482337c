pub mod attribute_enricher;
pub mod cycle_logger;
pub mod error;
pub mod frame_detection_loop;
pub mod session_config;
pub mod session_state;
pub mod video_session_manager;

#[cfg(test)]
pub(crate) mod test_fakes;
