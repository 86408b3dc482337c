pub mod camera_provider;
