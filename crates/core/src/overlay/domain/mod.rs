pub mod display_surface;
pub mod overlay_renderer;
