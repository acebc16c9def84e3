pub mod png;
pub mod render;

pub use render::KeogramRenderer;
