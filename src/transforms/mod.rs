pub mod normalize;
pub mod pipeline;
pub mod resize;
pub mod save_image;
