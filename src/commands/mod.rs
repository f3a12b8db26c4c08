pub mod items;
pub mod model_info;
pub mod predict;
pub mod train;
