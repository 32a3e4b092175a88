pub mod camera;
pub mod config;
pub mod database;
pub mod frame_state;
pub mod grid;
pub mod image;
pub mod keyframe;
pub mod parallel;
pub mod pixel;
pub mod pixel_selector;
pub mod point;
pub mod save;
pub mod utility;
