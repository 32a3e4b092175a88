mod pinhole_camera;
pub use pinhole_camera::{PinholeCamera, PinholeParameters};

use std::path::Path;

use nalgebra::{Point2, Vector3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    /// - 最简单的相机模型，假设光线沿直线传播，不考虑镜头畸变。
    /// - 输入图像需预先去畸变。
    Pinhole,
}

/// 相机的trait
pub trait CameraTrait {
    /// 像素 -> 归一化齐次坐标 (z = 1)
    fn lift_projective(&self, p: &Point2<f64>) -> Vector3<f64>;
    /// 相机坐标系下的点 -> 像素
    fn project(&self, pt: &Vector3<f64>) -> Point2<f64>;
    fn camera_type(&self) -> CameraType;
}

/// 相机参数的trait
pub trait CameraParametersTrait: Sized {
    const CAMERA_TYPE: &'static str;
    fn read_from_json<P: AsRef<Path>>(path: P) -> anyhow::Result<Self>;
    fn write_to_json<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()>;
}
