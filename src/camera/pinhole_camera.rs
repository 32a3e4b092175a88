use std::path::Path;

use anyhow::Context;
use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

use super::{CameraParametersTrait, CameraTrait, CameraType};
use crate::image::ImageSize;

fn pinhole_model_type() -> String {
    PinholeParameters::CAMERA_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeParameters {
    #[serde(default = "pinhole_model_type")]
    pub model_type: String,
    pub camera_name: String,
    // size
    pub image_width: usize,
    pub image_height: usize,
    // intrinsic
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// 双目基线, 单目为 0
    #[serde(default)]
    pub baseline: f64,
}

impl Default for PinholeParameters {
    fn default() -> Self {
        Self {
            model_type: pinhole_model_type(),
            camera_name: String::new(),
            image_width: 0,
            image_height: 0,
            fx: 0.0,
            fy: 0.0,
            cx: 0.0,
            cy: 0.0,
            baseline: 0.0,
        }
    }
}

impl CameraParametersTrait for PinholeParameters {
    const CAMERA_TYPE: &'static str = "PINHOLE";

    fn read_from_json<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        log::info!("read camera parameters: {:?}", path);
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read camera parameters {:?}", path))?;
        let parameters: Self = serde_json::from_str(&text)?;
        if parameters.model_type != Self::CAMERA_TYPE {
            log::error!("model type is not pinhole: {}", parameters.model_type);
            anyhow::bail!("model type {} is not {}", parameters.model_type, Self::CAMERA_TYPE);
        }
        Ok(parameters)
    }

    fn write_to_json<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)
            .with_context(|| format!("write camera parameters {:?}", path.as_ref()))?;
        Ok(())
    }
}

/// 无畸变针孔相机, 也可以是校正后双目的一侧
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinholeCamera {
    pub parameters: PinholeParameters,
    /// 相对原始分辨率的缩放
    pub scale: f64,
}

impl PinholeCamera {
    pub fn new<P: AsRef<Path>>(camera_file: P) -> anyhow::Result<Self> {
        Ok(Self::from_parameters(PinholeParameters::read_from_json(
            camera_file,
        )?))
    }

    pub fn from_parameters(parameters: PinholeParameters) -> Self {
        Self {
            parameters,
            scale: 1.0,
        }
    }

    pub fn fx(&self) -> f64 {
        self.parameters.fx
    }
    pub fn fy(&self) -> f64 {
        self.parameters.fy
    }
    pub fn cx(&self) -> f64 {
        self.parameters.cx
    }
    pub fn cy(&self) -> f64 {
        self.parameters.cy
    }
    pub fn baseline(&self) -> f64 {
        self.parameters.baseline
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.parameters.image_width, self.parameters.image_height)
    }

    pub fn ok(&self) -> bool {
        self.size().area() > 0
    }

    pub fn is_stereo(&self) -> bool {
        self.parameters.baseline > 0.0
    }

    /// 图像缩放 `scale` 后的相机, 左上像素中心保持在 `(0, 0)`
    pub fn scaled(&self, scale: f64) -> Self {
        assert!(scale > 0.0, "camera scale must be positive");
        let p = &self.parameters;
        Self {
            parameters: PinholeParameters {
                image_width: (p.image_width as f64 * scale).ceil() as usize,
                image_height: (p.image_height as f64 * scale).ceil() as usize,
                fx: p.fx * scale,
                fy: p.fy * scale,
                cx: (p.cx + 0.5) * scale - 0.5,
                cy: (p.cy + 0.5) * scale - 0.5,
                ..p.clone()
            },
            scale: self.scale * scale,
        }
    }

    /// 金字塔第 `level` 层的相机
    pub fn at_level(&self, level: usize) -> Self {
        self.scaled(0.5f64.powi(level as i32))
    }

    pub fn forward(&self, pt: &Vector3<f64>) -> Point2<f64> {
        Point2::new(
            self.fx() * pt.x / pt.z + self.cx(),
            self.fy() * pt.y / pt.z + self.cy(),
        )
    }

    pub fn backward(&self, uv: &Point2<f64>) -> Vector3<f64> {
        Vector3::new(
            (uv.x - self.cx()) / self.fx(),
            (uv.y - self.cy()) / self.fy(),
            1.0,
        )
    }

    pub fn idepth_to_disp(&self, idepth: f64) -> f64 {
        self.fx() * self.baseline() * idepth
    }

    pub fn disp_to_idepth(&self, disp: f64) -> f64 {
        disp / (self.fx() * self.baseline())
    }

    pub fn depth_to_disp(&self, depth: f64) -> f64 {
        self.fx() * self.baseline() / depth
    }
}

impl CameraTrait for PinholeCamera {
    fn lift_projective(&self, p: &Point2<f64>) -> Vector3<f64> {
        self.backward(p)
    }

    fn project(&self, pt: &Vector3<f64>) -> Point2<f64> {
        self.forward(pt)
    }

    fn camera_type(&self) -> CameraType {
        CameraType::Pinhole
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parameters() -> PinholeParameters {
        PinholeParameters {
            camera_name: "cam0".to_string(),
            image_width: 640,
            image_height: 480,
            fx: 400.0,
            fy: 410.0,
            cx: 319.5,
            cy: 239.5,
            baseline: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_backward() {
        let camera = PinholeCamera::from_parameters(parameters());
        let pt = Vector3::new(0.3, -0.2, 2.5);
        let uv = camera.forward(&pt);
        let nh = camera.backward(&uv);
        assert_relative_eq!(nh * pt.z, pt, epsilon = 1e-12);
        assert_eq!(camera.lift_projective(&uv), nh);
        assert_eq!(camera.camera_type(), CameraType::Pinhole);
    }

    #[test]
    fn test_at_level() {
        let camera = PinholeCamera::from_parameters(parameters());
        let half = camera.at_level(1);
        assert_eq!(half.size(), ImageSize::new(320, 240));
        assert_eq!(half.fx(), 200.0);
        assert_eq!(half.cx(), 159.5);
        assert_eq!(half.cy(), 119.5);
        assert_eq!(half.scale, 0.5);
        assert_eq!(camera.at_level(0), camera);
    }

    #[test]
    fn test_disparity() {
        let camera = PinholeCamera::from_parameters(parameters());
        assert!(camera.is_stereo());
        assert_relative_eq!(camera.idepth_to_disp(0.5), 20.0);
        assert_relative_eq!(camera.disp_to_idepth(20.0), 0.5);
        assert_relative_eq!(camera.depth_to_disp(2.0), 20.0);
    }

    #[test]
    fn read_write_json() {
        let path = std::env::temp_dir().join("adso_frontend_pinhole_test.json");
        parameters().write_to_json(&path).unwrap();
        let camera = PinholeCamera::new(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(camera.parameters, parameters());
    }

    #[test]
    fn read_wrong_model_type() {
        let path = std::env::temp_dir().join("adso_frontend_mei_test.json");
        let mut p = parameters();
        p.model_type = "MEI".to_string();
        p.write_to_json(&path).unwrap();
        let result = PinholeParameters::read_from_json(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
