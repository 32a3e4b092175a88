use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::camera::PinholeParameters;
use crate::database::DatabaseCfg;
use crate::pixel_selector::SelectCfg;

/// 金字塔第0层的高斯核半径
pub const PYRAMID_BLUR_RADIUS: usize = 1;

/// 梯度模长图的缩放: 3x3 Sobel 原始响应乘 1/4/255, `sobel_at_i` 已除以 8
pub const GRAD_IMAGE_SCALE: f64 = 8.0 / 4.0 / 255.0;

/// min_grad 自适应的步长与上下限
pub const MIN_GRAD_STEP: i32 = 2;
pub const MIN_GRAD_LOW: i32 = 2;
pub const MIN_GRAD_HIGH: i32 = 32;

/// patch 的采样点数
pub const PATCH_SIZE: usize = 5;

/// 误差状态维度: pose(6) + affine_l(2) + affine_r(2)
pub const POSE_DIM: usize = 6;
pub const AFFINE_DIM: usize = 2;
pub const FRAME_DIM: usize = POSE_DIM + 2 * AFFINE_DIM;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub pyramid_levels: usize,
    /// 0 = 单线程
    pub grain_size: usize,
    pub select: SelectCfg,
    pub database: DatabaseCfg,
    pub camera: Option<PinholeParameters>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            pyramid_levels: 4,
            grain_size: 1,
            select: SelectCfg::default(),
            database: DatabaseCfg::default(),
            camera: None,
        }
    }
}

impl FrontendConfig {
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(s).context("parse frontend config")?;
        Ok(cfg)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        log::info!("load frontend config: {:?}", path);
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read frontend config {:?}", path))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)
            .with_context(|| format!("write frontend config {:?}", path.as_ref()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::GradKernel;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = FrontendConfig::from_json_str(
            r#"{ "pyramid_levels": 5, "select": { "cell_size": 32, "kernel": "sobel" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.pyramid_levels, 5);
        assert_eq!(cfg.grain_size, 1);
        assert_eq!(cfg.select.cell_size, 32);
        assert_eq!(cfg.select.sel_level, 1);
        assert_eq!(cfg.select.kernel, GradKernel::Sobel);
        assert_eq!(cfg.database, DatabaseCfg::default());
        assert!(cfg.camera.is_none());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let path = std::env::temp_dir().join("adso_frontend_config_test.json");
        let mut cfg = FrontendConfig::default();
        cfg.grain_size = 0;
        cfg.select.min_grad = 12;
        cfg.to_json_file(&path).unwrap();
        let loaded = FrontendConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = std::env::temp_dir().join("adso_frontend_config_missing.json");
        assert!(FrontendConfig::from_json_file(path).is_err());
    }

    #[test]
    fn test_frame_dim() {
        assert_eq!(FRAME_DIM, 10);
    }
}
