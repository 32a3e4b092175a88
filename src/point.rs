use std::fmt;
use std::ops::{Deref, DerefMut};

use nalgebra::{Point2, Vector2, Vector3};

use crate::config::PATCH_SIZE;
use crate::grid::Grid2D;
use crate::image::{Image, ImageSize};
use crate::pixel::{gradient_at, is_pix_out, value_and_gradient_at, value_at};

/// 选中的像素, 带逆深度及其信息量
///
/// 像素为 NaN 表示 cell 未选中, 逆深度为负表示尚无深度.
/// `info` 为负表示无效, 否则保持在 `[MIN_INFO, MAX_INFO]`.
#[derive(Debug, Clone, Copy)]
pub struct DepthPoint {
    px: Point2<f64>,
    idepth: f64,
    info: f64,
}

impl Default for DepthPoint {
    fn default() -> Self {
        Self {
            px: Self::BAD_PIXEL,
            idepth: Self::BAD_IDEPTH,
            info: Self::BAD_INFO,
        }
    }
}

impl DepthPoint {
    pub const BAD_INFO: f64 = -1.0;
    pub const MIN_INFO: f64 = 0.0;
    pub const OK_INFO: f64 = 5.0;
    pub const MAX_INFO: f64 = 10.0;
    pub const BAD_IDEPTH: f64 = -1.0;
    pub const BAD_PIXEL: Point2<f64> = Point2::new(f64::NAN, f64::NAN);

    pub fn new(px: Point2<f64>) -> Self {
        Self {
            px,
            ..Default::default()
        }
    }

    pub fn px(&self) -> Point2<f64> {
        self.px
    }
    pub fn uv(&self) -> Vector2<f64> {
        self.px.coords
    }
    pub fn idepth(&self) -> f64 {
        self.idepth
    }
    pub fn info(&self) -> f64 {
        self.info
    }

    pub fn pixel_bad(&self) -> bool {
        self.px.x.is_nan() || self.px.y.is_nan()
    }
    pub fn pixel_ok(&self) -> bool {
        !self.pixel_bad()
    }

    pub fn depth_bad(&self) -> bool {
        self.idepth < 0.0
    }
    pub fn depth_ok(&self) -> bool {
        self.idepth >= 0.0
    }

    pub fn info_bad(&self) -> bool {
        self.info < Self::MIN_INFO
    }
    pub fn info_ok(&self) -> bool {
        self.info >= Self::OK_INFO
    }
    pub fn info_max(&self) -> bool {
        self.info >= Self::MAX_INFO
    }

    /// 已有深度, 或者没有可初始化的像素
    pub fn skip_init(&self) -> bool {
        self.depth_ok() || self.pixel_bad()
    }

    /// 不能用于光度对齐
    pub fn skip_align(&self) -> bool {
        !self.info_ok() || self.pixel_bad() || self.depth_bad()
    }

    pub fn set_pixel(&mut self, px: Point2<f64>) {
        self.px = px;
    }

    pub fn set_idepth_info(&mut self, idepth: f64, info: f64) {
        assert!(self.pixel_ok(), "set idepth on unselected point");
        assert!(idepth >= 0.0, "negative idepth {idepth}");
        assert!(info <= Self::MAX_INFO, "info {info} above max");
        self.idepth = idepth;
        self.info = info;
    }

    pub fn update_idepth(&mut self, d_idepth: f64) {
        self.idepth = (self.idepth + d_idepth).max(0.0);
    }

    pub fn update_info(&mut self, d_info: f64) {
        self.info = (self.info + d_info).clamp(Self::MIN_INFO, Self::MAX_INFO);
    }

    /// 回到未选中状态
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl AsRef<DepthPoint> for DepthPoint {
    fn as_ref(&self) -> &DepthPoint {
        self
    }
}

impl fmt::Display for DepthPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DepthPoint(uv=({}, {}), idepth={:.4}, info={})",
            self.px.x, self.px.y, self.idepth, self.info
        )
    }
}

/// 关键帧上的深度点
#[derive(Debug, Clone, Copy)]
pub struct FramePoint {
    point: DepthPoint,
    /// 归一化相机坐标
    pub nc: Vector2<f64>,
    /// 在优化器系统中的行号, 没有时为 -1, 不持有所有权
    hid: i32,
}

impl Default for FramePoint {
    fn default() -> Self {
        Self {
            point: DepthPoint::default(),
            nc: Vector2::zeros(),
            hid: Self::BAD_HID,
        }
    }
}

impl FramePoint {
    pub const BAD_HID: i32 = -1;

    /// 齐次归一化坐标
    pub fn nh(&self) -> Vector3<f64> {
        Vector3::new(self.nc.x, self.nc.y, 1.0)
    }

    /// 相机系下的点, 需要有效深度
    pub fn pt(&self) -> Vector3<f64> {
        self.nh() / self.idepth()
    }

    pub fn set_nc(&mut self, nh: &Vector3<f64>) {
        self.nc = nh.xy();
    }

    pub fn hid(&self) -> i32 {
        self.hid
    }
    pub fn hid_bad(&self) -> bool {
        self.hid < 0
    }
    pub fn set_hid(&mut self, hid: i32) {
        self.hid = hid;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Deref for FramePoint {
    type Target = DepthPoint;
    fn deref(&self) -> &DepthPoint {
        &self.point
    }
}

impl DerefMut for FramePoint {
    fn deref_mut(&mut self) -> &mut DepthPoint {
        &mut self.point
    }
}

impl AsRef<DepthPoint> for FramePoint {
    fn as_ref(&self) -> &DepthPoint {
        &self.point
    }
}

pub type PatchPixels = [Point2<f64>; PATCH_SIZE];

/// 5 像素十字上的灰度和梯度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patch {
    pub vals: [f64; PATCH_SIZE],
    pub grads: [Vector2<f64>; PATCH_SIZE],
}

impl Default for Patch {
    fn default() -> Self {
        Self {
            vals: [0.0; PATCH_SIZE],
            grads: [Vector2::zeros(); PATCH_SIZE],
        }
    }
}

impl Patch {
    pub const SIZE: usize = PATCH_SIZE;
    pub const CENTER: usize = 0;
    /// 外侧采样点求梯度所需的边界
    pub const BORDER: usize = 2;
    pub const OFFSETS: [Vector2<f64>; PATCH_SIZE] = [
        Vector2::new(0.0, 0.0),
        Vector2::new(0.0, -1.0),
        Vector2::new(-1.0, 0.0),
        Vector2::new(1.0, 0.0),
        Vector2::new(0.0, 1.0),
    ];

    pub fn offsets() -> &'static [Vector2<f64>; PATCH_SIZE] {
        &Self::OFFSETS
    }

    pub fn points_around(px: &Point2<f64>) -> PatchPixels {
        Self::OFFSETS.map(|o| px + o)
    }

    pub fn bad(&self) -> bool {
        self.vals[Self::CENTER] < 0.0
    }
    pub fn ok(&self) -> bool {
        !self.bad()
    }
    pub fn set_bad(&mut self) {
        self.vals[Self::CENTER] = -1.0;
    }

    /// 每个采样点的梯度模长平方
    pub fn grad_sq_norm(&self) -> [f64; PATCH_SIZE] {
        self.grads.map(|g| g.norm_squared())
    }

    /// 在 `pxs` 采样, 梯度取双线性曲面导数
    pub fn extract(&mut self, image: &Image, pxs: &PatchPixels) {
        for (k, px) in pxs.iter().enumerate() {
            let xyv = value_and_gradient_at(image, px);
            self.grads[k] = xyv.xy();
            self.vals[k] = xyv.z;
        }
    }

    /// 在 `px` 周围的十字采样, 梯度取半像素差分
    pub fn extract_around(&mut self, image: &Image, px: &Point2<f64>) {
        for (k, offset) in Self::OFFSETS.iter().enumerate() {
            let px_k = px + offset;
            self.vals[k] = value_at(image, &px_k);
            self.grads[k] = gradient_at(image, &px_k);
        }
    }

    pub fn extract_intensity(&mut self, image: &Image, pxs: &PatchPixels) {
        for (val, px) in self.vals.iter_mut().zip(pxs) {
            *val = value_at(image, px);
        }
    }

    pub fn is_any_out(image: &Image, pxs: &PatchPixels, border: f64) -> bool {
        let size = ImageSize::of(image);
        pxs.iter().any(|px| is_pix_out(size, px, border))
    }
}

pub type PatchGrid = Grid2D<Patch>;
pub type DepthPointGrid = Grid2D<DepthPoint>;
pub type FramePointGrid = Grid2D<FramePoint>;
