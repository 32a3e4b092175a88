//! 8 位图像上的像素采样
//!
//! `*_at` 接受浮点坐标并做双线性插值, `*_at_i` 直接读整数网格.
//! 这里不做边界检查, 调用方用 [`is_pix_out`] 保证.

use nalgebra::{Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::image::{Image, ImageSize};

#[inline]
fn at(image: &Image, x: usize, y: usize) -> f64 {
    image[[y, x]] as f64
}

/// 双线性采样的整数邻域: 左上角, +1 邻居 (截断到最后一行/列) 和小数部分
#[inline]
fn footprint(image: &Image, uv: &Point2<f64>) -> (usize, usize, usize, usize, f64, f64) {
    let fx = uv.x.floor();
    let fy = uv.y.floor();
    let x0 = fx as usize;
    let y0 = fy as usize;
    let x1 = (x0 + 1).min(image.ncols() - 1);
    let y1 = (y0 + 1).min(image.nrows() - 1);
    (x0, y0, x1, y1, uv.x - fx, uv.y - fy)
}

/// 双线性插值灰度, 整数坐标处为原像素值
pub fn value_at(image: &Image, uv: &Point2<f64>) -> f64 {
    let (x0, y0, x1, y1, a, b) = footprint(image, uv);
    let v00 = at(image, x0, y0);
    let v10 = at(image, x1, y0);
    let v01 = at(image, x0, y1);
    let v11 = at(image, x1, y1);
    (1.0 - b) * ((1.0 - a) * v00 + a * v10) + b * ((1.0 - a) * v01 + a * v11)
}

/// 插值场上的中心差分, 邻居相距半个像素
pub fn gradient_at(image: &Image, uv: &Point2<f64>) -> Vector2<f64> {
    let gx = value_at(image, &Point2::new(uv.x + 0.5, uv.y))
        - value_at(image, &Point2::new(uv.x - 0.5, uv.y));
    let gy = value_at(image, &Point2::new(uv.x, uv.y + 0.5))
        - value_at(image, &Point2::new(uv.x, uv.y - 0.5));
    Vector2::new(gx, gy)
}

/// 一次读取 2x2 邻域得到梯度和灰度, 返回 `(gx, gy, value)`
///
/// 梯度是双线性曲面的导数: gx 沿 x 不变, 沿 y 线性变化, gy 反之.
pub fn value_and_gradient_at(image: &Image, uv: &Point2<f64>) -> Vector3<f64> {
    let (x0, y0, x1, y1, a, b) = footprint(image, uv);
    let v00 = at(image, x0, y0);
    let v10 = at(image, x1, y0);
    let v01 = at(image, x0, y1);
    let v11 = at(image, x1, y1);

    let gx = (1.0 - b) * (v10 - v00) + b * (v11 - v01);
    let gy = (1.0 - a) * (v01 - v00) + a * (v11 - v10);
    let val = (1.0 - b) * ((1.0 - a) * v00 + a * v10) + b * ((1.0 - a) * v01 + a * v11);
    Vector3::new(gx, gy, val)
}

#[inline]
pub fn grad_x_at_i(image: &Image, x: usize, y: usize) -> f64 {
    (at(image, x + 1, y) - at(image, x - 1, y)) / 2.0
}

#[inline]
pub fn grad_y_at_i(image: &Image, x: usize, y: usize) -> f64 {
    (at(image, x, y + 1) - at(image, x, y - 1)) / 2.0
}

/// 整数网格上的中心差分, 需要 1 像素边界
#[inline]
pub fn grad_at_i(image: &Image, x: usize, y: usize) -> Vector2<f64> {
    Vector2::new(grad_x_at_i(image, x, y), grad_y_at_i(image, x, y))
}

/// 3x3 Sobel 除以 8, 在线性斜坡上与 [`grad_at_i`] 同尺度
pub fn sobel_at_i(image: &Image, x: usize, y: usize) -> Vector2<f64> {
    let p = |dx: isize, dy: isize| {
        at(
            image,
            (x as isize + dx) as usize,
            (y as isize + dy) as usize,
        )
    };
    let gx = (p(1, -1) - p(-1, -1)) + 2.0 * (p(1, 0) - p(-1, 0)) + (p(1, 1) - p(-1, 1));
    let gy = (p(-1, 1) - p(-1, -1)) + 2.0 * (p(0, 1) - p(0, -1)) + (p(1, 1) - p(1, -1));
    Vector2::new(gx / 8.0, gy / 8.0)
}

/// 粗搜索使用的整数网格梯度算子
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradKernel {
    #[default]
    Central,
    Sobel,
}

impl GradKernel {
    #[inline]
    pub fn at(&self, image: &Image, x: usize, y: usize) -> Vector2<f64> {
        match self {
            GradKernel::Central => grad_at_i(image, x, y),
            GradKernel::Sobel => sobel_at_i(image, x, y),
        }
    }
}

/// `px` 距 `size` 图像任一边界小于 `border` 时为 true
#[inline]
pub fn is_pix_out(size: ImageSize, px: &Point2<f64>, border: f64) -> bool {
    px.x < border
        || px.y < border
        || px.x > size.width as f64 - border - 1.0
        || px.y > size.height as f64 - border - 1.0
}

#[inline]
pub fn is_pix_out_i(size: ImageSize, px: &Point2<i32>, border: i32) -> bool {
    px.x < border
        || px.y < border
        || px.x > size.width as i32 - border - 1
        || px.y > size.height as i32 - border - 1
}

/// 缩放像素坐标, 左上像素中心为 `(0, 0)`
#[inline]
pub fn scale_pix(px: &Point2<f64>, scale: f64) -> Point2<f64> {
    Point2::new((px.x + 0.5) * scale - 0.5, (px.y + 0.5) * scale - 0.5)
}

#[inline]
pub fn round_pix(px: &Point2<f64>) -> Point2<i32> {
    Point2::new(px.x.round() as i32, px.y.round() as i32)
}
