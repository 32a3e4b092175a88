//! 8 位灰度图与图像金字塔
//!
//! 图像为 `ndarray::Array2<u8>`, 按 `[[row, col]]` 索引;
//! 其余模块中的像素坐标均为 `(x = col, y = row)`.

use ndarray::{s, Array2};

use crate::config::{GRAD_IMAGE_SCALE, PYRAMID_BLUR_RADIUS};
use crate::pixel::sobel_at_i;

pub type Image = Array2<u8>;
/// 梯度模长图, [`make_grad_image`] 的输出
pub type GradImage = Array2<f32>;
/// 深度图, 0 表示无效
pub type DepthMap = Array2<f32>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn of(image: &Image) -> Self {
        Self {
            width: image.ncols(),
            height: image.nrows(),
        }
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// 上一层金字塔的尺寸, `ceil(size / 2)`
    pub fn half(&self) -> Self {
        Self {
            width: self.width.div_ceil(2),
            height: self.height.div_ceil(2),
        }
    }
}

/// 轴对齐窗口, 裁剪前可以超出图像
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn of_image(image: &Image) -> Self {
        Self::new(0, 0, image.ncols() as i32, image.nrows() as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// 四边各收缩 `border`
    pub fn shrink(&self, border: i32) -> Self {
        Self::new(
            self.x + border,
            self.y + border,
            self.width - 2 * border,
            self.height - 2 * border,
        )
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x1 <= x0 || y1 <= y0 {
            Rect::default()
        } else {
            Rect::new(x0, y0, x1 - x0, y1 - y0)
        }
    }
}

/// 多分辨率灰度图, 第0层为原始分辨率
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagePyramid {
    levels: Vec<Image>,
}

impl ImagePyramid {
    /// 由 `image` 构建 `num_levels` 层金字塔
    ///
    /// 第0层以上每层为下一层的 2x2 均值降采样, 降采样完成后再对第0层做高斯模糊,
    /// 使各层梯度的平滑程度接近.
    pub fn build(image: &Image, num_levels: usize) -> Self {
        assert!(!image.is_empty(), "cannot build a pyramid from an empty image");
        assert!(num_levels >= 1, "pyramid must have at least 1 level");

        let mut levels = Vec::with_capacity(num_levels);
        levels.push(image.clone());
        for l in 1..num_levels {
            let down = downsample_2x(&levels[l - 1]);
            levels.push(down);
        }
        levels[0] = gaussian_blur(&levels[0], PYRAMID_BLUR_RADIUS);

        Self { levels }
    }

    /// 包装已有的各层, 尺寸不满足金字塔关系时 panic
    pub fn from_levels(levels: Vec<Image>) -> Self {
        assert!(is_image_pyramid(&levels), "levels do not form an image pyramid");
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, l: usize) -> &Image {
        &self.levels[l]
    }

    pub fn levels(&self) -> &[Image] {
        &self.levels
    }

    pub fn size_at(&self, l: usize) -> ImageSize {
        ImageSize::of(&self.levels[l])
    }

    pub fn total_bytes(&self) -> usize {
        total_bytes(&self.levels)
    }
}

/// 同 [`ImagePyramid::build`]
pub fn make_image_pyramid(image: &Image, num_levels: usize) -> ImagePyramid {
    ImagePyramid::build(image, num_levels)
}

/// 每层尺寸必须为下一层的 `ceil(prev / 2)`
pub fn is_image_pyramid(levels: &[Image]) -> bool {
    if levels.is_empty() {
        return false;
    }
    levels.windows(2).all(|pair| {
        let below = ImageSize::of(&pair[0]);
        let above = ImageSize::of(&pair[1]);
        above == below.half()
    })
}

pub fn total_bytes(levels: &[Image]) -> usize {
    levels.iter().map(|im| im.len() * std::mem::size_of::<u8>()).sum()
}

/// 层数相同且每层尺寸相同
pub fn is_stereo_pair(left: &ImagePyramid, right: &ImagePyramid) -> bool {
    left.num_levels() == right.num_levels()
        && left
            .levels()
            .iter()
            .zip(right.levels())
            .all(|(l, r)| l.dim() == r.dim())
}

/// 2x2 均值降采样. 奇数尺寸时末行/列只平均存在的像素, 输出为 `ceil(size / 2)`
pub fn downsample_2x(src: &Image) -> Image {
    let (rows, cols) = src.dim();
    let (new_rows, new_cols) = (rows.div_ceil(2), cols.div_ceil(2));
    Array2::from_shape_fn((new_rows, new_cols), |(r, c)| {
        let r0 = 2 * r;
        let c0 = 2 * c;
        let r1 = (r0 + 1).min(rows - 1);
        let c1 = (c0 + 1).min(cols - 1);
        let mut sum = 0u32;
        let mut n = 0u32;
        for rr in r0..=r1 {
            for cc in c0..=c1 {
                sum += src[[rr, cc]] as u32;
                n += 1;
            }
        }
        ((sum + n / 2) / n) as u8
    })
}

#[inline]
fn reflect_101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= len {
        i = 2 * len - 2 - i;
    }
    i as usize
}

/// 可分离的二项式模糊, 半径1即 3x3 高斯核 `[1 2 1] / 4`.
/// 边界按 reflect-101 处理 (不重复边缘像素).
pub fn gaussian_blur(src: &Image, radius: usize) -> Image {
    assert_eq!(radius, 1, "only a radius 1 kernel is supported");
    const KERNEL: [u32; 3] = [1, 2, 1];

    let (rows, cols) = src.dim();
    let mut tmp = Array2::<u32>::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0;
            for (k, w) in KERNEL.iter().enumerate() {
                let cc = reflect_101(c as isize + k as isize - 1, cols);
                acc += w * src[[r, cc]] as u32;
            }
            tmp[[r, c]] = acc;
        }
    }

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let mut acc = 0;
        for (k, w) in KERNEL.iter().enumerate() {
            let rr = reflect_101(r as isize + k as isize - 1, rows);
            acc += w * tmp[[rr, c]];
        }
        ((acc + 8) / 16) as u8
    })
}

/// 从左上角裁剪, 使宽高均为 `factor` 的整数倍
pub fn crop_to_factor(image: &Image, factor: usize) -> Image {
    assert!(factor > 0, "crop factor must be positive");
    let (rows, cols) = image.dim();
    let new_rows = (rows / factor) * factor;
    let new_cols = (cols / factor) * factor;
    if new_rows == rows && new_cols == cols {
        return image.clone();
    }
    image.slice(s![..new_rows, ..new_cols]).to_owned()
}

/// 将 `roi` 在图像内的部分填为 `val`, 没有任何像素被填时返回 false
pub fn set_roi(mat: &mut Image, roi: Rect, val: u8) -> bool {
    let roi = roi.intersect(&Rect::of_image(mat));
    if roi.is_empty() {
        return false;
    }
    let (x, y) = (roi.x as usize, roi.y as usize);
    let (w, h) = (roi.width as usize, roi.height as usize);
    mat.slice_mut(s![y..y + h, x..x + w]).fill(val);
    true
}

/// 填充以 `(cx, cy)` 为中心, 边长 `2 * half + 1` 的正方形窗口
pub fn set_window(mat: &mut Image, cx: i32, cy: i32, half: i32, val: u8) -> bool {
    let full = 2 * half + 1;
    set_roi(mat, Rect::new(cx - half, cy - half, full, full), val)
}

/// Sobel 梯度模长, 边界按 reflect-101 处理
pub fn make_grad_image(image: &Image) -> GradImage {
    assert!(!image.is_empty(), "empty image");
    let (rows, cols) = image.dim();
    let padded = Array2::from_shape_fn((rows + 2, cols + 2), |(r, c)| {
        image[[reflect_101(r as isize - 1, rows), reflect_101(c as isize - 1, cols)]]
    });
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        (sobel_at_i(&padded, c + 1, r + 1).norm() * GRAD_IMAGE_SCALE) as f32
    })
}

/// 每层的梯度模长图
pub fn make_grad_pyramid(images: &ImagePyramid) -> Vec<GradImage> {
    images.levels().iter().map(make_grad_image).collect()
}

/// 同 [`make_grad_pyramid`], 结果乘以 255 转为 8 位图 (饱和截断)
pub fn make_grad_pyramid_u8(images: &ImagePyramid) -> ImagePyramid {
    let levels = make_grad_pyramid(images)
        .iter()
        .map(|grad| grad.mapv(|g| (g * 255.0).round().clamp(0.0, 255.0) as u8))
        .collect();
    ImagePyramid::from_levels(levels)
}

/// 深度大于 `max_depth` 的像素置0
pub fn threshold_depth(depth: &DepthMap, max_depth: f64) -> DepthMap {
    depth.mapv(|d| if d as f64 > max_depth { 0.0 } else { d })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn ramp(rows: usize, cols: usize) -> Image {
        Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 7 + c * 3) % 256) as u8)
    }

    #[test]
    fn test_pyramid_sizes() {
        let image = ramp(37, 50);
        let pyramid = make_image_pyramid(&image, 4);
        assert_eq!(pyramid.num_levels(), 4);
        assert_eq!(pyramid.size_at(0), ImageSize::new(50, 37));
        assert_eq!(pyramid.size_at(1), ImageSize::new(25, 19));
        assert_eq!(pyramid.size_at(2), ImageSize::new(13, 10));
        assert_eq!(pyramid.size_at(3), ImageSize::new(7, 5));
        assert!(is_image_pyramid(pyramid.levels()));
    }

    #[test]
    fn test_corrupted_pyramid_is_rejected() {
        let image = ramp(32, 32);
        let pyramid = make_image_pyramid(&image, 3);
        let mut levels = pyramid.levels().to_vec();
        levels[2] = Array2::zeros((5, 8));
        assert!(!is_image_pyramid(&levels));
        assert!(!is_image_pyramid(&[]));
    }

    #[test]
    #[should_panic]
    fn test_empty_image_panics() {
        let image = Image::zeros((0, 0));
        let _ = make_image_pyramid(&image, 2);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let image = array![[0u8, 2, 10], [4, 6, 20], [8, 8, 30]];
        let down = downsample_2x(&image);
        assert_eq!(down.dim(), (2, 2));
        assert_eq!(down[[0, 0]], 3);
        assert_eq!(down[[0, 1]], 15);
        assert_eq!(down[[1, 0]], 8);
        assert_eq!(down[[1, 1]], 30);
    }

    #[test]
    fn test_blur_keeps_constant_image() {
        let image = Image::from_elem((5, 6), 77);
        assert_eq!(gaussian_blur(&image, 1), image);
    }

    #[test]
    fn test_blur_spreads_impulse() {
        let mut image = Image::zeros((5, 5));
        image[[2, 2]] = 160;
        let blurred = gaussian_blur(&image, 1);
        assert_eq!(blurred[[2, 2]], 40);
        assert_eq!(blurred[[1, 2]], 20);
        assert_eq!(blurred[[1, 1]], 10);
        assert_eq!(blurred[[0, 0]], 0);
    }

    #[test]
    fn test_level0_is_blurred_after_downsampling() {
        let mut image = Image::zeros((4, 4));
        image[[1, 1]] = 160;
        let pyramid = make_image_pyramid(&image, 2);
        // 第1层来自未模糊的输入
        assert_eq!(pyramid.level(1)[[0, 0]], 40);
        assert_eq!(pyramid.level(0)[[1, 1]], 40);
    }

    #[test]
    fn test_stereo_pair_and_bytes() {
        let a = make_image_pyramid(&ramp(16, 16), 3);
        let b = make_image_pyramid(&ramp(16, 16), 3);
        let c = make_image_pyramid(&ramp(16, 18), 3);
        assert!(is_stereo_pair(&a, &b));
        assert!(!is_stereo_pair(&a, &c));
        assert_eq!(a.total_bytes(), 256 + 64 + 16);
    }

    #[test]
    fn test_crop_to_factor() {
        let image = ramp(10, 10);
        let cropped = crop_to_factor(&image, 3);
        assert_eq!(cropped.dim(), (9, 9));
        assert_eq!(cropped[[8, 8]], image[[8, 8]]);
        assert_eq!(crop_to_factor(&image, 5).dim(), (10, 10));
    }

    #[test]
    fn test_set_window_clips() {
        let mut mask = Image::zeros((5, 5));
        assert!(set_window(&mut mask, 0, 0, 1, 255));
        assert_eq!(mask.iter().filter(|&&v| v == 255).count(), 4);
        assert!(!set_window(&mut mask, -5, -5, 1, 255));
    }

    #[test]
    fn test_grad_image_on_ramp() {
        let image = Array2::from_shape_fn((3, 5), |(_, c)| (10 * c) as u8);
        let grad = make_grad_image(&image);
        assert_eq!(grad.dim(), (3, 5));
        for r in 0..3 {
            // 反射边界处无梯度
            assert_eq!(grad[[r, 0]], 0.0);
            assert_eq!(grad[[r, 4]], 0.0);
            for c in 1..4 {
                assert_relative_eq!(grad[[r, c]], 20.0 / 255.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_grad_pyramid() {
        let pyramid = ImagePyramid::from_levels(vec![
            Array2::from_shape_fn((4, 6), |(_, c)| (10 * c) as u8),
            Array2::from_shape_fn((2, 3), |(_, c)| if c < 1 { 0 } else { 255 }),
        ]);
        let grads = make_grad_pyramid(&pyramid);
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[1].dim(), (2, 3));
        assert_relative_eq!(grads[1][[0, 1]], 1.0, epsilon = 1e-6);

        let grads = make_grad_pyramid_u8(&pyramid);
        assert_eq!(grads.num_levels(), 2);
        assert_eq!(grads.level(0)[[1, 2]], 20);
        assert_eq!(grads.level(0)[[1, 0]], 0);
        assert_eq!(grads.level(1)[[0, 1]], 255);
    }

    #[test]
    fn test_threshold_depth() {
        let depth = array![[0.5f32, 2.0], [3.0, 0.0]];
        let out = threshold_depth(&depth, 2.0);
        assert_eq!(out, array![[0.5f32, 2.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_rect_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, -2, 10, 4);
        assert_eq!(a.intersect(&b), Rect::new(5, 0, 5, 2));
        assert!(a.intersect(&Rect::new(20, 20, 1, 1)).is_empty());
        assert_eq!(a.shrink(1), Rect::new(1, 1, 8, 8));
    }
}
