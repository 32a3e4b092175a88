//! 自适应梯度阈值的稀疏选点
//!
//! 原图按 `cell_size` 划分为 cell, 每个 cell 最多选一个像素: 在选点层上梯度最大的像素,
//! 再回到原始分辨率细化. 已跟踪点附近的像素由选点层上的 occupancy mask 排除.

use std::fmt;

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::config::{MIN_GRAD_HIGH, MIN_GRAD_LOW, MIN_GRAD_STEP};
use crate::grid::{Grid2D, GridSize};
use crate::image::{set_window, Image, ImagePyramid, ImageSize, Rect};
use crate::parallel::parallel_for_rows;
use crate::pixel::{is_pix_out_i, round_pix, scale_pix, GradKernel};
use crate::point::DepthPoint;

/// 未选中的 cell
pub const BAD_PIXEL: Point2<i32> = Point2::new(-1, -1);

pub type PixelGrid = Grid2D<Point2<i32>>;
pub type PixelGradGrid = Grid2D<PixelGrad>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectCfg {
    /// 粗搜索所在的金字塔层
    pub sel_level: usize,
    /// cell 边长, 原始分辨率像素
    pub cell_size: usize,
    pub min_grad: i32,
    /// 任一梯度分量达到此值时提前结束 cell 扫描
    pub max_grad: i32,
    /// occupancy mask 的膨胀半径
    pub nms_size: i32,
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub reselect: bool,
    pub max_reselect_rounds: usize,
    pub kernel: GradKernel,
}

impl Default for SelectCfg {
    fn default() -> Self {
        Self {
            sel_level: 1,
            cell_size: 16,
            min_grad: 8,
            max_grad: 64,
            nms_size: 1,
            min_ratio: 0.0,
            max_ratio: 1.0,
            reselect: true,
            max_reselect_rounds: 3,
            kernel: GradKernel::Central,
        }
    }
}

impl SelectCfg {
    pub fn check(&self) {
        assert!(self.cell_size > 0, "cell_size must be positive");
        assert!(
            self.cell_size >= 1 << self.sel_level,
            "cell_size {} smaller than selection scale {}",
            self.cell_size,
            1 << self.sel_level
        );
        assert!(self.min_grad > 0, "min_grad must be positive");
        assert!(self.max_grad > self.min_grad, "max_grad must exceed min_grad");
        assert!(self.nms_size >= 0, "nms_size must be non-negative");
        assert!(
            0.0 <= self.min_ratio && self.min_ratio <= self.max_ratio && self.max_ratio <= 1.0,
            "ratios must satisfy 0 <= min_ratio <= max_ratio <= 1"
        );
    }
}

impl fmt::Display for SelectCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SelectCfg(sel_level={}, cell_size={}, min_grad={}, max_grad={}, nms_size={}, \
             min_ratio={}, max_ratio={}, reselect={}, max_reselect_rounds={}, kernel={:?})",
            self.sel_level,
            self.cell_size,
            self.min_grad,
            self.max_grad,
            self.nms_size,
            self.min_ratio,
            self.max_ratio,
            self.reselect,
            self.max_reselect_rounds,
            self.kernel
        )
    }
}

/// 一个 cell 的最佳候选
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGrad {
    pub px: Point2<i32>,
    pub grad: Vector2<f32>,
    pub grad2: f64,
}

impl Default for PixelGrad {
    fn default() -> Self {
        Self {
            px: BAD_PIXEL,
            grad: Vector2::zeros(),
            grad2: 0.0,
        }
    }
}

impl PixelGrad {
    pub fn is_ok(&self) -> bool {
        self.grad2 > 0.0
    }
}

#[inline]
fn masked(mask: Option<(&Image, u32)>, x: i32, y: i32) -> bool {
    match mask {
        Some((mask, shift)) => {
            let (mx, my) = ((x >> shift) as usize, (y >> shift) as usize);
            my < mask.nrows() && mx < mask.ncols() && mask[[my, mx]] > 0
        }
        None => false,
    }
}

/// 按行扫描 `win`, 返回梯度最大的像素, 梯度相同时保留先扫到的
///
/// `mask` 为 occupancy mask 及 `image` 到 mask 的层差, mask 非0处跳过.
/// 任一梯度分量达到 `max_grad` 时立即返回.
pub fn find_max_grad(
    image: &Image,
    win: &Rect,
    mask: Option<(&Image, u32)>,
    max_grad: i32,
    kernel: GradKernel,
) -> PixelGrad {
    let mut pxg = PixelGrad::default();
    let max_grad = max_grad as f64;
    for y in win.y..win.y + win.height {
        for x in win.x..win.x + win.width {
            if masked(mask, x, y) {
                continue;
            }

            let grad = kernel.at(image, x as usize, y as usize);
            let grad2 = grad.norm_squared();
            if grad2 <= pxg.grad2 {
                continue;
            }

            pxg.px = Point2::new(x, y);
            pxg.grad = grad.cast::<f32>();
            pxg.grad2 = grad2;

            if grad.x.abs() >= max_grad || grad.y.abs() >= max_grad {
                return pxg;
            }
        }
    }
    pxg
}

/// 图像按 `grid` 划分后 cell `(gr, gc)` 的窗口, 离图像边界至少 `border` 像素
fn cell_window(image: &Image, grid: GridSize, gr: usize, gc: usize, border: i32) -> Rect {
    let cell_rows = (image.nrows() / grid.rows) as i32;
    let cell_cols = (image.ncols() / grid.cols) as i32;
    let win = Rect::new(
        gc as i32 * cell_cols,
        gr as i32 * cell_rows,
        cell_cols,
        cell_rows,
    );
    win.intersect(&Rect::of_image(image).shrink(border))
}

/// 粗搜索: 每个 cell 的最佳候选, 返回找到候选的 cell 数
pub fn calc_pixel_grads(
    image: &Image,
    mask: Option<&Image>,
    pxgrads: &mut PixelGradGrid,
    max_grad: i32,
    kernel: GradKernel,
    border: i32,
    grain: usize,
) -> usize {
    assert!(!image.is_empty(), "empty image");
    assert!(!pxgrads.is_empty(), "empty gradient grid");
    assert!(border >= 0, "negative border");
    if let Some(mask) = mask {
        assert_eq!(mask.dim(), image.dim(), "mask and image size differ");
    }

    let grid = pxgrads.size();
    parallel_for_rows(pxgrads, grain, |gr, row| {
        let mut n = 0;
        for (gc, cell) in row.iter_mut().enumerate() {
            let win = cell_window(image, grid, gr, gc, border);
            if win.is_empty() {
                continue;
            }
            *cell = find_max_grad(image, &win, mask.map(|m| (m, 0)), max_grad, kernel);
            n += cell.is_ok() as usize;
        }
        n
    })
}

/// `px` 在原图上 `upscale x upscale` 范围内梯度最大的像素, 该范围无梯度时返回 `px * upscale`
fn refine_at_top(
    top: &Image,
    px: Point2<i32>,
    upscale: i32,
    max_grad: i32,
    kernel: GradKernel,
) -> Point2<i32> {
    let scaled = Point2::new(px.x * upscale, px.y * upscale);
    if upscale == 1 {
        return scaled;
    }
    let win = Rect::new(scaled.x, scaled.y, upscale, upscale)
        .intersect(&Rect::of_image(top).shrink(1));
    if !win.is_empty() {
        let pxg = find_max_grad(top, &win, None, max_grad, kernel);
        if pxg.is_ok() {
            return pxg.px;
        }
    }
    scaled
}

/// 第一轮: 接受 `grad2 >= min_grad2` 的候选并映射到原始分辨率
pub fn select_pixels(
    grays: &ImagePyramid,
    pxgrads: &PixelGradGrid,
    pixels: &mut PixelGrid,
    sel_level: usize,
    min_grad2: f64,
    max_grad: i32,
    kernel: GradKernel,
    grain: usize,
) -> usize {
    assert_eq!(pxgrads.size(), pixels.size(), "grid size mismatch");
    let top = grays.level(0);
    let upscale = 1 << sel_level;

    parallel_for_rows(pixels, grain, |gr, row| {
        let mut n = 0;
        for (gc, px) in row.iter_mut().enumerate() {
            let pxg = pxgrads.at(gr, gc);
            if !pxg.is_ok() || pxg.grad2 < min_grad2 {
                continue;
            }
            *px = refine_at_top(top, pxg.px, upscale, max_grad, kernel);
            n += 1;
        }
        n
    })
}

/// 在 `mask` 上把 info 可用的点周围 `dilate` 窗口置为 255
///
/// `scale` 将原图像素映射到 mask 像素, 返回绘制的点数.
pub fn proj_to_mask<P: AsRef<DepthPoint>>(
    points: &Grid2D<P>,
    mask: &mut Image,
    scale: f64,
    dilate: i32,
) -> usize {
    assert!(scale > 0.0 && scale <= 1.0, "mask scale {scale} not in (0, 1]");
    assert!(dilate >= 0, "negative dilation");

    let size = ImageSize::of(mask);
    let mut n = 0;
    for point in points.iter().map(AsRef::as_ref) {
        if !point.info_ok() {
            continue;
        }
        let px = round_pix(&scale_pix(&point.px(), scale));
        if is_pix_out_i(size, &px, dilate) {
            continue;
        }
        n += set_window(mask, px.x, px.y, dilate, 255) as usize;
    }
    n
}

#[derive(Debug, Default)]
pub struct PixelSelector {
    cfg: SelectCfg,
    min_grad: i32,
    mask: Image,
    pixels: PixelGrid,
    pxgrads: PixelGradGrid,
}

impl PixelSelector {
    pub fn new(cfg: SelectCfg) -> Self {
        cfg.check();
        Self {
            min_grad: cfg.min_grad,
            cfg,
            ..Default::default()
        }
    }

    pub fn cfg(&self) -> &SelectCfg {
        &self.cfg
    }

    /// 当前的自适应阈值
    pub fn min_grad(&self) -> i32 {
        self.min_grad
    }

    pub fn pixels(&self) -> &PixelGrid {
        &self.pixels
    }

    pub fn pxgrads(&self) -> &PixelGradGrid {
        &self.pxgrads
    }

    /// 选点层上的 occupancy mask
    pub fn mask(&self) -> &Image {
        &self.mask
    }

    pub fn grid_size(&self) -> GridSize {
        self.pixels.size()
    }

    /// 只分配一次 grid 和 mask, 之后的调用尺寸必须一致
    pub fn allocate(&mut self, top_size: ImageSize, sel_size: ImageSize) -> usize {
        let gsize = GridSize::new(
            top_size.height / self.cfg.cell_size,
            top_size.width / self.cfg.cell_size,
        );
        assert!(
            gsize.area() > 0,
            "image {:?} smaller than one cell of {}",
            top_size,
            self.cfg.cell_size
        );

        if self.pixels.is_empty() {
            self.pixels.resize(gsize, BAD_PIXEL);
            self.pxgrads.resize(gsize, PixelGrad::default());
            self.mask = Image::zeros((sel_size.height, sel_size.width));
            log::info!(
                "pixel selector allocated {} bytes, grid {}x{}, mask {}x{}",
                self.bytes(),
                gsize.rows,
                gsize.cols,
                sel_size.width,
                sel_size.height
            );
        } else {
            assert_eq!(self.pixels.size(), gsize, "grid size changed");
            assert_eq!(
                ImageSize::of(&self.mask),
                sel_size,
                "selection level size changed"
            );
        }
        self.bytes()
    }

    fn bytes(&self) -> usize {
        self.mask.len() + self.pixels.bytes() + self.pxgrads.bytes()
    }

    /// 在 `grays` 上选点, 返回选中的 cell 数
    pub fn select(&mut self, grays: &ImagePyramid, grain: usize) -> usize {
        let sel_level = self.cfg.sel_level;
        assert!(
            grays.num_levels() > sel_level,
            "pyramid of {} levels has no selection level {}",
            grays.num_levels(),
            sel_level
        );
        let max_cell_level = 1usize << (grays.num_levels() - 1);
        if self.cfg.cell_size < max_cell_level {
            log::warn!(
                "cell_size {} smaller than top level scale {}",
                self.cfg.cell_size,
                max_cell_level
            );
        }

        self.allocate(grays.size_at(0), grays.size_at(sel_level));
        self.pixels.reset(BAD_PIXEL);
        self.pxgrads.reset(PixelGrad::default());

        calc_pixel_grads(
            grays.level(sel_level),
            Some(&self.mask),
            &mut self.pxgrads,
            self.cfg.max_grad,
            self.cfg.kernel,
            1,
            grain,
        );

        let min_grad2 = (self.min_grad * self.min_grad) as f64;
        let n1 = select_pixels(
            grays,
            &self.pxgrads,
            &mut self.pixels,
            sel_level,
            min_grad2,
            self.cfg.max_grad,
            self.cfg.kernel,
            grain,
        );
        let area = self.pixels.area() as f64;
        let ratio1 = n1 as f64 / area;

        let mut n2 = 0;
        if self.cfg.reselect && ratio1 < self.cfg.min_ratio {
            n2 = self.reselect(grays, n1, grain);
        }
        let ratio2 = (n1 + n2) as f64 / area;

        let old_min_grad = self.min_grad;
        self.min_grad = adapt_min_grad(self.min_grad, ratio1, ratio2, &self.cfg);

        log::debug!(
            "select level {}: n1={} ({:.3}), n2={} ({:.3}), min_grad {} -> {}",
            sel_level,
            n1,
            ratio1,
            n2,
            ratio2,
            old_min_grad,
            self.min_grad
        );
        n1 + n2
    }

    /// 从选点层逐层向下, 用加倍的阈值补选仍未选中的 cell, 返回新选中的 cell 数
    fn reselect(&mut self, grays: &ImagePyramid, n1: usize, grain: usize) -> usize {
        let sel_level = self.cfg.sel_level;
        let bar = 2 * self.min_grad;
        let min_grad2 = (bar * bar) as f64;
        let area = self.pixels.area() as f64;
        let grid = self.pixels.size();
        let max_grad = self.cfg.max_grad;
        let kernel = self.cfg.kernel;
        let top = grays.level(0);
        let mask = &self.mask;

        let mut n2 = 0;
        for level in (0..sel_level).rev().take(self.cfg.max_reselect_rounds) {
            if (n1 + n2) as f64 / area >= self.cfg.min_ratio {
                break;
            }
            let image = grays.level(level);
            let shift = (sel_level - level) as u32;
            let upscale = 1 << level;

            n2 += parallel_for_rows(&mut self.pixels, grain, |gr, row| {
                let mut n = 0;
                for (gc, px) in row.iter_mut().enumerate() {
                    if *px != BAD_PIXEL {
                        continue;
                    }
                    let win = cell_window(image, grid, gr, gc, 1);
                    if win.is_empty() {
                        continue;
                    }
                    let pxg = find_max_grad(image, &win, Some((mask, shift)), max_grad, kernel);
                    if !pxg.is_ok() || pxg.grad2 < min_grad2 {
                        continue;
                    }
                    *px = refine_at_top(top, pxg.px, upscale, max_grad, kernel);
                    n += 1;
                }
                n
            });
        }
        n2
    }

    /// 由已跟踪的点重建 occupancy mask, 返回绘制的点数
    pub fn set_occupancy_mask<P: AsRef<DepthPoint>>(&mut self, grids: &[Grid2D<P>]) -> usize {
        assert!(!self.mask.is_empty(), "occupancy mask used before allocation");
        self.mask.fill(0);
        let scale = 1.0 / (1 << self.cfg.sel_level) as f64;
        grids
            .iter()
            .map(|points| proj_to_mask(points, &mut self.mask, scale, self.cfg.nms_size))
            .sum()
    }
}

fn adapt_min_grad(min_grad: i32, ratio1: f64, ratio2: f64, cfg: &SelectCfg) -> i32 {
    let next = if ratio1 > cfg.max_ratio {
        min_grad + MIN_GRAD_STEP
    } else if ratio1 < cfg.min_ratio {
        if ratio2 < cfg.max_ratio {
            min_grad / 2
        } else {
            min_grad - MIN_GRAD_STEP
        }
    } else {
        min_grad
    };
    next.clamp(MIN_GRAD_LOW, MIN_GRAD_HIGH)
}
