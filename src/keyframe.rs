//! 关键帧: 保留点和 patch 供优化器使用的帧

use std::fmt;

use nalgebra::{DVector, Point2};
use ndarray::Array2;

use crate::camera::PinholeCamera;
use crate::frame_state::{ErrorState, FrameState};
use crate::grid::{Grid2D, GridSize};
use crate::image::{is_image_pyramid, is_stereo_pair, DepthMap, ImagePyramid, ImageSize};
use crate::parallel::{parallel_for_rows, parallel_reduce, BlockedRange};
use crate::pixel::scale_pix;
use crate::pixel_selector::{PixelGrid, BAD_PIXEL};
use crate::point::{DepthPoint, FramePoint, FramePointGrid, Patch, PatchGrid};

/// 左图的稠密视差, 未知处 <= 0
pub type DisparityMap = Array2<f32>;

#[derive(Debug, Clone, Default)]
pub struct Frame {
    grays_l: ImagePyramid,
    grays_r: ImagePyramid,
    pub state: FrameState,
}

impl Frame {
    pub fn new(grays_l: ImagePyramid, grays_r: ImagePyramid, state: FrameState) -> Self {
        let mut frame = Self {
            state,
            ..Default::default()
        };
        frame.set_grays(grays_l, grays_r);
        frame
    }

    pub fn mono(grays_l: ImagePyramid, state: FrameState) -> Self {
        Self::new(grays_l, ImagePyramid::default(), state)
    }

    /// 替换图像, 右目金字塔可以为空
    pub fn set_grays(&mut self, grays_l: ImagePyramid, grays_r: ImagePyramid) {
        assert!(is_image_pyramid(grays_l.levels()), "left images are not a pyramid");
        if !grays_r.is_empty() {
            assert!(
                is_stereo_pair(&grays_l, &grays_r),
                "right pyramid does not match the left one"
            );
        }
        self.grays_l = grays_l;
        self.grays_r = grays_r;
    }

    pub fn grays_l(&self) -> &ImagePyramid {
        &self.grays_l
    }
    pub fn grays_r(&self) -> &ImagePyramid {
        &self.grays_r
    }

    pub fn levels(&self) -> usize {
        self.grays_l.num_levels()
    }

    pub fn is_stereo(&self) -> bool {
        !self.grays_r.is_empty()
    }

    pub fn image_size(&self) -> ImageSize {
        self.grays_l.size_at(0)
    }

    pub fn bytes(&self) -> usize {
        self.grays_l.total_bytes() + self.grays_r.total_bytes()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyframeStatus {
    /// 选中的像素数
    pub pixels: usize,
    /// 有深度的点
    pub depths: usize,
    /// 第0层有效 patch
    pub patches: usize,

    // 选中点按 info 分档
    /// info < MIN_INFO
    pub info_bad: usize,
    /// MIN_INFO <= info < OK_INFO
    pub info_uncert: usize,
    /// OK_INFO <= info < MAX_INFO
    pub info_ok: usize,
    /// info >= MAX_INFO
    pub info_max: usize,
}

impl KeyframeStatus {
    fn count(&mut self, point: &DepthPoint) {
        if point.pixel_bad() {
            return;
        }
        self.pixels += 1;
        self.depths += point.depth_ok() as usize;
        if point.info_bad() {
            self.info_bad += 1;
        } else if point.info_max() {
            self.info_max += 1;
        } else if point.info_ok() {
            self.info_ok += 1;
        } else {
            self.info_uncert += 1;
        }
    }

    pub fn frame_status(&self) -> String {
        format!("pixels={}, depths={}, patches={}", self.pixels, self.depths, self.patches)
    }

    pub fn point_status(&self) -> String {
        format!(
            "info_bad={}, info_uncert={}, info_ok={}, info_max={}",
            self.info_bad, self.info_uncert, self.info_ok, self.info_max
        )
    }
}

impl std::ops::Add for KeyframeStatus {
    type Output = KeyframeStatus;
    fn add(self, rhs: KeyframeStatus) -> KeyframeStatus {
        KeyframeStatus {
            pixels: self.pixels + rhs.pixels,
            depths: self.depths + rhs.depths,
            patches: self.patches + rhs.patches,
            info_bad: self.info_bad + rhs.info_bad,
            info_uncert: self.info_uncert + rhs.info_uncert,
            info_ok: self.info_ok + rhs.info_ok,
            info_max: self.info_max + rhs.info_max,
        }
    }
}

impl fmt::Display for KeyframeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyframeStatus({}, {})", self.frame_status(), self.point_status())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Keyframe {
    frame: Frame,
    fixed: bool,
    status: KeyframeStatus,
    first_estimate: FrameState,
    /// 相对 first estimate 的累计增量
    x: ErrorState,
    points: FramePointGrid,
    /// 每层金字塔一个 grid
    patches: Vec<PatchGrid>,
}

fn bad_patch() -> Patch {
    let mut patch = Patch::default();
    patch.set_bad();
    patch
}

impl Keyframe {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
    pub fn state(&self) -> &FrameState {
        &self.frame.state
    }
    pub fn first_estimate(&self) -> &FrameState {
        &self.first_estimate
    }
    pub fn x(&self) -> &ErrorState {
        &self.x
    }
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }
    pub fn status(&self) -> &KeyframeStatus {
        &self.status
    }
    pub fn points(&self) -> &FramePointGrid {
        &self.points
    }
    pub fn points_mut(&mut self) -> &mut FramePointGrid {
        &mut self.points
    }
    pub fn patches(&self, level: usize) -> &PatchGrid {
        &self.patches[level]
    }

    /// 上次 [`Keyframe::update_status_info`] 时有选中的像素
    pub fn ok(&self) -> bool {
        self.status.pixels > 0
    }

    /// 接管 `frame`, 其状态作为 first estimate
    pub fn set_frame(&mut self, frame: Frame) {
        self.first_estimate = frame.state;
        self.x = ErrorState::zeros();
        self.fixed = false;
        self.frame = frame;
    }

    /// 分配点 grid 与每层的 patch grid, 返回占用字节数
    pub fn allocate(&mut self, levels: usize, grid_size: GridSize) -> usize {
        assert!(levels > 0, "keyframe needs at least one level");
        assert!(grid_size.area() > 0, "empty keyframe grid");
        self.points.resize(grid_size, FramePoint::default());
        self.patches = vec![PatchGrid::with_size(grid_size, bad_patch()); levels];
        self.bytes()
    }

    pub fn bytes(&self) -> usize {
        self.points.bytes() + self.patches.iter().map(Grid2D::bytes).sum::<usize>()
    }

    /// 每个选中像素一个点, 返回点数
    pub fn init_points(&mut self, pixels: &PixelGrid, camera: &PinholeCamera) -> usize {
        assert_eq!(
            pixels.size(),
            self.points.size(),
            "pixel grid does not match keyframe grid"
        );

        let mut n = 0;
        for (point, px) in self.points.iter_mut().zip(pixels.iter()) {
            point.reset();
            if *px == BAD_PIXEL {
                continue;
            }
            let px = Point2::new(px.x as f64, px.y as f64);
            point.set_pixel(px);
            point.set_nc(&camera.backward(&px));
            n += 1;
        }

        if n == 0 {
            log::warn!("keyframe initialized without pixels");
        }
        log::debug!("keyframe init {} points", n);
        n
    }

    /// 所有尚无深度的点使用同一逆深度
    pub fn init_from_const(&mut self, idepth: f64, info: f64) -> usize {
        let mut n = 0;
        for point in self.points.iter_mut() {
            if point.skip_init() {
                continue;
            }
            point.set_idepth_info(idepth, info);
            n += 1;
        }
        log::debug!("keyframe init {} points from const idepth {}", n, idepth);
        n
    }

    /// 由深度图初始化逆深度, 深度 <= 0 的点跳过
    pub fn init_from_depth(&mut self, depth: &DepthMap, info: f64) -> usize {
        assert_eq!(
            (depth.ncols(), depth.nrows()),
            (self.frame.image_size().width, self.frame.image_size().height),
            "depth size differs from image"
        );

        let mut n = 0;
        for point in self.points.iter_mut() {
            if point.skip_init() {
                continue;
            }
            let px = point.px();
            let d = depth[[px.y.round() as usize, px.x.round() as usize]] as f64;
            if d <= 0.0 {
                continue;
            }
            point.set_idepth_info(1.0 / d, info);
            n += 1;
        }
        log::debug!("keyframe init {} points from depth", n);
        n
    }

    /// 由视差初始化逆深度, 视差未知的点跳过
    pub fn init_from_disp(
        &mut self,
        disp: &DisparityMap,
        camera: &PinholeCamera,
        info: f64,
    ) -> usize {
        assert!(camera.is_stereo(), "disparity needs a stereo camera");
        assert_eq!(
            (disp.ncols(), disp.nrows()),
            (self.frame.image_size().width, self.frame.image_size().height),
            "disparity size differs from image"
        );

        let mut n = 0;
        for point in self.points.iter_mut() {
            if point.skip_init() {
                continue;
            }
            let px = point.px();
            let (r, c) = (px.y.round() as usize, px.x.round() as usize);
            let d = disp[[r, c]] as f64;
            if d <= 0.0 {
                continue;
            }
            point.set_idepth_info(camera.disp_to_idepth(d), info);
            n += 1;
        }
        log::debug!("keyframe init {} points from disparity", n);
        n
    }

    /// 其他关键帧对齐到本帧得到的逆深度, 每个 cell 一个, 对齐失败处为负
    pub fn init_from_align(&mut self, idepths: &Grid2D<f64>, info: f64) -> usize {
        assert_eq!(idepths.size(), self.points.size(), "idepth grid size mismatch");
        let mut n = 0;
        for (point, &idepth) in self.points.iter_mut().zip(idepths.iter()) {
            if point.skip_init() || idepth < 0.0 {
                continue;
            }
            point.set_idepth_info(idepth, info);
            n += 1;
        }
        log::debug!("keyframe init {} points from alignment", n);
        n
    }

    /// 在每层提取 patch, 返回有效 patch 数
    pub fn init_patches(&mut self, grain: usize) -> usize {
        (0..self.patches.len())
            .map(|level| self.init_patches_level(level, grain))
            .sum()
    }

    pub fn init_patches_level(&mut self, level: usize, grain: usize) -> usize {
        assert!(level < self.patches.len(), "no patch grid for level {level}");
        let image = self.frame.grays_l.level(level);
        let scale = 0.5f64.powi(level as i32);
        let points = &self.points;
        let border = Patch::BORDER as f64;

        parallel_for_rows(&mut self.patches[level], grain, |gr, row| {
            let mut n = 0;
            for (gc, patch) in row.iter_mut().enumerate() {
                let point = points.at(gr, gc);
                if point.pixel_bad() {
                    patch.set_bad();
                    continue;
                }
                let pxs = Patch::points_around(&scale_pix(&point.px(), scale));
                if Patch::is_any_out(image, &pxs, border) {
                    patch.set_bad();
                    continue;
                }
                patch.extract(image, &pxs);
                n += 1;
            }
            n
        })
    }

    /// 累加 `dx`, 状态由 first estimate 重新 retract 得到
    pub fn update_state(&mut self, dx: &ErrorState) {
        self.x += dx;
        self.frame.state = self.first_estimate.retract(&self.x);
    }

    pub fn set_fixed(&mut self) {
        self.fixed = true;
    }

    /// 对持有 hessian id 的点加上逆深度增量 `xm[hid] * scale`, 返回更新的点数
    pub fn update_points(&mut self, xm: &DVector<f64>, scale: f64, grain: usize) -> usize {
        parallel_for_rows(&mut self.points, grain, |_, row| {
            let mut n = 0;
            for point in row.iter_mut() {
                if point.hid_bad() {
                    continue;
                }
                let hid = point.hid() as usize;
                assert!(hid < xm.len(), "hessian id {hid} out of {}", xm.len());
                point.update_idepth(xm[hid] * scale);
                n += 1;
            }
            n
        })
    }

    pub fn update_status_info(&mut self) -> KeyframeStatus {
        let points = &self.points;
        let patches = self.patches.first();
        let rows = BlockedRange::new(0, points.rows(), 1);
        self.status = parallel_reduce(
            rows,
            KeyframeStatus::default(),
            |range| {
                let mut status = KeyframeStatus::default();
                for r in range {
                    for (c, point) in points.row(r).iter().enumerate() {
                        status.count(point);
                        if let Some(patches) = patches {
                            status.patches += patches.at(r, c).ok() as usize;
                        }
                    }
                }
                status
            },
            |a, b| a + b,
        );
        self.status
    }

    /// 清空所有点和 patch, 保留分配
    pub fn reset(&mut self) {
        self.points.reset(FramePoint::default());
        for patches in self.patches.iter_mut() {
            patches.reset(bad_patch());
        }
        self.fixed = false;
        self.x = ErrorState::zeros();
        self.status = KeyframeStatus::default();
    }
}

/// `info >= min_info` 的点的像素包围盒 `(min, max)`
pub fn min_bbox_info_ge(
    points: &FramePointGrid,
    min_info: f64,
) -> Option<(Point2<f64>, Point2<f64>)> {
    points
        .iter()
        .filter(|p| p.pixel_ok() && p.info() >= min_info)
        .map(|p| p.px())
        .fold(None, |bbox, px| match bbox {
            None => Some((px, px)),
            Some((lo, hi)) => Some((
                Point2::new(lo.x.min(px.x), lo.y.min(px.y)),
                Point2::new(hi.x.max(px.x), hi.y.max(px.y)),
            )),
        })
}
