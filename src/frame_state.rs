//! 帧的位姿与光度状态, 在流形上更新
//!
//! 10 维切空间排列为 `[rotation(3), translation(3), affine_l(2), affine_r(2)]`.
//! 位姿部分对应增量 `(exp(rotation), translation)`, 右乘到当前位姿上.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use nalgebra::{Isometry3, SVector, Vector2, Vector6};
use serde::{Deserialize, Serialize};

use crate::config::{AFFINE_DIM, FRAME_DIM, POSE_DIM};
use crate::utility::Utility;

pub type Vector10 = SVector<f64, FRAME_DIM>;

/// 单个相机的光度仿射模型, `I' = exp(-a) * I - b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AffineModel {
    pub a: f64,
    pub b: f64,
}

impl AffineModel {
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    pub fn ab(&self) -> Vector2<f64> {
        Vector2::new(self.a, self.b)
    }
}

impl Add<Vector2<f64>> for AffineModel {
    type Output = AffineModel;
    fn add(self, d: Vector2<f64>) -> AffineModel {
        AffineModel::new(self.a + d.x, self.b + d.y)
    }
}

/// [`FrameState`] 的切空间增量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorState {
    x: Vector10,
}

impl Default for ErrorState {
    fn default() -> Self {
        Self::zeros()
    }
}

impl ErrorState {
    pub fn zeros() -> Self {
        Self {
            x: Vector10::zeros(),
        }
    }

    pub fn from_vector(x: Vector10) -> Self {
        Self { x }
    }

    pub fn from_parts(pose: Vector6<f64>, ab_l: Vector2<f64>, ab_r: Vector2<f64>) -> Self {
        let mut x = Vector10::zeros();
        x.fixed_rows_mut::<POSE_DIM>(0).copy_from(&pose);
        x.fixed_rows_mut::<AFFINE_DIM>(POSE_DIM).copy_from(&ab_l);
        x.fixed_rows_mut::<AFFINE_DIM>(POSE_DIM + AFFINE_DIM).copy_from(&ab_r);
        Self { x }
    }

    pub fn vector(&self) -> &Vector10 {
        &self.x
    }

    pub fn pose(&self) -> Vector6<f64> {
        self.x.fixed_rows::<POSE_DIM>(0).clone_owned()
    }

    /// 位姿增量 `(exp(x[0..3]), x[3..6])`
    pub fn delta_pose(&self) -> Isometry3<f64> {
        Utility::delta_pose(&self.pose())
    }

    pub fn ab_l(&self) -> Vector2<f64> {
        self.x.fixed_rows::<AFFINE_DIM>(POSE_DIM).clone_owned()
    }

    pub fn ab_r(&self) -> Vector2<f64> {
        self.x
            .fixed_rows::<AFFINE_DIM>(POSE_DIM + AFFINE_DIM)
            .clone_owned()
    }
}

impl Add for ErrorState {
    type Output = ErrorState;
    fn add(self, rhs: ErrorState) -> ErrorState {
        ErrorState::from_vector(self.x + rhs.x)
    }
}

impl AddAssign<&ErrorState> for ErrorState {
    fn add_assign(&mut self, rhs: &ErrorState) {
        self.x += rhs.x;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// 相机到世界
    pub t_w_c: Isometry3<f64>,
    pub affine_l: AffineModel,
    pub affine_r: AffineModel,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            t_w_c: Isometry3::identity(),
            affine_l: AffineModel::default(),
            affine_r: AffineModel::default(),
        }
    }
}

impl FrameState {
    pub fn new(t_w_c: Isometry3<f64>) -> Self {
        Self {
            t_w_c,
            ..Default::default()
        }
    }

    /// 位姿右乘扰动, 仿射参数直接相加
    pub fn retract(&self, dx: &ErrorState) -> FrameState {
        FrameState {
            t_w_c: self.t_w_c * dx.delta_pose(),
            affine_l: self.affine_l + dx.ab_l(),
            affine_r: self.affine_r + dx.ab_r(),
        }
    }

    /// 用同一个 `dx` 撤销 [`FrameState::retract`]
    pub fn retract_inverse(&self, dx: &ErrorState) -> FrameState {
        FrameState {
            t_w_c: self.t_w_c * dx.delta_pose().inverse(),
            affine_l: self.affine_l + (-dx.ab_l()),
            affine_r: self.affine_r + (-dx.ab_r()),
        }
    }

    /// 从 `self` 到 `other` 的增量, 满足 `self.retract(&self.local(other)) == other`
    pub fn local(&self, other: &FrameState) -> ErrorState {
        ErrorState::from_parts(
            Utility::delta_pose_log(&(self.t_w_c.inverse() * other.t_w_c)),
            other.affine_l.ab() - self.affine_l.ab(),
            other.affine_r.ab() - self.affine_r.ab(),
        )
    }
}

impl Add<&ErrorState> for &FrameState {
    type Output = FrameState;
    fn add(self, dx: &ErrorState) -> FrameState {
        self.retract(dx)
    }
}

impl Sub<&ErrorState> for &FrameState {
    type Output = FrameState;
    fn sub(self, dx: &ErrorState) -> FrameState {
        self.retract_inverse(dx)
    }
}

impl Sub<&FrameState> for &FrameState {
    type Output = ErrorState;
    fn sub(self, from: &FrameState) -> ErrorState {
        from.local(self)
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.t_w_c.translation.vector;
        let q = self.t_w_c.rotation;
        write!(
            f,
            "FrameState(t=[{:.4}, {:.4}, {:.4}], q=[{:.4}, {:.4}, {:.4}, {:.4}], ab_l=[{:.4}, {:.4}], ab_r=[{:.4}, {:.4}])",
            t.x,
            t.y,
            t.z,
            q.w,
            q.i,
            q.j,
            q.k,
            self.affine_l.a,
            self.affine_l.b,
            self.affine_r.a,
            self.affine_r.b
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    fn some_state() -> FrameState {
        FrameState {
            t_w_c: Isometry3::from_parts(
                Translation3::new(1.0, 2.0, 3.0),
                UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            ),
            affine_l: AffineModel::new(0.1, 2.0),
            affine_r: AffineModel::new(-0.2, 1.0),
        }
    }

    fn some_delta() -> ErrorState {
        ErrorState::from_parts(
            Vector6::new(0.01, -0.02, 0.03, 0.004, 0.005, -0.006),
            Vector2::new(0.5, -1.0),
            Vector2::new(0.25, 3.0),
        )
    }

    #[test]
    fn test_error_state_layout() {
        let dx = some_delta();
        assert_eq!(dx.vector()[6], 0.5);
        assert_eq!(dx.vector()[9], 3.0);
        assert_eq!(dx.ab_l(), Vector2::new(0.5, -1.0));
        assert_eq!(dx.ab_r(), Vector2::new(0.25, 3.0));
        assert_eq!(dx.pose()[5], -0.006);
    }

    #[test]
    fn test_retract_zero_is_identity() {
        let state = some_state();
        let out = state.retract(&ErrorState::zeros());
        assert_relative_eq!(out.t_w_c, state.t_w_c, epsilon = 1e-12);
        assert_eq!(out.affine_l, state.affine_l);
    }

    #[test]
    fn test_retract_affine_is_additive() {
        let out = &some_state() + &some_delta();
        assert_relative_eq!(out.affine_l.a, 0.6);
        assert_relative_eq!(out.affine_l.b, 1.0);
        assert_relative_eq!(out.affine_r.a, 0.05);
        assert_relative_eq!(out.affine_r.b, 4.0);
    }

    #[test]
    fn test_retract_is_right_perturbation() {
        // 相机系下的平移沿旋转后的轴移动
        let state = some_state();
        let dx = ErrorState::from_parts(
            Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, 1.0),
            Vector2::zeros(),
            Vector2::zeros(),
        );
        let out = state.retract(&dx);
        let expected = state.t_w_c.translation.vector + state.t_w_c.rotation * Vector3::z();
        assert_relative_eq!(out.t_w_c.translation.vector, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_pose_block_is_rotation_then_translation() {
        let dx = ErrorState::from_parts(
            Vector6::new(0.1, 0.0, 0.0, 0.0, 0.0, 0.0),
            Vector2::zeros(),
            Vector2::zeros(),
        );
        let out = FrameState::default().retract(&dx);
        assert_relative_eq!(
            out.t_w_c.rotation,
            UnitQuaternion::from_scaled_axis(Vector3::new(0.1, 0.0, 0.0)),
            epsilon = 1e-12
        );
        assert_relative_eq!(out.t_w_c.translation.vector, Vector3::zeros());

        // 有旋转时平移部分也直接使用
        let dx = ErrorState::from_parts(
            Vector6::new(0.0, 0.0, 0.3, 1.0, 2.0, 3.0),
            Vector2::zeros(),
            Vector2::zeros(),
        );
        let out = FrameState::default().retract(&dx);
        assert_relative_eq!(
            out.t_w_c.translation.vector,
            Vector3::new(1.0, 2.0, 3.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(out.t_w_c.rotation.angle(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_retract() {
        let state = some_state();
        let dx = some_delta();
        let back = &(&state + &dx) - &dx;
        assert_relative_eq!(back.t_w_c, state.t_w_c, epsilon = 1e-10);
        assert_relative_eq!(back.affine_l.b, state.affine_l.b, epsilon = 1e-12);
    }

    #[test]
    fn test_local_inverts_retract() {
        let state = some_state();
        let dx = some_delta();
        let moved = state.retract(&dx);
        let local = &moved - &state;
        assert_relative_eq!(*local.vector(), *dx.vector(), epsilon = 1e-10);
    }
}
