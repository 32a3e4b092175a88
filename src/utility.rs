use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3, Vector6};

pub struct Utility {}

impl Utility {
    /// SO(3) 指数映射
    #[inline]
    pub fn so3_exp(omega: &Vector3<f64>) -> UnitQuaternion<f64> {
        UnitQuaternion::from_scaled_axis(*omega)
    }

    /// SO(3) 对数映射
    #[inline]
    pub fn so3_log(q: &UnitQuaternion<f64>) -> Vector3<f64> {
        q.scaled_axis()
    }

    /// 位姿增量, xi = [omega(旋转), t(平移)], 平移直接取用
    pub fn delta_pose(xi: &Vector6<f64>) -> Isometry3<f64> {
        let omega = xi.fixed_rows::<3>(0).clone_owned();
        let t = xi.fixed_rows::<3>(3).clone_owned();
        Isometry3::from_parts(Translation3::from(t), Self::so3_exp(&omega))
    }

    /// [`Utility::delta_pose`] 的逆
    pub fn delta_pose_log(pose: &Isometry3<f64>) -> Vector6<f64> {
        let mut xi = Vector6::zeros();
        xi.fixed_rows_mut::<3>(0).copy_from(&Self::so3_log(&pose.rotation));
        xi.fixed_rows_mut::<3>(3).copy_from(&pose.translation.vector);
        xi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_so3_exp_log() {
        let omega = Vector3::new(0.2, -0.4, 0.9);
        assert_relative_eq!(
            Utility::so3_log(&Utility::so3_exp(&omega)),
            omega,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_delta_pose_rotation_first() {
        let pose = Utility::delta_pose(&Vector6::new(0.1, 0.0, 0.0, 0.0, 0.0, 0.0));
        assert_relative_eq!(pose.translation.vector, Vector3::zeros());
        assert_relative_eq!(
            pose.rotation,
            UnitQuaternion::from_scaled_axis(Vector3::new(0.1, 0.0, 0.0)),
            epsilon = 1e-12
        );

        // 平移与旋转不耦合
        let pose = Utility::delta_pose(&Vector6::new(0.0, 0.0, 0.5, 1.0, -2.0, 0.5));
        assert_relative_eq!(pose.translation.vector, Vector3::new(1.0, -2.0, 0.5));
        assert_relative_eq!(pose.rotation.angle(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_delta_pose_log() {
        let xi = Vector6::new(0.3, -0.1, 0.7, 0.2, -0.4, 0.9);
        let pose = Utility::delta_pose(&xi);
        assert_relative_eq!(Utility::delta_pose_log(&pose), xi, epsilon = 1e-12);
    }
}
