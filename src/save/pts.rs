use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::keyframe::Keyframe;

/// 单个点的快照: 网格位置、像素、逆深度与信息量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSave {
    pub cell: (usize, usize),
    pub px: (f64, f64),
    pub idepth: f64,
    pub info: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframePointsSave {
    pub grid: (usize, usize),
    /// t_w_c, [x, y, z, qx, qy, qz, qw]
    pub pose: [f64; 7],
    pub points: Vec<PointSave>,
}

impl From<&Keyframe> for KeyframePointsSave {
    fn from(keyframe: &Keyframe) -> Self {
        let grid = keyframe.points().size();
        let mut points = Vec::new();
        for r in 0..grid.rows {
            for (c, point) in keyframe.points().row(r).iter().enumerate() {
                if point.pixel_bad() {
                    continue;
                }
                let px = point.px();
                points.push(PointSave {
                    cell: (r, c),
                    px: (px.x, px.y),
                    idepth: point.idepth(),
                    info: point.info(),
                });
            }
        }

        let t = keyframe.state().t_w_c.translation.vector;
        let q = keyframe.state().t_w_c.rotation;
        Self {
            grid: (grid.rows, grid.cols),
            pose: [t.x, t.y, t.z, q.i, q.j, q.k, q.w],
            points,
        }
    }
}

impl KeyframePointsSave {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let text = serde_json::to_string(self)?;
        std::fs::write(path.as_ref(), text)
            .with_context(|| format!("write keyframe points {:?}", path.as_ref()))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("read keyframe points {:?}", path.as_ref()))?;
        Ok(serde_json::from_str(&text)?)
    }
}
