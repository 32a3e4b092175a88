//! 关键帧窗口与共视图
//!
//! 关键帧按 [`KeyframeId`] 存放, id 只增不减且不会复用, 删除的关键帧不会与之后的混淆.
//! 边是无向的.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::frame_state::FrameState;
use crate::keyframe::Keyframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyframeId(pub usize);

impl fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kf{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseCfg {
    /// 关键帧窗口大小
    pub max_keyframes: usize,
    /// 保留的普通帧位姿数
    pub max_frame_history: usize,
}

impl Default for DatabaseCfg {
    fn default() -> Self {
        Self {
            max_keyframes: 7,
            max_frame_history: 50,
        }
    }
}

#[derive(Debug, Default)]
pub struct Database {
    cfg: DatabaseCfg,
    next_id: usize,
    keyframes: BTreeMap<KeyframeId, Keyframe>,
    graph: BTreeMap<KeyframeId, BTreeSet<KeyframeId>>,
    frames: VecDeque<FrameState>,
}

impl Database {
    pub fn new(cfg: DatabaseCfg) -> Self {
        assert!(cfg.max_keyframes > 0, "database needs room for a keyframe");
        Self {
            cfg,
            ..Default::default()
        }
    }

    pub fn cfg(&self) -> &DatabaseCfg {
        &self.cfg
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_full(&self) -> bool {
        self.keyframes.len() >= self.cfg.max_keyframes
    }

    pub fn contains(&self, id: KeyframeId) -> bool {
        self.keyframes.contains_key(&id)
    }

    pub fn keyframe(&self, id: KeyframeId) -> Option<&Keyframe> {
        self.keyframes.get(&id)
    }

    pub fn keyframe_mut(&mut self, id: KeyframeId) -> Option<&mut Keyframe> {
        self.keyframes.get_mut(&id)
    }

    /// 按插入顺序的 id
    pub fn keyframe_ids(&self) -> Vec<KeyframeId> {
        self.keyframes.keys().copied().collect()
    }

    pub fn keyframes(&self) -> impl Iterator<Item = (KeyframeId, &Keyframe)> {
        self.keyframes.iter().map(|(id, kf)| (*id, kf))
    }

    pub fn add_keyframe(&mut self, keyframe: Keyframe) -> KeyframeId {
        let id = KeyframeId(self.next_id);
        self.next_id += 1;
        self.keyframes.insert(id, keyframe);
        self.graph.insert(id, BTreeSet::new());
        log::debug!("add keyframe {}, window {}", id, self.keyframes.len());
        id
    }

    /// 删除关键帧及其所有边
    pub fn remove_keyframe(&mut self, id: KeyframeId) -> Option<Keyframe> {
        let Some(keyframe) = self.keyframes.remove(&id) else {
            log::warn!("remove missing keyframe {}", id);
            return None;
        };
        if let Some(neighbors) = self.graph.remove(&id) {
            for other in neighbors {
                if let Some(edges) = self.graph.get_mut(&other) {
                    edges.remove(&id);
                }
            }
        }
        log::debug!("remove keyframe {}, window {}", id, self.keyframes.len());
        Some(keyframe)
    }

    /// 连接两个关键帧, 边已存在时返回 false
    pub fn add_edge(&mut self, a: KeyframeId, b: KeyframeId) -> bool {
        assert_ne!(a, b, "self edge on {a}");
        assert!(self.contains(a), "edge on missing keyframe {a}");
        assert!(self.contains(b), "edge on missing keyframe {b}");
        let added = self.graph.entry(a).or_default().insert(b);
        self.graph.entry(b).or_default().insert(a);
        if added {
            log::debug!("add edge {} - {}", a, b);
        }
        added
    }

    /// 断开两个关键帧, 没有该边时返回 false
    pub fn remove_edge(&mut self, a: KeyframeId, b: KeyframeId) -> bool {
        let removed = self
            .graph
            .get_mut(&a)
            .map(|edges| edges.remove(&b))
            .unwrap_or(false);
        if let Some(edges) = self.graph.get_mut(&b) {
            edges.remove(&a);
        }
        if removed {
            log::debug!("remove edge {} - {}", a, b);
        }
        removed
    }

    pub fn has_edge(&self, a: KeyframeId, b: KeyframeId) -> bool {
        self.graph.get(&a).is_some_and(|edges| edges.contains(&b))
    }

    pub fn neighbors(&self, id: KeyframeId) -> Vec<KeyframeId> {
        self.graph
            .get(&id)
            .map(|edges| edges.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// 最早的未固定关键帧, 即下一个要边缘化的
    pub fn oldest_unfixed(&self) -> Option<KeyframeId> {
        self.keyframes
            .iter()
            .find(|(_, kf)| !kf.is_fixed())
            .map(|(id, _)| *id)
    }

    /// 记录跟踪帧的状态, 超出历史长度时丢弃最早的
    pub fn add_frame(&mut self, state: FrameState) {
        self.frames.push_back(state);
        while self.frames.len() > self.cfg.max_frame_history {
            self.frames.pop_front();
        }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn last_pose(&self) -> Option<Isometry3<f64>> {
        self.frames.back().map(|state| state.t_w_c)
    }

    /// 最近两帧间的运动 `T_prev_last`, 不足两帧时为单位阵
    pub fn last_interval_pose(&self) -> Isometry3<f64> {
        let n = self.frames.len();
        if n < 2 {
            return Isometry3::identity();
        }
        let prev = self.frames[n - 2].t_w_c;
        let last = self.frames[n - 1].t_w_c;
        prev.inverse() * last
    }

    pub fn clear(&mut self) {
        self.keyframes.clear();
        self.graph.clear();
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    fn database_with(n: usize) -> (Database, Vec<KeyframeId>) {
        let mut db = Database::new(DatabaseCfg::default());
        let ids = (0..n).map(|_| db.add_keyframe(Keyframe::default())).collect();
        (db, ids)
    }

    #[test]
    fn test_ids_are_not_reused() {
        let (mut db, ids) = database_with(3);
        assert_eq!(ids, vec![KeyframeId(0), KeyframeId(1), KeyframeId(2)]);
        assert!(db.remove_keyframe(ids[2]).is_some());
        let id = db.add_keyframe(Keyframe::default());
        assert_eq!(id, KeyframeId(3));
        assert_eq!(db.keyframe_ids(), vec![ids[0], ids[1], id]);
        assert!(db.remove_keyframe(ids[2]).is_none());
    }

    #[test]
    fn test_edges() {
        let (mut db, ids) = database_with(3);
        assert!(db.add_edge(ids[0], ids[1]));
        assert!(!db.add_edge(ids[1], ids[0]));
        assert!(db.add_edge(ids[1], ids[2]));
        assert_eq!(db.num_edges(), 2);
        assert!(db.has_edge(ids[1], ids[0]));
        assert_eq!(db.neighbors(ids[1]), vec![ids[0], ids[2]]);

        assert!(db.remove_edge(ids[1], ids[0]));
        assert!(!db.remove_edge(ids[0], ids[1]));
        assert_eq!(db.neighbors(ids[0]), vec![]);
        assert_eq!(db.num_edges(), 1);
    }

    #[test]
    fn test_remove_keyframe_drops_edges() {
        let (mut db, ids) = database_with(3);
        db.add_edge(ids[0], ids[1]);
        db.add_edge(ids[0], ids[2]);
        db.remove_keyframe(ids[0]);
        assert_eq!(db.num_edges(), 0);
        assert!(db.neighbors(ids[1]).is_empty());
        assert!(db.neighbors(ids[0]).is_empty());
    }

    #[test]
    #[should_panic]
    fn test_edge_to_missing_keyframe_panics() {
        let (mut db, ids) = database_with(1);
        db.add_edge(ids[0], KeyframeId(5));
    }

    #[test]
    fn test_oldest_unfixed_and_full() {
        let (mut db, ids) = database_with(7);
        assert!(db.is_full());
        db.keyframe_mut(ids[0]).unwrap().set_fixed();
        assert_eq!(db.oldest_unfixed(), Some(ids[1]));
        db.remove_keyframe(ids[1]);
        assert!(!db.is_full());
        assert_eq!(db.oldest_unfixed(), Some(ids[2]));
    }

    #[test]
    fn test_frame_history() {
        let mut db = Database::new(DatabaseCfg {
            max_frame_history: 3,
            ..Default::default()
        });
        assert!(db.last_pose().is_none());
        assert_eq!(db.last_interval_pose(), Isometry3::identity());

        for i in 0..5 {
            let pose = Isometry3::from_parts(
                Translation3::new(i as f64, 0.0, 0.0),
                UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.1 * i as f64),
            );
            db.add_frame(FrameState::new(pose));
        }
        assert_eq!(db.num_frames(), 3);
        assert_relative_eq!(db.last_pose().unwrap().translation.x, 4.0);

        let delta = db.last_interval_pose();
        assert_relative_eq!(delta.rotation.angle(), 0.1, epsilon = 1e-12);
    }
}
