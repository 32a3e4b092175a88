mod pts;
pub use pts::{KeyframePointsSave, PointSave};
