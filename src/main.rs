//! nalgebra
//! https://docs.rs/nalgebra/latest/nalgebra/
//!
//! ndarray
//! https://docs.rs/ndarray/latest/ndarray/all.html
//!
//! 用合成图像跑一遍前端: 金字塔 -> 选点 -> 关键帧 -> 数据库
//! 参数: [config.json]
use adso_frontend::camera::{PinholeCamera, PinholeParameters};
use adso_frontend::config::FrontendConfig;
use adso_frontend::database::Database;
use adso_frontend::frame_state::FrameState;
use adso_frontend::image::{
    make_grad_pyramid_u8, make_image_pyramid, threshold_depth, DepthMap, Image,
};
use adso_frontend::keyframe::{Frame, Keyframe};
use adso_frontend::parallel::init_thread_pool;
use adso_frontend::pixel_selector::PixelSelector;
use adso_frontend::point::DepthPoint;
use adso_frontend::save::KeyframePointsSave;
use nalgebra::{Isometry3, Translation3, UnitQuaternion};

const NUM_FRAMES: usize = 20;
/// 每隔几帧插入一个关键帧
const KEYFRAME_INTERVAL: usize = 4;
/// 超过此深度的点视为无深度
const MAX_DEPTH: f64 = 4.0;

/// 平移 `shift` 个像素的合成纹理
fn synthetic_image(width: usize, height: usize, shift: usize) -> Image {
    Image::from_shape_fn((height, width), |(r, c)| {
        let x = c + shift;
        let blob = ((x / 9 + r / 7) % 2) * 120;
        let ramp = (x * 3 + r * 5) % 60;
        (blob + ramp) as u8
    })
}

/// 向下倾斜的平面, 越靠下越远
fn synthetic_depth(width: usize, height: usize) -> DepthMap {
    DepthMap::from_shape_fn((height, width), |(r, _)| 1.0 + 0.02 * r as f32)
}

fn default_camera() -> PinholeParameters {
    PinholeParameters {
        camera_name: "synthetic".to_string(),
        image_width: 320,
        image_height: 240,
        fx: 250.0,
        fy: 250.0,
        cx: 159.5,
        cy: 119.5,
        ..Default::default()
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_nanos()
        .init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => FrontendConfig::from_json_file(path)?,
        None => FrontendConfig::default(),
    };
    log::info!("{}", cfg.select);

    if cfg.grain_size > 0 {
        if let Err(e) = init_thread_pool(0) {
            log::warn!("thread pool: {}", e);
        }
    }

    let camera = PinholeCamera::from_parameters(cfg.camera.clone().unwrap_or_else(default_camera));
    let size = camera.size();
    let mut selector = PixelSelector::new(cfg.select.clone());
    let mut database = Database::new(cfg.database.clone());

    for i in 0..NUM_FRAMES {
        let image = synthetic_image(size.width, size.height, i * 2);
        let grays = make_image_pyramid(&image, cfg.pyramid_levels);
        let state = FrameState::new(Isometry3::from_parts(
            Translation3::new(0.01 * i as f64, 0.0, 0.0),
            UnitQuaternion::identity(),
        ));
        database.add_frame(state);

        if i % KEYFRAME_INTERVAL != 0 {
            continue;
        }

        // 已有关键帧的点不再重复选取
        if i > 0 {
            let grids: Vec<_> = database
                .keyframes()
                .map(|(_, kf)| kf.points().clone())
                .collect();
            let n_masked = selector.set_occupancy_mask(&grids);
            log::info!("frame {}: masked {} points", i, n_masked);
        }

        let n_selected = selector.select(&grays, cfg.grain_size);
        let grads = make_grad_pyramid_u8(&grays);
        let grad0 = grads.level(0);
        let mean_grad = grad0.iter().map(|&g| g as f64).sum::<f64>() / grad0.len() as f64;

        let mut keyframe = Keyframe::default();
        keyframe.set_frame(Frame::mono(grays, state));
        keyframe.allocate(cfg.pyramid_levels, selector.grid_size());
        keyframe.init_points(selector.pixels(), &camera);
        let depth = threshold_depth(&synthetic_depth(size.width, size.height), MAX_DEPTH);
        let n_depth = keyframe.init_from_depth(&depth, DepthPoint::OK_INFO);
        // 远处的点按最大深度初始化
        keyframe.init_from_const(1.0 / MAX_DEPTH, DepthPoint::MIN_INFO);
        keyframe.init_patches(cfg.grain_size);
        let status = keyframe.update_status_info();
        log::info!(
            "frame {}: selected {}, min_grad {}, mean grad {:.2}, depth {}, {}",
            i,
            n_selected,
            selector.min_grad(),
            mean_grad,
            n_depth,
            status
        );
        if !keyframe.ok() {
            log::warn!("frame {}: no pixel selected, skip keyframe", i);
            continue;
        }

        if database.is_full() {
            if let Some(oldest) = database.oldest_unfixed() {
                database.remove_keyframe(oldest);
            }
        }
        let ids = database.keyframe_ids();
        let id = database.add_keyframe(keyframe);
        if let Some(&last) = ids.last() {
            database.add_edge(last, id);
        }
    }

    log::info!(
        "keyframes {}, edges {}, last motion {:?}",
        database.num_keyframes(),
        database.num_edges(),
        database.last_interval_pose().translation.vector
    );

    if let Some((id, keyframe)) = database.keyframes().last() {
        let path = std::env::temp_dir().join(format!("adso_frontend_{}.json", id));
        KeyframePointsSave::from(keyframe).save(&path)?;
        log::info!("saved {} points to {:?}", keyframe.status().pixels, path);
    }
    Ok(())
}
