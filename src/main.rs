use std::process::ExitCode;

use anyhow::Result;
use tracing::{error, info, warn};

use rgbd_slam::config::Config;
use rgbd_slam::geometry::Pose;
use rgbd_slam::io::RgbdDataset;
use rgbd_slam::system::RgbdSlam;
use rgbd_slam::SlamError;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Configuration problems exit 1, I/O problems exit 2.
            let code = match error.downcast_ref::<SlamError>() {
                Some(SlamError::ConfigInvalid(_)) => 1u8,
                _ => 2u8,
            };
            error!("{error:#}");
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let dataset_path = args
        .next()
        .unwrap_or_else(|| "data/rgbd_dataset_freiburg1_xyz".to_string());
    let config = match args.next() {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let dataset = RgbdDataset::open(&dataset_path)?;
    info!(frames = dataset.len(), path = %dataset_path, "dataset loaded");

    let (first_gray, _) = dataset.frame(0)?;
    let mut slam = RgbdSlam::new(
        config,
        Pose::identity(),
        first_gray.width(),
        first_gray.height(),
    )?;

    for index in 0..dataset.len() {
        let (gray, depth) = dataset.frame(index)?;

        // A frame the driver rejects (no depth to initialize from, a
        // mis-sized image) does not condemn the rest of the sequence;
        // skip it and let the next frame retry.
        let pose = match slam.track(&gray, &depth) {
            Ok(pose) => pose,
            Err(failure) => {
                warn!(frame = index, error = %failure, "frame skipped");
                continue;
            }
        };

        if index % 50 == 0 {
            info!(
                frame = index,
                state = ?slam.state(),
                x = %format_args!("{:.3}", pose.position.x),
                y = %format_args!("{:.3}", pose.position.y),
                z = %format_args!("{:.3}", pose.position.z),
                map_points = slam.local_map().point_count(),
                "tracked"
            );
        }
    }

    slam.log_statistics();
    info!("done, processed {} frames", dataset.len());
    Ok(())
}
