use argh::FromArgs;
use camera_publisher::{CameraCapture, Config, DeviceAllocator};

#[derive(FromArgs)]
/// Publish every configured camera on its own zenoh endpoint
struct Args {
    /// path to the configuration file
    #[argh(option, short = 'c', default = "String::from(\"config.yaml\")")]
    config: String,

    /// device index handed to the first camera without an explicit source
    #[argh(option, default = "0")]
    first_device: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args: Args = argh::from_env();

    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load config from '{}': {}", args.config, e);
            std::process::exit(1);
        }
    };

    log::info!("Loaded configuration with {} cameras", config.cameras.len());

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down gracefully...");
        shutdown_tx.send(()).ok();
    })?;

    let allocator = DeviceAllocator::starting_at(args.first_device);
    let mut cameras = Vec::new();

    for camera_config in &config.cameras {
        let mut camera = match CameraCapture::from_config(camera_config, &allocator) {
            Ok(c) => c,
            Err(e) => {
                log::error!("Failed to create camera '{}': {}", camera_config.name, e);
                continue;
            }
        };

        if let Err(e) = camera.start() {
            log::error!("Failed to start camera '{}': {}", camera_config.name, e);
            continue;
        }
        if !camera.is_capturing() {
            log::warn!(
                "Camera '{}' has no capture source and will publish nothing",
                camera_config.name
            );
        }
        cameras.push(camera);
    }

    if cameras.is_empty() {
        anyhow::bail!("no camera could be started");
    }

    log::info!("{} cameras publishing", cameras.len());

    shutdown_rx.changed().await.ok();

    // Each stop joins a loop thread, so run them side by side off the runtime
    let stops: Vec<_> = cameras
        .into_iter()
        .map(|mut camera| tokio::task::spawn_blocking(move || camera.stop()))
        .collect();
    for stop in stops {
        if let Err(e) = stop.await {
            log::error!("Task error: {}", e);
        }
    }

    log::info!("All cameras shut down, exiting");

    Ok(())
}
