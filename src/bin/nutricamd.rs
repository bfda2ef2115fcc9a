//! nutricamd - the nutricam daemon.
//!
//! 1. Loads configuration
//! 2. Opens the nutrition database
//! 3. Builds the classifier pipeline
//! 4. Serves the HTTP API until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};

use nutricam::api::{ApiConfig, ApiServer, AppState};
use nutricam::classify::{ClassifierBackend, ClassifierPipeline, LabelTable, StubClassifier};
use nutricam::config::NutricamConfig;
use nutricam::{CameraManager, SourceConfig, SqliteNutritionStore};

#[derive(Debug, Parser)]
#[command(name = "nutricamd", about = "Camera-backed food nutrition service")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "NUTRICAM_CONFIG")]
    config: Option<PathBuf>,

    /// Override the API listen address.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = NutricamConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }

    let store = SqliteNutritionStore::open(&config.db_path)?;
    log::info!("nutrition store at {}", config.db_path);

    let camera = CameraManager::new(
        SourceConfig {
            device: config.camera.device.clone(),
            target_fps: config.camera.target_fps,
            width: config.camera.width,
            height: config.camera.height,
        },
        config.camera.read_timeout,
    );

    let mut pipeline = ClassifierPipeline::new(
        build_backend(&config),
        LabelTable::new(config.model.labels.clone()),
        config.model.input_size,
    );
    match pipeline.backend_name() {
        Some(name) => log::info!("classifier backend: {}", name),
        None => log::warn!("no classifier backend; /food_classification will report model unavailable"),
    }
    if let Err(err) = pipeline.warm_up() {
        log::warn!("classifier warm-up failed: {err:#}");
    }

    let state = Arc::new(AppState {
        camera,
        store: Mutex::new(Box::new(store)),
        pipeline: Mutex::new(pipeline),
        jpeg_quality: config.camera.jpeg_quality,
    });

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, state.clone()).spawn()?;
    log::info!("api listening on {}", api_handle.addr);
    log::info!("camera device: {}", config.camera.device);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("nutricamd running; waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");

    api_handle.stop()?;
    state.camera.release()?;
    log::info!("nutricamd stopped");
    Ok(())
}

/// Pick a classifier backend from the model configuration.
///
/// A configured ONNX model wins when the tract backend is compiled in.
/// With labels but no model, the deterministic stub backend serves as a
/// stand-in. Otherwise classification reports model unavailable.
fn build_backend(config: &NutricamConfig) -> Option<Box<dyn ClassifierBackend>> {
    if let Some(path) = &config.model.path {
        #[cfg(feature = "backend-tract")]
        {
            match nutricam::TractClassifier::new(
                path,
                config.model.input_size,
                config.model.input_size,
            ) {
                Ok(backend) => return Some(Box::new(backend)),
                Err(err) => {
                    log::warn!("failed to load model {}: {err:#}", path.display());
                    return None;
                }
            }
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            log::warn!(
                "model {} configured but the backend-tract feature is not built in",
                path.display()
            );
            return None;
        }
    }
    if !config.model.labels.is_empty() {
        return Some(Box::new(StubClassifier::new(config.model.labels.len())));
    }
    None
}
