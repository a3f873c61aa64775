use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use imgorient::config::{self, AppConfig};
use imgorient::{BatchItem, BinaryData, OrientationPipeline, TesseractOsd, WorkerOptions};

#[derive(Parser)]
#[command(name = "imgorient")]
#[command(about = "Detect text orientation and script of images with Tesseract OSD")]
struct Cli {
    /// Image files, one batch item each
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// Binary property to store each image under and read it back from
    #[arg(short, long, value_name = "NAME")]
    binary_property: Option<String>,

    /// Record per-image failures instead of aborting the batch
    #[arg(long)]
    continue_on_fail: bool,

    /// TOML config file (defaults to the platform config directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Tesseract executable to use
    #[arg(long, value_name = "PATH")]
    tesseract: Option<PathBuf>,

    /// Per-image detection timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => config::load_or_default()?,
        };

        if let Some(name) = &self.binary_property {
            config.node.binary_property_name = name.clone();
        }
        if self.continue_on_fail {
            config.node.continue_on_fail = true;
        }
        if let Some(binary) = &self.tesseract {
            config.engine.binary = binary.clone();
        }
        if let Some(secs) = self.timeout {
            config.engine.detect_timeout_secs = Some(secs);
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    let config = args.load_config()?;
    let property = config.node.binary_property_name.clone();

    let items: Vec<BatchItem> = args
        .images
        .iter()
        .map(|path| BatchItem::new().with_binary(property.clone(), BinaryData::stored(path)))
        .collect();
    info!("Loaded {} images", items.len());

    let worker_options = WorkerOptions {
        language: config.engine.language.clone(),
        engine_mode: config.engine.engine_mode,
        ..WorkerOptions::osd()
    };
    let pipeline = OrientationPipeline::new(TesseractOsd::from_config(&config.engine))
        .with_binary_property(property)
        .with_failure_mode(config.node.failure_mode())
        .with_detect_timeout(config.engine.detect_timeout())
        .with_worker_options(worker_options);

    let records = match pipeline.run(&items).await {
        Ok(records) => records,
        Err(err) => {
            if let Some(path) = err.item_index().and_then(|index| args.images.get(index)) {
                error!("{} failed: {}", path.display(), err);
            }
            return Err(err).context("Orientation detection failed");
        }
    };

    let output = if args.pretty {
        serde_json::to_string_pretty(&records)?
    } else {
        serde_json::to_string(&records)?
    };
    println!("{output}");

    Ok(())
}
