//! Checkpoint Converter
//!
//! Converts PyTorch ESPNetv2 checkpoints to Burn's named MessagePack format.
//! A full DSRL segmentation checkpoint becomes a model record; with
//! `--backbone-only` an ImageNet EESPNet checkpoint becomes an encoder record.
//!
//! ## Usage
//!
//! ```bash
//! # Full segmentation model
//! cargo run --features pretrained --bin converter -- espnetv2_dsrl.pth espnetv2_dsrl
//!
//! # Checkpoint saved as {"state_dict": ...} for Cityscapes
//! cargo run --features pretrained --bin converter -- ckpt.pth ckpt --dataset city --key state_dict
//!
//! # ImageNet encoder
//! cargo run --features pretrained --bin converter -- espnetv2_s_2.0.pth eespnet_s2 --backbone-only
//! ```

use anyhow::{bail, Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use clap::Parser;
use espnet_burn::{
    pretrained::{load_backbone_weights, load_model_weights},
    DatasetKind, EspnetV2SegConfig, ModelConfig,
};
use espnet_demos::{
    create_device, get_backend_name, init_logging, ConverterConfig, SelectedBackend,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input PyTorch checkpoint (.pth file)
    input: PathBuf,

    /// Output Burn record path (extension is added)
    output: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset preset (pascal, city, coco) for the decoder widths
    #[arg(long)]
    dataset: Option<String>,

    /// Encoder scale
    #[arg(long)]
    scale: Option<f32>,

    /// Convert only the EESPNet encoder
    #[arg(long)]
    backbone_only: bool,

    /// Key holding the state dict inside the checkpoint
    #[arg(long)]
    key: Option<String>,

    /// Force overwrite output file
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_json::from_str::<ConverterConfig>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else {
        ConverterConfig::default()
    };

    config.input_path = args.input;
    config.output_path = args.output;
    config.backbone_only |= args.backbone_only;
    if let Some(key) = args.key {
        config.top_level_key = Some(key);
    }
    if let Some(dataset) = &args.dataset {
        let kind = dataset
            .parse::<DatasetKind>()
            .map_err(anyhow::Error::msg)?;
        config.model = ModelConfig::for_dataset(kind).with_backbone(config.model.backbone.clone());
    }
    if let Some(scale) = args.scale {
        config.model.backbone = config.model.backbone.clone().with_scale(scale);
    }

    if !config.input_path.exists() {
        bail!(
            "Input checkpoint does not exist: {}",
            config.input_path.display()
        );
    }
    let output_file = config.output_path.with_extension("mpk");
    if output_file.exists() && !args.force {
        bail!(
            "Output file already exists: {} (use --force to overwrite)",
            output_file.display()
        );
    }

    let device = create_device();
    tracing::info!(backend = get_backend_name(), "Using backend");

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    if config.backbone_only {
        let backbone = load_backbone_weights::<SelectedBackend>(
            &config.model.backbone,
            &config.input_path,
            &device,
        )?;
        tracing::info!(params = backbone.num_params(), "Encoder converted");
        backbone
            .save_file(config.output_path.clone(), &recorder)
            .with_context(|| format!("Failed to save {}", output_file.display()))?;
    } else {
        let model = EspnetV2SegConfig::new(config.model.clone())
            .init::<SelectedBackend>(&device)
            .context("Failed to initialize model")?;
        let model = load_model_weights(
            model,
            &config.input_path,
            config.top_level_key.as_deref(),
            &device,
        )?;
        tracing::info!(
            params = model.num_params(),
            classes = model.num_classes(),
            "Segmentation model converted"
        );
        model
            .save_file(config.output_path.clone(), &recorder)
            .with_context(|| format!("Failed to save {}", output_file.display()))?;

        let config_path = config.output_path.with_extension("json");
        burn::config::Config::save(&config.model, &config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    tracing::info!(output = %output_file.display(), "Conversion completed");
    Ok(())
}
