//! ESPNetv2-DSRL Inference
//!
//! Segments images with a trained model and writes colour-coded class maps.
//! The network predicts at twice its input resolution; the class map is then
//! resized (nearest neighbour) to the original image size.
//!
//! ## Usage
//!
//! ```bash
//! # Run inference on a single image
//! cargo run --release --bin inference -- checkpoints/best_model.mpk image.jpg
//!
//! # Run inference on a directory of images
//! cargo run --release --bin inference -- checkpoints/best_model.mpk input_dir/ --output output_dir/
//!
//! # Fixed network input size, masks only
//! cargo run --release --bin inference -- model.mpk image.jpg --width 512 --height 256 --no-overlay
//! ```

use anyhow::{bail, Context, Result};
use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use clap::Parser;
use espnet_burn::{EspnetV2SegConfig, EspnetV2Segmentation, ModelConfig};
use espnet_demos::{
    common::{class_map_to_image, overlay, pascal_palette, tensor_to_class_maps, ImageUtils},
    create_device, get_backend_name, init_logging, InferenceConfig, SelectedBackend,
    SelectedDevice,
};
use image::imageops::{self, FilterType};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the model record (.mpk)
    model: PathBuf,

    /// Path to the input image or directory
    input: PathBuf,

    /// Output directory for results
    #[arg(short, long, default_value = "outputs")]
    output: PathBuf,

    /// Model configuration (JSON); defaults to the one saved next to the record
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// Network input width
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Network input height
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Only save the class map (no overlay)
    #[arg(long)]
    no_overlay: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        let config_str = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_json::from_str::<InferenceConfig>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else {
        InferenceConfig::default()
    };

    config.output_path = args.output;
    config.save_overlay &= !args.no_overlay;
    if let (Some(width), Some(height)) = (args.width, args.height) {
        config.input_size = Some((width, height));
    }
    if let Some(model_config) = find_model_config(&args.model, args.model_config.as_deref()) {
        config.model = ModelConfig::load(&model_config)
            .with_context(|| format!("Failed to read {}", model_config.display()))?;
        tracing::info!(path = %model_config.display(), "Model configuration loaded");
    }

    if !args.input.exists() {
        bail!("Input path does not exist: {}", args.input.display());
    }
    fs::create_dir_all(&config.output_path).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_path.display()
        )
    })?;

    let device = create_device();
    tracing::info!(backend = get_backend_name(), "Using backend");

    let model = load_model(&args.model, &config.model, &device)?;

    let images = if args.input.is_dir() {
        ImageUtils::collect_image_files(&args.input)?
    } else {
        vec![args.input.clone()]
    };
    if images.is_empty() {
        tracing::warn!(input = %args.input.display(), "No image files found");
        return Ok(());
    }

    let palette = pascal_palette();
    for image_path in &images {
        process_image(&model, image_path, &config, &palette, &device)?;
    }

    tracing::info!(images = images.len(), "Inference completed");
    Ok(())
}

/// An explicit path, else `<record>.json`, else `model_config.json` beside the record.
fn find_model_config(model: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let sibling = model.with_extension("json");
    if sibling.is_file() {
        return Some(sibling);
    }
    model
        .parent()
        .map(|dir| dir.join("model_config.json"))
        .filter(|path| path.is_file())
}

fn load_model(
    model_path: &Path,
    model_config: &ModelConfig,
    device: &SelectedDevice,
) -> Result<EspnetV2Segmentation<SelectedBackend>> {
    if !model_path.exists() {
        bail!("Model file does not exist: {}", model_path.display());
    }

    let model = EspnetV2SegConfig::new(model_config.clone())
        .init::<SelectedBackend>(device)
        .context("Failed to initialize model")?;

    let model = model
        .load_file(
            model_path.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .with_context(|| format!("Failed to load model weights from {}", model_path.display()))?;

    tracing::info!(
        path = %model_path.display(),
        classes = model.num_classes(),
        sssr = model.has_sssr(),
        "Model loaded"
    );
    Ok(model)
}

fn process_image(
    model: &EspnetV2Segmentation<SelectedBackend>,
    image_path: &Path,
    config: &InferenceConfig,
    palette: &[[u8; 3]],
    device: &SelectedDevice,
) -> Result<()> {
    let start_time = Instant::now();

    let (input, original) =
        ImageUtils::load_image::<SelectedBackend, _>(image_path, config.input_size, device)?;
    let classes = model.predict(input);

    let class_map = tensor_to_class_maps(classes)?
        .into_iter()
        .next()
        .context("Model returned an empty batch")?;
    let class_map = imageops::resize(
        &class_map,
        original.width(),
        original.height(),
        FilterType::Nearest,
    );
    let mask = class_map_to_image(&class_map, palette);

    let stem = image_path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let mask_path = config.output_path.join(format!("{stem}_mask.png"));
    mask.save(&mask_path)
        .with_context(|| format!("Failed to save {}", mask_path.display()))?;

    if config.save_overlay {
        let blended = overlay(&original.to_rgb8(), &mask, config.overlay_alpha)?;
        let overlay_path = config.output_path.join(format!("{stem}_overlay.png"));
        blended
            .save(&overlay_path)
            .with_context(|| format!("Failed to save {}", overlay_path.display()))?;
    }

    tracing::info!(
        image = %image_path.display(),
        output = %mask_path.display(),
        elapsed_s = start_time.elapsed().as_secs_f32(),
        "Processed"
    );
    Ok(())
}
