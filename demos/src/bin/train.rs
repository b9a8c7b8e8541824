//! ESPNetv2-DSRL Training
//!
//! Trains the segmentation network with SGD, a poly learning-rate schedule
//! and a higher learning rate for the decoder and SSSR branch than for the
//! encoder. Every epoch is validated with mean IoU; periodic and best
//! checkpoints are written as named MessagePack records.
//!
//! ## Usage
//!
//! ```bash
//! # Train with default configuration (Pascal VOC)
//! cargo run --release --bin train
//!
//! # Train with specific configuration file
//! cargo run --release --bin train -- --config train_config.json
//!
//! # Burn Learner with a single learning rate and the metric dashboard
//! cargo run --release --bin train -- --learner
//!
//! # Cityscapes on the GPU, starting from ImageNet weights
//! cargo run --release --bin train --no-default-features --features wgpu,pretrained -- \
//!     --dataset city --data-root datasets/cityscapes --pretrained espnetv2_s_2.0.pth
//! ```

use anyhow::{ensure, Context, Result};
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, Module},
    optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::ElementConversion,
    train::{metric::LossMetric, LearnerBuilder},
};
use clap::Parser;
use espnet_burn::{
    BackboneConfig, ConfusionMatrix, DatasetKind, EspnetV2SegConfig, EspnetV2Segmentation,
    GroupLearningRates, MeanIoUMetricConfig, ModelConfig, ParamGroup, PolyLrSchedule,
    SegmentationBatch, SegmentationBatcher, SegmentationDataset,
};
use espnet_demos::{
    create_device, get_backend_name, init_logging, SelectedBackend, SelectedDevice, TrainBackend,
    TrainingConfig,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset layout (pascal, city, coco); resets the decoder to its preset
    #[arg(long)]
    dataset: Option<String>,

    /// Override dataset root
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Override batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override number of epochs
    #[arg(long)]
    num_epochs: Option<usize>,

    /// Override encoder learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Override encoder scale
    #[arg(long)]
    scale: Option<f32>,

    /// ImageNet EESPNet checkpoint for the encoder
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Override checkpoint path
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,

    /// Use Burn's Learner with a single learning rate
    #[arg(long)]
    learner: bool,
}

type TrainLoader = Arc<dyn DataLoader<TrainBackend, SegmentationBatch<TrainBackend>>>;
type ValidLoader = Arc<dyn DataLoader<SelectedBackend, SegmentationBatch<SelectedBackend>>>;

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;

    ensure!(config.batch_size > 0, "Batch size must be greater than 0");
    ensure!(
        config.num_epochs > 0,
        "Number of epochs must be greater than 0"
    );
    ensure!(config.learning_rate > 0.0, "Learning rate must be positive");
    ensure!(
        config.checkpoint_frequency > 0,
        "Checkpoint frequency must be greater than 0"
    );
    config.model.validate()?;

    tracing::info!(
        dataset = config.dataset.name(),
        data_root = %config.data_root.display(),
        batch_size = config.batch_size,
        num_epochs = config.num_epochs,
        learning_rate = config.learning_rate,
        head_lr_multiplier = config.head_lr_multiplier,
        label_size = ?config.label_size,
        "Starting ESPNetv2-DSRL training"
    );

    std::fs::create_dir_all(&config.checkpoint_path).with_context(|| {
        format!(
            "Failed to create checkpoint directory at {}",
            config.checkpoint_path.display()
        )
    })?;
    save_configs(&config)?;

    let device = create_device();
    tracing::info!(backend = get_backend_name(), "Using backend");

    let model = create_model(&config, &device)?;
    for group in &ParamGroup::ALL {
        tracing::info!(group = ?group, params = model.num_params_in(group), "Parameter group");
    }

    let (train_loader, valid_loader) = create_dataloaders(&config, &device)?;
    let model = if config.use_learner {
        fit_with_learner(&config, model, train_loader, valid_loader, &device)
    } else {
        train(&config, model, &train_loader, &valid_loader)?
    };

    save_checkpoint(&model, &config.checkpoint_path.join("final_model"))?;
    tracing::info!("Training completed successfully");

    Ok(())
}

fn load_config(args: &Args) -> Result<TrainingConfig> {
    let mut config = if let Some(config_path) = &args.config {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_json::from_str::<TrainingConfig>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else {
        TrainingConfig::default()
    };

    if let Some(dataset) = &args.dataset {
        let kind = dataset
            .parse::<DatasetKind>()
            .map_err(anyhow::Error::msg)?;
        config.model = ModelConfig::for_dataset(kind.clone())
            .with_backbone(config.model.backbone.clone())
            .with_sssr(config.model.sssr.clone());
        config.dataset = kind;
    }
    if let Some(data_root) = &args.data_root {
        config.data_root = data_root.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(num_epochs) = args.num_epochs {
        config.num_epochs = num_epochs;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.learning_rate = learning_rate;
    }
    if let Some(scale) = args.scale {
        config.model.backbone = config.model.backbone.clone().with_scale(scale);
    }
    if let Some(pretrained) = &args.pretrained {
        config.pretrained_backbone = Some(pretrained.clone());
    }
    if let Some(checkpoint_path) = &args.checkpoint_path {
        config.checkpoint_path = checkpoint_path.clone();
    }
    config.use_learner |= args.learner;

    Ok(config)
}

/// Writes the effective training configuration and the model configuration
/// next to the checkpoints; inference reads the latter back.
fn save_configs(config: &TrainingConfig) -> Result<()> {
    let training_path = config.checkpoint_path.join("training_config.json");
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(&training_path, json)
        .with_context(|| format!("Failed to write {}", training_path.display()))?;

    let model_path = config.checkpoint_path.join("model_config.json");
    config
        .model
        .save(&model_path)
        .with_context(|| format!("Failed to write {}", model_path.display()))?;
    Ok(())
}

fn create_model(
    config: &TrainingConfig,
    device: &SelectedDevice,
) -> Result<EspnetV2Segmentation<TrainBackend>> {
    let model = EspnetV2SegConfig::new(config.model.clone())
        .init::<TrainBackend>(device)
        .context("Failed to initialize ESPNetv2 segmentation model")?;

    let model = match &config.pretrained_backbone {
        Some(path) => load_backbone(model, &config.model.backbone, path, device)?,
        None => model,
    };

    Ok(if config.freeze_backbone {
        tracing::info!("Encoder frozen");
        model.freeze_backbone()
    } else {
        model
    })
}

#[cfg(feature = "pretrained")]
fn load_backbone(
    model: EspnetV2Segmentation<TrainBackend>,
    backbone: &BackboneConfig,
    path: &Path,
    device: &SelectedDevice,
) -> Result<EspnetV2Segmentation<TrainBackend>> {
    use espnet_burn::pretrained::{backbone_checkpoint_name, default_weights_dir};

    // a bare file name, or a directory, is looked up in the weights cache
    let path = if path.is_file() {
        path.to_path_buf()
    } else if path.is_dir() {
        path.join(backbone_checkpoint_name(backbone.scale))
    } else {
        default_weights_dir()?.join(path)
    };
    tracing::info!(path = %path.display(), "Loading pretrained encoder");
    Ok(model.with_pretrained_backbone(backbone, &path, device)?)
}

#[cfg(not(feature = "pretrained"))]
fn load_backbone(
    _model: EspnetV2Segmentation<TrainBackend>,
    _backbone: &BackboneConfig,
    path: &Path,
    _device: &SelectedDevice,
) -> Result<EspnetV2Segmentation<TrainBackend>> {
    anyhow::bail!(
        "Loading {} requires the `pretrained` feature",
        path.display()
    )
}

fn create_dataloaders(
    config: &TrainingConfig,
    device: &SelectedDevice,
) -> Result<(TrainLoader, ValidLoader)> {
    let train_dataset = SegmentationDataset::<TrainBackend>::new(
        &config.data_root,
        config.dataset.clone(),
        &config.train_split,
        config.label_size,
        device,
    )
    .context("Failed to create training dataset")?;

    let valid_dataset = SegmentationDataset::<SelectedBackend>::new(
        &config.data_root,
        config.dataset.clone(),
        &config.val_split,
        config.label_size,
        device,
    )
    .context("Failed to create validation dataset")?;

    tracing::info!(
        train = train_dataset.len(),
        valid = valid_dataset.len(),
        "Datasets loaded"
    );

    let train_loader = DataLoaderBuilder::new(SegmentationBatcher::<TrainBackend>::new())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_dataset);

    let valid_loader = DataLoaderBuilder::new(SegmentationBatcher::<SelectedBackend>::new())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid_dataset);

    Ok((train_loader, valid_loader))
}

fn train(
    config: &TrainingConfig,
    mut model: EspnetV2Segmentation<TrainBackend>,
    train_loader: &TrainLoader,
    valid_loader: &ValidLoader,
) -> Result<EspnetV2Segmentation<TrainBackend>> {
    let mut optim = sgd(config).init::<TrainBackend, EspnetV2Segmentation<TrainBackend>>();

    let base_rates = GroupLearningRates::from_base(config.learning_rate, config.head_lr_multiplier);
    let schedule = PolyLrSchedule::new(config.num_epochs).with_power(config.poly_power);
    let ignore_index = model.loss().ignore_index();
    let mut best_miou = f64::NEG_INFINITY;

    for epoch in 0..config.num_epochs {
        let rates = schedule.rates(&base_rates, epoch);
        let start = Instant::now();
        let mut loss_sum = 0.0;
        let mut num_batches = 0usize;

        for batch in train_loader.iter() {
            let output = model.forward_segmentation(batch);
            loss_sum += output.loss.clone().into_scalar().elem::<f64>();
            num_batches += 1;

            let grads = output.loss.backward();
            model = model.step_grouped(&mut optim, grads, &rates);
        }

        let matrix = evaluate(&model.valid(), valid_loader, ignore_index);
        let miou = matrix.mean_iou();
        tracing::info!(
            epoch = epoch + 1,
            loss = loss_sum / num_batches.max(1) as f64,
            miou,
            pixel_accuracy = matrix.pixel_accuracy(),
            lr_backbone = rates.backbone,
            lr_head = rates.segmentation,
            elapsed_s = start.elapsed().as_secs_f32(),
            "Epoch finished"
        );

        if miou > best_miou {
            best_miou = miou;
            save_checkpoint(&model, &config.checkpoint_path.join("best_model"))?;
        }
        if (epoch + 1) % config.checkpoint_frequency == 0 {
            let path = config
                .checkpoint_path
                .join(format!("model_epoch_{}", epoch + 1));
            save_checkpoint(&model, &path)?;
        }
    }

    tracing::info!(best_miou, "Best validation mIoU");
    Ok(model)
}

fn sgd(config: &TrainingConfig) -> SgdConfig {
    SgdConfig::new()
        .with_momentum(Some(MomentumConfig::new().with_momentum(config.momentum)))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)))
}

/// Every parameter at `learning_rate`; loss and mIoU go to the metric dashboard
/// and per-epoch checkpoints to `checkpoint_path`.
fn fit_with_learner(
    config: &TrainingConfig,
    model: EspnetV2Segmentation<TrainBackend>,
    train_loader: TrainLoader,
    valid_loader: ValidLoader,
    device: &SelectedDevice,
) -> EspnetV2Segmentation<TrainBackend> {
    let miou = MeanIoUMetricConfig::new(model.num_classes())
        .with_ignore_index(model.loss().ignore_index())
        .init::<SelectedBackend>();
    tracing::info!(
        learning_rate = config.learning_rate,
        "Training with the Burn learner"
    );

    let learner = LearnerBuilder::new(&config.checkpoint_path)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_valid_numeric(miou)
        .with_file_checkpointer(NamedMpkFileRecorder::<FullPrecisionSettings>::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(model, sgd(config).init(), config.learning_rate);

    learner.fit(train_loader, valid_loader)
}

fn evaluate(
    model: &EspnetV2Segmentation<SelectedBackend>,
    loader: &ValidLoader,
    ignore_index: Option<usize>,
) -> ConfusionMatrix {
    let mut matrix = ConfusionMatrix::new(model.num_classes(), ignore_index);
    for batch in loader.iter() {
        let predictions = model.predict(batch.images);
        matrix.update(predictions, batch.targets);
    }
    matrix
}

fn save_checkpoint<B: Backend>(model: &EspnetV2Segmentation<B>, path: &Path) -> Result<()> {
    model
        .clone()
        .save_file(path.to_path_buf(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
        .with_context(|| format!("Failed to save checkpoint to {}", path.display()))?;
    tracing::info!(path = %path.display(), "Checkpoint saved");
    Ok(())
}
