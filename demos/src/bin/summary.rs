//! Model Summary
//!
//! Prints the module tree, the parameter count of every learning-rate group
//! and the tensor shape after each stage for a given input size.
//!
//! ```bash
//! cargo run --bin summary -- --scale 2.0 --dataset city --height 512 --width 1024
//! ```

use anyhow::{Context, Result};
use burn::{module::Module, prelude::*};
use clap::Parser;
use espnet_burn::{
    BackboneConfig, DatasetKind, EspnetV2SegConfig, ModelConfig, ParamGroup, SssrConfig,
};
use espnet_demos::{create_device, get_backend_name, init_logging, SelectedBackend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Encoder scale
    #[arg(long, default_value_t = 2.0)]
    scale: f32,

    /// Dataset preset (pascal, city, coco)
    #[arg(long, default_value = "pascal")]
    dataset: String,

    /// Input height
    #[arg(long, default_value_t = 256)]
    height: usize,

    /// Input width
    #[arg(long, default_value_t = 256)]
    width: usize,

    /// Build without the SSSR branch
    #[arg(long)]
    no_sssr: bool,

    /// Print the full module tree
    #[arg(long)]
    tree: bool,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let dataset = args
        .dataset
        .parse::<DatasetKind>()
        .map_err(anyhow::Error::msg)?;
    let config = ModelConfig::for_dataset(dataset)
        .with_backbone(BackboneConfig::new().with_scale(args.scale))
        .with_sssr(SssrConfig::new().with_enabled(!args.no_sssr));

    let device = create_device();
    let model = EspnetV2SegConfig::new(config)
        .init::<SelectedBackend>(&device)
        .context("Failed to initialize model")?;

    println!("Backend: {}", get_backend_name());
    if args.tree {
        println!("{model}");
    }

    println!("\nParameters");
    for group in &ParamGroup::ALL {
        println!("  {:<16} {:>10}", format!("{group:?}"), model.num_params_in(group));
    }
    println!("  {:<16} {:>10}", "Total", model.num_params());

    let input = Tensor::<SelectedBackend, 4>::zeros([1, 3, args.height, args.width], &device);
    let features = model.forward_features(input);

    println!("\nShapes for input [1, 3, {}, {}]", args.height, args.width);
    for (i, tensor) in features.encoder.iter().enumerate() {
        println!("  encoder level {}   {:?}", i + 1, tensor.dims());
    }
    for (i, tensor) in features.decoder.iter().enumerate() {
        println!("  decoder stage {}   {:?}", i + 1, tensor.dims());
    }
    if let Some(hidden) = &features.sssr_hidden {
        println!("  sssr hidden       {:?}", hidden.dims());
    }
    println!("  output            {:?}", features.output.dims());

    Ok(())
}
