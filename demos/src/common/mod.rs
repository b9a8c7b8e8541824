//! Shared utilities for the demo binaries.

pub mod backend;
pub mod imaging;
pub mod postprocessing;

pub use backend::{create_device, get_backend_name, SelectedBackend, SelectedDevice, TrainBackend};
pub use imaging::ImageUtils;
pub use postprocessing::{class_map_to_image, overlay, pascal_palette, tensor_to_class_maps, ClassMap};

use tracing_subscriber::EnvFilter;

/// Installs the `fmt` subscriber; `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
