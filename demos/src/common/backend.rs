//! Compile-time backend for the demo binaries.
//!
//! `ndarray` (the default) runs the model on the CPU and is what the unit
//! tests and small-resolution `summary`/`inference` runs use. Training at
//! Pascal or Cityscapes resolutions needs `wgpu` or `cuda`. On multi-GPU
//! machines `ESPNET_GPU` picks the card by index.

use cfg_if::cfg_if;

/// GPU index from `ESPNET_GPU`, `0` when unset or unparsable.
#[allow(dead_code)]
fn gpu_index() -> usize {
    parse_gpu_index(std::env::var("ESPNET_GPU").ok().as_deref())
}

fn parse_gpu_index(value: Option<&str>) -> usize {
    match value.map(str::trim).map(str::parse::<usize>) {
        Some(Ok(index)) => index,
        Some(Err(_)) => {
            tracing::warn!("ESPNET_GPU is not a device index, using GPU 0");
            0
        }
        None => 0,
    }
}

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Backend of every model the binaries build.
        pub type SelectedBackend = Cuda;
        /// Device handed to `init`, loaders and batchers.
        pub type SelectedDevice = CudaDevice;

        /// The CUDA card named by `ESPNET_GPU`.
        pub fn create_device() -> SelectedDevice {
            CudaDevice { index: gpu_index() }
        }

        /// Label printed at start-up.
        pub const fn get_backend_name() -> &'static str {
            "CUDA (NVIDIA GPU)"
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        /// Backend of every model the binaries build.
        pub type SelectedBackend = Wgpu;
        /// Device handed to `init`, loaders and batchers.
        pub type SelectedDevice = WgpuDevice;

        /// The discrete adapter named by `ESPNET_GPU`, or the default adapter.
        pub fn create_device() -> SelectedDevice {
            match std::env::var("ESPNET_GPU") {
                Ok(_) => WgpuDevice::DiscreteGpu(gpu_index()),
                Err(_) => WgpuDevice::default(),
            }
        }

        /// Label printed at start-up.
        pub const fn get_backend_name() -> &'static str {
            "WGPU (GPU)"
        }
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        /// Backend of every model the binaries build.
        pub type SelectedBackend = NdArray;
        /// Device handed to `init`, loaders and batchers.
        pub type SelectedDevice = NdArrayDevice;

        /// The CPU; `ESPNET_GPU` is ignored.
        pub fn create_device() -> SelectedDevice {
            NdArrayDevice::default()
        }

        /// Label printed at start-up.
        pub const fn get_backend_name() -> &'static str {
            "NdArray (CPU)"
        }
    }
}

/// Autodiff wrapper used by `train`; the SSSR branch and both losses need gradients.
pub type TrainBackend = burn::backend::Autodiff<SelectedBackend>;
