//! Image loading for inference.

use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor};
use espnet_burn::dataset::{image_to_tensor, normalize_tensor};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Encoder input sides must be multiples of this.
const SIZE_MULTIPLE: u32 = 16;

pub struct ImageUtils;

impl ImageUtils {
    /// Loads an image and prepares it as a normalized `[1, 3, H, W]` network input.
    ///
    /// With `input_size = Some((width, height))` the image is resized to that
    /// size; otherwise each side is rounded to the nearest multiple of 16.
    /// The decoded image is returned alongside for overlays.
    pub fn load_image<B: Backend, P: AsRef<Path>>(
        path: P,
        input_size: Option<(u32, u32)>,
        device: &B::Device,
    ) -> Result<(Tensor<B, 4>, DynamicImage)> {
        let img = image::open(&path)
            .with_context(|| format!("Failed to open image at {}", path.as_ref().display()))?;

        let (width, height) = input_size.unwrap_or_else(|| {
            let (w, h) = img.dimensions();
            (Self::round_to_multiple(w), Self::round_to_multiple(h))
        });
        let resized = img.resize_exact(width, height, FilterType::Triangle);

        Ok((Self::dynamic_image_to_tensor(&resized, device), img))
    }

    /// `[1, 3, H, W]` ImageNet-normalized tensor.
    pub fn dynamic_image_to_tensor<B: Backend>(img: &DynamicImage, device: &B::Device) -> Tensor<B, 4> {
        normalize_tensor(image_to_tensor(img, device)).unsqueeze::<4>()
    }

    /// Nearest multiple of 16, at least 16.
    pub fn round_to_multiple(side: u32) -> u32 {
        let rounded = (side + SIZE_MULTIPLE / 2) / SIZE_MULTIPLE * SIZE_MULTIPLE;
        rounded.max(SIZE_MULTIPLE)
    }

    /// Image files directly inside `dir`, sorted by name.
    pub fn collect_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        let mut image_paths = Vec::new();
        for entry in entries {
            let path = entry.context("Failed to read directory entry")?.path();
            if !path.is_file() {
                continue;
            }
            let is_image = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png"));
            if is_image {
                image_paths.push(path);
            }
        }

        image_paths.sort();
        Ok(image_paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::RgbImage;

    type TestBackend = NdArray<f32>;

    #[test]
    fn round_to_multiple_snaps_to_sixteen() {
        assert_eq!(ImageUtils::round_to_multiple(1), 16);
        assert_eq!(ImageUtils::round_to_multiple(500), 496);
        assert_eq!(ImageUtils::round_to_multiple(504), 512);
        assert_eq!(ImageUtils::round_to_multiple(512), 512);
    }

    #[test]
    fn dynamic_image_to_tensor_has_batch_dimension() {
        let device = Default::default();
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 4));

        let tensor = ImageUtils::dynamic_image_to_tensor::<TestBackend>(&img, &device);
        assert_eq!(tensor.dims(), [1, 3, 4, 8]);
    }

    #[test]
    fn collect_image_files_missing_dir_returns_error() {
        let result = ImageUtils::collect_image_files(Path::new("/nonexistent/images"));
        assert!(result.is_err());
    }
}
