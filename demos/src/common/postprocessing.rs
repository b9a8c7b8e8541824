//! Turning class predictions into images.

use anyhow::{ensure, Context, Result};
use burn::{
    prelude::*,
    tensor::{backend::Backend, Int},
};
use image::{GrayImage, Rgb, RgbImage};

/// Per-pixel class indices, one byte per pixel.
pub type ClassMap = GrayImage;

/// The Pascal VOC colour map with 256 entries.
///
/// Class `i` spreads the bits of `i` over the high bits of the three channels,
/// so class 1 is dark red, 2 dark green, 3 olive and so on.
pub fn pascal_palette() -> Vec<[u8; 3]> {
    (0..256u32)
        .map(|class| {
            let mut rgb = [0u8; 3];
            let mut c = class;
            for shift in (0..8).rev() {
                for (channel, value) in rgb.iter_mut().enumerate() {
                    *value |= (((c >> channel) & 1) as u8) << shift;
                }
                c >>= 3;
            }
            rgb
        })
        .collect()
}

/// Splits an `[N, H, W]` prediction into one [`ClassMap`] per image.
pub fn tensor_to_class_maps<B: Backend>(classes: Tensor<B, 3, Int>) -> Result<Vec<ClassMap>> {
    let [batch, height, width] = classes.dims();
    let values: Vec<u8> = classes
        .into_data()
        .iter::<i64>()
        .map(|class| class.clamp(0, 255) as u8)
        .collect();
    ensure!(
        values.len() == batch * height * width,
        "Prediction has {} values, expected {batch}x{height}x{width}",
        values.len()
    );

    values
        .chunks_exact(height * width)
        .map(|chunk| {
            GrayImage::from_raw(width as u32, height as u32, chunk.to_vec())
                .context("Failed to create class map buffer")
        })
        .collect()
}

/// Colours every pixel with the palette entry of its class.
pub fn class_map_to_image(classes: &ClassMap, palette: &[[u8; 3]]) -> RgbImage {
    RgbImage::from_fn(classes.width(), classes.height(), |x, y| {
        let class = classes.get_pixel(x, y).0[0] as usize;
        Rgb(palette.get(class).copied().unwrap_or([255, 255, 255]))
    })
}

/// Alpha-blends `mask` over `base`; both must have the same size.
pub fn overlay(base: &RgbImage, mask: &RgbImage, alpha: f32) -> Result<RgbImage> {
    ensure!(
        base.dimensions() == mask.dimensions(),
        "Overlay size mismatch: image={:?}, mask={:?}",
        base.dimensions(),
        mask.dimensions()
    );
    let alpha = alpha.clamp(0.0, 1.0);

    Ok(RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let b = base.get_pixel(x, y).0;
        let m = mask.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            (f32::from(b[c]) * (1.0 - alpha) + f32::from(m[c]) * alpha).round() as u8
        }))
    }))
}
