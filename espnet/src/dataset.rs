//! Segmentation datasets for the DSRL training setup.
//!
//! Every item pairs a low-resolution RGB input with a label map at twice
//! its resolution; the SSSR branch learns to recover the difference.
//! Supported layouts:
//!
//! - Pascal VOC: `JPEGImages/`, `SegmentationClassAug/` and the
//!   `ImageSets/Segmentation/{split}.txt` id list.
//! - Cityscapes: `leftImg8bit/{split}/**/*_leftImg8bit.png` with labels at
//!   `gtFine/{split}/**/*_gtFine_labelTrainIds.png`.
//! - COCO (converted to class maps): `images/{split}/` and `annotations/{split}/`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use image::{imageops::FilterType, DynamicImage};
use walkdir::WalkDir;

use crate::{
    config::DatasetKind,
    error::{EspnetError, EspnetResult},
};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "JPG"];
/// Label written for samples that fail to decode after the scan.
const IGNORE_LABEL: i64 = 255;

/// One preprocessed sample.
#[derive(Debug, Clone)]
pub struct SegmentationItem<B: Backend> {
    /// Normalized RGB input, `[3, height / 2, width / 2]`.
    pub image: Tensor<B, 3>,
    /// Class map, `[height, width]`.
    pub target: Tensor<B, 2, Int>,
}

/// A stacked batch of [`SegmentationItem`]s.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch, 3, height / 2, width / 2]`
    pub images: Tensor<B, 4>,
    /// `[batch, height, width]`
    pub targets: Tensor<B, 3, Int>,
}

#[derive(Clone, Default)]
pub struct SegmentationBatcher<B: Backend> {
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SegmentationItem<B>, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem<B>>, device: &B::Device) -> SegmentationBatch<B> {
        let (images, targets): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image.to_device(device), item.target.to_device(device)))
            .unzip();

        SegmentationBatch {
            images: Tensor::stack(images, 0),
            targets: Tensor::stack(targets, 0),
        }
    }
}

/// Image/label pairs on disk, decoded lazily in [`Dataset::get`].
pub struct SegmentationDataset<B: Backend> {
    items: Vec<(PathBuf, PathBuf)>,
    /// Label resolution as `(width, height)`.
    label_size: (u32, u32),
    device: B::Device,
}

impl<B: Backend> SegmentationDataset<B> {
    /// Scans `root` for the `split` of a dataset laid out as `kind` expects.
    ///
    /// `label_size` is `[height, width]`; inputs are loaded at half of it.
    pub fn new(
        root: impl AsRef<Path>,
        kind: DatasetKind,
        split: &str,
        label_size: [usize; 2],
        device: &B::Device,
    ) -> EspnetResult<Self> {
        let root = root.as_ref();
        let items = match kind {
            DatasetKind::Pascal => collect_pascal(root, split)?,
            DatasetKind::City => collect_city(root, split)?,
            DatasetKind::Coco => collect_coco(root, split)?,
        };

        let dataset = Self::from_pairs(items, label_size, device)?;
        if dataset.items.is_empty() {
            return Err(EspnetError::DatasetError {
                message: format!(
                    "No readable image/label pairs found for split '{split}' in {}",
                    root.display()
                ),
            });
        }

        tracing::info!(
            dataset = kind.name(),
            split,
            pairs = dataset.items.len(),
            root = %root.display(),
            "Collected dataset"
        );
        Ok(dataset)
    }

    /// Wraps explicit image/label pairs, dropping pairs whose headers do not decode.
    pub fn from_pairs(
        items: Vec<(PathBuf, PathBuf)>,
        label_size: [usize; 2],
        device: &B::Device,
    ) -> EspnetResult<Self> {
        let [height, width] = label_size;
        if height < 2 || width < 2 || height % 2 != 0 || width % 2 != 0 {
            return Err(EspnetError::DatasetError {
                message: format!("Label size must be even and at least 2, got {height}x{width}"),
            });
        }

        let scanned = items.len();
        let items: Vec<_> = items.into_iter().filter(is_readable_pair).collect();
        if items.len() < scanned {
            tracing::warn!(
                dropped = scanned - items.len(),
                kept = items.len(),
                "Skipped unreadable image/label pairs"
            );
        }

        Ok(Self {
            items,
            label_size: (width as u32, height as u32),
            device: device.clone(),
        })
    }

    /// Image/label paths of every sample.
    pub fn pairs(&self) -> &[(PathBuf, PathBuf)] {
        &self.items
    }

    fn load(&self, image: DynamicImage, label: DynamicImage) -> SegmentationItem<B> {
        let (width, height) = self.label_size;
        let image = image.resize_exact(width / 2, height / 2, FilterType::Triangle);
        let label = label.resize_exact(width, height, FilterType::Nearest);

        SegmentationItem {
            image: normalize_tensor(image_to_tensor(&image, &self.device)),
            target: label_to_tensor(&label, &self.device),
        }
    }

    /// Sample that contributes nothing to the loss.
    fn ignored(&self) -> SegmentationItem<B> {
        let (width, height) = self.label_size;
        let (width, height) = (width as usize, height as usize);
        SegmentationItem {
            image: Tensor::zeros([3, height / 2, width / 2], &self.device),
            target: Tensor::full([height, width], IGNORE_LABEL, &self.device),
        }
    }
}

fn is_readable_pair((image_path, label_path): &(PathBuf, PathBuf)) -> bool {
    [image_path, label_path].into_iter().all(|path| match image::image_dimensions(path) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable file");
            false
        }
    })
}

impl<B: Backend> Dataset<SegmentationItem<B>> for SegmentationDataset<B> {
    /// Returns `None` only past the end; the data loader stops at the first `None`.
    fn get(&self, index: usize) -> Option<SegmentationItem<B>> {
        let (image_path, label_path) = self.items.get(index)?;

        let decoded = image::open(image_path)
            .and_then(|input| image::open(label_path).map(|target| (input, target)));
        match decoded {
            Ok((image, label)) => Some(self.load(image, label)),
            Err(e) => {
                tracing::warn!(
                    image = %image_path.display(),
                    label = %label_path.display(),
                    error = %e,
                    "Failed to decode, using an ignored sample"
                );
                Some(self.ignored())
            }
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// RGB image as a `[3, H, W]` tensor in `[0, 1]`.
pub fn image_to_tensor<B: Backend>(image: &DynamicImage, device: &B::Device) -> Tensor<B, 3> {
    let image = image.to_rgb32f();
    let (width, height) = image.dimensions();
    let data = TensorData::new(image.into_raw(), [height as usize, width as usize, 3]);
    Tensor::<B, 3>::from_data(data, device).permute([2, 0, 1])
}

/// Applies ImageNet mean/std normalization to a `[3, H, W]` tensor.
pub fn normalize_tensor<B: Backend>(tensor: Tensor<B, 3>) -> Tensor<B, 3> {
    let device = tensor.device();
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([3, 1, 1]);
    (tensor - mean) / std
}

/// Single-channel label image as a `[H, W]` class map.
pub fn label_to_tensor<B: Backend>(label: &DynamicImage, device: &B::Device) -> Tensor<B, 2, Int> {
    let label = label.to_luma8();
    let (width, height) = label.dimensions();
    let values: Vec<i64> = label.into_raw().into_iter().map(i64::from).collect();
    Tensor::from_data(
        TensorData::new(values, [height as usize, width as usize]),
        device,
    )
}

fn require_dir(path: &Path) -> EspnetResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(EspnetError::DatasetError {
            message: format!("Directory does not exist: {}", path.display()),
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
}

fn collect_pascal(root: &Path, split: &str) -> EspnetResult<Vec<(PathBuf, PathBuf)>> {
    let images = root.join("JPEGImages");
    let labels = root.join("SegmentationClassAug");
    require_dir(&images)?;
    require_dir(&labels)?;

    let list = root
        .join("ImageSets")
        .join("Segmentation")
        .join(format!("{split}.txt"));
    let ids = fs::read_to_string(&list).map_err(|e| EspnetError::DatasetError {
        message: format!("Failed to read split list {}: {e}", list.display()),
    })?;

    let mut items = Vec::new();
    for id in ids.lines().map(str::trim).filter(|id| !id.is_empty()) {
        let image = images.join(format!("{id}.jpg"));
        let label = labels.join(format!("{id}.png"));
        if image.is_file() && label.is_file() {
            items.push((image, label));
        } else {
            tracing::warn!(id, "Missing image or label, skipping");
        }
    }
    Ok(items)
}

/// Cityscapes train-id label path for a `*_leftImg8bit.png` image under `images_root`.
pub fn city_label_path(image: &Path, images_root: &Path, labels_root: &Path) -> Option<PathBuf> {
    let relative = image.strip_prefix(images_root).ok()?;
    let file_name = relative.file_name()?.to_str()?;
    let stem = file_name.strip_suffix("_leftImg8bit.png")?;
    let label_name = format!("{stem}_gtFine_labelTrainIds.png");
    Some(labels_root.join(relative.with_file_name(label_name)))
}

fn collect_city(root: &Path, split: &str) -> EspnetResult<Vec<(PathBuf, PathBuf)>> {
    let images = root.join("leftImg8bit").join(split);
    let labels = root.join("gtFine").join(split);
    require_dir(&images)?;
    require_dir(&labels)?;

    let mut items: Vec<_> = WalkDir::new(&images)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let image = entry.into_path();
            let label = city_label_path(&image, &images, &labels)?;
            if label.is_file() {
                Some((image, label))
            } else {
                tracing::warn!(image = %image.display(), "No train-id label, skipping");
                None
            }
        })
        .collect();
    items.sort();
    Ok(items)
}

fn collect_coco(root: &Path, split: &str) -> EspnetResult<Vec<(PathBuf, PathBuf)>> {
    let images = root.join("images").join(split);
    let labels = root.join("annotations").join(split);
    require_dir(&images)?;
    require_dir(&labels)?;

    let entries = fs::read_dir(&images).map_err(|e| EspnetError::DatasetError {
        message: format!("Failed to read image directory: {e}"),
    })?;

    let mut items = Vec::new();
    for entry in entries {
        let image = entry
            .map_err(|e| EspnetError::DatasetError {
                message: format!("Failed to read directory entry: {e}"),
            })?
            .path();
        if !image.is_file() || !has_image_extension(&image) {
            continue;
        }
        let Some(stem) = image.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let label = labels.join(format!("{stem}.png"));
        if label.is_file() {
            items.push((image, label));
        } else {
            tracing::warn!(image = %image.display(), "No label found, skipping");
        }
    }
    items.sort();
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, data::dataloader::DataLoaderBuilder};
    use image::{GrayImage, Luma, Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("espnet-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_batcher_stacks_items() {
        let device = Default::default();
        let batcher = SegmentationBatcher::<TestBackend>::new();
        let item = SegmentationItem {
            image: Tensor::<TestBackend, 3>::zeros([3, 16, 16], &device),
            target: Tensor::<TestBackend, 2, Int>::zeros([32, 32], &device),
        };

        let batch = batcher.batch(vec![item.clone(), item], &device);
        assert_eq!(batch.images.dims(), [2, 3, 16, 16]);
        assert_eq!(batch.targets.dims(), [2, 32, 32]);
    }

    #[test]
    fn test_normalize_tensor() {
        let device = Default::default();
        let ones = Tensor::<TestBackend, 3>::ones([3, 1, 1], &device);
        let values: Vec<f32> = normalize_tensor(ones).into_data().to_vec().unwrap();
        for (c, value) in values.iter().enumerate() {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((value - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_label_to_tensor_keeps_values() {
        let device = Default::default();
        let label = DynamicImage::ImageLuma8(GrayImage::from_fn(2, 1, |x, _| {
            Luma([if x == 0 { 3 } else { 255 }])
        }));
        let values: Vec<i64> = label_to_tensor::<TestBackend>(&label, &device)
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(values, vec![3, 255]);
    }

    #[test]
    fn test_city_label_path() {
        let images = Path::new("/data/leftImg8bit/val");
        let labels = Path::new("/data/gtFine/val");
        let image = images.join("frankfurt/frankfurt_000000_000294_leftImg8bit.png");

        let label = city_label_path(&image, images, labels).unwrap();
        assert_eq!(
            label,
            labels.join("frankfurt/frankfurt_000000_000294_gtFine_labelTrainIds.png")
        );
        assert!(city_label_path(&images.join("notes.txt"), images, labels).is_none());
    }

    #[test]
    fn test_coco_layout_round_trip() {
        let root = scratch_dir("coco");
        let images = root.join("images").join("val");
        let labels = root.join("annotations").join("val");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();

        RgbImage::from_pixel(12, 10, Rgb([128, 64, 32]))
            .save(images.join("a.png"))
            .unwrap();
        GrayImage::from_pixel(24, 20, Luma([7]))
            .save(labels.join("a.png"))
            .unwrap();
        // unlabelled images are skipped
        RgbImage::new(4, 4).save(images.join("b.png")).unwrap();

        let device = Default::default();
        let dataset =
            SegmentationDataset::<TestBackend>::new(&root, DatasetKind::Coco, "val", [8, 16], &device)
                .unwrap();
        assert_eq!(dataset.len(), 1);

        let item = dataset.get(0).unwrap();
        assert_eq!(item.image.dims(), [3, 4, 8]);
        assert_eq!(item.target.dims(), [8, 16]);
        let max: i64 = item.target.max().into_scalar();
        assert_eq!(max, 7);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_layout_is_an_error() {
        let root = scratch_dir("missing");
        let result =
            SegmentationDataset::<TestBackend>::new(&root, DatasetKind::Pascal, "train", [8, 8], &Default::default());
        match result {
            Err(EspnetError::DatasetError { message }) => {
                assert!(message.contains("JPEGImages"));
            }
            _ => panic!("Expected DatasetError"),
        }
        fs::remove_dir_all(&root).unwrap();
    }

    fn write_pair(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
        let image = dir.join(format!("{name}.png"));
        let label = dir.join(format!("{name}_label.png"));
        RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])).save(&image).unwrap();
        GrayImage::from_pixel(16, 16, Luma([1])).save(&label).unwrap();
        (image, label)
    }

    #[test]
    fn test_unreadable_pairs_do_not_cut_the_epoch_short() {
        let root = scratch_dir("corrupt");
        let mut pairs: Vec<_> = (0..4).map(|i| write_pair(&root, &format!("s{i}"))).collect();
        fs::write(&pairs[1].0, b"not an image").unwrap();
        pairs.sort();

        let device = Default::default();
        let dataset =
            SegmentationDataset::<TestBackend>::from_pairs(pairs, [16, 16], &device).unwrap();
        assert_eq!(dataset.len(), 3);
        assert!((0..dataset.len()).all(|i| dataset.get(i).is_some()));

        let loader = DataLoaderBuilder::new(SegmentationBatcher::<TestBackend>::new())
            .batch_size(1)
            .build(dataset);
        assert_eq!(loader.iter().count(), 3);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_file_broken_after_scan_yields_ignored_sample() {
        let root = scratch_dir("broken-later");
        let pair = write_pair(&root, "a");

        let device = Default::default();
        let dataset =
            SegmentationDataset::<TestBackend>::from_pairs(vec![pair.clone()], [16, 16], &device)
                .unwrap();
        fs::write(&pair.1, b"truncated").unwrap();

        let item = dataset.get(0).expect("index below len");
        assert_eq!(item.image.dims(), [3, 8, 8]);
        let min: i64 = item.target.min().into_scalar();
        assert_eq!(min, IGNORE_LABEL);
        assert!(dataset.get(1).is_none());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_odd_label_size_rejected() {
        let result = SegmentationDataset::<TestBackend>::from_pairs(vec![], [7, 8], &Default::default());
        assert!(matches!(result, Err(EspnetError::DatasetError { .. })));
    }
}
