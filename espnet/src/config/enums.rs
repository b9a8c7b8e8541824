//! Enumeration types for ESPNet configuration.

use burn::prelude::*;

/// Benchmark the decoder widths are tuned for.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum DatasetKind {
    /// PASCAL VOC 2012 (with the SBD augmented labels).
    Pascal,
    /// Cityscapes, fine annotations.
    City,
    /// MS-COCO stuff/things segmentation.
    Coco,
}

impl DatasetKind {
    /// Base width `b` of the decoder; planes are `[4b, 3b, 2b, classes]`.
    #[must_use]
    pub const fn base_dec_planes(&self) -> usize {
        match self {
            Self::Pascal | Self::City => 16,
            Self::Coco => 32,
        }
    }

    /// Number of classes of the benchmark, background included.
    #[must_use]
    pub const fn default_num_classes(&self) -> usize {
        match self {
            Self::Pascal => 21,
            Self::City => 19,
            Self::Coco => 81,
        }
    }

    /// Label value excluded from loss and metrics.
    #[must_use]
    pub const fn ignore_index(&self) -> usize {
        255
    }

    /// Lower-case name used in file and checkpoint names.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pascal => "pascal",
            Self::City => "city",
            Self::Coco => "coco",
        }
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pascal" | "voc" => Ok(Self::Pascal),
            "city" | "cityscapes" => Ok(Self::City),
            "coco" => Ok(Self::Coco),
            other => Err(format!("unknown dataset '{other}' (expected pascal, city or coco)")),
        }
    }
}
