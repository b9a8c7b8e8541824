//! Loading PyTorch checkpoints.
//!
//! ImageNet EESPNet checkpoints (`espnetv2_s_{scale}.pth`) initialize the
//! encoder; full DSRL checkpoints initialize the whole segmentation model.
//! PyTorch `nn.Sequential` indices are renamed to the named fields used
//! here, and PReLU `weight` becomes `alpha`.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use eespnet::{EESPNet, EESPNetRecord};

use crate::{
    config::BackboneConfig,
    error::{EspnetError, EspnetResult},
    models::{EspnetV2Segmentation, EspnetV2SegmentationRecord},
};

/// Regex key remaps, applied in order.
pub const PYTORCH_KEY_REMAPS: &[(&str, &str)] = &[
    // DataParallel
    ("^module\\.(.+)", "$1"),
    // DownSampler
    ("(.+)\\.inp_reinf\\.0\\.(.+)", "$1.inp_reinf.cbr.$2"),
    ("(.+)\\.inp_reinf\\.1\\.(.+)", "$1.inp_reinf.cb.$2"),
    // tail of the ImageNet level5 ModuleList
    ("(.*)level5\\.3\\.(.+)", "${1}level5_dw.$2"),
    ("(.*)level5\\.4\\.(.+)", "${1}level5_pw.$2"),
    // EfficientPyrPool; index 1 is the parameterless shuffle
    ("(.+)\\.merge_layer\\.0\\.(.+)", "$1.merge_br.$2"),
    ("(.+)\\.merge_layer\\.2\\.(.+)", "$1.merge_cbr.$2"),
    ("(.+)\\.merge_layer\\.3\\.(.+)", "$1.merge_conv.$2"),
    // EfficientPWConv; index 0 is the global pooling
    ("(.+)\\.wt_layer\\.1\\.(.+)", "$1.wt_conv.$2"),
    // decoder BR blocks
    ("bu_br_l([2-4])\\.0\\.(.+)", "bu_br_l$1.bn.$2"),
    ("bu_br_l([2-4])\\.1\\.(.+)", "bu_br_l$1.act.$2"),
    // SSSR branch
    ("bu_dec_l([56])\\.0\\.(.+)", "bu_dec_l$1.conv_trans.$2"),
    ("bu_dec_l([56])\\.1\\.(.+)", "bu_dec_l$1.bn.$2"),
    ("bu_dec_l([56])\\.2\\.(.+)", "bu_dec_l$1.act.$2"),
    // PReLU
    ("(.*)(act|module_act)\\.weight$", "$1$2.alpha"),
];

fn load_args(path: &Path, prefix: Option<&str>) -> LoadArgs {
    let mut args = LoadArgs::new(path.to_path_buf());
    for (pattern, replacement) in PYTORCH_KEY_REMAPS {
        args = args.with_key_remap(pattern, replacement);
    }
    if let Some(prefix) = prefix {
        args = args.with_top_level_key(prefix);
    }
    args
}

fn ensure_exists(path: &Path) -> EspnetResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EspnetError::WeightLoadingFailed {
            reason: format!("Checkpoint not found: {}", path.display()),
        })
    }
}

/// Builds an encoder from an ImageNet EESPNet checkpoint.
///
/// The classification top is dropped; its keys are left unused.
pub fn load_backbone_weights<B: Backend>(
    config: &BackboneConfig,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> EspnetResult<EESPNet<B>> {
    let path = path.as_ref();
    ensure_exists(path)?;

    let record: EESPNetRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args(path, None), device)
        .map_err(|e| EspnetError::WeightLoadingFailed {
            reason: format!("{}: {e}", path.display()),
        })?;

    tracing::info!(path = %path.display(), scale = config.scale, "Loaded encoder weights");
    Ok(config.eespnet().init::<B>(device)?.load_record(record))
}

impl<B: Backend> EspnetV2Segmentation<B> {
    /// Replaces the encoder with ImageNet weights from `path`.
    pub fn with_pretrained_backbone(
        mut self,
        config: &BackboneConfig,
        path: impl AsRef<Path>,
        device: &B::Device,
    ) -> EspnetResult<Self> {
        self.base_net = load_backbone_weights(config, path, device)?;
        Ok(self)
    }
}

/// Loads a full segmentation checkpoint into `model`.
///
/// Checkpoints saved as `{"state_dict": ...}` are handled through `top_level_key`.
pub fn load_model_weights<B: Backend>(
    model: EspnetV2Segmentation<B>,
    path: impl AsRef<Path>,
    top_level_key: Option<&str>,
    device: &B::Device,
) -> EspnetResult<EspnetV2Segmentation<B>> {
    let path = path.as_ref();
    ensure_exists(path)?;

    let record: EspnetV2SegmentationRecord<B> =
        PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args(path, top_level_key), device)
            .map_err(|e| EspnetError::WeightLoadingFailed {
                reason: format!("{}: {e}", path.display()),
            })?;

    tracing::info!(path = %path.display(), "Loaded segmentation weights");
    Ok(model.load_record(record))
}

/// `<cache>/espnet-burn`, where downloaded checkpoints are expected.
pub fn default_weights_dir() -> EspnetResult<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join("espnet-burn"))
        .ok_or_else(|| EspnetError::WeightLoadingFailed {
            reason: "No cache directory on this platform".to_string(),
        })
}

/// File name of the ImageNet checkpoint for `scale`, e.g. `espnetv2_s_2.0.pth`.
pub fn backbone_checkpoint_name(scale: f32) -> String {
    format!("espnetv2_s_{scale:?}.pth")
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    #[test]
    fn test_remaps_start_with_prefix_and_end_with_prelu() {
        assert_eq!(PYTORCH_KEY_REMAPS.first().map(|r| r.0), Some("^module\\.(.+)"));
        assert!(PYTORCH_KEY_REMAPS
            .last()
            .is_some_and(|(_, to)| to.ends_with(".alpha")));
    }

    /// Applies the configured remaps in order, as the PyTorch recorder does.
    fn remap(key: &str) -> String {
        let mut name = key.to_string();
        for (pattern, replacement) in load_args(Path::new("espnetv2.pth"), None).key_remap {
            if pattern.is_match(&name) {
                name = pattern.replace_all(&name, replacement.as_str()).to_string();
            }
        }
        name
    }

    #[test]
    fn test_segmentation_keys_map_to_record_paths() {
        let cases = [
            ("bu_br_l2.1.weight", "bu_br_l2.act.alpha"),
            ("bu_br_l4.0.running_var", "bu_br_l4.bn.running_var"),
            ("bu_dec_l1.merge_layer.3.bias", "bu_dec_l1.merge_conv.bias"),
            ("bu_dec_l2.merge_layer.0.bn.weight", "bu_dec_l2.merge_br.bn.weight"),
            ("bu_dec_l2.merge_layer.0.act.weight", "bu_dec_l2.merge_br.act.alpha"),
            ("bu_dec_l3.merge_layer.2.conv.weight", "bu_dec_l3.merge_cbr.conv.weight"),
            ("bu_dec_l4.projection_layer.act.weight", "bu_dec_l4.projection_layer.act.alpha"),
            ("bu_dec_l4.stages.2.weight", "bu_dec_l4.stages.2.weight"),
            ("bu_dec_l4.br.act.weight", "bu_dec_l4.br.act.alpha"),
            ("merge_enc_dec_l2.wt_layer.1.weight", "merge_enc_dec_l2.wt_conv.weight"),
            (
                "merge_enc_dec_l3.expansion_layer.bn.running_mean",
                "merge_enc_dec_l3.expansion_layer.bn.running_mean",
            ),
            (
                "base_net.level2_0.inp_reinf.0.conv.weight",
                "base_net.level2_0.inp_reinf.cbr.conv.weight",
            ),
            (
                "base_net.level3_0.inp_reinf.1.bn.bias",
                "base_net.level3_0.inp_reinf.cb.bn.bias",
            ),
            ("base_net.level2_0.act.weight", "base_net.level2_0.act.alpha"),
            (
                "base_net.level4.6.module_act.weight",
                "base_net.level4.6.module_act.alpha",
            ),
            (
                "base_net.level3.1.br_after_cat.act.weight",
                "base_net.level3.1.br_after_cat.act.alpha",
            ),
            ("base_net.level3.2.spp_dw.3.conv.weight", "base_net.level3.2.spp_dw.3.conv.weight"),
            ("bu_dec_l5.0.weight", "bu_dec_l5.conv_trans.weight"),
            ("bu_dec_l5.1.running_mean", "bu_dec_l5.bn.running_mean"),
            ("bu_dec_l6.2.weight", "bu_dec_l6.act.alpha"),
        ];
        for (key, expected) in cases {
            assert_eq!(remap(key), expected, "{key}");
        }
    }

    #[test]
    fn test_data_parallel_prefix_is_stripped() {
        assert_eq!(remap("module.bu_dec_l5.0.weight"), "bu_dec_l5.conv_trans.weight");
        assert_eq!(remap("module.bu_br_l3.1.weight"), "bu_br_l3.act.alpha");
        assert_eq!(
            remap("module.base_net.level1.conv.weight"),
            "base_net.level1.conv.weight"
        );
    }

    #[test]
    fn test_imagenet_keys_map_to_record_paths() {
        assert_eq!(remap("level5.3.conv.weight"), "level5_dw.conv.weight");
        assert_eq!(remap("level5.4.act.weight"), "level5_pw.act.alpha");
        assert_eq!(remap("level5.2.proj_1x1.bn.weight"), "level5.2.proj_1x1.bn.weight");
        assert_eq!(remap("level5_0.eesp.module_act.weight"), "level5_0.eesp.module_act.alpha");
        assert_eq!(remap("level1.act.weight"), "level1.act.alpha");
        assert_eq!(remap("classifier.weight"), "classifier.weight");
    }

    #[test]
    fn test_backbone_checkpoint_name() {
        assert_eq!(backbone_checkpoint_name(2.0), "espnetv2_s_2.0.pth");
        assert_eq!(backbone_checkpoint_name(0.5), "espnetv2_s_0.5.pth");
        assert_eq!(backbone_checkpoint_name(1.25), "espnetv2_s_1.25.pth");
    }

    #[test]
    fn test_missing_checkpoint() {
        let result = load_backbone_weights::<NdArray>(
            &BackboneConfig::new(),
            "/nonexistent/espnetv2_s_2.0.pth",
            &Default::default(),
        );
        match result {
            Err(EspnetError::WeightLoadingFailed { reason }) => {
                assert!(reason.contains("not found"));
            }
            _ => panic!("Expected WeightLoadingFailed"),
        }
    }
}
