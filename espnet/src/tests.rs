#[cfg(test)]
mod tests {
    use crate::config::{BackboneConfig, DatasetKind, DecoderConfig, ModelConfig};
    use crate::error::EspnetError;

    #[test]
    fn test_unsupported_backbone_scale() {
        let config = ModelConfig::new().with_backbone(BackboneConfig::new().with_scale(1.75));

        match config.validate() {
            Err(EspnetError::UnsupportedBackbone { reason }) => {
                assert!(reason.contains("1.75"));
            }
            _ => panic!("Expected UnsupportedBackbone error"),
        }
    }

    #[test]
    fn test_scales_without_grouped_layout_are_rejected() {
        for scale in [0.25, 0.75, 1.1] {
            let config = ModelConfig::new().with_backbone(BackboneConfig::new().with_scale(scale));
            assert!(
                matches!(config.validate(), Err(EspnetError::UnsupportedBackbone { .. })),
                "scale {scale} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_input_channels() {
        let config = ModelConfig::new().with_backbone(BackboneConfig::new().with_in_channels(0));

        match config.validate() {
            Err(EspnetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("in_channels"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_too_few_classes() {
        let config = ModelConfig::new().with_decoder(DecoderConfig::new().with_num_classes(1));

        match config.validate() {
            Err(EspnetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("num_classes must be at least 2"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_invalid_pyramid_scales() {
        let empty = ModelConfig::new().with_decoder(DecoderConfig::new().with_pyramid_scales(vec![]));
        assert!(matches!(
            empty.validate(),
            Err(EspnetError::InvalidConfiguration { .. })
        ));

        let negative =
            ModelConfig::new().with_decoder(DecoderConfig::new().with_pyramid_scales(vec![1.0, -0.5]));
        match negative.validate() {
            Err(EspnetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("-0.5"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_valid_configurations() {
        for scale in [0.5, 1.0, 1.25, 1.5, 2.0] {
            let config = ModelConfig::new().with_backbone(BackboneConfig::new().with_scale(scale));
            assert!(config.validate().is_ok(), "scale {scale} should be valid");
        }
    }

    #[test]
    fn test_dataset_presets() {
        let pascal = ModelConfig::for_dataset(DatasetKind::Pascal);
        assert_eq!(pascal.dec_planes(), [64, 48, 32, 21]);
        assert_eq!(pascal.pyramid_projection(), 10);

        let city = ModelConfig::for_dataset(DatasetKind::City);
        assert_eq!(city.dec_planes(), [64, 48, 32, 19]);
        assert_eq!(city.pyramid_projection(), 9);

        let coco = ModelConfig::for_dataset(DatasetKind::Coco);
        assert_eq!(coco.dec_planes(), [128, 96, 64, 81]);
        assert_eq!(coco.pyramid_projection(), 32);
    }

    #[test]
    fn test_dataset_from_str() {
        assert_eq!("Cityscapes".parse::<DatasetKind>(), Ok(DatasetKind::City));
        assert_eq!("voc".parse::<DatasetKind>(), Ok(DatasetKind::Pascal));
        assert!("ade20k".parse::<DatasetKind>().is_err());
    }

    #[test]
    fn test_error_display() {
        let error = EspnetError::WeightLoadingFailed {
            reason: "Checkpoint not found: espnetv2_s_2.0.pth".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to load weights: Checkpoint not found: espnetv2_s_2.0.pth"
        );
    }
}
