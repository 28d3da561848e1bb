use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{CompactRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::Backend,
};
use tracing::info;

use crate::error::{CflError, Result};
use crate::models::cfl::EfficientCfl;
use crate::models::efficientnet::{EfficientNet, EfficientNetRecord};

/// Supplies pretrained encoder records by variant name.
pub trait WeightSource<B: Backend> {
    fn load(&self, name: &str, advprop: bool, device: &B::Device) -> Result<EfficientNetRecord<B>>;
}

/// Reads `<dir>/<name>.mpk`, or `<dir>/<name>-advprop.mpk` for AdvProp weights.
#[derive(Debug, Clone)]
pub struct FileWeightSource {
    dir: PathBuf,
}

impl FileWeightSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record path without the extension the recorder appends.
    pub fn record_path(&self, name: &str, advprop: bool) -> PathBuf {
        if advprop {
            self.dir.join(format!("{name}-advprop"))
        } else {
            self.dir.join(name)
        }
    }
}

impl<B: Backend> WeightSource<B> for FileWeightSource {
    fn load(&self, name: &str, advprop: bool, device: &B::Device) -> Result<EfficientNetRecord<B>> {
        let path = self.record_path(name, advprop);
        info!("loading pretrained weights from {}.mpk", path.display());

        NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .load(path, device)
            .map_err(|e| CflError::Record(format!("{e:?}")))
    }
}

/// Loads a pretrained record into the encoder.
///
/// # Arguments
///
/// * `model` - Freshly built encoder of the variant the record was saved from.
/// * `record` - Pretrained encoder record.
/// * `load_fc` - Take the classifier from the record too. With `false` the classifier
///   keeps its fresh initialization, so the record may come from a model trained for a
///   different number of classes.
///
/// # Errors
///
/// `WeightMismatch` when the classifier (with `load_fc`), the stem, the block count or
/// the parameter count differ between the record and the model.
pub fn load_pretrained_weights<B: Backend>(
    model: EfficientNet<B>,
    record: EfficientNetRecord<B>,
    load_fc: bool,
) -> Result<EfficientNet<B>> {
    let mut record = record;

    if load_fc {
        let expected = model.fc.weight.val().dims();
        let found = record.fc.weight.val().dims();
        if expected != found {
            return Err(CflError::WeightMismatch(format!(
                "classifier weight is {found:?} in the record but {expected:?} in the model; \
                 disable load_fc to keep a freshly initialized classifier"
            )));
        }
    } else {
        record.fc = model.fc.clone().into_record();
    }

    let expected = model.conv_stem.conv.weight.val().dims();
    let found = record.conv_stem.conv.weight.val().dims();
    if expected != found {
        return Err(CflError::WeightMismatch(format!(
            "stem weight is {found:?} in the record but {expected:?} in the model"
        )));
    }

    let num_params = model.num_params();
    let num_blocks = model.blocks.len();
    let record_blocks = record.blocks.len();
    if num_blocks != record_blocks {
        return Err(CflError::WeightMismatch(format!(
            "the record holds {record_blocks} blocks, the model has {num_blocks}"
        )));
    }

    let model = model.load_record(record);
    if model.num_params() != num_params {
        return Err(CflError::WeightMismatch(format!(
            "the record holds {} parameters, the model has {num_params}",
            model.num_params()
        )));
    }

    info!(
        "loaded pretrained weights, {num_params} parameters{}",
        if load_fc { "" } else { ", classifier left untrained" }
    );
    Ok(model)
}

/// Saves the whole network (encoder and decoder) with the compact recorder.
pub fn save_checkpoint<B: Backend>(model: &EfficientCfl<B>, path: &Path) -> Result<()> {
    model
        .clone()
        .save_file(path.to_path_buf(), &CompactRecorder::new())
        .map_err(|e| CflError::Record(format!("{e:?}")))?;
    info!("saved checkpoint to {}", path.display());
    Ok(())
}

/// Restores a network saved by [`save_checkpoint`] into `model`.
///
/// `model` must be built for the same variant, padding mode and convolution type as the
/// saved one, since the record only carries parameters.
pub fn load_checkpoint<B: Backend>(
    model: EfficientCfl<B>,
    path: &Path,
    device: &B::Device,
) -> Result<EfficientCfl<B>> {
    let model = model
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| CflError::Record(format!("{e:?}")))?;
    info!("loaded checkpoint from {}", path.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conv::ConvType;
    use crate::models::registry::{ParamOverrides, model_params};
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Distribution, Tensor, Tolerance, ops::FloatElem};

    type B = NdArray<f32>;
    type FT = FloatElem<B>;

    fn b0(num_classes: usize) -> EfficientNet<B> {
        let overrides = ParamOverrides::new()
            .with_num_classes(Some(num_classes))
            .with_dynamic_padding(Some(true));
        let (blocks, params) = model_params("efficientnet-b0", Some(&overrides)).unwrap();
        EfficientNet::new(&blocks, params, ConvType::Standard, &NdArrayDevice::default()).unwrap()
    }

    #[test]
    fn test_record_path() {
        let source = FileWeightSource::new("weights");
        assert_eq!(
            source.record_path("efficientnet-b3", false),
            PathBuf::from("weights/efficientnet-b3")
        );
        assert_eq!(
            source.record_path("efficientnet-b3", true),
            PathBuf::from("weights/efficientnet-b3-advprop")
        );
    }

    #[test]
    fn test_missing_file_is_record_error() {
        let source = FileWeightSource::new("/nonexistent/weights");
        let result: Result<EfficientNetRecord<B>> =
            source.load("efficientnet-b0", false, &NdArrayDevice::default());
        assert!(matches!(result, Err(CflError::Record(_))));
    }

    #[test]
    fn test_load_copies_weights() {
        let device = &NdArrayDevice::default();
        let pretrained = b0(1000);
        let model = load_pretrained_weights(b0(1000), pretrained.clone().into_record(), true).unwrap();

        let x = Tensor::<B, 4>::random([1, 3, 32, 32], Distribution::Default, device);
        let expected = pretrained.extract_features(x.clone()).unwrap().head;
        let found = model.extract_features(x).unwrap().head;
        expected
            .into_data()
            .assert_approx_eq::<FT>(&found.into_data(), Tolerance::default());
    }

    #[test]
    fn test_custom_classes_without_fc() {
        let model = load_pretrained_weights(b0(10), b0(1000).into_record(), false).unwrap();
        assert_eq!(model.fc.weight.val().dims(), [1280, 10]);
    }

    #[test]
    fn test_custom_classes_with_fc_is_mismatch() {
        let result = load_pretrained_weights(b0(10), b0(1000).into_record(), true);
        assert!(matches!(result, Err(CflError::WeightMismatch(_))));
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let device = &NdArrayDevice::default();
        let overrides = ParamOverrides::new().with_dynamic_padding(Some(true));
        let trained: EfficientCfl<B> =
            EfficientCfl::from_name("efficientnet-b0", ConvType::Standard, Some(&overrides), device)
                .unwrap();
        let path = std::env::temp_dir().join(format!("efficient-cfl-ckpt-{}", std::process::id()));

        save_checkpoint(&trained, &path).unwrap();
        let fresh: EfficientCfl<B> =
            EfficientCfl::from_name("efficientnet-b0", ConvType::Standard, Some(&overrides), device)
                .unwrap();
        let restored = load_checkpoint(fresh, &path, device).unwrap();
        std::fs::remove_file(path.with_extension("mpk")).unwrap();

        // the compact recorder stores half precision
        let stem = |model: &EfficientCfl<B>| model.encoder().conv_stem.conv.weight.val().into_data();
        stem(&trained).assert_approx_eq::<FT>(&stem(&restored), Tolerance::absolute(1e-2));
    }

    #[test]
    fn test_other_variant_is_mismatch() {
        let (blocks, params) = model_params("efficientnet-b2", None).unwrap();
        let b2: EfficientNet<B> = EfficientNet::new(
            &blocks,
            params.with_image_size(None),
            ConvType::Standard,
            &NdArrayDevice::default(),
        )
        .unwrap();

        let result = load_pretrained_weights(b0(1000), b2.into_record(), false);
        assert!(matches!(result, Err(CflError::WeightMismatch(_))));
    }
}
