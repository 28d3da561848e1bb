use burn::{
    module::Module,
    tensor::{Tensor, backend::Backend},
};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::conv::ConvType;
use crate::models::decoder::{LikelihoodMaps, MultiScaleDecoder};
use crate::models::efficientnet::EfficientNet;
use crate::models::params::{BlockArgs, GlobalParams};
use crate::models::registry::{self, ParamOverrides, model_params};
use crate::torch_ops::resize_bilinear_aligned;
use crate::weights::{WeightSource, load_pretrained_weights};

/// Number of classes of the ImageNet classifier shipped with pretrained records.
pub const IMAGENET_CLASSES: usize = 1000;

/// EfficientNet encoder with the multi-scale edge and corner decoder.
#[derive(Module, Debug)]
pub struct EfficientCfl<B: Backend> {
    encoder: EfficientNet<B>,
    decoder: MultiScaleDecoder<B>,
}

impl<B: Backend> EfficientCfl<B> {
    pub fn new(
        blocks_args: &[BlockArgs],
        params: GlobalParams,
        conv_type: ConvType,
        device: &B::Device,
    ) -> Result<Self> {
        let encoder = EfficientNet::new(blocks_args, params, conv_type, device)?;
        let decoder = MultiScaleDecoder::new(&encoder, device)?;

        Ok(Self { encoder, decoder })
    }

    /// Randomly initialized network for a named variant.
    ///
    /// Static padding for the variant's resolution is the default. Pass
    /// `with_dynamic_padding(Some(true))` in `overrides` to accept other input sizes.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a name outside [`registry::MODEL_NAMES`].
    pub fn from_name(
        name: &str,
        conv_type: ConvType,
        overrides: Option<&ParamOverrides>,
        device: &B::Device,
    ) -> Result<Self> {
        let (blocks_args, params) = model_params(name, overrides)?;
        let model = Self::new(&blocks_args, params, conv_type, device)?;

        info!(
            "built {name}: {} blocks, skip taps {:?}",
            model.encoder.depth(),
            model.decoder.taps()
        );
        Ok(model)
    }

    /// Network whose encoder starts from pretrained weights. The decoder is always freshly
    /// initialized.
    ///
    /// # Arguments
    ///
    /// * `name` - Variant name, also the record name asked from `source`.
    /// * `conv_type` - Border handling of every convolution.
    /// * `advprop` - Load the AdvProp record instead of the standard one. Inputs must then
    ///   be preprocessed with `Preprocessing::AdvProp`.
    /// * `num_classes` - Classifier width. The classifier is only taken from the record
    ///   when this is [`IMAGENET_CLASSES`].
    /// * `in_channels` - Input channels. Anything other than 3 rebuilds the stem after
    ///   loading, so the stem starts untrained.
    /// * `source` - Where the encoder record comes from.
    /// * `device` - Device the parameters are allocated on.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` for an unknown name.
    /// * `Record` when the source cannot provide the record.
    /// * `WeightMismatch` when the record does not fit the variant.
    pub fn from_pretrained(
        name: &str,
        conv_type: ConvType,
        advprop: bool,
        num_classes: usize,
        in_channels: usize,
        source: &impl WeightSource<B>,
        device: &B::Device,
    ) -> Result<Self> {
        let overrides = ParamOverrides::new().with_num_classes(Some(num_classes));
        let Self { encoder, decoder } = Self::from_name(name, conv_type, Some(&overrides), device)?;

        let record = source.load(name, advprop, device)?;
        let mut encoder = load_pretrained_weights(encoder, record, num_classes == IMAGENET_CLASSES)?;

        if in_channels != 3 {
            warn!("replacing the pretrained stem for {in_channels} input channels, it starts untrained");
            encoder.replace_stem(in_channels, device);
        }

        Ok(Self { encoder, decoder })
    }

    /// Canonical input resolution of a named variant.
    pub fn image_size(name: &str) -> Result<usize> {
        registry::image_size(name)
    }

    /// Final two-channel likelihood map, resized to the spatial size of the input.
    ///
    /// # Arguments
    ///
    /// * `inputs` - A normalized `[N, in_channels, H, W]` batch.
    ///
    /// # Returns
    ///
    /// Logits of shape `[N, 2, H, W]`, edges in channel 0 and corners in channel 1. Apply a
    /// sigmoid to get probabilities.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` for a wrong channel count, or for a size other than the variant's
    /// resolution when the network was built with static padding.
    pub fn forward(&self, inputs: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let [_, _, h, w] = inputs.dims();
        let maps = self.forward_multiscale(inputs)?;

        Ok(resize_bilinear_aligned(maps.output, [h, w]))
    }

    /// Every likelihood map of the decoder, at the resolutions the decoder produces them.
    pub fn forward_multiscale(&self, inputs: Tensor<B, 4>) -> Result<LikelihoodMaps<B>> {
        let features = self.encoder.extract_features(inputs)?;
        self.decoder.forward(&features)
    }

    /// Switches every activation unit of the network between the memory-efficient and the
    /// direct strategy. Use the direct one before exporting.
    pub fn set_swish(&mut self, memory_efficient: bool) {
        self.encoder.set_swish(memory_efficient);
        self.decoder.set_swish(memory_efficient);
    }

    pub fn encoder(&self) -> &EfficientNet<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &MultiScaleDecoder<B> {
        &self.decoder
    }
}
