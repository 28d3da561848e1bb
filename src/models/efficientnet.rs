use burn::{
    module::{Ignored, Module},
    nn::{
        BatchNorm, Dropout, DropoutConfig, Linear, LinearConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    },
    tensor::{Tensor, backend::Backend},
};
use tracing::{debug, info};

use crate::activation::Swish;
use crate::error::{CflError, Result};
use crate::layers::SkipTaps;
use crate::models::conv::{Conv2dSame, Conv2dSameConfig, ConvType, same_output_size};
use crate::models::mbconv::{MBConvBlock, batch_norm};
use crate::models::params::{BlockArgs, GlobalParams, round_filters};

const STEM_FILTERS: usize = 32;
const HEAD_FILTERS: usize = 1280;

/// Outputs of one encoder pass.
///
/// `activations` is indexed by encoder position: the stem is position 0 and block `i` is
/// position `i + 1`. It only lives for the duration of the forward call that produced it.
#[derive(Debug, Clone)]
pub struct EncoderFeatures<B: Backend> {
    activations: Vec<Tensor<B, 4>>,
    /// Output of the 1x1 head convolution.
    pub head: Tensor<B, 4>,
}

impl<B: Backend> EncoderFeatures<B> {
    pub fn get(&self, position: usize) -> Result<Tensor<B, 4>> {
        self.activations.get(position).cloned().ok_or_else(|| {
            CflError::invalid(format!(
                "encoder position {position} was not computed, depth is {}",
                self.depth()
            ))
        })
    }

    /// Deepest completed position.
    pub fn depth(&self) -> usize {
        self.activations.len().saturating_sub(1)
    }
}

/// EfficientNet encoder: stem, compound-scaled inverted residual blocks and head.
///
/// The classification head (average pool, dropout, linear) is only run by
/// [`EfficientNet::classify`]; the dense prediction path stops at the head convolution.
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    pub(crate) conv_stem: Conv2dSame<B>,
    bn0: BatchNorm<B>,
    pub(crate) blocks: Vec<MBConvBlock<B>>,
    conv_head: Conv2dSame<B>,
    bn1: BatchNorm<B>,
    avg_pooling: AdaptiveAvgPool2d,
    dropout: Dropout,
    pub(crate) fc: Linear<B>,
    params: Ignored<GlobalParams>,
    conv_type: Ignored<ConvType>,
    /// Channel count at every encoder position.
    channels: Ignored<Vec<usize>>,
    /// Spatial size at every encoder position, known only with static padding.
    sizes: Ignored<Option<Vec<[usize; 2]>>>,
    swish: Ignored<Swish>,
}

impl<B: Backend> EfficientNet<B> {
    /// Builds the encoder from its base stages and the global scaling parameters.
    ///
    /// # Arguments
    ///
    /// * `blocks_args` - One entry per stage, before width and depth scaling. Each stage
    ///   expands into `num_repeat` blocks once scaled.
    /// * `params` - Compound scaling, batch norm and head settings. `image_size` set to
    ///   `Some(s)` builds every convolution with static padding for `s x s` inputs, `None`
    ///   pads dynamically from each input.
    /// * `conv_type` - Border handling shared by all convolutions.
    /// * `device` - Device the parameters are allocated on.
    ///
    /// # Returns
    ///
    /// The encoder with freshly initialized weights. Channel counts per position, and spatial
    /// sizes under static padding, are known from here on.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `blocks_args` is empty.
    pub fn new(
        blocks_args: &[BlockArgs],
        params: GlobalParams,
        conv_type: ConvType,
        device: &B::Device,
    ) -> Result<Self> {
        if blocks_args.is_empty() {
            return Err(CflError::invalid("block args must not be empty"));
        }

        let image_size = params.image_size.map(|s| [s, s]);

        let stem_filters = round_filters(STEM_FILTERS, &params);
        let conv_stem = Conv2dSameConfig::new([3, stem_filters], 3)
            .with_stride(2)
            .with_image_size(image_size)
            .with_conv_type(conv_type)
            .init(device);
        let bn0 = batch_norm(stem_filters, &params, device);

        let mut size = image_size.map(|s| same_output_size(s, 2));
        let mut channels = vec![stem_filters];
        let mut sizes = size.map(|s| vec![s]);
        let mut blocks = Vec::new();

        let mut push = |args: &BlockArgs, size: &mut Option<[usize; 2]>| {
            let block: MBConvBlock<B> = MBConvBlock::new(args, &params, conv_type, *size, device);
            debug!("block {}: {} input size {:?}", blocks.len(), args, size);

            *size = size.map(|s| block.output_size(s));
            channels.push(args.output_filters);
            if let (Some(sizes), Some(s)) = (sizes.as_mut(), *size) {
                sizes.push(s);
            }
            blocks.push(block);
        };

        for base in blocks_args {
            // filters and repeats follow the width and depth multipliers
            let args = base.scaled(&params);
            push(&args, &mut size);

            // the first block of a stage handles the stride and the filter change
            let repeated = args.repeated();
            for _ in 1..args.num_repeat {
                push(&repeated, &mut size);
            }
        }

        let last = blocks_args
            .last()
            .map(|args| round_filters(args.output_filters, &params))
            .unwrap_or(stem_filters);
        let head_filters = round_filters(HEAD_FILTERS, &params);
        let conv_head = Conv2dSameConfig::new([last, head_filters], 1)
            .with_image_size(size)
            .with_conv_type(conv_type)
            .init(device);
        let bn1 = batch_norm(head_filters, &params, device);

        let avg_pooling = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let dropout = DropoutConfig::new(params.dropout_rate).init();
        let fc = LinearConfig::new(head_filters, params.num_classes).init(device);

        info!(
            "assembled encoder: {} blocks, image size {:?}, {} padding, {} convolutions",
            blocks.len(),
            params.image_size,
            if image_size.is_some() { "static" } else { "dynamic" },
            conv_type
        );

        Ok(Self {
            conv_stem,
            bn0,
            blocks,
            conv_head,
            bn1,
            avg_pooling,
            dropout,
            fc,
            params: Ignored(params),
            conv_type: Ignored(conv_type),
            channels: Ignored(channels),
            sizes: Ignored(sizes),
            swish: Ignored(Swish::default()),
        })
    }

    /// Runs the stem, every block and the head convolution, keeping every block output.
    ///
    /// # Arguments
    ///
    /// * `inputs` - A `[N, 3, H, W]` image batch.
    ///
    /// # Returns
    ///
    /// The [`EncoderFeatures`] of the pass. Drop connect grows linearly with the block index
    /// up to `drop_connect_rate`, and only fires on autodiff backends.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` for a channel count other than the stem's, or for a size other than
    /// `image_size` under static padding.
    pub fn extract_features(&self, inputs: Tensor<B, 4>) -> Result<EncoderFeatures<B>> {
        let [_, channels, h, w] = inputs.dims();
        if channels != self.conv_stem.in_channels() {
            return Err(CflError::shape(format!(
                "the stem expects {} input channels, got {channels}",
                self.conv_stem.in_channels()
            )));
        }
        if let Some(size) = self.params.image_size
            && [h, w] != [size, size]
        {
            return Err(CflError::shape(format!(
                "padding was computed for {size}x{size} inputs, got {h}x{w}; \
                 build the model with dynamic padding for other sizes"
            )));
        }

        let swish = *self.swish;
        let mut x = swish.apply(self.bn0.forward(self.conv_stem.forward(inputs)?));
        let mut activations = Vec::with_capacity(self.blocks.len() + 1);
        activations.push(x.clone());

        let num_blocks = self.blocks.len() as f64;
        for (idx, block) in self.blocks.iter().enumerate() {
            // deeper blocks are dropped more often
            let rate = self.params.drop_connect_rate * idx as f64 / num_blocks;
            x = block.forward(x, Some(rate))?;
            activations.push(x.clone());
        }

        let head = swish.apply(self.bn1.forward(self.conv_head.forward(x)?));

        Ok(EncoderFeatures { activations, head })
    }

    /// Image-level logits from the head features.
    pub fn classify(&self, head: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.avg_pooling.forward(head);
        let x: Tensor<B, 2> = x.flatten(1, 3);
        self.fc.forward(self.dropout.forward(x))
    }

    /// Encoder positions the decoder reads, derived from the block strides.
    pub fn skip_taps(&self) -> Result<SkipTaps> {
        let strides: Vec<usize> = self.blocks.iter().map(|b| b.args().stride).collect();
        SkipTaps::from_strides(&strides)
    }

    pub fn position_channels(&self, position: usize) -> Option<usize> {
        self.channels.get(position).copied()
    }

    /// Spatial size at a position, `None` under dynamic padding.
    pub fn position_size(&self, position: usize) -> Option<[usize; 2]> {
        self.sizes.as_ref().and_then(|sizes| sizes.get(position).copied())
    }

    pub fn blocks(&self) -> &[MBConvBlock<B>] {
        &self.blocks
    }

    /// Deepest encoder position.
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn head_channels(&self) -> usize {
        self.conv_head.out_channels()
    }

    pub fn params(&self) -> &GlobalParams {
        &self.params
    }

    pub fn conv_type(&self) -> ConvType {
        *self.conv_type
    }

    pub fn swish(&self) -> Swish {
        *self.swish
    }

    /// Switches the stem, head and every block to the same activation strategy.
    pub fn set_swish(&mut self, memory_efficient: bool) {
        self.swish = Ignored(Swish::new(memory_efficient));
        for block in self.blocks.iter_mut() {
            block.set_swish(memory_efficient);
        }
    }

    /// Rebuilds the stem for a different number of input channels. The new stem is
    /// randomly initialized.
    pub fn replace_stem(&mut self, in_channels: usize, device: &B::Device) {
        let out_channels = round_filters(STEM_FILTERS, &self.params);
        self.conv_stem = Conv2dSameConfig::new([in_channels, out_channels], 3)
            .with_stride(2)
            .with_image_size(self.params.image_size.map(|s| [s, s]))
            .with_conv_type(*self.conv_type)
            .init(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::registry::model_params;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Distribution, Tolerance, ops::FloatElem};

    type B = NdArray<f32>;
    type FT = FloatElem<B>;

    fn b0(image_size: Option<usize>) -> EfficientNet<B> {
        let (blocks, params) = model_params("efficientnet-b0", None).unwrap();
        let params = params.with_image_size(image_size);
        EfficientNet::new(&blocks, params, ConvType::Standard, &NdArrayDevice::default()).unwrap()
    }

    #[test]
    fn test_b0_layout() {
        let model = b0(Some(224));
        assert_eq!(model.depth(), 16);
        assert_eq!(model.head_channels(), 1280);

        let channels: Vec<usize> = (0..=16).map(|p| model.position_channels(p).unwrap()).collect();
        assert_eq!(
            channels,
            vec![32, 16, 24, 24, 40, 40, 80, 80, 80, 112, 112, 112, 192, 192, 192, 192, 320]
        );

        assert_eq!(model.position_size(0), Some([112, 112]));
        assert_eq!(model.position_size(1), Some([112, 112]));
        assert_eq!(model.position_size(3), Some([56, 56]));
        assert_eq!(model.position_size(5), Some([28, 28]));
        assert_eq!(model.position_size(11), Some([14, 14]));
        assert_eq!(model.position_size(16), Some([7, 7]));
    }

    #[test]
    fn test_deeper_variant_has_more_blocks() {
        let (blocks, params) = model_params("efficientnet-b2", None).unwrap();
        let params = params.with_image_size(None);
        let model: EfficientNet<B> =
            EfficientNet::new(&blocks, params, ConvType::Standard, &NdArrayDevice::default()).unwrap();

        // repeats 2, 3, 3, 4, 4, 5, 2
        assert_eq!(model.depth(), 23);
        assert_eq!(model.head_channels(), 1408);
        assert_eq!(model.position_size(3), None);
    }

    #[test]
    fn test_empty_block_list_is_rejected() {
        let (_, params) = model_params("efficientnet-b0", None).unwrap();
        let result: Result<EfficientNet<B>> =
            EfficientNet::new(&[], params, ConvType::Standard, &NdArrayDevice::default());
        assert!(matches!(result, Err(CflError::InvalidArgument(_))));
    }

    #[test]
    fn test_features_cache_every_position() {
        let device = &NdArrayDevice::default();
        let model = b0(None);

        let x = Tensor::<B, 4>::random([1, 3, 64, 64], Distribution::Default, device);
        let features = model.extract_features(x).unwrap();

        assert_eq!(features.depth(), 16);
        assert_eq!(features.get(0).unwrap().dims(), [1, 32, 32, 32]);
        assert_eq!(features.get(11).unwrap().dims(), [1, 112, 4, 4]);
        assert_eq!(features.get(16).unwrap().dims(), [1, 320, 2, 2]);
        assert_eq!(features.head.dims(), [1, 1280, 2, 2]);
        assert!(matches!(features.get(17), Err(CflError::InvalidArgument(_))));
    }

    #[test]
    fn test_static_padding_rejects_other_sizes() {
        let device = &NdArrayDevice::default();
        let model = b0(Some(224));

        let x = Tensor::<B, 4>::zeros([1, 3, 64, 64], device);
        assert!(matches!(
            model.extract_features(x),
            Err(CflError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_classifier_head() {
        let device = &NdArrayDevice::default();
        let model = b0(None);

        let head = Tensor::<B, 4>::random([2, 1280, 2, 2], Distribution::Default, device);
        assert_eq!(model.classify(head).dims(), [2, 1000]);
    }

    #[test]
    fn test_set_swish_reaches_every_block() {
        let mut model = b0(None);
        model.set_swish(false);
        assert_eq!(model.swish(), Swish::Direct);
        assert!(model.blocks.iter().all(|b| b.swish() == Swish::Direct));

        model.set_swish(true);
        assert!(model.blocks.iter().all(|b| b.swish().is_memory_efficient()));
    }

    #[test]
    fn test_replace_stem() {
        let device = &NdArrayDevice::default();
        let mut model = b0(None);
        model.replace_stem(1, device);

        let x = Tensor::<B, 4>::random([1, 1, 32, 32], Distribution::Default, device);
        let features = model.extract_features(x).unwrap();
        assert_eq!(features.get(0).unwrap().dims(), [1, 32, 16, 16]);

        let rgb = Tensor::<B, 4>::zeros([1, 3, 32, 32], device);
        assert!(matches!(
            model.extract_features(rgb),
            Err(CflError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_extract_features_is_deterministic_in_inference() {
        let device = &NdArrayDevice::default();
        let model = b0(None);
        let x = Tensor::<B, 4>::random([1, 3, 32, 32], Distribution::Default, device);

        let a = model.extract_features(x.clone()).unwrap().head;
        let b = model.extract_features(x).unwrap().head;
        a.into_data()
            .assert_approx_eq::<FT>(&b.into_data(), Tolerance::default());
    }
}
