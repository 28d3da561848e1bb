use burn::{
    module::{Ignored, Module},
    tensor::{Tensor, backend::Backend},
};
use tracing::debug;

use crate::activation::Swish;
use crate::error::{CflError, Result};
use crate::layers::{SkipTap, SkipTaps};
use crate::models::conv::{Conv2dSame, Conv2dSameConfig};
use crate::models::efficientnet::{EfficientNet, EncoderFeatures};
use crate::torch_ops::resize_bilinear_aligned;

/// Channels of an edge/corner likelihood map.
pub const LIKELIHOOD_CHANNELS: usize = 2;

/// Likelihood maps emitted by the decoder, coarsest first. Sizes are given for an encoder
/// with the standard stride layout.
#[derive(Debug, Clone)]
pub struct LikelihoodMaps<B: Backend> {
    /// 1/8 of the input resolution.
    pub coarse: Tensor<B, 4>,
    /// 1/4 of the input resolution.
    pub medium: Tensor<B, 4>,
    /// 1/2 of the input resolution.
    pub fine: Tensor<B, 4>,
    /// Final map at the stem resolution.
    pub output: Tensor<B, 4>,
}

/// Cascading upsample-and-fuse head reading the encoder head and four skip taps.
#[derive(Module, Debug)]
pub struct MultiScaleDecoder<B: Backend> {
    conv1a: Conv2dSame<B>,
    conv1b: Conv2dSame<B>,
    conv1c: Conv2dSame<B>,
    conv2a: Conv2dSame<B>,
    conv2b: Conv2dSame<B>,
    conv3a: Conv2dSame<B>,
    conv3b: Conv2dSame<B>,
    conv4a: Conv2dSame<B>,
    conv4b: Conv2dSame<B>,
    taps: Ignored<SkipTaps>,
    swish: Ignored<Swish>,
}

impl<B: Backend> MultiScaleDecoder<B> {
    /// Builds every decoder layer for the given encoder. Layer input widths follow the
    /// channel count of the taps they fuse.
    pub fn new(encoder: &EfficientNet<B>, device: &B::Device) -> Result<Self> {
        let taps = encoder.skip_taps()?;
        let conv_type = encoder.conv_type();

        let tap_channels = |tap: SkipTap| {
            let position = taps.position(tap);
            encoder.position_channels(position).ok_or_else(|| {
                CflError::invalid(format!(
                    "skip tap {tap:?} points at encoder position {position}, depth is {}",
                    encoder.depth()
                ))
            })
        };
        let tap_size = |tap: SkipTap| encoder.position_size(taps.position(tap));

        let conv = |channels: [usize; 2], kernel: usize, size: Option<[usize; 2]>| -> Conv2dSame<B> {
            Conv2dSameConfig::new(channels, kernel)
                .with_bias(true)
                .with_image_size(size)
                .with_conv_type(conv_type)
                .init(device)
        };

        let c16 = tap_channels(SkipTap::Stride16)?;
        let c8 = tap_channels(SkipTap::Stride8)?;
        let c4 = tap_channels(SkipTap::Stride4)?;
        let c2 = tap_channels(SkipTap::Stride2)?;
        let l = LIKELIHOOD_CHANNELS;

        let head_size = encoder.position_size(encoder.depth());
        let conv1a = conv([encoder.head_channels(), 512], 3, head_size);
        let conv1b = conv([512 + c16, 256], 3, tap_size(SkipTap::Stride16));
        let conv1c = conv([256, l], 3, tap_size(SkipTap::Stride8));
        let conv2a = conv([256 + c8 + l, 128], 3, tap_size(SkipTap::Stride8));
        let conv2b = conv([128, l], 3, tap_size(SkipTap::Stride4));
        let conv3a = conv([128 + c4 + l, 64], 5, tap_size(SkipTap::Stride4));
        let conv3b = conv([64, l], 3, tap_size(SkipTap::Stride2));
        let conv4a = conv([64 + c2 + l, 64], 5, tap_size(SkipTap::Stride2));
        let conv4b = conv([64, l], 3, tap_size(SkipTap::Stride2));

        debug!("decoder taps {:?} with channels {:?}", taps, [c16, c8, c4, c2]);

        Ok(Self {
            conv1a,
            conv1b,
            conv1c,
            conv2a,
            conv2b,
            conv3a,
            conv3b,
            conv4a,
            conv4b,
            taps: Ignored(taps),
            swish: Ignored(Swish::default()),
        })
    }

    /// Decodes one encoder pass into the four likelihood maps.
    ///
    /// # Arguments
    ///
    /// * `features` - Output of [`EfficientNet::extract_features`] for the encoder this
    ///   decoder was built from.
    ///
    /// # Returns
    ///
    /// The [`LikelihoodMaps`], each with [`LIKELIHOOD_CHANNELS`] channels. Each stage is
    /// upsampled to the size of the tap it is fused with, so odd input sizes still line up.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` when a skip tap is deeper than the computed positions.
    /// * `ShapeMismatch` when a fusion sees disagreeing shapes, or a statically padded layer
    ///   receives a size it was not built for.
    pub fn forward(&self, features: &EncoderFeatures<B>) -> Result<LikelihoodMaps<B>> {
        let swish = *self.swish;
        let tap16 = self.tap(features, SkipTap::Stride16)?;
        let tap8 = self.tap(features, SkipTap::Stride8)?;
        let tap4 = self.tap(features, SkipTap::Stride4)?;
        let tap2 = self.tap(features, SkipTap::Stride2)?;

        let x = swish.apply(apply(&self.conv1a, features.head.clone(), "head")?);
        let x = upsample_to(x, &tap16);

        let x = fuse(vec![x, tap16], SkipTap::Stride16)?;
        let x = swish.apply(apply(&self.conv1b, x, "stride 16 fusion")?);
        let x = upsample_to(x, &tap8);
        let coarse = self.conv1c.forward(x.clone())?;

        let x = fuse(vec![x, tap8, coarse.clone()], SkipTap::Stride8)?;
        let x = swish.apply(apply(&self.conv2a, x, "stride 8 fusion")?);
        let x = upsample_to(x, &tap4);
        let medium = self.conv2b.forward(x.clone())?;

        let x = fuse(vec![x, tap4, medium.clone()], SkipTap::Stride4)?;
        let x = swish.apply(apply(&self.conv3a, x, "stride 4 fusion")?);
        let x = upsample_to(x, &tap2);
        let fine = self.conv3b.forward(x.clone())?;

        let x = fuse(vec![x, tap2, fine.clone()], SkipTap::Stride2)?;
        let x = swish.apply(apply(&self.conv4a, x, "stride 2 fusion")?);
        let output = self.conv4b.forward(x)?;

        Ok(LikelihoodMaps {
            coarse,
            medium,
            fine,
            output,
        })
    }

    fn tap(&self, features: &EncoderFeatures<B>, tap: SkipTap) -> Result<Tensor<B, 4>> {
        let position = self.taps.position(tap);
        if position > features.depth() {
            return Err(CflError::invalid(format!(
                "skip tap {tap:?} reads encoder position {position} but only {} positions were computed",
                features.depth()
            )));
        }
        features.get(position)
    }

    pub fn taps(&self) -> SkipTaps {
        *self.taps
    }

    pub fn set_swish(&mut self, memory_efficient: bool) {
        self.swish = Ignored(Swish::new(memory_efficient));
    }

    pub fn swish(&self) -> Swish {
        *self.swish
    }
}

fn upsample_to<B: Backend>(x: Tensor<B, 4>, reference: &Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, h, w] = reference.dims();
    resize_bilinear_aligned(x, [h, w])
}

fn apply<B: Backend>(conv: &Conv2dSame<B>, x: Tensor<B, 4>, stage: &str) -> Result<Tensor<B, 4>> {
    let channels = x.dims()[1];
    if channels != conv.in_channels() {
        return Err(CflError::shape(format!(
            "{stage}: convolution expects {} channels, got {channels}",
            conv.in_channels()
        )));
    }
    conv.forward(x)
}

/// Concatenates along channels after checking batch and spatial agreement.
fn fuse<B: Backend>(parts: Vec<Tensor<B, 4>>, tap: SkipTap) -> Result<Tensor<B, 4>> {
    let reference = match parts.first() {
        Some(first) => first.dims(),
        None => return Err(CflError::invalid("nothing to concatenate")),
    };

    for part in parts.iter().skip(1) {
        let dims = part.dims();
        if dims[0] != reference[0] || dims[2..] != reference[2..] {
            return Err(CflError::shape(format!(
                "cannot fuse skip tap {tap:?}: decoder map is {reference:?}, encoder map is {dims:?}"
            )));
        }
    }

    Ok(Tensor::cat(parts, 1))
}
