use burn::{
    module::{Ignored, Module},
    nn::{BatchNorm, BatchNormConfig},
    tensor::{Tensor, activation::sigmoid, backend::Backend, module::adaptive_avg_pool2d},
};

use crate::activation::Swish;
use crate::drop_connect::drop_connect;
use crate::error::Result;
use crate::models::conv::{Conv2dSame, Conv2dSameConfig, ConvType, same_output_size};
use crate::models::params::{BlockArgs, GlobalParams};

pub(crate) fn batch_norm<B: Backend>(
    num_features: usize,
    params: &GlobalParams,
    device: &B::Device,
) -> BatchNorm<B> {
    BatchNormConfig::new(num_features)
        .with_momentum(params.bn_momentum())
        .with_epsilon(params.batch_norm_epsilon)
        .init(device)
}

/// Channel attention: a global descriptor squeezed to a few channels, re-expanded and used
/// as a sigmoid gate on every spatial position.
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    reduce: Conv2dSame<B>,
    expand: Conv2dSame<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    pub fn new(
        channels: usize,
        squeezed: usize,
        static_padding: bool,
        conv_type: ConvType,
        device: &B::Device,
    ) -> Self {
        let pooled = static_padding.then_some([1, 1]);
        let reduce = Conv2dSameConfig::new([channels, squeezed], 1)
            .with_bias(true)
            .with_image_size(pooled)
            .with_conv_type(conv_type)
            .init(device);
        let expand = Conv2dSameConfig::new([squeezed, channels], 1)
            .with_bias(true)
            .with_image_size(pooled)
            .with_conv_type(conv_type)
            .init(device);

        Self { reduce, expand }
    }

    pub fn forward(&self, x: Tensor<B, 4>, swish: Swish) -> Result<Tensor<B, 4>> {
        let squeezed = adaptive_avg_pool2d(x.clone(), [1, 1]);
        let squeezed = self.expand.forward(swish.apply(self.reduce.forward(squeezed)?))?;

        Ok(sigmoid(squeezed) * x)
    }

    pub fn squeezed_channels(&self) -> usize {
        self.reduce.out_channels()
    }
}

/// Mobile inverted residual bottleneck block.
///
/// `expand (1x1) -> depthwise (k x k, stride s) -> squeeze-excite -> project (1x1)`, with an
/// identity shortcut when the block keeps both resolution and channel count.
#[derive(Module, Debug)]
pub struct MBConvBlock<B: Backend> {
    pub(crate) expand_conv: Option<Conv2dSame<B>>,
    pub(crate) bn0: Option<BatchNorm<B>>,
    pub(crate) depthwise_conv: Conv2dSame<B>,
    pub(crate) bn1: BatchNorm<B>,
    pub(crate) se: Option<SqueezeExcite<B>>,
    pub(crate) project_conv: Conv2dSame<B>,
    pub(crate) bn2: BatchNorm<B>,
    args: Ignored<BlockArgs>,
    swish: Ignored<Swish>,
}

impl<B: Backend> MBConvBlock<B> {
    /// `input_size` is the spatial size the block will receive when padding is static.
    pub fn new(
        args: &BlockArgs,
        params: &GlobalParams,
        conv_type: ConvType,
        input_size: Option<[usize; 2]>,
        device: &B::Device,
    ) -> Self {
        let inp = args.input_filters;
        let oup = args.expanded_filters();

        let (expand_conv, bn0) = if args.expand_ratio != 1 {
            let conv = Conv2dSameConfig::new([inp, oup], 1)
                .with_image_size(input_size)
                .with_conv_type(conv_type)
                .init(device);
            (Some(conv), Some(batch_norm(oup, params, device)))
        } else {
            (None, None)
        };

        // groups == channels makes it depthwise
        let depthwise_conv = Conv2dSameConfig::new([oup, oup], args.kernel_size)
            .with_stride(args.stride)
            .with_groups(oup)
            .with_image_size(input_size)
            .with_conv_type(conv_type)
            .init(device);
        let bn1 = batch_norm(oup, params, device);

        let se = match args.se_ratio {
            Some(ratio) if args.has_se() => {
                let squeezed = usize::max(1, (inp as f64 * ratio).round() as usize);
                Some(SqueezeExcite::new(
                    oup,
                    squeezed,
                    input_size.is_some(),
                    conv_type,
                    device,
                ))
            }
            _ => None,
        };

        let output_size = input_size.map(|size| same_output_size(size, args.stride));
        let project_conv = Conv2dSameConfig::new([oup, args.output_filters], 1)
            .with_image_size(output_size)
            .with_conv_type(conv_type)
            .init(device);
        let bn2 = batch_norm(args.output_filters, params, device);

        Self {
            expand_conv,
            bn0,
            depthwise_conv,
            bn1,
            se,
            project_conv,
            bn2,
            args: Ignored(*args),
            swish: Ignored(Swish::default()),
        }
    }

    /// Runs the block. `drop_connect_rate` is the probability of dropping the residual
    /// branch of a sample while training; it only applies to blocks with a shortcut.
    ///
    /// Fails with `ShapeMismatch` when a statically padded layer receives another size.
    pub fn forward(
        &self,
        inputs: Tensor<B, 4>,
        drop_connect_rate: Option<f64>,
    ) -> Result<Tensor<B, 4>> {
        let swish = *self.swish;

        let x = match (&self.expand_conv, &self.bn0) {
            (Some(conv), Some(bn)) => swish.apply(bn.forward(conv.forward(inputs.clone())?)),
            _ => inputs.clone(),
        };
        let x = swish.apply(self.bn1.forward(self.depthwise_conv.forward(x)?));

        let x = match &self.se {
            Some(se) => se.forward(x, swish)?,
            None => x,
        };

        let x = self.bn2.forward(self.project_conv.forward(x)?);

        if !self.args.has_residual() {
            return Ok(x);
        }

        let x = match drop_connect_rate {
            Some(rate) if rate > 0.0 => drop_connect(x, 1.0 - rate, B::ad_enabled()),
            _ => x,
        };
        Ok(x + inputs)
    }

    pub fn args(&self) -> &BlockArgs {
        &self.args
    }

    pub fn swish(&self) -> Swish {
        *self.swish
    }

    pub fn set_swish(&mut self, memory_efficient: bool) {
        self.swish = Ignored(Swish::new(memory_efficient));
    }

    pub fn output_size(&self, input: [usize; 2]) -> [usize; 2] {
        self.depthwise_conv.output_size(input)
    }
}
