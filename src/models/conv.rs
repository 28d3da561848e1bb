use std::fmt;
use std::str::FromStr;

use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    tensor::{Tensor, backend::Backend, ops::PadMode},
};
use serde::{Deserialize, Serialize};

use crate::error::{self, CflError};
use crate::torch_ops::pad_circular_width;

/// Border handling used by every convolution of the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvType {
    /// Plain convolution with zero padding.
    #[default]
    Standard,
    /// Wrap-around horizontal padding with zero padding vertically, for inputs whose left
    /// and right borders touch (360 degree panoramas).
    ///
    /// Only the padding changes. The kernel is the same square convolution as `Standard`,
    /// with no latitude-dependent sampling of the equirectangular projection.
    Equi,
}

impl FromStr for ConvType {
    type Err = CflError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "std" => Ok(ConvType::Standard),
            "equi" => Ok(ConvType::Equi),
            _ => Err(CflError::invalid(format!(
                "convolution type {s} should be one of: standard, equi"
            ))),
        }
    }
}

impl fmt::Display for ConvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvType::Standard => write!(f, "standard"),
            ConvType::Equi => write!(f, "equi"),
        }
    }
}

/// `(left, right, top, bottom)` padding.
pub type Padding2d = (usize, usize, usize, usize);

/// Output size of a "same" convolution: `ceil(input / stride)` on both axes.
pub fn same_output_size(input: [usize; 2], stride: usize) -> [usize; 2] {
    [input[0].div_ceil(stride), input[1].div_ceil(stride)]
}

/// Padding that makes a convolution produce [`same_output_size`]. Odd totals put the
/// extra row and column on the bottom and right.
pub fn same_padding(input: [usize; 2], kernel_size: usize, stride: usize, dilation: usize) -> Padding2d {
    if kernel_size == 1 {
        return (0, 0, 0, 0);
    }

    let [oh, ow] = same_output_size(input, stride);
    let span = (kernel_size - 1) * dilation + 1;
    let pad_h = ((oh.max(1) - 1) * stride + span).saturating_sub(input[0]);
    let pad_w = ((ow.max(1) - 1) * stride + span).saturating_sub(input[1]);

    (pad_w / 2, pad_w - pad_w / 2, pad_h / 2, pad_h - pad_h / 2)
}

/// How a [`Conv2dSame`] obtains its padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamePadding {
    /// Computed once for the only input size the layer accepts.
    Static { input: [usize; 2], padding: Padding2d },
    /// Computed from the input on every call.
    Dynamic,
}

#[derive(Config, Debug)]
pub struct Conv2dSameConfig {
    pub channels: [usize; 2],
    pub kernel_size: usize,
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = 1)]
    pub groups: usize,
    #[config(default = false)]
    pub bias: bool,
    /// Spatial size of the input the layer will see. `None` selects dynamic padding.
    pub image_size: Option<[usize; 2]>,
    #[config(default = "ConvType::Standard")]
    pub conv_type: ConvType,
}

/// 2D convolution with TensorFlow-style "same" padding for any stride.
#[derive(Module, Debug)]
pub struct Conv2dSame<B: Backend> {
    pub(crate) conv: Conv2d<B>,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    padding: Ignored<SamePadding>,
    conv_type: Ignored<ConvType>,
}

impl Conv2dSameConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Conv2dSame<B> {
        let conv = Conv2dConfig::new(self.channels, [self.kernel_size, self.kernel_size])
            .with_stride([self.stride, self.stride])
            .with_groups(self.groups)
            .with_bias(self.bias)
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        let padding = match self.image_size {
            Some(input) => SamePadding::Static {
                input,
                padding: same_padding(input, self.kernel_size, self.stride, 1),
            },
            None => SamePadding::Dynamic,
        };

        Conv2dSame {
            conv,
            in_channels: self.channels[0],
            out_channels: self.channels[1],
            kernel_size: self.kernel_size,
            stride: self.stride,
            padding: Ignored(padding),
            conv_type: Ignored(self.conv_type),
        }
    }
}

impl<B: Backend> Conv2dSame<B> {
    /// Pads the input and applies the convolution.
    ///
    /// # Arguments
    ///
    /// * `x` - A `[N, C, H, W]` tensor.
    ///
    /// # Returns
    ///
    /// A `[N, out_channels, ceil(H / stride), ceil(W / stride)]` tensor.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when the layer was built with static padding and `H, W` differ from
    /// the size the padding was computed for.
    pub fn forward(&self, x: Tensor<B, 4>) -> error::Result<Tensor<B, 4>> {
        let [_, _, h, w] = x.dims();
        let padding = match *self.padding {
            SamePadding::Static { input, padding } => {
                if [h, w] != input {
                    return Err(CflError::shape(format!(
                        "static padding was computed for {input:?} but the input is {:?}",
                        [h, w]
                    )));
                }
                padding
            }
            SamePadding::Dynamic => same_padding([h, w], self.kernel_size, self.stride, 1),
        };

        let x = if padding == (0, 0, 0, 0) {
            x
        } else {
            match *self.conv_type {
                ConvType::Standard => x.pad(padding, PadMode::Constant(0.0)),
                ConvType::Equi => pad_circular_width(x, padding),
            }
        };

        Ok(self.conv.forward(x))
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn padding(&self) -> SamePadding {
        *self.padding
    }

    /// Spatial output size for an input of the given size.
    pub fn output_size(&self, input: [usize; 2]) -> [usize; 2] {
        same_output_size(input, self.stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::module::Param;
    use burn::tensor::{Distribution, Tolerance, ops::FloatElem};

    type B = NdArray<f32>;
    type FT = FloatElem<B>;

    #[test]
    fn test_same_padding_values() {
        assert_eq!(same_padding([224, 224], 3, 1, 1), (1, 1, 1, 1));
        assert_eq!(same_padding([224, 224], 3, 2, 1), (0, 1, 0, 1));
        assert_eq!(same_padding([224, 224], 5, 2, 1), (1, 2, 1, 2));
        assert_eq!(same_padding([15, 15], 5, 2, 1), (2, 2, 2, 2));
        assert_eq!(same_padding([7, 9], 5, 1, 1), (2, 2, 2, 2));
    }

    #[test]
    fn test_kernel_one_has_no_padding() {
        for stride in [1, 2] {
            for size in [1, 7, 8, 224] {
                assert_eq!(same_padding([size, size], 1, stride, 1), (0, 0, 0, 0));
            }
        }

        let device = &NdArrayDevice::default();
        let conv: Conv2dSame<B> = Conv2dSameConfig::new([4, 8], 1)
            .with_image_size(Some([32, 32]))
            .init(device);
        assert_eq!(
            conv.padding(),
            SamePadding::Static {
                input: [32, 32],
                padding: (0, 0, 0, 0)
            }
        );
    }

    #[test]
    fn test_stride_one_keeps_size() {
        let device = &NdArrayDevice::default();
        for kernel in [1, 3, 5, 7] {
            for size in [5, 8, 13] {
                let conv: Conv2dSame<B> = Conv2dSameConfig::new([2, 3], kernel).init(device);
                let x = Tensor::<B, 4>::random([1, 2, size, size], Distribution::Default, device);
                assert_eq!(conv.forward(x).unwrap().dims(), [1, 3, size, size]);
            }
        }
    }

    #[test]
    fn test_stride_two_halves_rounding_up() {
        let device = &NdArrayDevice::default();
        for kernel in [3, 5] {
            for size in [7, 8, 15, 16] {
                let conv: Conv2dSame<B> = Conv2dSameConfig::new([2, 2], kernel)
                    .with_stride(2)
                    .init(device);
                let x = Tensor::<B, 4>::random([2, 2, size, size + 1], Distribution::Default, device);

                let expected = same_output_size([size, size + 1], 2);
                assert_eq!(conv.forward(x).unwrap().dims(), [2, 2, expected[0], expected[1]]);
                assert_eq!(expected, [size.div_ceil(2), (size + 1).div_ceil(2)]);
            }
        }
    }

    #[test]
    fn test_static_matches_dynamic_for_the_configured_size() {
        let device = &NdArrayDevice::default();
        let dynamic: Conv2dSame<B> = Conv2dSameConfig::new([3, 4], 5)
            .with_stride(2)
            .init(device);
        let mut fixed: Conv2dSame<B> = Conv2dSameConfig::new([3, 4], 5)
            .with_stride(2)
            .with_image_size(Some([16, 16]))
            .init(device);
        fixed.conv = dynamic.conv.clone();

        let x = Tensor::<B, 4>::random([1, 3, 16, 16], Distribution::Default, device);
        dynamic
            .forward(x.clone())
            .unwrap()
            .into_data()
            .assert_approx_eq::<FT>(&fixed.forward(x).unwrap().into_data(), Tolerance::default());
    }

    #[test]
    fn test_static_rejects_other_sizes() {
        let device = &NdArrayDevice::default();
        let conv: Conv2dSame<B> = Conv2dSameConfig::new([1, 1], 5)
            .with_stride(2)
            .with_image_size(Some([16, 16]))
            .init(device);

        let x = Tensor::<B, 4>::ones([1, 1, 15, 15], device);
        assert!(matches!(conv.forward(x), Err(CflError::ShapeMismatch(_))));

        let x = Tensor::<B, 4>::ones([1, 1, 16, 17], device);
        assert!(matches!(conv.forward(x), Err(CflError::ShapeMismatch(_))));

        let x = Tensor::<B, 4>::ones([1, 1, 16, 16], device);
        assert_eq!(conv.forward(x).unwrap().dims(), [1, 1, 8, 8]);
    }

    #[test]
    fn test_standard_pads_with_zeros() {
        let device = &NdArrayDevice::default();
        let mut conv: Conv2dSame<B> = Conv2dSameConfig::new([1, 1], 3).init(device);
        conv.conv.weight = Param::from_tensor(Tensor::ones([1, 1, 3, 3], device));

        // every output sums the 3x3 window, borders only see the in-image ones
        let x = Tensor::<B, 4>::ones([1, 1, 3, 3], device);
        let y = conv.forward(x).unwrap();

        Tensor::<B, 4>::from_data(
            [[[
                [4.0, 6.0, 4.0],
                [6.0, 9.0, 6.0],
                [4.0, 6.0, 4.0],
            ]]],
            device,
        )
        .into_data()
        .assert_approx_eq::<FT>(&y.into_data(), Tolerance::default());
    }

    #[test]
    fn test_depthwise_groups() {
        let device = &NdArrayDevice::default();
        let conv: Conv2dSame<B> = Conv2dSameConfig::new([6, 6], 3)
            .with_groups(6)
            .init(device);

        // one input channel per filter
        assert_eq!(conv.conv.weight.val().dims(), [6, 1, 3, 3]);
        let x = Tensor::<B, 4>::ones([1, 6, 4, 4], device);
        assert_eq!(conv.forward(x).unwrap().dims(), [1, 6, 4, 4]);
    }

    #[test]
    fn test_equi_wraps_horizontally() {
        let device = &NdArrayDevice::default();
        let mut conv: Conv2dSame<B> = Conv2dSameConfig::new([1, 1], 3)
            .with_conv_type(ConvType::Equi)
            .init(device);

        // summing kernel: a wrapped border sees the opposite edge instead of zeros
        conv.conv.weight = Param::from_tensor(Tensor::ones([1, 1, 3, 3], device));

        let x: Tensor<B, 4> = Tensor::from_data([[[[1.0, 0.0, 0.0, 2.0]]]], device);
        let y = conv.forward(x).unwrap();

        Tensor::<B, 4>::from_data([[[[3.0, 1.0, 2.0, 3.0]]]], device)
            .into_data()
            .assert_approx_eq::<FT>(&y.into_data(), Tolerance::default());
    }

    #[test]
    fn test_parse_conv_type() {
        assert_eq!("standard".parse::<ConvType>().unwrap(), ConvType::Standard);
        assert_eq!("Equi".parse::<ConvType>().unwrap(), ConvType::Equi);
        assert!("deformable".parse::<ConvType>().is_err());
        assert_eq!(ConvType::Equi.to_string(), "equi");
    }
}
