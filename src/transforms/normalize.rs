use std::fmt;

use super::pipeline::{MAX_PIXEL_VAL, Transform};
use burn::{
    prelude::Backend,
    tensor::{Device, Tensor},
};

// ImageNet mean and std values

const MEAN: [f64; 3] = [0.485, 0.456, 0.406];
const STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Input normalization a set of pretrained weights was trained with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Preprocessing {
    /// Channel-wise ImageNet mean and std.
    #[default]
    ImageNet,
    /// Adversarial propagation weights expect inputs scaled to `[-1, 1]`.
    AdvProp,
}

impl Preprocessing {
    pub fn new(advprop: bool) -> Self {
        if advprop {
            Preprocessing::AdvProp
        } else {
            Preprocessing::ImageNet
        }
    }
}

impl fmt::Display for Preprocessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preprocessing::ImageNet => write!(f, "imagenet"),
            Preprocessing::AdvProp => write!(f, "advprop"),
        }
    }
}

#[derive(Clone)]
pub struct ImageNormalizer<B: Backend> {
    pub mean: Tensor<B, 3>,
    pub std: Tensor<B, 3>,
}

impl<B: Backend> ImageNormalizer<B> {
    pub fn new(device: &Device<B>) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, device).reshape([3, 1, 1]);
        Self { mean, std }
    }

    /// `(input - mean) / std` for an image in `[0, 1]`.
    pub fn normalize(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        (input - self.mean.clone()) / self.std.clone()
    }
}

impl<B: Backend> Transform<B> {
    /// Scales pixel values to `[0, 1]` and applies the given normalization.
    pub fn normalize(&mut self, preprocessing: Preprocessing) -> Self {
        let image = self.image.clone().div_scalar(MAX_PIXEL_VAL);

        self.image = match preprocessing {
            Preprocessing::ImageNet => ImageNormalizer::new(&self.device).normalize(image),
            Preprocessing::AdvProp => image.mul_scalar(2.0).sub_scalar(1.0),
        };

        self.clone()
    }
}
