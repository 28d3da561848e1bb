use burn::config::Config;

use crate::error::{self, CflError};
use crate::models::params::{BlockArgs, GlobalParams};

/// Identifiers accepted by [`model_params`] and [`image_size`].
pub const MODEL_NAMES: [&str; 9] = [
    "efficientnet-b0",
    "efficientnet-b1",
    "efficientnet-b2",
    "efficientnet-b3",
    "efficientnet-b4",
    "efficientnet-b5",
    "efficientnet-b6",
    "efficientnet-b7",
    "efficientnet-b8",
];

/// Stage layout shared by every variant before compound scaling.
pub const BASE_BLOCKS: [&str; 7] = [
    "r1_k3_s11_e1_i32_o16_se0.25",
    "r2_k3_s22_e6_i16_o24_se0.25",
    "r2_k5_s22_e6_i24_o40_se0.25",
    "r3_k3_s22_e6_i40_o80_se0.25",
    "r3_k5_s11_e6_i80_o112_se0.25",
    "r4_k5_s22_e6_i112_o192_se0.25",
    "r1_k3_s11_e6_i192_o320_se0.25",
];

/// Compound-scaling coefficients of a named variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantParams {
    pub width: f64,
    pub depth: f64,
    pub resolution: usize,
    pub dropout: f64,
}

impl VariantParams {
    pub fn of_tuple(width: f64, depth: f64, resolution: usize, dropout: f64) -> Self {
        Self {
            width,
            depth,
            resolution,
            dropout,
        }
    }
}

/// Caller-supplied replacements for the registry defaults.
#[derive(Config, Debug)]
pub struct ParamOverrides {
    pub num_classes: Option<usize>,
    pub dropout_rate: Option<f64>,
    pub drop_connect_rate: Option<f64>,
    pub batch_norm_momentum: Option<f64>,
    pub batch_norm_epsilon: Option<f64>,
    pub image_size: Option<usize>,
    /// Drops the image size so every convolution pads per call.
    pub dynamic_padding: Option<bool>,
}

impl ParamOverrides {
    pub fn apply(&self, params: GlobalParams) -> GlobalParams {
        let mut params = params;
        if let Some(v) = self.num_classes {
            params = params.with_num_classes(v);
        }
        if let Some(v) = self.dropout_rate {
            params = params.with_dropout_rate(v);
        }
        if let Some(v) = self.drop_connect_rate {
            params = params.with_drop_connect_rate(v);
        }
        if let Some(v) = self.batch_norm_momentum {
            params = params.with_batch_norm_momentum(v);
        }
        if let Some(v) = self.batch_norm_epsilon {
            params = params.with_batch_norm_epsilon(v);
        }
        if let Some(v) = self.image_size {
            params = params.with_image_size(Some(v));
        }
        if self.dynamic_padding == Some(true) {
            params = params.with_image_size(None);
        }
        params
    }
}

pub fn check_model_name(name: &str) -> error::Result<()> {
    if MODEL_NAMES.contains(&name) {
        Ok(())
    } else {
        Err(unknown_model(name))
    }
}

fn unknown_model(name: &str) -> CflError {
    CflError::invalid(format!(
        "model name {name} should be one of: {}",
        MODEL_NAMES.join(", ")
    ))
}

/// Width, depth, resolution and dropout of a named variant.
pub fn efficientnet_params(name: &str) -> error::Result<VariantParams> {
    let params = match name {
        "efficientnet-b0" => VariantParams::of_tuple(1.0, 1.0, 224, 0.2),
        "efficientnet-b1" => VariantParams::of_tuple(1.0, 1.1, 240, 0.2),
        "efficientnet-b2" => VariantParams::of_tuple(1.1, 1.2, 260, 0.3),
        "efficientnet-b3" => VariantParams::of_tuple(1.2, 1.4, 300, 0.3),
        "efficientnet-b4" => VariantParams::of_tuple(1.4, 1.8, 380, 0.4),
        "efficientnet-b5" => VariantParams::of_tuple(1.6, 2.2, 456, 0.4),
        "efficientnet-b6" => VariantParams::of_tuple(1.8, 2.6, 528, 0.5),
        "efficientnet-b7" => VariantParams::of_tuple(2.0, 3.1, 600, 0.5),
        "efficientnet-b8" => VariantParams::of_tuple(2.2, 3.6, 672, 0.5),
        _ => return Err(unknown_model(name)),
    };
    Ok(params)
}

/// Canonical input resolution of a named variant.
pub fn image_size(name: &str) -> error::Result<usize> {
    efficientnet_params(name).map(|p| p.resolution)
}

pub fn base_blocks_args() -> error::Result<Vec<BlockArgs>> {
    BASE_BLOCKS.iter().map(|s| s.parse()).collect()
}

/// Block list and global parameters of a named variant, with optional overrides.
pub fn model_params(
    name: &str,
    overrides: Option<&ParamOverrides>,
) -> error::Result<(Vec<BlockArgs>, GlobalParams)> {
    let variant = efficientnet_params(name)?;

    let params = GlobalParams::new(variant.width, variant.depth)
        .with_image_size(Some(variant.resolution))
        .with_dropout_rate(variant.dropout);

    let params = match overrides {
        Some(overrides) => overrides.apply(params),
        None => params,
    };

    Ok((base_blocks_args()?, params))
}
