use std::fmt;
use std::str::FromStr;

use burn::config::Config;

use crate::error::{self, CflError};

/// Network-wide settings shared by every block.
///
/// `width_coefficient` and `depth_coefficient` are the compound-scaling multipliers of a
/// variant. When `image_size` is set, every convolution precomputes its padding for the
/// spatial size it will see; when it is `None` padding is computed per call.
#[derive(Config, Debug, PartialEq)]
pub struct GlobalParams {
    pub width_coefficient: f64,
    pub depth_coefficient: f64,
    pub image_size: Option<usize>,
    #[config(default = 0.2)]
    pub dropout_rate: f64,
    #[config(default = 0.99)]
    pub batch_norm_momentum: f64,
    #[config(default = 1e-3)]
    pub batch_norm_epsilon: f64,
    #[config(default = 0.2)]
    pub drop_connect_rate: f64,
    #[config(default = 8)]
    pub depth_divisor: usize,
    pub min_depth: Option<usize>,
    #[config(default = 1000)]
    pub num_classes: usize,
}

impl GlobalParams {
    /// Momentum as burn's `BatchNorm` expects it (weight of the new batch statistics).
    pub fn bn_momentum(&self) -> f64 {
        1.0 - self.batch_norm_momentum
    }
}

/// Scales a channel count by the width multiplier and rounds it to the nearest multiple of
/// the depth divisor, never dropping more than 10% below the scaled value.
pub fn round_filters(filters: usize, params: &GlobalParams) -> usize {
    let multiplier = params.width_coefficient;
    if multiplier == 0.0 {
        return filters;
    }

    let divisor = params.depth_divisor.max(1);
    let min_depth = params.min_depth.unwrap_or(divisor);
    let scaled = filters as f64 * multiplier;

    let mut new_filters = usize::max(
        min_depth,
        (scaled + divisor as f64 / 2.0) as usize / divisor * divisor,
    );
    if (new_filters as f64) < 0.9 * scaled {
        new_filters += divisor;
    }

    new_filters.max(1)
}

/// Scales a repeat count by the depth multiplier, rounding up.
pub fn round_repeats(repeats: usize, params: &GlobalParams) -> usize {
    let multiplier = params.depth_coefficient;
    if multiplier == 0.0 {
        return repeats;
    }

    ((repeats as f64 * multiplier).ceil() as usize).max(1)
}

/// One encoder stage.
///
/// Records are `Copy` and never changed in place: rescaling and the stride reset for
/// repeats produce new values through [`BlockArgs::scaled`] and [`BlockArgs::repeated`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockArgs {
    pub kernel_size: usize,
    pub num_repeat: usize,
    pub input_filters: usize,
    pub output_filters: usize,
    pub expand_ratio: usize,
    pub id_skip: bool,
    pub se_ratio: Option<f64>,
    pub stride: usize,
}

impl BlockArgs {
    /// Stage rescaled for a variant: filters through [`round_filters`], repeats through
    /// [`round_repeats`].
    pub fn scaled(&self, params: &GlobalParams) -> Self {
        BlockArgs {
            input_filters: round_filters(self.input_filters, params),
            output_filters: round_filters(self.output_filters, params),
            num_repeat: round_repeats(self.num_repeat, params),
            ..*self
        }
    }

    /// Arguments for the second and later blocks of a stage.
    pub fn repeated(&self) -> Self {
        BlockArgs {
            input_filters: self.output_filters,
            stride: 1,
            ..*self
        }
    }

    /// Channel count between the expansion and projection convolutions.
    pub fn expanded_filters(&self) -> usize {
        self.input_filters * self.expand_ratio
    }

    pub fn has_se(&self) -> bool {
        matches!(self.se_ratio, Some(r) if r > 0.0 && r <= 1.0)
    }

    pub fn has_residual(&self) -> bool {
        self.id_skip && self.stride == 1 && self.input_filters == self.output_filters
    }
}

/// Parses the compact stage notation, e.g. `r1_k3_s11_e1_i32_o16_se0.25`.
///
/// `r` repeats, `k` kernel, `s` stride (both axes, must agree), `e` expansion, `i`/`o`
/// filters, optional `se` ratio and an optional `noskip` flag.
impl FromStr for BlockArgs {
    type Err = CflError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut repeats = None;
        let mut kernel = None;
        let mut stride = None;
        let mut expand = None;
        let mut input = None;
        let mut output = None;
        let mut se_ratio = None;
        let mut id_skip = true;

        for op in s.split('_') {
            if op == "noskip" {
                id_skip = false;
                continue;
            }

            let split = op.find(|c: char| c.is_ascii_digit()).ok_or_else(|| {
                CflError::invalid(format!("block string {s}: option {op} has no value"))
            })?;
            let (key, value) = op.split_at(split);

            let int = |v: &str| {
                v.parse::<usize>().map_err(|_| {
                    CflError::invalid(format!("block string {s}: bad value {v} for {key}"))
                })
            };

            match key {
                "r" => repeats = Some(int(value)?),
                "k" => kernel = Some(int(value)?),
                "e" => expand = Some(int(value)?),
                "i" => input = Some(int(value)?),
                "o" => output = Some(int(value)?),
                "s" => {
                    let digits: Vec<usize> = value
                        .chars()
                        .map(|c| int(&c.to_string()))
                        .collect::<error::Result<_>>()?;
                    stride = match digits.as_slice() {
                        [s] => Some(*s),
                        [sh, sw] if sh == sw => Some(*sh),
                        _ => {
                            return Err(CflError::invalid(format!(
                                "block string {s}: only square strides are supported, got s{value}"
                            )));
                        }
                    };
                }
                "se" => {
                    se_ratio = Some(value.parse::<f64>().map_err(|_| {
                        CflError::invalid(format!("block string {s}: bad se ratio {value}"))
                    })?)
                }
                _ => {
                    return Err(CflError::invalid(format!(
                        "block string {s}: unknown option {key}"
                    )));
                }
            }
        }

        let need = |v: Option<usize>, name: &str| {
            v.ok_or_else(|| CflError::invalid(format!("block string {s}: missing {name}")))
        };

        Ok(BlockArgs {
            kernel_size: need(kernel, "kernel size (k)")?,
            num_repeat: need(repeats, "repeat count (r)")?,
            input_filters: need(input, "input filters (i)")?,
            output_filters: need(output, "output filters (o)")?,
            expand_ratio: need(expand, "expand ratio (e)")?,
            id_skip,
            se_ratio,
            stride: need(stride, "stride (s)")?,
        })
    }
}

impl fmt::Display for BlockArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r{}_k{}_s{}{}_e{}_i{}_o{}",
            self.num_repeat,
            self.kernel_size,
            self.stride,
            self.stride,
            self.expand_ratio,
            self.input_filters,
            self.output_filters
        )?;
        if let Some(se) = self.se_ratio {
            write!(f, "_se{se}")?;
        }
        if !self.id_skip {
            write!(f, "_noskip")?;
        }
        Ok(())
    }
}
