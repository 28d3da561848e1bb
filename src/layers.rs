use crate::error::{CflError, Result};

/// Encoder feature maps fused by the multi-scale decoder.
///
/// Each tap is the deepest encoder output at one resolution, i.e. the output of the block
/// right before a stride-2 block. The variants are listed in the order the decoder consumes
/// them, from the coarsest map (nominal output stride 16) to the finest (output stride 2).
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipTap {
    /// Last block before the final downsampling stage.
    Stride16,
    Stride8,
    Stride4,
    /// Last block at the stem resolution.
    Stride2,
}

impl SkipTap {
    /// All taps in decoder order.
    pub fn as_list() -> Vec<SkipTap> {
        vec![
            SkipTap::Stride16,
            SkipTap::Stride8,
            SkipTap::Stride4,
            SkipTap::Stride2,
        ]
    }

    pub fn count() -> usize {
        Self::as_list().len()
    }

    /// One-based position of the tap in decoder order.
    pub fn get_id(&self) -> usize {
        *self as usize + 1
    }

    /// Input-to-feature-map size ratio of the tap for the standard layout.
    pub fn output_stride(&self) -> usize {
        match self {
            SkipTap::Stride16 => 16,
            SkipTap::Stride8 => 8,
            SkipTap::Stride4 => 4,
            SkipTap::Stride2 => 2,
        }
    }
}

/// Encoder positions (stem = 0, block `i` = `i + 1`) read by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipTaps {
    pub stride_16: usize,
    pub stride_8: usize,
    pub stride_4: usize,
    pub stride_2: usize,
}

impl SkipTaps {
    /// Derives the taps from the stride of every block, in encoder order.
    ///
    /// A stride-2 block at position `p` closes the previous resolution, making `p - 1` a
    /// tap. The four deepest taps are kept.
    pub fn from_strides(strides: &[usize]) -> Result<Self> {
        let taps: Vec<usize> = strides
            .iter()
            .enumerate()
            .filter(|(_, stride)| **stride > 1)
            .map(|(block, _)| block)
            .collect();

        match taps.as_slice() {
            [.., stride_2, stride_4, stride_8, stride_16] => Ok(SkipTaps {
                stride_16: *stride_16,
                stride_8: *stride_8,
                stride_4: *stride_4,
                stride_2: *stride_2,
            }),
            _ => Err(CflError::invalid(format!(
                "the decoder needs {} downsampling blocks in the encoder, found {}",
                SkipTap::count(),
                taps.len()
            ))),
        }
    }

    pub fn position(&self, tap: SkipTap) -> usize {
        match tap {
            SkipTap::Stride16 => self.stride_16,
            SkipTap::Stride8 => self.stride_8,
            SkipTap::Stride4 => self.stride_4,
            SkipTap::Stride2 => self.stride_2,
        }
    }

    /// Deepest position referenced by any tap.
    pub fn deepest(&self) -> usize {
        SkipTap::as_list()
            .iter()
            .map(|tap| self.position(*tap))
            .max()
            .unwrap_or_default()
    }
}
