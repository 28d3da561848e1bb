use burn::tensor::{Tensor, activation, backend::Backend};

/// Swish (`x * sigmoid(x)`) evaluation strategy.
///
/// `MemoryEfficient` calls `activation::silu` and `Direct` writes out the product of the
/// input and its sigmoid. burn's `silu` is itself that product, so both variants build the
/// same graph and give the same values and gradients. Whether the gate is kept or
/// recomputed for the backward pass is decided by the checkpointing strategy of the
/// `Autodiff` backend, not by the variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Swish {
    #[default]
    MemoryEfficient,
    Direct,
}

impl Swish {
    pub fn new(memory_efficient: bool) -> Self {
        if memory_efficient {
            Swish::MemoryEfficient
        } else {
            Swish::Direct
        }
    }

    pub fn is_memory_efficient(&self) -> bool {
        matches!(self, Swish::MemoryEfficient)
    }

    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Swish::MemoryEfficient => activation::silu(x),
            Swish::Direct => x.clone() * activation::sigmoid(x),
        }
    }
}
