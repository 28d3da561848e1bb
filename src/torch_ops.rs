use burn::{
    prelude::Backend,
    tensor::{Device, Int, Tensor, TensorData, ops::PadMode},
};

pub fn linspace<B: Backend>(
    start: f32,
    end: f32,
    steps: usize,
    device: &Device<B>,
) -> Tensor<B, 1> {
    if steps == 1 {
        return Tensor::<B, 1>::from_floats([start], device);
    }

    Tensor::<B, 1, Int>::arange(0..steps as i64, device)
        .float()
        .mul_scalar((end - start) / (steps as f32 - 1.0))
        .add_scalar(start)
}

/// Bilinear resize of a `[N, C, H, W]` tensor with aligned corners: the corner pixels of
/// input and output coincide and interior samples are spread evenly between them.
pub fn resize_bilinear_aligned<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let x = lerp_axis(x, 2, size[0]);
    lerp_axis(x, 3, size[1])
}

fn lerp_axis<B: Backend>(x: Tensor<B, 4>, dim: usize, out_len: usize) -> Tensor<B, 4> {
    let in_len = x.dims()[dim];
    if in_len == out_len {
        return x;
    }

    let device = x.device();
    let positions = linspace::<B>(0.0, (in_len - 1) as f32, out_len, &device);

    let lo = positions.clone().floor().int();
    let hi = (lo.clone() + 1).clamp_max(in_len as i32 - 1);
    let frac = positions - lo.clone().float();

    let frac = if dim == 2 {
        frac.reshape([1, 1, out_len as i32, 1])
    } else {
        frac.reshape([1, 1, 1, out_len as i32])
    };

    let below = x.clone().select(dim, lo);
    let above = x.select(dim, hi);

    below.clone() + (above - below) * frac
}

/// Horizontal wrap-around padding for equirectangular inputs, zero padding vertically.
///
/// The left border is filled with the rightmost columns and the right border with the
/// leftmost columns, so a kernel straddling the image seam sees a continuous panorama.
pub fn pad_circular_width<B: Backend>(
    x: Tensor<B, 4>,
    padding: (usize, usize, usize, usize),
) -> Tensor<B, 4> {
    let (left, right, top, bottom) = padding;
    let [_, _, _, width] = x.dims();

    let x = if (left > 0 || right > 0) && width > 0 {
        let w = width as i64;
        let indices: Vec<i64> = (-(left as i64)..w + right as i64)
            .map(|i| i.rem_euclid(w))
            .collect();
        let len = indices.len();
        let indices = Tensor::<B, 1, Int>::from_data(
            TensorData::new(indices, [len]).convert::<B::IntElem>(),
            &x.device(),
        );
        x.select(3, indices)
    } else {
        x
    };

    if top == 0 && bottom == 0 {
        x
    } else {
        x.pad((0, 0, top, bottom), PadMode::Constant(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Tolerance, ops::FloatElem};

    type B = NdArray<f32>;
    type FT = FloatElem<B>;

    #[test]
    pub fn test_linspace() {
        let device = &NdArrayDevice::default();
        let ls = linspace::<B>(3.0, 10.0, 5, device);
        Tensor::<B, 1>::from_data([3.0, 4.75, 6.5, 8.25, 10.0], device)
            .into_data()
            .assert_approx_eq::<FT>(&ls.to_data(), Tolerance::default());
    }

    #[test]
    fn test_resize_bilinear_aligned() {
        let device = &NdArrayDevice::default();

        #[rustfmt::skip]
        let x: Tensor<B, 4> = Tensor::from_data(
            [[[[10.0, 20.0],
               [30.0, 40.0]]]],
            device,
        );

        let y = resize_bilinear_aligned(x, [4, 4]);

        Tensor::<B, 4>::from_data(
            [[[
                [10.00, 13.33, 16.67, 20.00],
                [16.67, 20.00, 23.33, 26.67],
                [23.33, 26.67, 30.00, 33.33],
                [30.00, 33.33, 36.67, 40.00],
            ]]],
            device,
        )
        .into_data()
        .assert_approx_eq::<FT>(&y.to_data(), Tolerance::absolute(1e-2));
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let device = &NdArrayDevice::default();
        let x = Tensor::<B, 4>::random([1, 2, 3, 5], burn::tensor::Distribution::Default, device);

        resize_bilinear_aligned(x.clone(), [3, 5])
            .into_data()
            .assert_approx_eq::<FT>(&x.to_data(), Tolerance::default());
    }

    #[test]
    fn test_pad_circular_width_wraps_columns() {
        let device = &NdArrayDevice::default();
        let x: Tensor<B, 4> = Tensor::from_data([[[[1.0, 2.0, 3.0]]]], device);

        let y = pad_circular_width(x, (1, 2, 1, 0));

        Tensor::<B, 4>::from_data(
            [[[
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [3.0, 1.0, 2.0, 3.0, 1.0, 2.0],
            ]]],
            device,
        )
        .into_data()
        .assert_approx_eq::<FT>(&y.to_data(), Tolerance::default());
    }
}
