use burn::tensor::{Distribution, Tensor, backend::Backend};

/// Stochastic depth: drops the whole residual branch of a sample.
///
/// One Bernoulli bit with probability `survival` is drawn per batch element and shared by
/// every channel and spatial position of that element. Survivors are scaled by
/// `1 / survival` so the expected value is unchanged. Outside training the input is
/// returned untouched.
pub fn drop_connect<B: Backend>(x: Tensor<B, 4>, survival: f64, training: bool) -> Tensor<B, 4> {
    if !training || survival >= 1.0 {
        return x;
    }

    if survival <= 0.0 {
        return x.zeros_like();
    }

    let [batch, _, _, _] = x.dims();
    let mask = Tensor::<B, 4>::random(
        [batch, 1, 1, 1],
        Distribution::Bernoulli(survival),
        &x.device(),
    );

    x.div_scalar(survival) * mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Tolerance, ops::FloatElem};

    type B = NdArray<f32>;
    type FT = FloatElem<B>;

    #[test]
    fn test_eval_mode_is_identity() {
        let device = &NdArrayDevice::default();
        let x = Tensor::<B, 4>::random([3, 2, 5, 5], Distribution::Default, device);

        for survival in [0.0, 0.2, 0.8, 1.0] {
            drop_connect(x.clone(), survival, false)
                .into_data()
                .assert_approx_eq::<FT>(&x.to_data(), Tolerance::default());
        }
    }

    #[test]
    fn test_full_survival_is_identity_in_training() {
        let device = &NdArrayDevice::default();
        let x = Tensor::<B, 4>::ones([2, 2, 3, 3], device);

        drop_connect(x.clone(), 1.0, true)
            .into_data()
            .assert_approx_eq::<FT>(&x.to_data(), Tolerance::default());
    }

    #[test]
    fn test_mask_is_per_sample() {
        let device = &NdArrayDevice::default();
        let x = Tensor::<B, 4>::ones([64, 3, 4, 4], device);

        let y = drop_connect(x, 0.5, true);
        let values = y.into_data().to_vec::<f32>().unwrap();

        // every sample is either dropped entirely or scaled entirely by 1 / 0.5
        for sample in values.chunks(3 * 4 * 4) {
            let first = sample[0];
            assert!(first == 0.0 || (first - 2.0).abs() < 1e-6);
            assert!(sample.iter().all(|&v| v == first));
        }
    }

    #[test]
    fn test_zero_survival_drops_everything() {
        let device = &NdArrayDevice::default();
        let x = Tensor::<B, 4>::ones([4, 1, 2, 2], device);

        let total = drop_connect(x, 0.0, true).sum().into_scalar();
        assert_eq!(total, 0.0);
    }
}
