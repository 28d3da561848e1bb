use std::path::Path;

use burn::{prelude::Backend, tensor::Tensor};
use image::GrayImage;

use super::pipeline::MAX_PIXEL_VAL;
use crate::error::{CflError, Result};

/// Writes a `[H, W]` probability map as an 8-bit grayscale image.
///
/// Values are clamped to `[0, 1]`. With a `threshold`, pixels at or above it become white
/// and everything else black.
pub fn save_probability_map<B: Backend>(
    map: Tensor<B, 2>,
    path: &Path,
    threshold: Option<f32>,
) -> Result<()> {
    let [height, width] = map.dims();

    let values = map
        .clamp(0.0, 1.0)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CflError::invalid(format!("cannot read probability map: {e:?}")))?;

    let buf: Vec<u8> = values
        .iter()
        .map(|&p| match threshold {
            Some(t) if p >= t => MAX_PIXEL_VAL as u8,
            Some(_) => 0,
            None => (p * MAX_PIXEL_VAL).round() as u8,
        })
        .collect();

    let image = GrayImage::from_vec(width as u32, height as u32, buf).ok_or_else(|| {
        CflError::shape(format!("{width}x{height} map does not fill its image buffer"))
    })?;

    image.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    type B = NdArray<f32>;

    fn temp_png(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("efficient-cfl-{}-{name}.png", std::process::id()))
    }

    #[test]
    fn test_map_round_trips_through_png() {
        let device = &NdArrayDevice::default();
        let map: Tensor<B, 2> = Tensor::from_data([[0.0, 0.5, 1.0], [2.0, -1.0, 0.25]], device);
        let path = temp_png("map");

        save_probability_map(map, &path, None).unwrap();
        let image = image::open(&path).unwrap().to_luma8();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.into_raw(), vec![0, 128, 255, 255, 0, 64]);
    }

    #[test]
    fn test_threshold_binarizes() {
        let device = &NdArrayDevice::default();
        let map: Tensor<B, 2> = Tensor::from_data([[0.2, 0.5, 0.9]], device);
        let path = temp_png("threshold");

        save_probability_map(map, &path, Some(0.5)).unwrap();
        let image = image::open(&path).unwrap().to_luma8();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(image.into_raw(), vec![0, 255, 255]);
    }
}
