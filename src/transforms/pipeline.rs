use burn::tensor::{Tensor, TensorData, backend::Backend};
use image::RgbImage;

/// Maximum pixel value for a RGB8 pixel
pub const MAX_PIXEL_VAL: f32 = 255.0;

/// Chained preprocessing of a single image before it enters the network.
///
/// `image` is a `[C, H, W]` tensor. It holds raw `0-255` pixel values until
/// [`Transform::normalize`] runs.
///
/// ```rust,ignore
/// let input = Transform::new(rgb_image, &device)
///     .resize_bilinear(224, 224)
///     .normalize(Preprocessing::ImageNet)
///     .batch();
/// ```
#[derive(Clone, Debug)]
pub struct Transform<B: Backend> {
    pub image: Tensor<B, 3>,
    pub device: <B as Backend>::Device,
}

impl<B: Backend> Transform<B> {
    pub fn from_tensor(image: Tensor<B, 3>) -> Self {
        let device = image.device();
        Self { image, device }
    }

    pub fn new(image: RgbImage, device: &<B as Backend>::Device) -> Self {
        Self {
            image: Self::rgb_img_as_tensor(image, device),
            device: device.clone(),
        }
    }

    /// Ends the chain with the `[C, H, W]` image.
    pub fn finish(self) -> Tensor<B, 3> {
        self.image
    }

    /// Ends the chain with a batch of one, `[1, C, H, W]`.
    pub fn batch(self) -> Tensor<B, 4> {
        self.image.unsqueeze()
    }

    /// Converts an `image::RgbImage` into a `[3, H, W]` tensor. Pixel values stay in the
    /// `0-255` range.
    pub fn rgb_img_as_tensor(image: RgbImage, device: &B::Device) -> Tensor<B, 3> {
        let [width, height] = [image.width() as usize, image.height() as usize];
        let img_vec: Vec<f32> = image.into_raw().iter().map(|&p| p as f32).collect();

        Tensor::<B, 3>::from_data(
            TensorData::new(img_vec, [height, width, 3]).convert::<B::FloatElem>(),
            device,
        )
        .permute([2, 0, 1])
    }
}

/// Creates an RGB image filled with a single colour.
pub fn create_test_image(width: u32, height: u32, pattern: [u8; 3]) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    let img_pattern: image::Rgb<u8> = image::Rgb(pattern);

    for px in img.pixels_mut() {
        *px = img_pattern;
    }

    img
}
