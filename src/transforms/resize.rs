use crate::torch_ops::resize_bilinear_aligned;

use super::pipeline::Transform;
use burn::prelude::Backend;

impl<B: Backend> Transform<B> {
    /// Resizes the image to `new_w` x `new_h` with bilinear interpolation. Corner pixels of
    /// the input and output are aligned, matching the upsampling used inside the decoder.
    ///
    /// A zero target size, or the current size, leaves the image untouched.
    pub fn resize_bilinear(&mut self, new_w: usize, new_h: usize) -> Self {
        let [_ch, image_h, image_w] = self.image.dims();

        if new_h == 0 || new_w == 0 {
            return self.clone();
        }

        if new_h == image_h && new_w == image_w {
            return self.clone();
        }

        let resized = resize_bilinear_aligned(self.image.clone().unsqueeze(), [new_h, new_w]);
        self.image = resized.squeeze_dim(0);

        self.clone()
    }
}
