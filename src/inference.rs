use std::path::PathBuf;

use burn::tensor::{Tensor, activation::sigmoid, backend::Backend, s};
use tracing::info;

use crate::{
    config::SubCommandInfer,
    error::Result,
    models::{
        cfl::{EfficientCfl, IMAGENET_CLASSES},
        conv::ConvType,
        registry::{check_model_name, image_size},
    },
    torch_ops::resize_bilinear_aligned,
    transforms::{normalize::Preprocessing, pipeline::Transform, save_image::save_probability_map},
    weights::{FileWeightSource, load_checkpoint},
};

/// Everything a single prediction needs besides the device.
#[derive(Debug, Clone)]
pub struct InferOptions {
    pub image_path: PathBuf,
    pub model_name: String,
    /// Directory of pretrained encoder records; the encoder is random without it.
    pub weights_dir: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub conv_type: ConvType,
    pub advprop: bool,
    pub out_prefix: String,
    pub threshold: Option<f32>,
}

impl From<SubCommandInfer> for InferOptions {
    fn from(cmd: SubCommandInfer) -> Self {
        Self {
            image_path: cmd.image.into(),
            model_name: cmd.model,
            weights_dir: cmd.weights.map(PathBuf::from),
            checkpoint: cmd.checkpoint.map(PathBuf::from),
            conv_type: cmd.conv,
            advprop: cmd.advprop,
            out_prefix: cmd.out,
            threshold: cmd.threshold,
        }
    }
}

/// Files written by [`infer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferOutput {
    pub edges: PathBuf,
    pub corners: PathBuf,
}

impl InferOutput {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            edges: PathBuf::from(format!("{prefix}_edges.png")),
            corners: PathBuf::from(format!("{prefix}_corners.png")),
        }
    }
}

/// Predicts the edge and corner maps of one image and writes them next to each other as
/// grayscale PNG files, at the resolution of the source image.
///
/// The image is resized to the canonical resolution of the variant before the forward
/// pass, so the model keeps its static padding.
pub fn infer<B: Backend>(options: &InferOptions, device: &B::Device) -> Result<InferOutput> {
    check_model_name(&options.model_name)?;
    let size = image_size(&options.model_name)?;

    let model: EfficientCfl<B> = match &options.weights_dir {
        Some(dir) => EfficientCfl::from_pretrained(
            &options.model_name,
            options.conv_type,
            options.advprop,
            IMAGENET_CLASSES,
            3,
            &FileWeightSource::new(dir),
            device,
        )?,
        None => EfficientCfl::from_name(&options.model_name, options.conv_type, None, device)?,
    };

    let model = match &options.checkpoint {
        Some(path) => load_checkpoint(model, path, device)?,
        None => model,
    };

    let image = image::open(&options.image_path)?.to_rgb8();
    let (width, height) = image.dimensions();
    info!(
        "running {} on {} ({width}x{height})",
        options.model_name,
        options.image_path.display()
    );

    let input = Transform::new(image, device)
        .resize_bilinear(size, size)
        .normalize(Preprocessing::new(options.advprop))
        .batch();

    let likelihood = sigmoid(model.forward(input)?);
    let likelihood = resize_bilinear_aligned(likelihood, [height as usize, width as usize]);

    let output = InferOutput::with_prefix(&options.out_prefix);
    save_probability_map(channel(likelihood.clone(), 0), &output.edges, options.threshold)?;
    save_probability_map(channel(likelihood, 1), &output.corners, options.threshold)?;

    info!(
        "wrote {} and {}",
        output.edges.display(),
        output.corners.display()
    );
    Ok(output)
}

fn channel<B: Backend>(maps: Tensor<B, 4>, channel: usize) -> Tensor<B, 2> {
    let [_, _, h, w] = maps.dims();
    maps.slice(s![0, channel]).reshape([h, w])
}
