use argh::FromArgs;

use crate::models::conv::ConvType;

pub const DEFAULT_MODEL: &str = "efficientnet-b0";
pub const DEFAULT_OUTPUT_PREFIX: &str = "./cfl_output";

#[derive(FromArgs, PartialEq, Debug)]
/// EfficientNet edge and corner likelihood maps for room layout estimation.
pub struct CflCmd {
    #[argh(subcommand)]
    pub commands: Commands,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Commands {
    Infer(SubCommandInfer),
    ImageSize(SubCommandImageSize),
    Describe(SubCommandDescribe),
}

#[derive(FromArgs, PartialEq, Debug)]
/// Predict the edge and corner maps of an image
#[argh(subcommand, name = "infer")]
pub struct SubCommandInfer {
    #[argh(option)]
    /// image path to run inference on
    pub image: String,
    #[argh(option, default = "DEFAULT_MODEL.to_string()")]
    /// model variant, efficientnet-b0 to efficientnet-b8
    pub model: String,
    #[argh(option)]
    /// directory holding pretrained encoder records, random weights when missing
    pub weights: Option<String>,
    #[argh(option)]
    /// trained network checkpoint, takes precedence over --weights
    pub checkpoint: Option<String>,
    #[argh(option, default = "ConvType::Standard")]
    /// border handling: standard, or equi for wrap-around horizontal padding
    pub conv: ConvType,
    #[argh(switch)]
    /// use the AdvProp variant of the pretrained weights
    pub advprop: bool,
    #[argh(option, default = "DEFAULT_OUTPUT_PREFIX.to_string()")]
    /// prefix of the written _edges.png and _corners.png files
    pub out: String,
    #[argh(option)]
    /// binarize the saved maps at this probability
    pub threshold: Option<f32>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Print the input resolution of a model variant
#[argh(subcommand, name = "image-size")]
pub struct SubCommandImageSize {
    #[argh(option)]
    /// model variant
    pub model: String,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Print the block layout and the decoder skip taps of a model variant
#[argh(subcommand, name = "describe")]
pub struct SubCommandDescribe {
    #[argh(option, default = "DEFAULT_MODEL.to_string()")]
    /// model variant
    pub model: String,
}
