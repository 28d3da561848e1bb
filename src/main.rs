use std::process::ExitCode;

use burn::backend::{NdArray, ndarray::NdArrayDevice};
use efficient_cfl::{
    config::{CflCmd, Commands, SubCommandDescribe},
    error::Result,
    inference::{self, InferOptions},
    layers::SkipTap,
    models::{cfl::EfficientCfl, conv::ConvType, registry::ParamOverrides},
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "tch")]
type InferBackend = burn::backend::LibTorch;
#[cfg(not(feature = "tch"))]
type InferBackend = NdArray<f32>;

#[cfg(feature = "tch")]
fn device() -> burn::backend::libtorch::LibTorchDevice {
    burn::backend::libtorch::LibTorchDevice::Cuda(0)
}
#[cfg(not(feature = "tch"))]
fn device() -> NdArrayDevice {
    NdArrayDevice::default()
}

fn describe(cmd: &SubCommandDescribe) -> Result<()> {
    let overrides = ParamOverrides::new().with_dynamic_padding(Some(true));
    let model: EfficientCfl<NdArray<f32>> = EfficientCfl::from_name(
        &cmd.model,
        ConvType::Standard,
        Some(&overrides),
        &NdArrayDevice::default(),
    )?;
    let encoder = model.encoder();
    let taps = model.decoder().taps();

    let size = EfficientCfl::<NdArray<f32>>::image_size(&cmd.model)?;

    println!("{} ({size}x{size})", cmd.model);
    println!("  0  stem  {} channels", encoder.position_channels(0).unwrap_or_default());
    for (idx, block) in encoder.blocks().iter().enumerate() {
        let position = idx + 1;
        let tap = SkipTap::as_list()
            .into_iter()
            .find(|tap| taps.position(*tap) == position)
            .map(|tap| format!("  <- skip tap {}", tap.output_stride()))
            .unwrap_or_default();
        println!("{position:>3}  {}{tap}", block.args());
    }
    println!("     head  {} channels", encoder.head_channels());
    Ok(())
}

fn run(cmd: CflCmd) -> Result<()> {
    match cmd.commands {
        Commands::Infer(sub_command_infer) => {
            let options = InferOptions::from(sub_command_infer);
            inference::infer::<InferBackend>(&options, &device())?;
        }
        Commands::ImageSize(sub_command_image_size) => {
            let size = EfficientCfl::<NdArray<f32>>::image_size(&sub_command_image_size.model)?;
            println!("{size}");
        }
        Commands::Describe(sub_command_describe) => describe(&sub_command_describe)?,
    };
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli_cmd: CflCmd = argh::from_env();

    match run(cli_cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
