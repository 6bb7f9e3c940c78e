//! One-shot address and signing requests.

use hwlink_config::Config;

use crate::cli::{GlobalOpts, RequestArgs, SignArgs};
use crate::error::CliError;
use crate::output;

use super::Device;

pub async fn address(args: RequestArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let device = Device::open(config, &args.device)?;
    device.connect(args.wait).await?;

    let result = device.manager.request_address().await;
    device.manager.disable().await;
    let info = result?;

    let out = output::render_single(global.output, &info, output::address_text)?;
    output::print_output(&out);
    Ok(())
}

pub async fn sign(args: SignArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let device = Device::open(config, &args.request.device)?;
    device.connect(args.request.wait).await?;

    let result = device.manager.request_sign(&args.tx).await;
    device.manager.disable().await;
    let signature = result?;

    let out = output::render_single(global.output, &signature, output::signature_text)?;
    output::print_output(&out);
    Ok(())
}
