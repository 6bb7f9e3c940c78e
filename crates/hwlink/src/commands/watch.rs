//! Live notification monitor.

use chrono::Local;
use futures_util::StreamExt;
use serde_json::json;

use hwlink_config::Config;
use hwlink_core::ConnectStep;

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::Device;

pub async fn handle(args: WatchArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let device = Device::open(config, &args.device)?;
    let mut events = device.manager.subscribe();
    device.manager.enable().await?;
    device.sim.plug();

    let color = output::should_color(global.color);
    let mut step = ConnectStep::default();
    let mut seen = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                step = step.apply(&event);

                let line = match global.output {
                    OutputFormat::Text => format!(
                        "{}  {}",
                        Local::now().format("%H:%M:%S%.3f"),
                        output::event_line(&event, step, color)
                    ),
                    OutputFormat::Json | OutputFormat::JsonCompact => {
                        json!({ "event": event, "step": step }).to_string()
                    }
                };
                output::print_output(&line);

                seen += 1;
                if args.count.is_some_and(|n| seen >= n) {
                    break;
                }
            }
        }
    }

    device.manager.disable().await;
    Ok(())
}
