//! Output formatting for one-shot commands and the event monitor.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;

use hwlink_core::{AddressInfo, ConnectStep, EventKind, NotificationEvent, SignatureInfo};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a single serializable item; `text_fn` handles the text format.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    text_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    Ok(match format {
        OutputFormat::Text => text_fn(data),
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
    })
}

pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Text renderers ───────────────────────────────────────────────────

pub fn address_text(info: &AddressInfo) -> String {
    format!(
        "address     {}\npublic key  {}\nchain code  {}",
        info.address, info.public_key, info.chain_code
    )
}

pub fn signature_text(sig: &SignatureInfo) -> String {
    format!(
        "hash        {}\nvrs         {}\ncompact     {}\nder         {}",
        sig.post_sign_hash, sig.signature_vrs, sig.signature_compact, sig.signature_der
    )
}

/// One monitor line: kind, decoded status (if any) and the derived step.
pub fn event_line(event: &NotificationEvent, step: ConnectStep, color: bool) -> String {
    let kind = event.kind.to_string();
    let kind = if color {
        match event.kind {
            EventKind::HasTransport => kind.green().to_string(),
            EventKind::Disconnected => kind.red().to_string(),
            EventKind::WaitingTransport => kind.yellow().to_string(),
            EventKind::DeviceStatus => kind.cyan().to_string(),
        }
    } else {
        kind
    };

    let status = event
        .status()
        .map_or_else(String::new, |s| format!(" {s}"));
    let step = if color {
        step.dimmed().to_string()
    } else {
        step.to_string()
    };
    format!("{kind}{status}  [{step}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwlink_core::DeviceStatus;

    #[test]
    fn plain_event_line_shows_status_and_step() {
        let event = NotificationEvent::device_status(DeviceStatus::AppDoesNotSeemToBeOpen);
        let step = ConnectStep::default().apply(&event);
        assert_eq!(
            event_line(&event, step, false),
            "device-status AppDoesNotSeemToBeOpen (0x6e00)  [connected-app-closed]"
        );
    }

    #[test]
    fn json_output_uses_wire_names() {
        let info = AddressInfo {
            public_key: "02ab".into(),
            address: "SP00".into(),
            chain_code: "cc".into(),
        };
        let out = render_single(OutputFormat::JsonCompact, &info, address_text).expect("json");
        assert_eq!(out, r#"{"publicKey":"02ab","address":"SP00","chainCode":"cc"}"#);
    }
}
