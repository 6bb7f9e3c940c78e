//! JSON-lines bridge for driving the manager from another process.
//!
//! Requests arrive on stdin, one object per line:
//! `{"id":1,"method":"sign","params":{"tx":"00..."}}`. Replies and
//! notifications share stdout:
//!
//! ```text
//! {"id":1,"result":{...}}
//! {"id":2,"error":{"code":"busy","message":"..."}}
//! {"event":{"kind":"has-transport"}}
//! ```
//!
//! Control methods run in order as they are read. `address` and `sign`
//! run concurrently so a second request can observe `busy`.

use std::str::FromStr;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::EnumString;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use hwlink_config::Config;
use hwlink_core::{CoreError, DeviceManager, EventSubscription};

use crate::cli::ServeArgs;
use crate::error::CliError;

use super::Device;

type Outbox = mpsc::UnboundedSender<Value>;

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "kebab-case")]
enum Method {
    Enable,
    Disable,
    State,
    Address,
    Sign,
    // Simulator scripting
    Plug,
    Unplug,
    OpenApp,
    CloseApp,
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Params,
}

#[derive(Debug, Default, Deserialize)]
struct Params {
    tx: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_code: Option<u16>,
}

impl ErrorBody {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            return_code: None,
        }
    }
}

impl From<CoreError> for ErrorBody {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::NoTransport => "no-transport",
            CoreError::Busy => "busy",
            CoreError::Device { .. } => "device-error",
            CoreError::MalformedInput { .. } => "malformed-input",
            CoreError::TransportOpenFailed { .. } | CoreError::Transport(_) => "transport-error",
        };
        Self {
            code,
            message: err.to_string(),
            return_code: err.return_code(),
        }
    }
}

type Reply = Result<Value, ErrorBody>;

fn reply(outbox: &Outbox, id: Value, result: Reply) {
    let msg = match result {
        Ok(result) => json!({ "id": id, "result": result }),
        Err(error) => json!({ "id": id, "error": error }),
    };
    // Only fails once the writer is gone, at which point nobody is listening.
    let _ = outbox.send(msg);
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(args: ServeArgs, config: &Config) -> Result<(), CliError> {
    let device = Device::open(config, &args.device)?;

    let (outbox, inbox) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_lines(inbox));

    let (stop_tx, stop_rx) = oneshot::channel();
    let forwarder = tokio::spawn(forward_events(
        device.manager.subscribe(),
        outbox.clone(),
        stop_rx,
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    warn!(error = %e, "request task failed");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                handle_line(&line, &device, &outbox, &mut in_flight).await;
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    device.manager.disable().await;

    let _ = stop_tx.send(());
    if let Err(e) = forwarder.await {
        warn!(error = %e, "event forwarder failed");
    }
    drop(outbox);
    if let Err(e) = writer.await {
        warn!(error = %e, "output writer failed");
    }
    Ok(())
}

async fn handle_line(line: &str, device: &Device, outbox: &Outbox, in_flight: &mut JoinSet<()>) {
    if line.trim().is_empty() {
        return;
    }

    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            reply(outbox, Value::Null, Err(ErrorBody::new("invalid-request", e.to_string())));
            return;
        }
    };
    debug!(method = %request.method, id = %request.id, "request");

    let Ok(method) = Method::from_str(&request.method) else {
        let message = format!("unknown method '{}'", request.method);
        reply(outbox, request.id, Err(ErrorBody::new("unknown-method", message)));
        return;
    };

    match method {
        Method::Address | Method::Sign => {
            let manager = device.manager.clone();
            let outbox = outbox.clone();
            in_flight.spawn(async move {
                let result = device_request(&manager, method, request.params).await;
                reply(&outbox, request.id, result);
            });
        }
        _ => {
            let result = control(device, method).await;
            reply(outbox, request.id, result);
        }
    }
}

async fn control(device: &Device, method: Method) -> Reply {
    let manager = &device.manager;
    match method {
        Method::Enable => manager.enable().await.map_err(ErrorBody::from)?,
        Method::Disable => manager.disable().await,
        Method::State => {
            return Ok(json!({
                "state": manager.connection_state(),
                "busy": manager.is_busy(),
            }));
        }
        Method::Plug => device.sim.plug(),
        Method::Unplug => device.sim.unplug(),
        Method::OpenApp => device.sim.set_app_open(true),
        Method::CloseApp => device.sim.set_app_open(false),
        Method::Address | Method::Sign => {
            return Err(ErrorBody::new("internal", "device request routed as control"));
        }
    }
    Ok(Value::Null)
}

async fn device_request(manager: &DeviceManager, method: Method, params: Params) -> Reply {
    let value = match method {
        Method::Address => serde_json::to_value(manager.request_address().await?),
        Method::Sign => {
            let tx = params
                .tx
                .ok_or_else(|| ErrorBody::new("invalid-params", "missing params.tx"))?;
            serde_json::to_value(manager.request_sign(&tx).await?)
        }
        _ => return Err(ErrorBody::new("internal", "control routed as device request")),
    };
    value.map_err(|e| ErrorBody::new("internal", e.to_string()))
}

// ── Output tasks ─────────────────────────────────────────────────────

async fn forward_events(
    mut events: EventSubscription,
    outbox: Outbox,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.next() => {
                let Some(event) = event else { break };
                if outbox.send(json!({ "event": event })).is_err() {
                    break;
                }
            }
            _ = &mut stop => {
                for event in events.drain() {
                    let _ = outbox.send(json!({ "event": event }));
                }
                break;
            }
        }
    }
}

async fn write_lines(mut inbox: mpsc::UnboundedReceiver<Value>) {
    let mut stdout = tokio::io::stdout();
    while let Some(msg) = inbox.recv().await {
        let mut line = msg.to_string();
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            warn!(error = %e, "stdout closed");
            break;
        }
        let _ = stdout.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwlink_core::DeviceStatus;

    #[test]
    fn methods_parse_in_kebab_case() {
        assert_eq!(Method::from_str("open-app").ok(), Some(Method::OpenApp));
        assert_eq!(Method::from_str("sign").ok(), Some(Method::Sign));
        assert!(Method::from_str("reboot").is_err());
    }

    #[test]
    fn device_errors_carry_return_code() {
        let body = ErrorBody::from(CoreError::Device {
            status: DeviceStatus::TransactionRejected,
        });
        let wire = serde_json::to_value(&body).expect("serialize");
        assert_eq!(wire["code"], "device-error");
        assert_eq!(wire["returnCode"], 0x6986);
    }

    #[test]
    fn request_without_params_parses() {
        let req: Request = serde_json::from_str(r#"{"id":7,"method":"state"}"#).expect("parse");
        assert_eq!(req.id, json!(7));
        assert!(req.params.tx.is_none());
    }
}
