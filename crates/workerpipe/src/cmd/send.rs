use std::fs;
use std::process::Command;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;
use workerpipe_transport::{Diagnostics, OutboundMessage, Transport, TransportConfig};

use crate::cmd::SendArgs;
use crate::exit::{transport_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let message = OutboundMessage::new(args.kind.clone(), payload);

    let (program, worker_args) = args
        .worker
        .split_first()
        .ok_or_else(|| CliError::new(USAGE, "worker command must not be empty"))?;
    let mut command = Command::new(program);
    command.args(worker_args);

    let config = TransportConfig {
        request_timeout: Some(timeout),
        diagnostics: Diagnostics::Stderr,
        ..TransportConfig::default()
    };
    let transport = Transport::spawn_with_config(&mut command, config)
        .map_err(|err| transport_error("spawn failed", err))?;
    debug!(worker = ?transport.worker_id(), kind = %args.kind, id = args.id, "sending request");

    let result = transport.send_message(&message, args.id);
    let worker_pid = transport.worker_id();
    transport.close();

    let reply = result.map_err(|err| transport_error("send failed", err))?;
    print_reply(&reply, worker_pid, format);

    if reply.error().is_some() {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

/// Build the request payload, adding `id` when it carries no correlation
/// field of its own.
///
/// A correlation field that disagrees with `--id` is rejected: the reply
/// would carry that value and never reach the waiting request.
fn resolve_payload(args: &SendArgs) -> CliResult<Value> {
    let text = if let Some(json) = &args.json {
        Some(json.clone())
    } else if let Some(path) = &args.file {
        Some(fs::read_to_string(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), &err)
        })?)
    } else {
        None
    };

    let mut payload = match text {
        Some(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(CliError::new(USAGE, "payload must be a JSON object")),
            Err(err) => {
                return Err(CliError::new(
                    USAGE,
                    format!("payload is not valid JSON: {err}"),
                ))
            }
        },
        None => Map::new(),
    };

    let existing = ["compilation_id", "id"]
        .into_iter()
        .find_map(|field| payload.get(field).map(|value| (field, value)));
    match existing {
        None => {
            payload.insert("id".to_string(), Value::from(args.id));
        }
        Some((_, value)) if value.as_u64() == Some(u64::from(args.id)) => {}
        Some((field, value)) => {
            return Err(CliError::new(
                USAGE,
                format!("payload {field} {value} does not match --id {}", args.id),
            ))
        }
    }
    Ok(Value::Object(payload))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
