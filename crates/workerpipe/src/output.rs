use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use workerpipe_transport::InboundMessage;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    kind: &'a str,
    id: Option<u32>,
    error: bool,
    payload: &'a serde_json::Value,
    worker_pid: Option<u32>,
    timestamp: String,
}

/// Render one worker reply for stdout.
pub fn render_reply(
    reply: &InboundMessage,
    worker_pid: Option<u32>,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                kind: &reply.kind,
                id: reply.correlation_id(),
                error: reply.error().is_some(),
                payload: &reply.payload,
                worker_pid,
                timestamp: now_unix_seconds(),
            };
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "ID", "WORKER", "PAYLOAD"])
                .add_row(vec![
                    reply.kind.clone(),
                    display_id(reply.correlation_id()),
                    display_id(worker_pid),
                    reply.payload.to_string(),
                ]);
            table.to_string()
        }
        OutputFormat::Pretty => format!(
            "kind={} id={} worker={} payload={}",
            reply.kind,
            display_id(reply.correlation_id()),
            display_id(worker_pid),
            serde_json::to_string_pretty(&reply.payload).unwrap_or_default()
        ),
        OutputFormat::Raw => reply.payload.to_string(),
    }
}

pub fn print_reply(reply: &InboundMessage, worker_pid: Option<u32>, format: OutputFormat) {
    let rendered = render_reply(reply, worker_pid, format);
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{rendered}");
    let _ = out.flush();
}

fn display_id(id: Option<u32>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reply() -> InboundMessage {
        InboundMessage::new("version_response", json!({ "id": 4, "version": "1.2.0" }))
    }

    #[test]
    fn json_output_carries_correlation() {
        let rendered = render_reply(&reply(), Some(77), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(value["kind"], "version_response");
        assert_eq!(value["id"], 4);
        assert_eq!(value["error"], false);
        assert_eq!(value["worker_pid"], 77);
        assert_eq!(value["payload"]["version"], "1.2.0");
    }

    #[test]
    fn json_output_flags_error_replies() {
        let rendered = render_reply(
            &InboundMessage::protocol_error(9, "bad request"),
            None,
            OutputFormat::Json,
        );
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["error"], true);
        assert!(value["worker_pid"].is_null());
    }

    #[test]
    fn pretty_and_raw_output() {
        let pretty = render_reply(&reply(), None, OutputFormat::Pretty);
        assert!(pretty.starts_with("kind=version_response id=4 worker=- payload={"));

        let raw = render_reply(&reply(), None, OutputFormat::Raw);
        assert_eq!(raw, r#"{"id":4,"version":"1.2.0"}"#);
    }

    #[test]
    fn table_output_has_headers() {
        let table = render_reply(&reply(), Some(1), OutputFormat::Table);
        assert!(table.contains("KIND"));
        assert!(table.contains("version_response"));
    }
}
