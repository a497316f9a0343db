use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hostmux_channel::ChannelEvent;
use serde::Serialize;
use serde_json::{Map, Value};

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
struct EventOutput<'a> {
    schema_id: &'a str,
    channel: &'a str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    close: Option<Value>,
    timestamp: String,
}

pub fn print_event(channel: &str, event: &ChannelEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let (kind, payload, close) = match event {
                ChannelEvent::Message(payload) => ("message", Some(payload.as_str()), None),
                ChannelEvent::Close(close) => ("close", None, serde_json::to_value(close).ok()),
            };
            let out = EventOutput {
                schema_id: "https://schemas.3leaps.dev/hostmux/cli/v1/channel-event.schema.json",
                channel,
                event: kind,
                payload,
                close,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let (kind, detail) = describe(event);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "EVENT", "SIZE", "DETAIL"])
                .add_row(vec![
                    channel.to_string(),
                    kind.to_string(),
                    detail.len().to_string(),
                    detail,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let (kind, detail) = describe(event);
            println!("channel={channel} event={kind} {detail}");
        }
        OutputFormat::Raw => {
            if let ChannelEvent::Message(payload) = event {
                print_raw(payload.as_bytes());
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn describe(event: &ChannelEvent) -> (&'static str, String) {
    match event {
        ChannelEvent::Message(payload) => ("message", payload.clone()),
        ChannelEvent::Close(close) => ("close", close.to_string()),
    }
}

#[derive(Serialize)]
pub struct InfoOutput {
    pub schema_id: &'static str,
    pub endpoint: String,
    pub channel_seed: Option<String>,
    pub default_host: Option<String>,
    pub user: Map<String, Value>,
    pub system: Map<String, Value>,
    pub connected: bool,
}

pub fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Session Info:");
            println!("  Endpoint:     {}", out.endpoint);
            println!(
                "  Channel seed: {}",
                out.channel_seed.as_deref().unwrap_or("none")
            );
            println!(
                "  Default host: {}",
                out.default_host.as_deref().unwrap_or("localhost")
            );
            println!("  User:         {}", Value::Object(out.user.clone()));
            if !out.system.is_empty() {
                println!("  System:       {}", Value::Object(out.system.clone()));
            }
        }
        OutputFormat::Raw => {
            println!("{}", out.channel_seed.as_deref().unwrap_or_default());
        }
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use hostmux_frame::Close;

    use super::*;

    #[test]
    fn describes_events() {
        assert_eq!(
            describe(&ChannelEvent::Message("hello".to_string())),
            ("message", "hello".to_string())
        );
        assert_eq!(
            describe(&ChannelEvent::Close(Close::from("not-found"))),
            ("close", "not-found".to_string())
        );
    }
}
