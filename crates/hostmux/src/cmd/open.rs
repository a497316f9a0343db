use hostmux_channel::{Channel, ChannelEvent, ChannelOptions, Transport, TransportManager};
use hostmux_frame::Close;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::cmd::{ensure, OpenArgs};
use crate::exit::{
    channel_error, close_code, close_error, io_error, CliError, CliResult, SUCCESS, USAGE,
};
use crate::output::{print_event, OutputFormat};

pub async fn run(args: OpenArgs, format: OutputFormat) -> CliResult<i32> {
    let options = channel_options(&args)?;
    let (manager, timeout) = args.connect.manager()?;
    let transport = ensure(&manager, timeout).await?;

    let mut channel = Channel::open(transport.clone(), options);
    let id = match channel.opened().await {
        Ok(id) => id,
        Err(err) => {
            shutdown(&manager, &transport).await;
            return Err(channel_error("open failed", err));
        }
    };
    debug!(channel = %id, "channel open");

    for item in &args.data {
        channel.send(item.as_str());
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut reading = args.stdin;
    let mut interrupted = false;
    let mut received = 0usize;

    let close = loop {
        tokio::select! {
            event = channel.recv() => {
                let Some(event) = event else {
                    break None;
                };
                print_event(&id, &event, format);
                match event {
                    ChannelEvent::Close(close) => break Some(close),
                    ChannelEvent::Message(_) => {
                        received = received.saturating_add(1);
                        if args.count.is_some_and(|count| received >= count) {
                            channel.close(Close::default());
                        }
                    }
                }
            }
            line = stdin.next_line(), if reading => match line {
                Ok(Some(line)) => channel.send(line),
                Ok(None) => reading = false,
                Err(err) => {
                    shutdown(&manager, &transport).await;
                    return Err(io_error("stdin read failed", err));
                }
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                channel.close(Close::default());
            }
        }
    };

    drop(channel);
    shutdown(&manager, &transport).await;

    match close {
        Some(close) if close_code(&close) != SUCCESS => Err(close_error("channel closed", &close)),
        _ => Ok(SUCCESS),
    }
}

/// Close the session and wait until queued frames are on the wire.
async fn shutdown(manager: &TransportManager, transport: &Transport) {
    manager.close(None);
    transport.finished().await;
}

fn channel_options(args: &OpenArgs) -> CliResult<ChannelOptions> {
    let mut options = ChannelOptions::new(args.payload.as_str());
    if let Some(host) = &args.host {
        options = options.with_host(host.as_str());
    }

    if let Some(json) = &args.options_json {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("invalid --options: {err}")))?;
        let Value::Object(map) = value else {
            return Err(CliError::new(USAGE, "--options must be a JSON object"));
        };
        for (key, value) in map {
            options = options.with_option(key, value);
        }
    }

    for option in &args.options {
        let (key, value) = option.split_once('=').ok_or_else(|| {
            CliError::new(USAGE, format!("invalid option {option:?}: expected KEY=VALUE"))
        })?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        options = options.with_option(key, value);
    }

    Ok(options)
}
