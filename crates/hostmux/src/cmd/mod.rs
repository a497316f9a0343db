use std::time::Duration;

use clap::{Args, Subcommand};
use hostmux_channel::{PageLocation, Transport, TransportConfig, TransportManager};
use hostmux_frame::reasons;
use hostmux_transport::{WebSocketConfig, WebSocketConnector, DEFAULT_SUBPROTOCOL};

use crate::exit::{channel_error, transport_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod info;
pub mod open;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a channel and print what the backend sends on it.
    Open(OpenArgs),
    /// Connect, complete the handshake and print session metadata.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Open(args) => open::run(args, format).await,
        Command::Info(args) => info::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Where and how to reach the backend.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Socket URL (e.g. wss://console.example/socket). Wins over --page-url.
    #[arg(long, env = "HOSTMUX_URL")]
    pub url: Option<String>,
    /// URL of the console page; the socket URL and default host derive from it.
    #[arg(long, env = "HOSTMUX_PAGE_URL")]
    pub page_url: Option<String>,
    /// Extra request header ("Name: value"). Repeatable.
    #[arg(
        long = "header",
        short = 'H',
        env = "HOSTMUX_HEADER",
        value_name = "NAME: VALUE"
    )]
    pub headers: Vec<String>,
    /// WebSocket sub-protocol. Empty requests none.
    #[arg(long, default_value = DEFAULT_SUBPROTOCOL)]
    pub subprotocol: String,
    /// Time allowed for connect and handshake (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

impl ConnectArgs {
    pub fn manager(&self) -> CliResult<(TransportManager, Duration)> {
        let timeout = parse_duration(&self.timeout)?;
        let mut socket = match (&self.url, &self.page_url) {
            (Some(url), _) => WebSocketConfig::new(url.clone()),
            (None, Some(page_url)) => WebSocketConfig::from_page_url(page_url)
                .map_err(|err| transport_error("invalid page url", err))?,
            (None, None) => {
                return Err(CliError::new(
                    USAGE,
                    "one of --url or --page-url is required",
                ))
            }
        };
        socket.subprotocol = Some(self.subprotocol.clone()).filter(|p| !p.is_empty());
        socket.connect_timeout = timeout;
        for header in &self.headers {
            let (name, value) = parse_header(header)?;
            socket = socket.with_header(name, value);
        }

        let mut config = TransportConfig::default();
        if let Some(page_url) = &self.page_url {
            config = config.with_host_resolver(PageLocation::parse(page_url.clone()));
        }
        Ok((
            TransportManager::new(WebSocketConnector::new(socket), config),
            timeout,
        ))
    }
}

#[derive(Args, Debug)]
pub struct OpenArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Payload type of the channel (e.g. echo, stream, dbus-json3).
    #[arg(long, short = 'p')]
    pub payload: String,
    /// Target host. Defaults to the page's machine, or localhost.
    #[arg(long)]
    pub host: Option<String>,
    /// Extra open option. The value is parsed as JSON when it can be.
    #[arg(long = "option", short = 'o', value_name = "KEY=VALUE")]
    pub options: Vec<String>,
    /// Extra open options as a JSON object.
    #[arg(long = "options", value_name = "JSON")]
    pub options_json: Option<String>,
    /// Payload to send once open. Repeatable.
    #[arg(long, short = 'd', conflicts_with = "stdin")]
    pub data: Vec<String>,
    /// Send each stdin line as a payload.
    #[arg(long)]
    pub stdin: bool,
    /// Close the channel after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Wait for the session to become ready, giving up after `timeout`.
pub async fn ensure(manager: &TransportManager, timeout: Duration) -> CliResult<Transport> {
    match tokio::time::timeout(timeout, manager.ensure()).await {
        Ok(Ok(transport)) => Ok(transport),
        Ok(Err(err)) => Err(channel_error("connect failed", err)),
        Err(_) => {
            manager.close(Some(reasons::TIMEOUT));
            Err(CliError::new(
                TIMEOUT,
                format!("session not ready after {timeout:?}"),
            ))
        }
    }
}

fn parse_header(input: &str) -> CliResult<(String, String)> {
    match input.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(CliError::new(
            USAGE,
            format!("invalid header {input:?}: expected \"Name: value\""),
        )),
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(url: Option<&str>, page_url: Option<&str>) -> ConnectArgs {
        ConnectArgs {
            url: url.map(str::to_owned),
            page_url: page_url.map(str::to_owned),
            headers: vec!["Cookie: session=abc".to_string()],
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            timeout: "2s".to_string(),
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn headers_split_on_first_colon() {
        assert_eq!(
            parse_header("Authorization: Basic a2V5OnZhbHVl").unwrap(),
            ("Authorization".to_string(), "Basic a2V5OnZhbHVl".to_string())
        );
        assert_eq!(
            parse_header("X-Origin:https://console.example").unwrap(),
            ("X-Origin".to_string(), "https://console.example".to_string())
        );
        assert_eq!(parse_header("no-colon").unwrap_err().code, USAGE);
        assert_eq!(parse_header(": value").unwrap_err().code, USAGE);
    }

    #[test]
    fn url_or_page_url_is_required() {
        let err = connect(None, None).manager().unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn page_url_derives_socket_and_host() {
        let (manager, timeout) = connect(None, Some("https://console.example:9090/#server?machine=db1"))
            .manager()
            .unwrap();
        assert_eq!(timeout, Duration::from_secs(2));
        assert_eq!(manager.config().default_host().as_deref(), Some("db1"));
        assert!(format!("{manager:?}").contains("wss://console.example:9090/socket"));
    }

    #[test]
    fn url_wins_over_page_url() {
        let (manager, _) = connect(
            Some("ws://127.0.0.1:9090/socket"),
            Some("https://console.example/"),
        )
        .manager()
        .unwrap();
        assert!(format!("{manager:?}").contains("ws://127.0.0.1:9090/socket"));
    }

    #[test]
    fn page_url_with_bad_scheme_is_usage() {
        let err = connect(None, Some("file:///tmp/index.html"))
            .manager()
            .unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
