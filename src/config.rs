use crate::docs::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
use crate::events::DEFAULT_MAX_SUBSCRIBERS;
use crate::feed::{webhook_url, FeedConfig};
use crate::store::DEFAULT_LOG_CAPACITY;
use clap::{Args, Parser, Subcommand};
use reqwest::Url;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Disposable webhook endpoints with live request inspection
#[derive(Debug, Parser)]
#[command(name = "webhook-tester")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "WEBHOOK_TESTER_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the capture and inspection server
    #[command(visible_alias = "start")]
    Serve(ServeArgs),

    /// Follow a webhook's request log from a running server
    Watch(WatchArgs),

    /// Send a canned provider payload to a webhook
    Simulate(SimulateArgs),

    /// List the canned provider payloads
    Templates,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "WEBHOOK_TESTER_BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: String,

    /// Externally reachable origin used when building webhook URLs
    #[arg(long, env = "WEBHOOK_TESTER_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Requests kept per webhook before the oldest is evicted
    #[arg(long, env = "WEBHOOK_TESTER_LOG_CAPACITY", default_value_t = DEFAULT_LOG_CAPACITY)]
    pub log_capacity: usize,

    /// Live listeners allowed per webhook
    #[arg(long, env = "WEBHOOK_TESTER_MAX_SUBSCRIBERS", default_value_t = DEFAULT_MAX_SUBSCRIBERS)]
    pub max_subscribers: usize,

    /// Largest inbound body accepted by the capture route
    #[arg(long, env = "WEBHOOK_TESTER_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_OPENAI_MODEL)]
    pub openai_model: String,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Base URL of a running server
    #[arg(long, env = "WEBHOOK_TESTER_SERVER", default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    #[arg(long)]
    pub webhook_id: String,

    #[arg(long, default_value_t = 2_000)]
    pub poll_interval_ms: u64,

    /// Upper bound on the retry delay after failed polls
    #[arg(long, default_value_t = 30_000)]
    pub max_backoff_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    pub fetch_timeout_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Base URL of a running server
    #[arg(long, env = "WEBHOOK_TESTER_SERVER", default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    #[arg(long)]
    pub webhook_id: String,

    /// Provider name, e.g. stripe or github
    #[arg(long)]
    pub service: String,

    /// Template event, e.g. payment_intent_succeeded
    #[arg(long)]
    pub event: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("webhook id is required")]
    MissingWebhookId,
}

/// Validated server settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub public_base_url: Option<String>,
    pub log_capacity: usize,
    pub max_subscribers: usize,
    pub max_body_bytes: usize,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            public_base_url: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
        }
    }
}

fn http_url(field: &'static str, raw: &str) -> Result<String, ConfigError> {
    parse_http_url(field, raw)?;
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_http_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|error| ConfigError::InvalidUrl {
        field,
        reason: error.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            field,
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(url)
}

fn non_zero<T: Default + PartialEq>(field: &'static str, value: T) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(ConfigError::Zero(field));
    }
    Ok(value)
}

impl TryFrom<ServeArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let bind_addr = args.bind_addr.trim().parse()?;
        let public_base_url = args
            .public_base_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| http_url("public base url", url.trim()))
            .transpose()?;

        Ok(Self {
            bind_addr,
            public_base_url,
            log_capacity: non_zero("log capacity", args.log_capacity)?,
            max_subscribers: non_zero("max subscribers", args.max_subscribers)?,
            max_body_bytes: non_zero("max body bytes", args.max_body_bytes)?,
            openai_api_key: args.openai_api_key.filter(|key| !key.trim().is_empty()),
            openai_base_url: http_url("openai base url", &args.openai_base_url)?,
            openai_model: args.openai_model,
        })
    }
}

impl WatchArgs {
    pub fn server_url(&self) -> Result<String, ConfigError> {
        http_url("server url", &self.server)
    }

    pub fn feed_config(&self) -> Result<FeedConfig, ConfigError> {
        if self.webhook_id.trim().is_empty() {
            return Err(ConfigError::MissingWebhookId);
        }
        let poll_interval = non_zero("poll interval", self.poll_interval_ms)?;
        let max_backoff = non_zero("max backoff", self.max_backoff_ms)?.max(poll_interval);
        let fetch_timeout = non_zero("fetch timeout", self.fetch_timeout_ms)?;
        Ok(FeedConfig {
            poll_interval: Duration::from_millis(poll_interval),
            max_backoff: Duration::from_millis(max_backoff),
            fetch_timeout: Duration::from_millis(fetch_timeout),
        })
    }
}

impl SimulateArgs {
    /// Capture URL of the target webhook.
    pub fn capture_url(&self) -> Result<String, ConfigError> {
        if self.webhook_id.trim().is_empty() {
            return Err(ConfigError::MissingWebhookId);
        }
        let server = parse_http_url("server url", &self.server)?;
        webhook_url(&server, self.webhook_id.trim(), &[])
            .map(String::from)
            .ok_or(ConfigError::InvalidUrl {
                field: "server url",
                reason: "cannot carry a path".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve(extra: &[&str]) -> ServeArgs {
        let mut argv = vec!["webhook-tester", "serve"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Serve(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn serve_defaults_validate() {
        let mut args = serve(&[]);
        // Keep the ambient environment out of the assertions.
        args.bind_addr = DEFAULT_BIND_ADDR.into();
        args.public_base_url = None;
        args.openai_api_key = None;
        args.openai_base_url = DEFAULT_OPENAI_BASE_URL.into();
        args.log_capacity = DEFAULT_LOG_CAPACITY;
        args.max_subscribers = DEFAULT_MAX_SUBSCRIBERS;
        args.max_body_bytes = DEFAULT_MAX_BODY_BYTES;

        let config = Config::try_from(args).unwrap();
        assert_eq!(config.bind_addr, Config::default().bind_addr);
        assert_eq!(config.log_capacity, 100);
        assert_eq!(config.max_subscribers, 50);
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut args = serve(&["--bind-addr", "not-an-addr"]);
        args.public_base_url = None;
        assert!(matches!(
            Config::try_from(args),
            Err(ConfigError::BindAddrParse(_))
        ));

        let mut args = serve(&["--bind-addr", "0.0.0.0:8080", "--log-capacity", "0"]);
        args.public_base_url = None;
        args.openai_base_url = DEFAULT_OPENAI_BASE_URL.into();
        assert!(matches!(
            Config::try_from(args),
            Err(ConfigError::Zero("log capacity"))
        ));

        let mut args = serve(&[
            "--bind-addr",
            "0.0.0.0:8080",
            "--public-base-url",
            "ftp://hooks.example.com",
        ]);
        args.log_capacity = DEFAULT_LOG_CAPACITY;
        args.max_subscribers = DEFAULT_MAX_SUBSCRIBERS;
        args.max_body_bytes = DEFAULT_MAX_BODY_BYTES;
        assert!(matches!(
            Config::try_from(args),
            Err(ConfigError::InvalidUrl { field: "public base url", .. })
        ));
    }

    #[test]
    fn watch_args_build_a_feed_config() {
        let cli = Cli::try_parse_from([
            "webhook-tester",
            "watch",
            "--server",
            "http://localhost:3000/",
            "--webhook-id",
            "abc123",
            "--poll-interval-ms",
            "500",
            "--max-backoff-ms",
            "100",
        ])
        .unwrap();
        let Command::Watch(args) = cli.command else {
            panic!("expected watch");
        };

        assert_eq!(args.server_url().unwrap(), "http://localhost:3000");
        let feed = args.feed_config().unwrap();
        assert_eq!(feed.poll_interval, Duration::from_millis(500));
        // Backoff never drops below the normal cadence.
        assert_eq!(feed.max_backoff, Duration::from_millis(500));
        assert_eq!(feed.fetch_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn simulate_builds_capture_url() {
        let args = SimulateArgs {
            server: "http://localhost:3000".into(),
            webhook_id: "abc".into(),
            service: "github".into(),
            event: "push".into(),
        };
        assert_eq!(
            args.capture_url().unwrap(),
            "http://localhost:3000/webhook/abc"
        );

        let odd = SimulateArgs {
            webhook_id: "a?b/c".into(),
            ..args.clone()
        };
        assert_eq!(
            odd.capture_url().unwrap(),
            "http://localhost:3000/webhook/a%3Fb%2Fc"
        );

        let blank = SimulateArgs {
            webhook_id: " ".into(),
            ..args
        };
        assert!(matches!(
            blank.capture_url(),
            Err(ConfigError::MissingWebhookId)
        ));
    }
}
