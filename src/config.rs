use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// How page markup is obtained from the file host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderMode {
    /// Single plain HTTP GET.
    Static,
    /// Headless browser that runs page scripts first.
    Dynamic,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "mediafire-dl-api", version, about = "Resolve MediaFire file pages to direct download links")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "RENDER_MODE", value_enum, default_value_t = RenderMode::Static)]
    pub render_mode: RenderMode,

    /// Overall timeout for the page GET, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Bound on navigation plus the download-button wait in dynamic mode.
    #[arg(long, env = "BROWSER_TIMEOUT_SECS", default_value_t = 30)]
    pub browser_timeout_secs: u64,

    #[arg(long, env = "CHROME_EXECUTABLE")]
    pub chrome_executable: Option<PathBuf>,

    #[arg(long, env = "UPSTREAM_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Accept invalid upstream TLS certificates.
    #[arg(long, env = "INSECURE_SSL", default_value_t = false)]
    pub insecure_ssl: bool,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            render_mode: RenderMode::Static,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            browser_timeout_secs: 30,
            chrome_executable: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            insecure_ssl: false,
        }
    }
}
