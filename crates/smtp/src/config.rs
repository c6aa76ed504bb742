use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SMTP connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    #[serde(default = "default_host")]
    pub host: String,

    /// SMTP server port. Defaults to 587 (STARTTLS submission port).
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Upgrade the plain connection with STARTTLS. Defaults to `true`.
    #[serde(default = "default_starttls")]
    pub starttls: bool,

    /// Wrap the connection in TLS from the first byte (port 465 style).
    /// Takes precedence over `starttls`.
    #[serde(default)]
    pub implicit_tls: bool,

    /// Skip certificate and hostname verification.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Name announced in `EHLO`.
    #[serde(default = "default_hello_name")]
    pub hello_name: String,

    /// Dial and command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Seconds without traffic after which the session is released.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("starttls", &self.starttls)
            .field("implicit_tls", &self.implicit_tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("hello_name", &self.hello_name)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .finish()
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            starttls: default_starttls(),
            implicit_tls: false,
            accept_invalid_certs: false,
            hello_name: default_hello_name(),
            timeout_seconds: default_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

fn default_hello_name() -> String {
    "localhost".to_owned()
}

fn default_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    30
}
