//! Notifier configuration document.
//!
//! A YAML file selecting the delivery mode and holding the credentials for
//! both transports:
//!
//! ```yaml
//! mode: mail
//! server:
//!   host: smtp.example.com
//!   port: 465
//! client:
//!   email: sender@example.com
//!   password: secret
//!   send_to: me@example.com
//! telegram:
//!   channel: mychannel
//!   bot_token: "123:abc"
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Mail,
    Telegram,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Mail => write!(f, "mail"),
            Mode::Telegram => write!(f, "telegram"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailServer {
    pub host: String,
    pub port: u16,
    /// Connect with implicit TLS instead of a plain SMTP session.
    pub tls: bool,
}

impl EmailServer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailClient {
    pub email: String,
    pub password: String,
    pub send_to: String,
}

impl fmt::Debug for EmailClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailClient")
            .field("email", &self.email)
            .field("password", &"***")
            .field("send_to", &self.send_to)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub channel: String,
    pub bot_token: String,
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            bot_token: String::new(),
            api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub mode: Mode,
    #[serde(default)]
    pub server: EmailServer,
    #[serde(default)]
    pub client: EmailClient,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

impl NotifierConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, CredentialsError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Only the settings of the selected mode are required.
    pub fn validate(&self) -> Result<(), CredentialsError> {
        match self.mode {
            Mode::Mail => {
                require(&self.server.host, "server.host")?;
                if self.server.port == 0 {
                    return Err(CredentialsError::Invalid(
                        "server.port must be set for mail mode".to_string(),
                    ));
                }
                require(&self.client.email, "client.email")?;
                require(&self.client.send_to, "client.send_to")?;
            }
            Mode::Telegram => {
                require(&self.telegram.bot_token, "telegram.bot_token")?;
                require(&self.telegram.channel, "telegram.channel")?;
            }
        }
        Ok(())
    }

    /// Human-readable echo of the configuration. Never includes the password.
    pub fn summary(&self) -> String {
        format!(
            "mode: {}\nemail_server: {}\nclient: {} {}\ntelegram: {}@{}",
            self.mode,
            self.server.address(),
            self.client.email,
            self.client.send_to,
            self.telegram.bot_token,
            self.telegram.channel,
        )
    }
}

fn require(value: &str, key: &str) -> Result<(), CredentialsError> {
    if value.trim().is_empty() {
        return Err(CredentialsError::Invalid(format!("{} is required", key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIL_CONFIG: &str = "mode: mail
server:
  host: smtp.gmail.com
  port: 465
client:
  email: sender@example.com
  password: hunter2
  send_to: receiver@example.com
telegram:
  channel: mychannel
  bot_token: abcdef123456
";

    #[test]
    fn parses_mail_config() {
        let config = NotifierConfig::from_yaml(MAIL_CONFIG).unwrap();
        assert_eq!(config.mode, Mode::Mail);
        assert_eq!(config.server.address(), "smtp.gmail.com:465");
        assert!(!config.server.tls);
        assert_eq!(config.client.send_to, "receiver@example.com");
        assert_eq!(config.telegram.api_url, DEFAULT_TELEGRAM_API_URL);
    }

    #[test]
    fn summary_echoes_settings_without_password() {
        let config = NotifierConfig::from_yaml(MAIL_CONFIG).unwrap();
        let summary = config.summary();
        assert_eq!(
            summary,
            "mode: mail\n\
             email_server: smtp.gmail.com:465\n\
             client: sender@example.com receiver@example.com\n\
             telegram: abcdef123456@mychannel"
        );
        assert!(!summary.contains("hunter2"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn telegram_mode_only_needs_telegram_settings() {
        let config = NotifierConfig::from_yaml(
            "mode: telegram\ntelegram:\n  channel: news\n  bot_token: \"1:x\"\n",
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Telegram);
        assert_eq!(config.telegram.channel, "news");
    }

    #[test]
    fn mail_mode_without_server_is_invalid() {
        let err = NotifierConfig::from_yaml("mode: mail\nclient:\n  email: a@b\n  send_to: c@d\n")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::Invalid(ref m) if m.contains("server.host")));
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let err = NotifierConfig::from_yaml("mode: pigeon\n").unwrap_err();
        assert!(matches!(err, CredentialsError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = NotifierConfig::load(Path::new("/definitely/not/here.yml")).unwrap_err();
        assert!(matches!(err, CredentialsError::Io { .. }));
    }
}
