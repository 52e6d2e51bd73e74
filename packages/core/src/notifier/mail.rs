//! SMTP delivery via `lettre`.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::credentials::{EmailClient, EmailServer};
use crate::notifier::{format_message, NotificationError, Notify};

const SUBJECT: &str = "New blog post";
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (`server.tls: true`, usually port 465).
    ImplicitTls,
    /// STARTTLS, refusing to continue without it. Used whenever a password
    /// would otherwise cross the wire in clear text.
    RequiredStartTls,
    /// STARTTLS when the server offers it, plain otherwise.
    OpportunisticStartTls,
}

pub fn security_for(server: &EmailServer, client: &EmailClient) -> Security {
    if server.tls {
        Security::ImplicitTls
    } else if !client.password.is_empty() {
        Security::RequiredStartTls
    } else {
        Security::OpportunisticStartTls
    }
}

pub struct MailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl MailNotifier {
    pub fn new(server: &EmailServer, client: &EmailClient) -> Result<Self, NotificationError> {
        let from = parse_mailbox(&client.email, "sender")?;
        let to = parse_mailbox(&client.send_to, "recipient")?;

        let builder = match security_for(server, client) {
            Security::ImplicitTls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&server.host).map_err(config_error)?
            }
            Security::RequiredStartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host)
                    .map_err(config_error)?
            }
            Security::OpportunisticStartTls => {
                let parameters = TlsParameters::new(server.host.clone()).map_err(config_error)?;
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&server.host)
                    .tls(Tls::Opportunistic(parameters))
            }
        };

        let mut builder = builder.port(server.port).timeout(Some(SMTP_TIMEOUT));
        if !client.password.is_empty() {
            builder = builder.credentials(Credentials::new(
                client.email.clone(),
                client.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    pub fn build_message(&self, site: &str, post_url: &str) -> Result<Message, NotificationError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(format_message(site, post_url))
            .map_err(|err| NotificationError::Config(err.to_string()))
    }
}

#[async_trait]
impl Notify for MailNotifier {
    fn channel(&self) -> &'static str {
        "mail"
    }

    async fn notify(&self, site: &str, post_url: &str) -> Result<(), NotificationError> {
        let message = self.build_message(site, post_url)?;

        self.transport
            .send(message)
            .await
            .map_err(|err| NotificationError::Transport {
                channel: "mail",
                message: err.to_string(),
            })?;

        tracing::debug!(site = %site, post = %post_url, "Mail sent");
        Ok(())
    }
}

fn config_error(err: lettre::transport::smtp::Error) -> NotificationError {
    NotificationError::Config(err.to_string())
}

fn parse_mailbox(address: &str, role: &str) -> Result<Mailbox, NotificationError> {
    address.trim().parse::<Mailbox>().map_err(|err| {
        NotificationError::Config(format!("invalid {} address '{}': {}", role, address, err))
    })
}
