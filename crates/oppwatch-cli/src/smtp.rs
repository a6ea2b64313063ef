//! SmtpNotifier - 新着 1 件につきメール 1 通
//!
//! STARTTLS + login。送信失敗は bool に畳んで core に返す（例外は境界を越えない）。

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

use oppwatch_core::domain::Record;
use oppwatch_core::ports::Notifier;

use crate::email;
use crate::settings::SmtpSettings;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    dashboard_url: String,
}

impl SmtpNotifier {
    /// Validates every address up front so a typo fails at startup.
    pub fn new(settings: &SmtpSettings, dashboard_url: &str) -> Result<Self, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from: mailbox(&settings.sender)?,
            to: settings
                .recipients
                .iter()
                .map(|r| mailbox(r))
                .collect::<Result<_, _>>()?,
            dashboard_url: dashboard_url.to_string(),
        })
    }

    async fn send(&self, record: &Record) -> Result<(), NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(email::subject(record))
            .header(ContentType::TEXT_HTML);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let message = builder.body(email::render_html(record, &self.dashboard_url))?;

        self.transport.send(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, record: &Record) -> bool {
        match self.send(record).await {
            Ok(()) => {
                info!(id = record.id(), recipients = self.to.len(), "email sent");
                true
            }
            Err(e) => {
                warn!(id = record.id(), error = %e, "email failed");
                false
            }
        }
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}
