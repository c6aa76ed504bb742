use async_trait::async_trait;
use courier_core::{DeliveryError, EmailMessage};
use lettre::transport::smtp::authentication::{Credentials, DEFAULT_MECHANISMS};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;
use crate::connector::SmtpConnector;
use crate::render::render;

/// SMTP connector that keeps one `lettre` session open between messages.
///
/// The session is a single TCP stream, so concurrent `send` calls take
/// turns on it.
pub struct LettreConnector {
    config: SmtpConfig,
    session: Option<Mutex<AsyncSmtpConnection>>,
}

impl std::fmt::Debug for LettreConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LettreConnector")
            .field("config", &self.config)
            .field("session", &self.session.as_ref().map(|_| "<AsyncSmtpConnection>"))
            .finish()
    }
}

impl LettreConnector {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn tls_parameters(&self) -> Result<TlsParameters, DeliveryError> {
        TlsParameters::builder(self.config.host.clone())
            .dangerous_accept_invalid_certs(self.config.accept_invalid_certs)
            .dangerous_accept_invalid_hostnames(self.config.accept_invalid_certs)
            .build()
            .map_err(|e| DeliveryError::Connect(format!("TLS parameters: {e}")))
    }

    async fn dial(&self) -> Result<AsyncSmtpConnection, DeliveryError> {
        let hello = ClientId::Domain(self.config.hello_name.clone());
        let implicit_tls = if self.config.implicit_tls {
            Some(self.tls_parameters()?)
        } else {
            None
        };

        debug!(host = %self.config.host, port = self.config.port, "dialing SMTP server");
        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (self.config.host.as_str(), self.config.port),
            Some(self.config.timeout()),
            &hello,
            implicit_tls,
            None,
        )
        .await
        .map_err(|e| DeliveryError::Connect(map_smtp_error(&e)))?;

        if self.config.starttls && !self.config.implicit_tls {
            if !connection.can_starttls() {
                connection.abort().await;
                return Err(DeliveryError::Connect(
                    "server does not advertise STARTTLS".to_owned(),
                ));
            }
            connection
                .starttls(self.tls_parameters()?, &hello)
                .await
                .map_err(|e| DeliveryError::Connect(map_smtp_error(&e)))?;
        }

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            connection
                .auth(DEFAULT_MECHANISMS, &Credentials::new(user.clone(), pass.clone()))
                .await
                .map_err(|e| DeliveryError::Connect(map_smtp_error(&e)))?;
        }

        Ok(connection)
    }
}

#[async_trait]
impl SmtpConnector for LettreConnector {
    fn connection_is_open(&self) -> bool {
        // A session busy in `send` counts as open.
        self.session
            .as_ref()
            .is_some_and(|session| !matches!(session.try_lock(), Ok(c) if c.has_broken()))
    }

    async fn connect(&mut self) -> Result<(), DeliveryError> {
        if let Some(previous) = self.session.take() {
            debug!("dropping previous SMTP session before redial");
            previous.into_inner().abort().await;
        }
        let connection = self.dial().await?;
        info!(host = %self.config.host, port = self.config.port, "SMTP session opened");
        self.session = Some(Mutex::new(connection));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeliveryError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let mut connection = session.into_inner();
        if let Err(e) = connection.quit().await {
            warn!(error = %e, "SMTP QUIT failed, aborting session");
            connection.abort().await;
            return Err(DeliveryError::Disconnect(e.to_string()));
        }
        info!(host = %self.config.host, "SMTP session closed");
        Ok(())
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        let session = self.session.as_ref().ok_or(DeliveryError::NotConnected)?;
        let rendered = render(message)?;
        let mut connection = session.lock().await;
        connection
            .send(rendered.envelope(), &rendered.formatted())
            .await
            .map_err(|e| DeliveryError::Send(map_smtp_error(&e)))?;
        debug!(subject = %message.subject, "message accepted by SMTP server");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

fn map_smtp_error(error: &lettre::transport::smtp::Error) -> String {
    if error.is_transient() {
        format!("transient SMTP error: {error}")
    } else if error.is_permanent() {
        format!("permanent SMTP error: {error}")
    } else {
        format!("SMTP error: {error}")
    }
}
