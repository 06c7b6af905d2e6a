use std::sync::Arc;
use std::time::Duration;

use conmon_core::digest::Digest;
use conmon_core::error::AppError;
use conmon_core::traits::Notifier;
use htmd::HtmlToMarkdown;
use reqwest::Client;
use serde::Serialize;

/// Where and to whom digests are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub endpoint: String,
    pub token: String,
    pub from: String,
    pub to: Vec<String>,
}

impl MailConfig {
    /// Read configuration from environment variables.
    ///
    /// - `CONMON_MAIL_ENDPOINT` (required): relay url accepting JSON posts
    /// - `CONMON_MAIL_TOKEN` (required): sent as `X-Mail-Token`
    /// - `CONMON_MAIL_FROM` (required)
    /// - `CONMON_MAIL_TO` (required): comma-separated recipients
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::ConfigError(format!("{key} not set. Required for sending digests.")))
        };

        let to: Vec<String> = required("CONMON_MAIL_TO")?
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect();
        if to.is_empty() {
            return Err(AppError::ConfigError(
                "CONMON_MAIL_TO must list at least one recipient".into(),
            ));
        }

        Ok(Self {
            endpoint: required("CONMON_MAIL_ENDPOINT")?,
            token: required("CONMON_MAIL_TOKEN")?,
            from: required("CONMON_MAIL_FROM")?,
            to,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OutboundMessage<'a> {
    from: &'a str,
    to: String,
    subject: String,
    html_body: String,
    text_body: String,
}

/// Notifier posting each digest to an HTTP mail relay.
///
/// The message carries the rendered HTML plus a Markdown text part.
#[derive(Clone)]
pub struct HttpMailer {
    client: Client,
    config: MailConfig,
    converter: Arc<HtmlToMarkdown>,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            config,
            converter: Arc::new(
                HtmlToMarkdown::builder()
                    .skip_tags(vec!["style", "script"])
                    .build(),
            ),
        })
    }

    fn message(&self, digest: &Digest) -> Result<OutboundMessage<'_>, AppError> {
        let html_body = digest.render_html();
        let text_body = self
            .converter
            .convert(&html_body)
            .map_err(|e| AppError::NotificationError(format!("cannot render text body: {e}")))?;

        Ok(OutboundMessage {
            from: &self.config.from,
            to: self.config.to.join(", "),
            subject: digest.subject(),
            html_body,
            text_body,
        })
    }
}

impl Notifier for HttpMailer {
    async fn send(&self, digest: &Digest) -> Result<(), AppError> {
        let message = self.message(digest)?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("X-Mail-Token", &self.config.token)
            .json(&message)
            .send()
            .await
            .map_err(|e| AppError::NotificationError(format!("relay unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NotificationError(format!(
                "relay answered HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        tracing::info!(subject = %message.subject, recipients = self.config.to.len(), "Digest mailed");
        Ok(())
    }
}
