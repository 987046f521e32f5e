use std::time::Duration;

use lifecycle_core::error::AppError;
use lifecycle_core::notify::Notification;
use lifecycle_core::traits::Notifier;
use reqwest::Client;
use serde::Serialize;

const MAILJET_SEND_URL: &str = "https://api.mailjet.com/v3.1/send";
const DEFAULT_FROM_EMAIL: &str = "freitasmatheus@lunaltas.com";
const DEFAULT_FROM_NAME: &str = "equipe lunaltas";

/// Mailjet credentials and sender identity.
#[derive(Debug, Clone)]
pub struct MailjetConfig {
    pub api_key: String,
    pub api_secret: String,
    pub from_email: String,
    pub from_name: String,
}

impl MailjetConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            from_email: DEFAULT_FROM_EMAIL.to_string(),
            from_name: DEFAULT_FROM_NAME.to_string(),
        }
    }

    /// Read `MAILJET_API_KEY`, `MAILJET_API_SECRET`, `MAILJET_FROM_EMAIL` and
    /// `MAILJET_FROM_NAME`.
    ///
    /// Returns `Ok(None)` when no API key is configured.
    pub fn from_env() -> Result<Option<Self>, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, AppError> {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let Some(api_key) = non_empty("MAILJET_API_KEY") else {
            return Ok(None);
        };
        let api_secret = non_empty("MAILJET_API_SECRET").ok_or_else(|| {
            AppError::ConfigError("MAILJET_API_KEY is set but MAILJET_API_SECRET is not".into())
        })?;

        let mut config = Self::new(api_key, api_secret);
        if let Some(email) = non_empty("MAILJET_FROM_EMAIL") {
            config.from_email = email;
        }
        if let Some(name) = non_empty("MAILJET_FROM_NAME") {
            config.from_name = name;
        }
        Ok(Some(config))
    }
}

/// Sends notifications through Mailjet's v3.1 send API.
#[derive(Clone)]
pub struct MailjetNotifier {
    client: Client,
    config: MailjetConfig,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendRequest<'a> {
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Message<'a> {
    from: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    text_part: &'a str,
    #[serde(rename = "HTMLPart")]
    html_part: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl MailjetNotifier {
    pub fn new(config: MailjetConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::NotificationError(e.to_string()))?;
        Ok(Self {
            client,
            config,
            endpoint: MAILJET_SEND_URL.to_string(),
        })
    }

    /// Point at a different send endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body<'a>(&'a self, notification: &'a Notification) -> SendRequest<'a> {
        SendRequest {
            messages: vec![Message {
                from: Address {
                    email: &self.config.from_email,
                    name: Some(&self.config.from_name),
                },
                to: notification
                    .recipients
                    .iter()
                    .map(|email| Address { email, name: None })
                    .collect(),
                subject: &notification.subject,
                text_part: &notification.text,
                html_part: &notification.html,
            }],
        }
    }
}

impl Notifier for MailjetNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AppError> {
        if notification.recipients.is_empty() {
            return Err(AppError::NotificationError("no recipients".into()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .json(&self.request_body(notification))
            .send()
            .await
            .map_err(|e| AppError::NotificationError(format!("Mailjet request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NotificationError(format!(
                "Mailjet returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        tracing::debug!(
            subject = %notification.subject,
            recipients = notification.recipients.len(),
            "Email sent via Mailjet"
        );
        Ok(())
    }
}
