//! Alert delivery over email and SMS.
//!
//! Every recipient and every channel is an independent send: a failure is
//! logged and counted, and never stops delivery to anyone else.

use crate::errors::{Error, Result};
use crate::metrics::NOTIFY_FAILURES_TOTAL;
use crate::model::{Recipient, SensorReading};
use crate::threshold::Warning;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAILGUN_API_URL: &str = "https://api.mailgun.net/v3";
const TEXTBEE_API_URL: &str = "https://api.textbee.dev/api/v1/gateway/devices";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Who gets alerted.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn recipients(&self) -> Result<Vec<Recipient>>;
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_sms(&self, to: &str, message: &str) -> Result<()>;
}

/// Outcome of one dispatch, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Sends `warnings` to every recipient on every channel they have.
    /// Never fails; per-send errors are logged and counted in the report.
    async fn notify(
        &self,
        recipients: &[Recipient],
        warnings: &[Warning],
        reading: &SensorReading,
    ) -> DispatchReport;
}

/// Dispatcher over optional mail and SMS transports.
#[derive(Clone, Default)]
pub struct Notifier {
    mail: Option<Arc<dyn MailTransport>>,
    sms: Option<Arc<dyn SmsTransport>>,
}

impl Notifier {
    pub fn new(
        mail: Option<Arc<dyn MailTransport>>,
        sms: Option<Arc<dyn SmsTransport>>,
    ) -> Self {
        Self { mail, sms }
    }

    async fn notify_one(
        &self,
        recipient: &Recipient,
        warnings: &[Warning],
        sms_text: &str,
        reading: &SensorReading,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        if let (Some(mail), Some(email)) = (&self.mail, &recipient.email) {
            let body = alert_mail_body(&recipient.username, warnings, reading);
            match mail.send_mail(email, "Critical sensor alert", &body).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Failed to email alert to {}: {}", recipient.username, e);
                    NOTIFY_FAILURES_TOTAL.with_label_values(&["email"]).inc();
                    report.failed += 1;
                }
            }
        }

        if let (Some(sms), Some(phone)) = (&self.sms, &recipient.phone) {
            match sms.send_sms(phone, sms_text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Failed to text alert to {}: {}", recipient.username, e);
                    NOTIFY_FAILURES_TOTAL.with_label_values(&["sms"]).inc();
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[async_trait]
impl NotificationDispatcher for Notifier {
    async fn notify(
        &self,
        recipients: &[Recipient],
        warnings: &[Warning],
        reading: &SensorReading,
    ) -> DispatchReport {
        let sms_text = alert_sms_text(warnings, reading);
        let sends = recipients
            .iter()
            .map(|r| self.notify_one(r, warnings, &sms_text, reading));

        let report = join_all(sends)
            .await
            .into_iter()
            .fold(DispatchReport::default(), |acc, r| DispatchReport {
                delivered: acc.delivered + r.delivered,
                failed: acc.failed + r.failed,
            });

        info!(
            "Alert dispatched to {} recipients: {} delivered, {} failed",
            recipients.len(),
            report.delivered,
            report.failed
        );
        report
    }
}

fn warning_list(warnings: &[Warning]) -> String {
    warnings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn alert_sms_text(warnings: &[Warning], reading: &SensorReading) -> String {
    format!(
        "FARM ALERT: {}. T:{}C H:{}% M:{}%",
        warning_list(warnings),
        reading.temperature,
        reading.humidity,
        reading.moisture
    )
}

fn alert_mail_body(username: &str, warnings: &[Warning], reading: &SensorReading) -> String {
    format!(
        "Hi {},\n\nThe farm sensors reported readings outside the safe range: {}.\n\n\
         Temperature: {} C\nHumidity: {} %\nSoil moisture: {} %\n\n\
         Please check on your plants.\n",
        username,
        warning_list(warnings),
        reading.temperature,
        reading.humidity,
        reading.moisture
    )
}

/// Email over the Mailgun HTTP API.
pub struct MailgunMailer {
    client: reqwest::Client,
    api_key: String,
    domain: String,
    sender: String,
}

impl MailgunMailer {
    pub fn new(api_key: String, domain: String, sender: String) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            domain,
            sender,
        })
    }
}

#[async_trait]
impl MailTransport for MailgunMailer {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let url = format!("{}/{}/messages", MAILGUN_API_URL, self.domain);
        self.client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .form(&[
                ("from", self.sender.as_str()),
                ("to", to),
                ("subject", subject),
                ("text", body),
            ])
            .send()
            .await?
            .error_for_status()?;

        debug!("Mail sent to {}", to);
        Ok(())
    }
}

/// SMS over a TextBee gateway device.
pub struct TextBeeSms {
    client: reqwest::Client,
    api_key: String,
    device_id: String,
}

impl TextBeeSms {
    pub fn new(api_key: String, device_id: String) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            device_id,
        })
    }
}

#[async_trait]
impl SmsTransport for TextBeeSms {
    async fn send_sms(&self, to: &str, message: &str) -> Result<()> {
        let url = format!("{}/{}/send-sms", TEXTBEE_API_URL, self.device_id);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&json!({ "recipients": [to], "message": message }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Notify(format!(
                "TextBee returned {}",
                response.status()
            )));
        }

        debug!("SMS sent to {}", to);
        Ok(())
    }
}
