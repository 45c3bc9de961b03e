//! Order confirmation emails.
//!
//! Two modes:
//! 1. Send via Resend API (when `RESEND_API_KEY` is set)
//! 2. Disabled (no email sent, log only)
//!
//! Confirmation is best-effort. The pipeline hands the order to
//! [`spawn_order_confirmation`] after it commits and never looks back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::{Order, Purchase};

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Format a Unix timestamp as a human-readable date (e.g., "Jan 15, 2024")
fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "Unknown date".to_string())
}

fn format_amount(cents: i64, currency: &str) -> String {
    format!("{}.{:02} {}", cents / 100, (cents % 100).abs(), currency.to_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Email was sent successfully via Resend
    Sent,
    /// No API key configured; logged instead
    Disabled,
    /// Order has no customer email
    NoRecipient,
}

/// Sends the confirmation for a fulfilled order.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, order: &Order, purchases: &[Purchase]) -> Result<EmailSendResult>;
}

/// Fire-and-forget confirmation. Errors are logged and dropped; the caller's
/// response never waits on or depends on the outcome.
pub fn spawn_order_confirmation(
    notifier: Arc<dyn Notifier>,
    order: Order,
    purchases: Vec<Purchase>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.send_confirmation(&order, &purchases).await {
            Ok(result) => {
                tracing::debug!(session_id = %order.session_id, ?result, "Order confirmation handled")
            }
            Err(e) => tracing::error!(
                session_id = %order.session_id,
                error = %e,
                "Order confirmation failed"
            ),
        }
    })
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
    html: String,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

/// Email service using Resend API.
#[derive(Clone)]
pub struct EmailService {
    api_key: Option<String>,
    from_email: String,
    /// Base for the per-purchase download links
    public_base_url: String,
    http_client: Client,
}

impl EmailService {
    pub fn new(api_key: Option<String>, from_email: String, public_base_url: String) -> Self {
        Self {
            api_key,
            from_email,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            http_client: Client::new(),
        }
    }

    fn download_link(&self, purchase: &Purchase) -> String {
        format!("{}/downloads/{}", self.public_base_url, purchase.id)
    }

    fn compose(&self, order: &Order, purchases: &[Purchase]) -> (String, String, String) {
        let subject = "Your order is confirmed".to_string();
        let date = format_date(order.created_at);

        let mut text_items = String::new();
        let mut html_items = String::new();
        for p in purchases {
            let amount = format_amount(p.amount_cents, &p.currency);
            let link = self.download_link(p);
            text_items.push_str(&format!("- {} ({})\n  {}\n", p.product_key, amount, link));
            html_items.push_str(&format!(
                r#"<li><strong>{}</strong> ({}) <a href="{}">View purchase</a></li>"#,
                p.product_key, amount, link
            ));
        }

        let text = format!(
            "Thanks for your order!\n\nOrder {} (placed {})\n\n{}\nKeep this email: the links above are how you get to your purchases.",
            order.session_id, date, text_items
        );
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Thanks for your order!</h2>
<p style="color: #666;">Order {} (placed {})</p>
<ul>{}</ul>
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;">Keep this email: the links above are how you get to your purchases.</p>
</body>
</html>"#,
            order.session_id, date, html_items
        );

        (subject, text, html)
    }

    /// Send a request to Resend API with exponential backoff retry.
    ///
    /// Retries on transient errors (network issues, 5xx, 429 rate limit).
    /// Fails immediately on non-transient errors (4xx except 429).
    async fn send_request_with_retry(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
        session_id: &str,
    ) -> Result<EmailSendResult> {
        let mut last_error: Option<AppError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            if *delay_secs > 0 {
                tracing::warn!(attempt, delay_secs, "Retrying email send after transient failure");
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_resend_request(api_key, request).await {
                Ok(()) => {
                    tracing::info!(attempt, session_id = %session_id, "Order confirmation sent via Resend");
                    return Ok(EmailSendResult::Sent);
                }
                Err((error, true)) => last_error = Some(error),
                Err((error, false)) => return Err(error),
            }
        }

        tracing::error!(
            session_id = %session_id,
            attempts = RETRY_DELAYS.len() + 1,
            "Email send failed after all retries"
        );
        Err(last_error.unwrap_or_else(|| {
            AppError::Internal("Email service error: all retries exhausted".into())
        }))
    }

    /// Send a single request to Resend API.
    ///
    /// Returns Ok(()) on success, or Err((AppError, is_transient)) on failure.
    async fn send_resend_request(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> std::result::Result<(), (AppError, bool)> {
        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to Resend API");
                (AppError::Internal(format!("Email service error: {}", e)), true)
            })?;

        let status = response.status();
        if status.is_success() {
            let _result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                (AppError::Internal("Email service response error".into()), false)
            })?;
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let is_transient = status.as_u16() == 429 || status.is_server_error();
        if is_transient {
            tracing::warn!(status = %status, body = %body, "Resend API returned transient error");
        } else {
            tracing::error!(status = %status, body = %body, "Resend API returned non-transient error");
        }

        Err((
            AppError::Internal(format!("Email service error: {} - {}", status, body)),
            is_transient,
        ))
    }
}

#[async_trait]
impl Notifier for EmailService {
    async fn send_confirmation(&self, order: &Order, purchases: &[Purchase]) -> Result<EmailSendResult> {
        let Some(to_email) = order.customer_email.as_deref() else {
            tracing::warn!(session_id = %order.session_id, "Order has no customer email, skipping confirmation");
            return Ok(EmailSendResult::NoRecipient);
        };

        let (subject, text, html) = self.compose(order, purchases);

        let Some(api_key) = self.api_key.as_deref() else {
            tracing::info!(
                session_id = %order.session_id,
                to = %to_email,
                subject = %subject,
                purchases = purchases.len(),
                "Email disabled (no RESEND_API_KEY), confirmation logged only"
            );
            return Ok(EmailSendResult::Disabled);
        };

        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![to_email],
            subject,
            text,
            html,
        };
        self.send_request_with_retry(api_key, &request, &order.session_id).await
    }
}
