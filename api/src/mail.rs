use async_trait::async_trait;
use serde::Deserialize;

const POSTMARK_API_URL: &str = "https://api.postmarkapp.com/email";

/// A message ready to hand to the mail provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    /// Provider-side metadata (invitation id, event id, ...)
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Provider answered with a non-success status
    #[error("{message}")]
    Rejected {
        status: i64,
        body: String,
        message: String,
    },
    #[error("mail transport error: {0}")]
    Transport(String),
}

impl MailError {
    pub fn status(&self) -> Option<i64> {
        match self {
            MailError::Rejected { status, .. } => Some(*status),
            MailError::Transport(_) => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            MailError::Rejected { body, .. } => Some(body),
            MailError::Transport(_) => None,
        }
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<SentMessage, MailError>;

    /// Whether messages actually leave the process.
    fn delivers(&self) -> bool {
        true
    }
}

/// Postmark HTTP API sender.
pub struct PostmarkMailSender {
    client: reqwest::Client,
    server_token: String,
    message_stream: String,
    from: String,
}

impl PostmarkMailSender {
    pub fn new(server_token: String, message_stream: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_token,
            message_stream,
            from,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkResponse {
    #[serde(rename = "MessageID")]
    message_id: Option<String>,
    error_code: Option<i64>,
    message: Option<String>,
}

#[async_trait]
impl MailSender for PostmarkMailSender {
    async fn send(&self, email: OutboundEmail) -> Result<SentMessage, MailError> {
        let response = self
            .client
            .post(POSTMARK_API_URL)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", &self.server_token)
            .json(&serde_json::json!({
                "From": self.from,
                "To": email.to,
                "Subject": email.subject,
                "HtmlBody": email.html_body,
                "TextBody": email.text_body,
                "MessageStream": self.message_stream,
                "Metadata": email.metadata,
            }))
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<PostmarkResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(p) if status.is_success() && p.error_code.unwrap_or(0) == 0 => {
                tracing::info!(to = %email.to, message_id = ?p.message_id, "Email sent");
                Ok(SentMessage {
                    message_id: p.message_id,
                })
            }
            parsed => {
                let message = parsed
                    .and_then(|p| p.message)
                    .unwrap_or_else(|| format!("Mail provider returned {status}"));
                tracing::warn!(to = %email.to, status = status.as_u16(), "Email rejected: {}", message);
                Err(MailError::Rejected {
                    status: status.as_u16() as i64,
                    body,
                    message,
                })
            }
        }
    }
}

/// Logs messages instead of sending them. Used when no provider token is set.
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, email: OutboundEmail) -> Result<SentMessage, MailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email not delivered (no mail provider configured)"
        );
        Ok(SentMessage { message_id: None })
    }

    fn delivers(&self) -> bool {
        false
    }
}

/// Minimal HTML escaping for values interpolated into mail bodies.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>Tom & \"Jerry\"</b>"), "&lt;b&gt;Tom &amp; &quot;Jerry&quot;&lt;/b&gt;");
    }

    #[test]
    fn rejection_exposes_status_and_body() {
        let err = MailError::Rejected {
            status: 422,
            body: "{}".into(),
            message: "bad".into(),
        };
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.body(), Some("{}"));
        assert_eq!(err.to_string(), "bad");
        assert_eq!(MailError::Transport("x".into()).status(), None);
    }

    #[test]
    fn postmark_response_parses() {
        let parsed: PostmarkResponse =
            serde_json::from_str(r#"{"MessageID":"abc","ErrorCode":0,"Message":"OK","To":"a@b.co"}"#).unwrap();
        assert_eq!(parsed.message_id.as_deref(), Some("abc"));
        assert_eq!(parsed.error_code, Some(0));
    }

    #[tokio::test]
    async fn log_sender_never_delivers() {
        let sender = LogMailSender;
        assert!(!sender.delivers());
        let sent = sender
            .send(OutboundEmail {
                to: "a@b.co".into(),
                subject: "Hi".into(),
                html_body: String::new(),
                text_body: "Hi".into(),
                metadata: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(sent.message_id, None);
    }
}
