use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{Map, Value, json};

use super::{NotificationSender, SEND_TIMEOUT, SenderError, parse_config};
use crate::notifications::models::SmtpConfig;

const IMPLICIT_TLS_PORT: u16 = 465;

/// A sender for HTML mail over SMTP.
pub struct EmailSender;

impl EmailSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmailSender {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses an address, converting an internationalized domain to its
/// ASCII-compatible form.
fn ascii_address(raw: &str) -> Result<Address, SenderError> {
    let (local, domain) = raw
        .trim()
        .rsplit_once('@')
        .ok_or_else(|| SenderError::InvalidContent(format!("invalid email address: {raw}")))?;
    let domain = idna::domain_to_ascii(domain)
        .map_err(|_| SenderError::InvalidContent(format!("invalid email domain: {domain}")))?;
    Address::new(local, domain)
        .map_err(|e| SenderError::InvalidContent(format!("invalid email address {raw}: {e}")))
}

/// Email content is an object with `to_email`, `subject` and `text_body`.
/// Plain text that is not JSON is taken as the body alone.
fn email_content(content: &Value) -> Result<Map<String, Value>, SenderError> {
    let value = match content {
        Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or_else(|_| json!({ "text_body": s })),
        other => other.clone(),
    };
    let Value::Object(map) = value else {
        return Err(SenderError::InvalidContent("content must be a JSON object".to_string()));
    };
    for field in ["to_email", "subject", "text_body"] {
        if !map.contains_key(field) {
            return Err(SenderError::InvalidContent(format!(
                "content is missing required field: {field}"
            )));
        }
    }
    Ok(map)
}

fn string_field<'a>(content: &'a Map<String, Value>, field: &str) -> Result<&'a str, SenderError> {
    content
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SenderError::InvalidContent(format!("{field} must be a string")))
}

pub(crate) fn build_message(config: &SmtpConfig, content: &Value) -> Result<Message, SenderError> {
    let content = email_content(content)?;

    let from_name = content
        .get("from_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let from = Mailbox::new(from_name, ascii_address(&config.smtp_username).map_err(|_| {
        SenderError::InvalidConfiguration("smtp_username must be an email address".to_string())
    })?);

    let mut builder = Message::builder()
        .from(from)
        .subject(string_field(&content, "subject")?)
        .header(ContentType::TEXT_HTML);

    let recipients = string_field(&content, "to_email")?
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(ascii_address)
        .collect::<Result<Vec<_>, _>>()?;
    if recipients.is_empty() {
        return Err(SenderError::InvalidContent("to_email has no recipients".to_string()));
    }
    for recipient in recipients {
        builder = builder.to(Mailbox::new(None, recipient));
    }

    builder
        .body(string_field(&content, "text_body")?.to_string())
        .map_err(|e| SenderError::InvalidContent(e.to_string()))
}

/// Implicit TLS from the first byte; every other port speaks plaintext first.
fn implicit_tls(config: &SmtpConfig) -> bool {
    config.use_ssl || config.smtp_port == IMPLICIT_TLS_PORT
}

fn build_transport(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, SenderError> {
    let host = config.smtp_server.as_str();
    let builder = if implicit_tls(config) {
        AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| SenderError::InvalidConfiguration(format!("smtp_server: {e}")))?
    } else {
        // Plain connection that upgrades with STARTTLS when the server offers it.
        let tls = TlsParameters::new(host.to_string())
            .map_err(|e| SenderError::InvalidConfiguration(format!("smtp_server: {e}")))?;
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).tls(Tls::Opportunistic(tls))
    };

    Ok(builder
        .port(config.smtp_port)
        .credentials(Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        ))
        .timeout(Some(SEND_TIMEOUT))
        .build())
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError> {
        let config: SmtpConfig = parse_config(config)?;
        let message = build_message(&config, content)?;
        let mailer = build_transport(&config)?;

        mailer
            .send(message)
            .await
            .map_err(|e| SenderError::SendFailed(format!("SMTP delivery failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        serde_json::from_value(json!({
            "smtp_server": "smtp.example.com",
            "smtp_username": "alerts@例子.中国",
            "smtp_password": "hunter2",
            "smtp_port": "587"
        }))
        .unwrap()
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8(message.formatted()).unwrap()
    }

    #[test]
    fn recipients_share_one_to_header_with_ascii_domains() {
        let message = build_message(
            &config(),
            &json!({
                "to_email": "ops@example.com, oncall@公司.中国",
                "subject": "Disk full",
                "text_body": "<b>/var</b> is at 99%",
                "from_name": "Monitor"
            }),
        )
        .unwrap();

        let raw = formatted(&message);
        let to_line = raw
            .lines()
            .find(|line| line.starts_with("To: "))
            .expect("To header");
        assert!(to_line.contains("ops@example.com"));
        assert!(to_line.contains("oncall@xn--55qx5d.xn--fiqs8s"));
        assert_eq!(message.envelope().to().len(), 2);
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("Subject: Disk full"));
        assert!(raw.contains("Monitor"));
        assert_eq!(message.envelope().from().unwrap().domain(), "xn--fsqu00a.xn--fiqs8s");
    }

    #[test]
    fn plain_text_content_becomes_the_body_and_then_fails_for_recipients() {
        let err = build_message(&config(), &json!("just some text")).unwrap_err();
        assert!(matches!(err, SenderError::InvalidContent(_)));
        assert!(err.to_string().contains("to_email"));
    }

    #[test]
    fn missing_subject_is_named() {
        let err = build_message(&config(), &json!({"to_email": "a@b.c", "text_body": "x"})).unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn port_accepts_numeric_strings() {
        assert_eq!(config().smtp_port, 587);
        assert!(!config().use_ssl);
    }

    #[test]
    fn tls_mode_follows_use_ssl_and_port() {
        let default_port: SmtpConfig = serde_json::from_value(json!({
            "smtp_server": "smtp.example.com",
            "smtp_username": "a@example.com",
            "smtp_password": "hunter2"
        }))
        .unwrap();
        assert_eq!(default_port.smtp_port, 465);
        assert!(implicit_tls(&default_port));

        let forced = SmtpConfig {
            use_ssl: true,
            ..config()
        };
        assert_eq!(forced.smtp_port, 587);
        assert!(implicit_tls(&forced));

        assert!(!implicit_tls(&config()));
    }

    #[tokio::test]
    async fn invalid_port_is_a_config_error_without_the_password() {
        let err = EmailSender::new()
            .send(
                &json!({
                    "smtp_server": "smtp.example.com",
                    "smtp_username": "a@example.com",
                    "smtp_password": "hunter2",
                    "smtp_port": "not-a-port"
                }),
                &json!({"to_email": "b@example.com", "subject": "s", "text_body": "t"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
        assert!(!err.to_string().contains("hunter2"));
    }
}
