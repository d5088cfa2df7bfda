use lettre::message::{header::ContentType, Mailbox};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

const FROM_EMAIL: &str = "noreply@theforgeinitiative.org";
const FROM_NAME: &str = "TFI CheckMeIn";

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to_name: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone)]
enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    /// No relay configured; messages only go to the log.
    Log,
    #[cfg(test)]
    Memory(std::sync::Arc<std::sync::Mutex<Vec<OutgoingMail>>>),
}

/// Sends notification mail through a plain SMTP relay.
///
/// Delivery failures never fail the request that triggered them; they are
/// logged along with the message that would have gone out.
#[derive(Clone)]
pub struct Mailer {
    transport: Transport,
}

impl Mailer {
    pub fn new(smtp_host: Option<&str>) -> Self {
        let transport = match smtp_host {
            Some(host) if !host.trim().is_empty() => {
                tracing::info!(host = %host, "Mail relay configured");
                Transport::Smtp(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host.trim()).build())
            }
            _ => {
                tracing::info!("No mail relay configured, mail will be logged");
                Transport::Log
            }
        };

        Self { transport }
    }

    #[cfg(test)]
    pub fn memory() -> (Self, std::sync::Arc<std::sync::Mutex<Vec<OutgoingMail>>>) {
        let outbox = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        (
            Self {
                transport: Transport::Memory(outbox.clone()),
            },
            outbox,
        )
    }

    pub async fn send(&self, to_name: &str, to_email: &str, subject: &str, body: &str) {
        let mail = OutgoingMail {
            to_name: to_name.to_string(),
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        match &self.transport {
            Transport::Smtp(smtp) => match build_message(&mail) {
                Ok(message) => {
                    if let Err(e) = smtp.send(message).await {
                        tracing::warn!(error = %e, to = %mail.to_email, subject = %mail.subject, body = %mail.body, "Email would have been");
                    } else {
                        tracing::info!(to = %mail.to_email, subject = %mail.subject, "Email sent");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, to = %mail.to_email, subject = %mail.subject, "Could not build email");
                }
            },
            Transport::Log => {
                tracing::warn!(to = %mail.to_email, subject = %mail.subject, body = %mail.body, "Email would have been");
            }
            #[cfg(test)]
            Transport::Memory(outbox) => {
                if let Ok(mut outbox) = outbox.lock() {
                    outbox.push(mail);
                }
            }
        }
    }
}

fn build_message(mail: &OutgoingMail) -> anyhow::Result<Message> {
    let from = Mailbox::new(Some(FROM_NAME.to_string()), FROM_EMAIL.parse::<Address>()?);
    let to = Mailbox::new(Some(mail.to_name.clone()), mail.to_email.trim().parse::<Address>()?);

    Ok(Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(mail.body.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_message() {
        let mail = OutgoingMail {
            to_name: "Shop Certifiers".to_string(),
            to_email: "certifiers@example.org".to_string(),
            subject: "New Certification".to_string(),
            body: "Hello".to_string(),
        };

        assert!(build_message(&mail).is_ok());
    }

    #[test]
    fn test_bad_address_is_rejected() {
        let mail = OutgoingMail {
            to_name: "Nobody".to_string(),
            to_email: "not an address".to_string(),
            subject: "x".to_string(),
            body: "y".to_string(),
        };

        assert!(build_message(&mail).is_err());
    }

    #[tokio::test]
    async fn test_memory_outbox_records_mail() {
        let (mailer, outbox) = Mailer::memory();

        mailer.send("Ops", "ops@example.org", "Guest Comment", "Nice place").await;

        let sent = outbox.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Guest Comment");
    }

    #[tokio::test]
    async fn test_log_transport_does_not_fail() {
        Mailer::new(None).send("Ops", "ops@example.org", "Subject", "Body").await;
    }
}
