use color_eyre::eyre::eyre;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::state::Config;

/// One outbound notification.
#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Sending half of the mailer task. Delivery runs on its own task with its
/// own failure channel: nothing that goes wrong past [`MailerHandle::send`]
/// reaches the request that queued the message.
#[derive(Clone)]
pub struct MailerHandle {
    tx: mpsc::Sender<Email>,
}

impl MailerHandle {
    /// Create a handle plus the receiving end of its queue. Production code
    /// feeds the receiver to [`deliver_loop`]; tests inspect it directly.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Email>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue an email, best-effort. A full queue or stopped worker is
    /// logged and otherwise ignored.
    pub fn send(&self, email: Email) {
        if let Err(err) = self.tx.try_send(email) {
            error!("Error while sending email. Error message: {err}");
        }
    }
}

/// Start the delivery worker. Returns the handle requests enqueue through
/// and the worker's join handle.
pub fn spawn_mailer(
    config: &Config,
) -> color_eyre::Result<(MailerHandle, tokio::task::JoinHandle<color_eyre::Result<()>>)> {
    let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        .map_err(|err| eyre!("Failed to build SMTP transport: {err}"))?
        .credentials(Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        ))
        .build();

    let sender: Mailbox = config
        .email_sender
        .parse()
        .map_err(|err| eyre!("Invalid EMAIL_SENDER_ADDRESS: {err}"))?;

    let (handle, rx) = MailerHandle::channel(64);
    let worker = tokio::spawn(deliver_loop(rx, transport, sender));

    Ok((handle, worker))
}

/// Drain the queue until every handle is dropped. Per-message failures are
/// logged and swallowed; they never unwind the worker.
async fn deliver_loop(
    mut rx: mpsc::Receiver<Email>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
) -> color_eyre::Result<()> {
    while let Some(email) = rx.recv().await {
        let to: Mailbox = match email.to.parse() {
            Ok(to) => to,
            Err(err) => {
                error!(
                    "Error while sending email. Error message: invalid recipient '{}': {err}",
                    email.to
                );
                continue;
            }
        };

        let message = match Message::builder()
            .from(sender.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            )) {
            Ok(message) => message,
            Err(err) => {
                error!("Error while sending email. Error message: {err}");
                continue;
            }
        };

        match transport.send(message).await {
            Ok(_) => info!("Sent '{}' to {}", email.subject, email.to),
            Err(err) => error!("Error while sending email. Error message: {err}"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_enqueues_for_the_worker() {
        let (handle, mut rx) = MailerHandle::channel(4);
        handle.send(Email {
            to: "a@x.com".into(),
            subject: "Verification code".into(),
            text: "hi".into(),
            html: "<p>hi</p>".into(),
        });

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.to, "a@x.com");
        assert_eq!(queued.subject, "Verification code");
    }

    #[tokio::test]
    async fn send_with_stopped_worker_does_not_panic() {
        let (handle, rx) = MailerHandle::channel(1);
        drop(rx);

        // Logged and dropped; the caller is never affected.
        handle.send(Email {
            to: "a@x.com".into(),
            subject: "s".into(),
            text: "t".into(),
            html: "h".into(),
        });
    }
}
