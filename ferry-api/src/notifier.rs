use async_trait::async_trait;
use ferry_core::{CoreResult, Notifier};
use ferry_shared::Masked;
use tracing::info;

/// Notifier that writes outgoing mail to the log instead of an SMTP relay.
#[derive(Debug, Clone)]
pub struct LoggingNotifier {
    from_address: String,
}

impl LoggingNotifier {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> CoreResult<()> {
        info!(
            from = %self.from_address,
            to = %Masked(to),
            subject,
            bytes = html_body.len(),
            "email dispatched"
        );
        Ok(())
    }
}
