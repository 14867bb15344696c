use async_trait::async_trait;

use crate::CoreResult;

/// Outbound customer communication (e-mail in production).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> CoreResult<()>;
}
