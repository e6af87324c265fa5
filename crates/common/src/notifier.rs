use async_trait::async_trait;

use crate::Result;

/// Outbound message channel for dispatched signals and operator alerts.
///
/// `TelegramNotifier` implements this for live use. Callers treat delivery as
/// best-effort: a failed `notify` is logged and never rolls back risk or
/// signal-log bookkeeping.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a text message, optionally with a rendered chart image (PNG bytes).
    async fn notify(&self, message: &str, chart: Option<Vec<u8>>) -> Result<()>;
}
