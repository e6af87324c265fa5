use async_trait::async_trait;
use teloxide::payloads::SendPhotoSetters;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::warn;

use common::{Error, Notifier, Result};

/// Delivers signals and alerts to every configured chat.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_ids: &[i64]) -> Self {
        Self {
            bot,
            chat_ids: chat_ids.iter().copied().map(ChatId).collect(),
        }
    }

    async fn send_to(&self, chat_id: ChatId, message: &str, chart: Option<&[u8]>) -> Result<()> {
        let sent = match chart {
            Some(png) => self
                .bot
                .send_photo(chat_id, InputFile::memory(png.to_vec()).file_name("chart.png"))
                .caption(message)
                .await
                .map(|_| ()),
            None => self.bot.send_message(chat_id, message).await.map(|_| ()),
        };
        sent.map_err(|e| Error::Http(e.to_string()))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    /// Sends to each chat in turn. Fails only when no chat received it.
    async fn notify(&self, message: &str, chart: Option<Vec<u8>>) -> Result<()> {
        let mut delivered = 0;
        let mut last_error = None;
        for &chat_id in &self.chat_ids {
            match self.send_to(chat_id, message, chart.as_deref()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(chat_id = chat_id.0, error = %e, "Failed to send Telegram message");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}
