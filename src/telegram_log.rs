//! Mirrors log events into an admin Telegram chat.
//!
//! WARN and ERROR go out at once; INFO lines are collected and flushed every
//! few seconds. Delivery problems are printed to stderr and otherwise ignored.

use std::time::Duration;

use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_EVERY: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 50;
const MAX_MESSAGE_CHARS: usize = 4000;

enum Entry {
    Urgent(String),
    Info(String),
}

pub struct AdminLogLayer {
    tx: mpsc::UnboundedSender<Entry>,
}

impl AdminLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(bot, ChatId(chat_id), rx));
        Self { tx }
    }
}

async fn forward(bot: Bot, chat: ChatId, mut rx: mpsc::UnboundedReceiver<Entry>) {
    let mut pending: Vec<String> = Vec::new();
    let mut tick = tokio::time::interval(FLUSH_EVERY);

    loop {
        tokio::select! {
            entry = rx.recv() => match entry {
                Some(Entry::Urgent(text)) => deliver(&bot, chat, &text).await,
                Some(Entry::Info(text)) => {
                    pending.push(text);
                    if pending.len() >= MAX_BATCH {
                        deliver(&bot, chat, &pending.join("\n")).await;
                        pending.clear();
                    }
                }
                None => break,
            },
            _ = tick.tick() => {
                if !pending.is_empty() {
                    deliver(&bot, chat, &pending.join("\n")).await;
                    pending.clear();
                }
            }
        }
    }
}

async fn deliver(bot: &Bot, chat: ChatId, text: &str) {
    if let Err(e) = bot.send_message(chat, fit_message(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

/// Telegram rejects messages over 4096 characters.
fn fit_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{cut}...")
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    extra: Vec<String>,
}

impl FieldCollector {
    fn render(self) -> String {
        if self.extra.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.extra.join(", ")
        } else {
            format!("{} ({})", self.message, self.extra.join(", "))
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.push(format!("{} = {}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.extra.push(format!("{} = {:?}", field.name(), value));
        }
    }
}

fn classify(level: Level, text: String) -> Option<Entry> {
    match level {
        Level::ERROR => Some(Entry::Urgent(format!("❌ {text}"))),
        Level::WARN => Some(Entry::Urgent(format!("⚠️ {text}"))),
        Level::INFO => Some(Entry::Info(text)),
        _ => None,
    }
}

impl<S: Subscriber> Layer<S> for AdminLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        if let Some(entry) = classify(level, fields.render()) {
            if self.tx.send(entry).is_err() {
                eprintln!("Log channel closed, message dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_message_counts_chars() {
        let short = "ы".repeat(MAX_MESSAGE_CHARS);
        assert_eq!(fit_message(&short), short);

        let long = "ы".repeat(MAX_MESSAGE_CHARS + 1);
        let fitted = fit_message(&long);
        assert!(fitted.ends_with("..."));
        assert_eq!(fitted.chars().count(), MAX_MESSAGE_CHARS + 3);
    }

    #[test]
    fn test_levels() {
        assert!(matches!(classify(Level::ERROR, "x".into()), Some(Entry::Urgent(t)) if t == "❌ x"));
        assert!(matches!(classify(Level::WARN, "x".into()), Some(Entry::Urgent(t)) if t == "⚠️ x"));
        assert!(matches!(classify(Level::INFO, "x".into()), Some(Entry::Info(t)) if t == "x"));
        assert!(classify(Level::DEBUG, "x".into()).is_none());
    }

    #[test]
    fn test_render_fields() {
        let fields = FieldCollector {
            message: "sent".into(),
            extra: vec!["chat = 5".into()],
        };
        assert_eq!(fields.render(), "sent (chat = 5)");
        assert_eq!(FieldCollector::default().render(), "");
    }
}
