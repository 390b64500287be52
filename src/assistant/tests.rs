//! Workflow tests for the request orchestrator, run against mock transport and
//! provider implementations.
//!
//! Run with: cargo test assistant

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::quota::FixedClock;
use super::transport::ChatAction;
use super::types::{ConversationHistory, UsageStats};
use super::*;

const DEFAULT_PROMPT: &str = "You are a helpful assistant.";

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

// =============================================================================
// MOCKS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text {
        chat: ChatId,
        text: String,
        reply_to: Option<i64>,
    },
    Html { chat: ChatId, text: String },
    Photo { chat: ChatId, bytes: usize },
}

#[derive(Default)]
struct MockTransport {
    sent: Mutex<Vec<Sent>>,
    actions: AtomicUsize,
}

impl MockTransport {
    fn push(&self, sent: Sent) -> i64 {
        let mut all = self.sent.lock().unwrap();
        all.push(sent);
        all.len() as i64
    }

    fn texts(&self, chat: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Text { chat: c, text, .. } if *c == chat => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn last_text(&self, chat: ChatId) -> String {
        self.texts(chat).pop().unwrap_or_default()
    }

    fn all(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, TransportError> {
        Ok(self.push(Sent::Text {
            chat,
            text: text.to_string(),
            reply_to,
        }))
    }

    async fn send_html(&self, chat: ChatId, html: &str) -> Result<i64, TransportError> {
        Ok(self.push(Sent::Html {
            chat,
            text: html.to_string(),
        }))
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        image: Vec<u8>,
        _reply_to: Option<i64>,
    ) -> Result<i64, TransportError> {
        Ok(self.push(Sent::Photo {
            chat,
            bytes: image.len(),
        }))
    }

    async fn send_action(&self, _chat: ChatId, _action: ChatAction) -> Result<(), TransportError> {
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_menu(&self, _chat: ChatId, _view: &AdminView) -> Result<i64, TransportError> {
        Ok(0)
    }

    async fn edit_menu(
        &self,
        _chat: ChatId,
        _message_id: i64,
        _view: &AdminView,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
struct MockProvider {
    fail: bool,
    delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<ConversationHistory>>,
}

impl MockProvider {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        history: &ConversationHistory,
        _temperature: f32,
    ) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ProviderError::Api("boom".into()));
        }
        self.seen.lock().unwrap().push(history.clone());
        Ok(format!("answer {n}"))
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Timeout(60));
        }
        Ok(vec![0xFF, 0xD8, 0xFF])
    }
}

/// Fails every storage call.
struct BrokenBackend;

impl BrokenBackend {
    fn down<T>() -> Result<T, StorageError> {
        Err(StorageError::Corrupt("database offline".into()))
    }
}

impl StateBackend for BrokenBackend {
    fn history(&self, _: ChatId) -> Result<ConversationHistory, StorageError> {
        Self::down()
    }
    fn append_turn(
        &self,
        _: ChatId,
        _: Role,
        _: &str,
    ) -> Result<types::ConversationTurn, StorageError> {
        Self::down()
    }
    fn truncate(&self, _: ChatId, _: usize) -> Result<usize, StorageError> {
        Self::down()
    }
    fn reset_history(&self, _: ChatId) -> Result<(), StorageError> {
        Self::down()
    }
    fn set_system_prompt(&self, _: ChatId, _: &str) -> Result<(), StorageError> {
        Self::down()
    }
    fn clear_system_prompt(&self, _: ChatId) -> Result<(), StorageError> {
        Self::down()
    }
    fn system_prompt(&self, _: ChatId) -> Result<Option<String>, StorageError> {
        Self::down()
    }
    fn quota_count(&self, _: ChatId, _: QuotaKind, _: NaiveDate) -> Result<u32, StorageError> {
        Self::down()
    }
    fn increment_quota_if_under(
        &self,
        _: ChatId,
        _: QuotaKind,
        _: NaiveDate,
        _: u32,
    ) -> Result<bool, StorageError> {
        Self::down()
    }
    fn is_whitelisted(&self, _: ChatId) -> Result<bool, StorageError> {
        Ok(false)
    }
    fn set_whitelisted(&self, _: ChatId, _: bool) -> Result<bool, StorageError> {
        Self::down()
    }
    fn whitelisted(&self) -> Result<Vec<ChatId>, StorageError> {
        Self::down()
    }
    fn record_chat_info(&self, _: ChatId, _: &ChatInfo) -> Result<(), StorageError> {
        Self::down()
    }
    fn chat_info(&self, _: ChatId) -> Result<Option<ChatInfo>, StorageError> {
        Self::down()
    }
    fn stats(&self, _: NaiveDate) -> Result<UsageStats, StorageError> {
        Self::down()
    }
}

/// Stores everything except assistant turns.
struct AnswersNotStored(SqliteBackend);

impl StateBackend for AnswersNotStored {
    fn history(&self, chat: ChatId) -> Result<ConversationHistory, StorageError> {
        self.0.history(chat)
    }
    fn append_turn(
        &self,
        chat: ChatId,
        role: Role,
        text: &str,
    ) -> Result<types::ConversationTurn, StorageError> {
        match role {
            Role::Assistant => BrokenBackend::down(),
            _ => self.0.append_turn(chat, role, text),
        }
    }
    fn truncate(&self, chat: ChatId, max_turns: usize) -> Result<usize, StorageError> {
        self.0.truncate(chat, max_turns)
    }
    fn reset_history(&self, chat: ChatId) -> Result<(), StorageError> {
        self.0.reset_history(chat)
    }
    fn set_system_prompt(&self, chat: ChatId, text: &str) -> Result<(), StorageError> {
        self.0.set_system_prompt(chat, text)
    }
    fn clear_system_prompt(&self, chat: ChatId) -> Result<(), StorageError> {
        self.0.clear_system_prompt(chat)
    }
    fn system_prompt(&self, chat: ChatId) -> Result<Option<String>, StorageError> {
        self.0.system_prompt(chat)
    }
    fn quota_count(
        &self,
        chat: ChatId,
        kind: QuotaKind,
        day: NaiveDate,
    ) -> Result<u32, StorageError> {
        self.0.quota_count(chat, kind, day)
    }
    fn increment_quota_if_under(
        &self,
        chat: ChatId,
        kind: QuotaKind,
        day: NaiveDate,
        limit: u32,
    ) -> Result<bool, StorageError> {
        self.0.increment_quota_if_under(chat, kind, day, limit)
    }
    fn is_whitelisted(&self, chat: ChatId) -> Result<bool, StorageError> {
        self.0.is_whitelisted(chat)
    }
    fn set_whitelisted(&self, chat: ChatId, unlimited: bool) -> Result<bool, StorageError> {
        self.0.set_whitelisted(chat, unlimited)
    }
    fn whitelisted(&self) -> Result<Vec<ChatId>, StorageError> {
        self.0.whitelisted()
    }
    fn record_chat_info(&self, chat: ChatId, info: &ChatInfo) -> Result<(), StorageError> {
        self.0.record_chat_info(chat, info)
    }
    fn chat_info(&self, chat: ChatId) -> Result<Option<ChatInfo>, StorageError> {
        self.0.chat_info(chat)
    }
    fn stats(&self, day: NaiveDate) -> Result<UsageStats, StorageError> {
        self.0.stats(day)
    }
}

// =============================================================================
// HARNESS
// =============================================================================

struct Harness {
    backend: Arc<dyn StateBackend>,
    transport: Arc<MockTransport>,
    provider: Arc<MockProvider>,
    orchestrator: Arc<RequestOrchestrator>,
}

struct Setup {
    limits: QuotaLimits,
    max_turns: usize,
    settings: OrchestratorSettings,
    provider: MockProvider,
    backend: Option<Arc<dyn StateBackend>>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            limits: QuotaLimits::default(),
            max_turns: 10,
            settings: OrchestratorSettings::default(),
            provider: MockProvider::default(),
            backend: None,
        }
    }
}

impl Setup {
    fn build(self) -> Harness {
        let backend: Arc<dyn StateBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(SqliteBackend::in_memory(DEFAULT_PROMPT).unwrap()),
        };
        let quota = Arc::new(QuotaTracker::with_clock(
            backend.clone(),
            self.limits,
            Arc::new(FixedClock(day())),
        ));
        let whitelist = Arc::new(WhitelistRegistry::new(backend.clone()));
        let conversations = ConversationStore::new(backend.clone(), self.max_turns);
        let transport = Arc::new(MockTransport::default());
        let provider = Arc::new(self.provider);

        let orchestrator = RequestOrchestrator::new(
            backend.clone(),
            quota,
            whitelist,
            conversations,
            provider.clone(),
            transport.clone(),
            self.settings,
        );

        Harness {
            backend,
            transport,
            provider,
            orchestrator: Arc::new(orchestrator),
        }
    }
}

fn request(chat: ChatId, command: Command) -> InboundRequest {
    InboundRequest {
        chat,
        user: Some(chat),
        message_id: Some(100),
        quoted_text: None,
        chat_info: ChatInfo::default(),
        command,
    }
}

fn ask(chat: ChatId, text: &str) -> InboundRequest {
    request(chat, Command::Ask(text.to_string()))
}

impl Harness {
    async fn send(&self, req: InboundRequest) {
        self.orchestrator.handle(req).await;
    }

    fn text_count(&self, chat: ChatId) -> u32 {
        self.backend.quota_count(chat, QuotaKind::Text, day()).unwrap()
    }

    fn stored(&self, chat: ChatId) -> Vec<(Role, String)> {
        self.backend
            .history(chat)
            .unwrap()
            .non_system()
            .map(|t| (t.role, t.text.clone()))
            .collect()
    }
}

// =============================================================================
// QUOTA
// =============================================================================

mod quota_flow {
    use super::*;

    #[tokio::test]
    async fn test_limit_two_third_ask_denied() {
        let h = Setup { limits: QuotaLimits { text: 2, image: 5 }, ..Default::default() }.build();

        h.send(ask(1, "a")).await;
        assert_eq!(h.text_count(1), 1);
        h.send(ask(1, "b")).await;
        assert_eq!(h.text_count(1), 2);
        h.send(ask(1, "c")).await;

        assert_eq!(h.provider.calls(), 2);
        assert_eq!(h.text_count(1), 2);
        let replies = h.transport.texts(1);
        assert_eq!(replies[0], "answer 1");
        assert_eq!(replies[1], "answer 2");
        assert!(replies[2].contains("daily limit of 2"));

        // The denied question never reached the history.
        let stored = h.stored(1);
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|(_, t)| t != "c"));
    }

    #[tokio::test]
    async fn test_whitelisted_chat_is_never_charged() {
        let h = Setup { limits: QuotaLimits { text: 1, image: 1 }, ..Default::default() }.build();
        h.backend.set_whitelisted(-500, true).unwrap();

        for i in 0..5 {
            h.send(ask(-500, &format!("q{i}"))).await;
        }
        h.send(request(-500, Command::Image("a cat".into()))).await;

        assert_eq!(h.provider.calls(), 6);
        assert_eq!(h.text_count(-500), 0);
        assert_eq!(h.backend.quota_count(-500, QuotaKind::Image, day()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quota_kept_when_provider_fails() {
        let h = Setup {
            provider: MockProvider::failing(),
            ..Default::default()
        }
        .build();

        h.send(ask(2, "will this work?")).await;

        assert_eq!(h.text_count(2), 1);
        assert_eq!(h.stored(2), vec![(Role::User, "will this work?".to_string())]);
        let reply = h.transport.last_text(2);
        assert_eq!(reply, "⚠️ Error: the model did not respond. Please try again later.");
        assert!(!reply.contains("boom"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_a_quota_message() {
        let h = Setup {
            backend: Some(Arc::new(BrokenBackend)),
            ..Default::default()
        }
        .build();

        h.send(ask(3, "hello")).await;

        assert_eq!(h.provider.calls(), 0);
        let reply = h.transport.last_text(3);
        assert!(reply.contains("Something went wrong"));
        assert!(!reply.contains("limit"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_asks_at_the_boundary() {
        let h = Setup {
            limits: QuotaLimits { text: 3, image: 1 },
            provider: MockProvider::slow(Duration::from_millis(20)),
            ..Default::default()
        }
        .build();
        h.backend.increment_quota_if_under(7, QuotaKind::Text, day(), 3).unwrap();

        let mut tasks = Vec::new();
        for i in 0..6 {
            let orchestrator = h.orchestrator.clone();
            tasks.push(tokio::spawn(async move {
                orchestrator.handle(ask(7, &format!("q{i}"))).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(h.provider.calls(), 2);
        assert_eq!(h.text_count(7), 3);
        let denied = h.transport.texts(7).iter().filter(|t| t.contains("daily limit")).count();
        assert_eq!(denied, 4);
    }
}

// =============================================================================
// HISTORY
// =============================================================================

mod history_flow {
    use super::*;

    #[tokio::test]
    async fn test_provider_sees_bounded_window() {
        let h = Setup {
            max_turns: 2,
            limits: QuotaLimits { text: 50, image: 1 },
            ..Default::default()
        }
        .build();

        for i in 0..(2 * 2 + 5) {
            h.send(ask(4, &format!("q{i}"))).await;
        }

        let seen = h.provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 9);
        for history in seen.iter() {
            assert!(history.len() <= 1 + 2 * 2);
            assert_eq!(history.system_prompt(), Some(DEFAULT_PROMPT));
        }
        let last: Vec<_> = seen[8].non_system().map(|t| t.text.as_str()).collect();
        assert_eq!(last, vec!["answer 7", "q7", "answer 8", "q8"]);
    }

    #[tokio::test]
    async fn test_answer_replies_to_the_question() {
        let h = Setup::default().build();
        h.send(ask(5, "<b>not html</b>")).await;

        assert_eq!(
            h.transport.all(),
            vec![Sent::Text {
                chat: 5,
                text: "answer 1".into(),
                reply_to: Some(100),
            }]
        );
        assert_eq!(h.stored(5)[0], (Role::User, "<b>not html</b>".to_string()));
    }

    #[tokio::test]
    async fn test_ask_in_reply_uses_quoted_text() {
        let h = Setup::default().build();
        let mut req = ask(14, "  ");
        req.quoted_text = Some("What is the capital of France?".into());
        h.send(req).await;

        assert_eq!(h.text_count(14), 1);
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(
            h.stored(14),
            vec![
                (Role::User, "What is the capital of France?".to_string()),
                (Role::Assistant, "answer 1".to_string()),
            ]
        );
        assert_eq!(h.transport.last_text(14), "answer 1");
    }

    #[tokio::test]
    async fn test_own_question_wins_over_quoted_text() {
        let h = Setup::default().build();
        let mut req = ask(15, "mine");
        req.quoted_text = Some("theirs".into());
        h.send(req).await;

        assert_eq!(h.stored(15)[0], (Role::User, "mine".to_string()));
    }

    #[tokio::test]
    async fn test_answer_delivered_when_it_cannot_be_stored() {
        let backend = AnswersNotStored(SqliteBackend::in_memory(DEFAULT_PROMPT).unwrap());
        let h = Setup {
            backend: Some(Arc::new(backend)),
            ..Default::default()
        }
        .build();

        h.send(ask(16, "still answer me")).await;

        assert_eq!(
            h.transport.all(),
            vec![Sent::Text {
                chat: 16,
                text: "answer 1".into(),
                reply_to: Some(100),
            }]
        );
        assert_eq!(h.stored(16), vec![(Role::User, "still answer me".to_string())]);
    }

    #[tokio::test]
    async fn test_setprompt_then_reset() {
        let settings = OrchestratorSettings {
            restrict_setprompt: false,
            ..Default::default()
        };
        let h = Setup {
            settings,
            ..Default::default()
        }
        .build();

        h.send(ask(6, "before")).await;
        h.send(request(6, Command::SetPrompt("Answer like a pirate".into()))).await;

        let history = h.backend.history(6).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.system_prompt(), Some("Answer like a pirate"));

        h.send(ask(6, "ahoy?")).await;
        h.send(request(6, Command::Reset)).await;

        let history = h.backend.history(6).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.system_prompt(), Some(DEFAULT_PROMPT));
        assert_eq!(h.backend.system_prompt(6).unwrap(), None);
    }

    #[tokio::test]
    async fn test_restricted_setprompt() {
        let settings = OrchestratorSettings {
            admin_ids: HashSet::from([42]),
            ..Default::default()
        };
        let h = Setup {
            settings,
            ..Default::default()
        }
        .build();

        h.send(request(8, Command::SetPrompt("nope".into()))).await;
        assert!(h.transport.last_text(8).contains("Access denied"));
        assert_eq!(h.backend.system_prompt(8).unwrap(), None);

        h.backend.set_whitelisted(8, true).unwrap();
        h.send(request(8, Command::SetPrompt("ok now".into()))).await;
        assert_eq!(h.backend.system_prompt(8).unwrap().as_deref(), Some("ok now"));

        let mut from_admin = request(9, Command::SetPrompt("admin prompt".into()));
        from_admin.user = Some(42);
        h.send(from_admin).await;
        assert_eq!(h.backend.system_prompt(9).unwrap().as_deref(), Some("admin prompt"));
    }
}

// =============================================================================
// VALIDATION & AUTHORIZATION
// =============================================================================

mod validation {
    use super::*;

    #[tokio::test]
    async fn test_empty_argument_is_free() {
        let h = Setup::default().build();
        h.send(ask(10, "   ")).await;
        h.send(request(10, Command::Image(String::new()))).await;

        assert_eq!(h.text_count(10), 0);
        assert_eq!(h.provider.calls(), 0);
        let mut blank_reply = ask(10, "");
        blank_reply.quoted_text = Some(" ".into());
        h.send(blank_reply).await;

        assert_eq!(h.text_count(10), 0);
        let replies = h.transport.texts(10);
        assert_eq!(
            replies,
            vec!["Usage: /ask <question>", "Usage: /image <description>", "Usage: /ask <question>"]
        );
    }

    #[tokio::test]
    async fn test_long_question_rejected_before_storing() {
        let settings = OrchestratorSettings {
            max_question_len: 10,
            ..Default::default()
        };
        let h = Setup {
            settings,
            ..Default::default()
        }
        .build();

        h.send(ask(11, "ёёёёёёёёёё")).await;
        assert_eq!(h.provider.calls(), 1);

        h.send(ask(11, "this one is far too long")).await;
        assert_eq!(h.provider.calls(), 1);
        assert!(h.transport.last_text(11).contains("maximum is 10 characters"));
        assert_eq!(h.stored(11).len(), 2);
    }

    #[tokio::test]
    async fn test_allowed_chats() {
        let settings = OrchestratorSettings {
            allowed_chats: HashSet::from([-1]),
            admin_ids: HashSet::from([77]),
            ..Default::default()
        };
        let h = Setup {
            settings,
            ..Default::default()
        }
        .build();

        h.send(ask(12, "hi")).await;
        assert!(h.transport.last_text(12).contains("Access denied"));
        assert_eq!(h.text_count(12), 0);

        h.send(ask(-1, "hi")).await;
        assert_eq!(h.transport.last_text(-1), "answer 1");

        let mut admin = ask(13, "hi");
        admin.user = Some(77);
        h.send(admin).await;
        assert_eq!(h.transport.last_text(13), "answer 2");
    }
}

// =============================================================================
// OTHER COMMANDS
// =============================================================================

mod commands {
    use super::*;

    #[tokio::test]
    async fn test_start_shows_limits() {
        let h = Setup { limits: QuotaLimits { text: 15, image: 5 }, ..Default::default() }.build();
        h.send(request(20, Command::Start)).await;

        match h.transport.all().as_slice() {
            [Sent::Html { chat: 20, text }] => {
                assert!(text.contains("15 questions and 5 images per day"));
                assert!(text.contains("Left today: 15 questions and 5 images."));
                assert!(text.contains("/ask &lt;question&gt;"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_shows_what_is_left() {
        let h = Setup { limits: QuotaLimits { text: 3, image: 2 }, ..Default::default() }.build();
        h.send(ask(25, "one")).await;
        h.send(request(25, Command::Image("a cat".into()))).await;
        h.send(request(25, Command::Start)).await;
        h.backend.set_whitelisted(26, true).unwrap();
        h.send(request(26, Command::Start)).await;

        let help: Vec<String> = h
            .transport
            .all()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Html { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(help.len(), 2);
        assert!(help[0].contains("Left today: 2 questions and 1 images."));
        assert!(help[1].contains("This chat has no daily limits."));
    }

    #[tokio::test]
    async fn test_image_success_and_limit() {
        let h = Setup { limits: QuotaLimits { text: 1, image: 1 }, ..Default::default() }.build();

        h.send(request(21, Command::Image("a red fox".into()))).await;
        h.send(request(21, Command::Image("another fox".into()))).await;

        let sent = h.transport.all();
        assert_eq!(sent[0], Sent::Photo { chat: 21, bytes: 3 });
        assert!(h.transport.last_text(21).contains("image generation limit of 1"));
        assert_eq!(h.provider.calls(), 1);
        // Image requests don't touch the conversation.
        assert!(h.stored(21).is_empty());
    }

    #[tokio::test]
    async fn test_image_provider_error() {
        let h = Setup {
            provider: MockProvider::failing(),
            ..Default::default()
        }
        .build();
        h.send(request(22, Command::Image("a fox".into()))).await;
        assert_eq!(
            h.transport.last_text(22),
            "⚠️ Error: the model took too long to respond. Please try again later."
        );
        assert_eq!(h.backend.quota_count(22, QuotaKind::Image, day()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_chat_info_is_recorded() {
        let h = Setup::default().build();
        let mut req = ask(23, "hi");
        req.chat_info = ChatInfo {
            username: Some("alice".into()),
            ..Default::default()
        };
        h.send(req).await;

        let info = h.backend.chat_info(23).unwrap().unwrap();
        assert_eq!(info.label().as_deref(), Some("@alice"));
    }

    #[tokio::test]
    async fn test_chat_info_failure_does_not_block_request() {
        let h = Setup {
            backend: Some(Arc::new(BrokenBackend)),
            ..Default::default()
        }
        .build();
        let mut req = request(24, Command::Start);
        req.chat_info = ChatInfo {
            title: Some("Group".into()),
            ..Default::default()
        };
        h.send(req).await;
        assert!(matches!(h.transport.all().as_slice(), [Sent::Html { chat: 24, .. }]));
    }
}
