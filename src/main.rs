use std::sync::Arc;

use teloxide::dispatching::HandlerExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use askbot::assistant::{
    AdminAction, AdminInput, AdminPanel, ChatInfo, ChatTransport, Command, ConversationStore,
    InboundRequest, QuotaTracker, RequestOrchestrator, TelegramClient, WhitelistRegistry,
    YandexClient,
};
use askbot::config::Config;
use askbot::telegram_log::AdminLogLayer;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Commands:")]
enum BotCommand {
    #[command(description = "show help")]
    Start,
    #[command(description = "show help")]
    Help,
    #[command(description = "ask a question")]
    Ask(String),
    #[command(description = "generate an image")]
    Image(String),
    #[command(description = "set a custom system prompt")]
    SetPrompt(String),
    #[command(description = "restore the default prompt")]
    Reset,
    #[command(description = "admin panel")]
    Admin,
}

struct BotState {
    orchestrator: RequestOrchestrator,
    admin: AdminPanel,
    transport: Arc<TelegramClient>,
}

fn fail(what: &str, e: impl std::fmt::Display) -> ! {
    error!("{what}: {e}");
    eprintln!("{what}: {e}");
    std::process::exit(1);
}

fn chat_info(msg: &Message) -> ChatInfo {
    ChatInfo {
        username: msg.chat.username().map(str::to_string),
        first_name: msg.chat.first_name().map(str::to_string),
        title: msg.chat.title().map(str::to_string),
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "askbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("askbot.log"))
        .unwrap_or_else(|e| fail("Failed to open log file", e));
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(AdminLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting askbot...");
    info!("Loaded config from {config_path}");
    info!("Admin IDs: {:?}", config.admin_ids);
    info!(
        "Limits: {} text / {} image requests per day, history window {} turns",
        config.daily_limit, config.image_generation_limit, config.max_history_turns
    );

    let backend = config
        .state_backend()
        .unwrap_or_else(|e| fail("Failed to open state storage", e));

    let provider = YandexClient::new(
        config.yc_api_key.clone(),
        &config.yc_folder_id,
        &config.model,
        &config.image_model,
        config.provider_timeout_secs,
    )
    .unwrap_or_else(|e| fail("Failed to create YandexGPT client", e));

    let quota = Arc::new(QuotaTracker::new(backend.clone(), config.quota_limits()));
    let whitelist = Arc::new(WhitelistRegistry::new(backend.clone()));
    let conversations = ConversationStore::new(backend.clone(), config.max_history_turns);
    let transport = Arc::new(TelegramClient::new(bot.clone()));

    let orchestrator = RequestOrchestrator::new(
        backend.clone(),
        quota.clone(),
        whitelist.clone(),
        conversations,
        Arc::new(provider),
        transport.clone(),
        config.orchestrator_settings(),
    );
    let admin = AdminPanel::new(config.admin_ids.iter().copied(), whitelist, quota, backend);

    let state = Arc::new(BotState {
        orchestrator,
        admin,
        transport,
    });

    if let Err(e) = bot.set_my_commands(BotCommand::bot_commands()).await {
        warn!("Failed to register bot commands: {e}");
    }

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<BotCommand>().endpoint(handle_command))
                .branch(dptree::endpoint(handle_admin_input)),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("An error from the update listener"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(msg: Message, cmd: BotCommand, state: Arc<BotState>) -> ResponseResult<()> {
    let chat = msg.chat.id.0;
    let user = msg.from.as_ref().map(|u| u.id.0 as i64);

    let command = match cmd {
        BotCommand::Start | BotCommand::Help => Command::Start,
        BotCommand::Ask(text) => Command::Ask(text),
        BotCommand::Image(text) => Command::Image(text),
        BotCommand::SetPrompt(text) => Command::SetPrompt(text),
        BotCommand::Reset => Command::Reset,
        BotCommand::Admin => {
            let result = match user {
                Some(user) => state.admin.open(user, chat),
                None => Err(askbot::assistant::RequestError::AuthorizationDenied),
            };
            let sent = match result {
                Ok(view) => state.transport.send_menu(chat, &view).await,
                Err(e) => {
                    let reply_to = Some(msg.id.0 as i64);
                    state.transport.send_text(chat, &e.user_message(), reply_to).await
                }
            };
            if let Err(e) = sent {
                warn!("Admin reply to chat {} not delivered: {}", chat, e);
            }
            return Ok(());
        }
    };

    state
        .orchestrator
        .handle(InboundRequest {
            chat,
            user,
            message_id: Some(msg.id.0 as i64),
            quoted_text: msg.reply_to_message().and_then(|m| m.text()).map(str::to_string),
            chat_info: chat_info(&msg),
            command,
        })
        .await;
    Ok(())
}

/// Plain messages only matter while an admin flow waits for input.
async fn handle_admin_input(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref().map(|u| u.id.0 as i64) else {
        return Ok(());
    };
    if !state.admin.is_admin(user) {
        return Ok(());
    }
    let chat = msg.chat.id.0;

    let input = if let Some(contact) = msg.contact() {
        AdminInput::Contact(contact.user_id.map(|id| id.0 as i64))
    } else if let Some(text) = msg.text() {
        AdminInput::Text(text)
    } else {
        return Ok(());
    };

    let sent = match state.admin.on_input(user, chat, input) {
        Ok(Some(view)) => state.transport.send_menu(chat, &view).await,
        Ok(None) => return Ok(()),
        Err(e) => state.transport.send_text(chat, &e.user_message(), None).await,
    };
    if let Err(e) = sent {
        warn!("Admin reply to chat {} not delivered: {}", chat, e);
    }
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let user = q.from.id.0 as i64;
    let Some(action) = q.data.as_deref().and_then(AdminAction::parse) else {
        debug!("Ignoring callback data {:?}", q.data);
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let origin = q.message.as_ref().map(|m| (m.chat().id.0, m.id().0 as i64));
    let Some((chat, message_id)) = origin else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };

    match state.admin.on_action(user, chat, action) {
        Ok(view) => {
            bot.answer_callback_query(q.id.clone()).await?;
            if let Err(e) = state.transport.edit_menu(chat, message_id, &view).await {
                warn!("Admin menu in chat {} not updated: {}", chat, e);
            }
        }
        Err(e) => {
            bot.answer_callback_query(q.id.clone())
                .text(e.user_message())
                .await?;
        }
    }
    Ok(())
}
