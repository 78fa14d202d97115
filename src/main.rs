use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::Context;
use chat_sync::api::ApiClient;
use chat_sync::auth::{counterpart_of, AuthRepository, TokenStore, DEFAULT_PASSWORD, KNOWN_USERS};
use chat_sync::classify::ClassificationRouter;
use chat_sync::client::WsClient;
use chat_sync::config::Config;
use chat_sync::conversation::ConversationDirectory;
use chat_sync::debts::DebtsRepository;
use chat_sync::gateway::{MessageHistory, RealtimeChannel};
use chat_sync::models::{MessageStatus, TaskStatus};
use chat_sync::presentation::{unseen_messages, AuthEvent, AuthState, ChatEvent, ChatScreen, ChatState, ListEvent, ListState};
use chat_sync::storage::MessageStore;
use chat_sync::sync::MessageSync;
use chat_sync::tasks::TasksRepository;
use chrono::Local;
use dotenv::dotenv;
use futures_util::StreamExt;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "commands: /tasks  /done <task id>  /debts  /history  /settle <user id> <amount>  /read  /sync  exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let username = env::args().nth(1).unwrap_or_else(|| KNOWN_USERS[0].username.to_string());

    let tokens = TokenStore::new();
    let api = ApiClient::new(&config.api_base_url, tokens.clone());
    let auth = AuthRepository::new(api.clone(), tokens.clone());

    let mut auth_state = AuthState::Unauthenticated.reduce(AuthEvent::Started);
    auth_state = match auth.login(&username, DEFAULT_PASSWORD).await {
        Ok(user) => auth_state.reduce(AuthEvent::Succeeded(user)),
        Err(e) => auth_state.reduce(AuthEvent::Failed(e.to_string())),
    };
    match &auth_state {
        AuthState::Authenticated(user) => println!("Logged in as {} ({})", user.username, user.email),
        AuthState::Error(message) => anyhow::bail!("login as {} failed: {}", username, message),
        _ => anyhow::bail!("login as {} did not complete", username),
    }
    let session = auth.session().await?;

    let store = Arc::new(MessageStore::new(&config.database_url).context("opening message store")?);
    let ws = Arc::new(WsClient::new(&config.ws_base_url, tokens.clone(), config.wire_format));
    let tasks = Arc::new(TasksRepository::new(api.clone()));
    let debts = Arc::new(DebtsRepository::new(api.clone()));
    let router = ClassificationRouter::new(tasks.clone(), debts.clone());
    let history: Arc<dyn MessageHistory> = Arc::new(api.clone());
    let channel: Arc<dyn RealtimeChannel> = ws.clone();

    let seeded_peer = counterpart_of(&session.user_id);
    let peer_id = match (&config.peer_user_id, seeded_peer) {
        (Some(id), _) => id.clone(),
        (None, Some(peer)) => peer.user_id.to_string(),
        (None, None) => anyhow::bail!("no counterpart for user {}; set PEER_USER_ID", session.user_id),
    };
    let peer_name = config
        .peer_name
        .clone()
        .or_else(|| seeded_peer.filter(|p| p.user_id == peer_id).map(|p| p.name.to_string()))
        .unwrap_or_else(|| format!("user {peer_id}"));
    let directory = ConversationDirectory::new(peer_id.clone(), peer_name.clone());
    let conversation_id = directory.conversation_id(&session);
    let conversation = directory.get(&conversation_id, &session);

    let sync = MessageSync::start(
        store,
        history,
        channel.clone(),
        Some(router),
        session.clone(),
        config.history_limit,
    );

    // Offline is a valid starting point; the store still serves what it has.
    if let Err(e) = channel.connect(&conversation_id).await {
        warn!("starting offline: {}", e);
    }
    if let Err(e) = sync.sync(&conversation_id, directory.peer_id()).await {
        warn!("history sync failed: {}", e);
    }

    let mut feed = sync.observe(&conversation_id);
    let mut connection = channel.connection_state();
    let peer = conversation.other_participant().cloned();
    let user_id = session.user_id.clone();
    let printer = tokio::spawn(async move {
        let now = Local::now();
        let mut screen = ChatScreen::new(user_id, *now.offset(), now.date_naive()).reduce(ChatEvent::Conversation(peer));
        screen = screen.reduce(ChatEvent::Connection(*connection.borrow()));
        let mut seen: HashMap<String, MessageStatus> = HashMap::new();
        loop {
            tokio::select! {
                snapshot = feed.next() => {
                    let event = match snapshot {
                        Some(Ok(messages)) => ChatEvent::Messages(messages),
                        Some(Err(e)) => ChatEvent::Failed(e.to_string()),
                        None => break,
                    };
                    screen = screen.reduce(event);
                    render(&screen.state, &mut seen);
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connection.borrow_and_update();
                    println!("[{}]", state);
                    screen = screen.reduce(ChatEvent::Connection(state));
                }
            }
        }
    });

    println!("Chatting with {} in conversation {}", peer_name, conversation_id);
    println!("{}", HELP);

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut input = String::new();
    let mut task_list = ListState::Loading;
    let mut balance_list = ListState::Loading;

    loop {
        input.clear();
        if reader.read_line(&mut input).await? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") {
            println!("Exiting client...");
            break;
        }
        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        match parts[0] {
            "/tasks" => {
                let event = match tasks.load(None).await {
                    Ok(loaded) => ListEvent::Loaded(loaded),
                    Err(e) => ListEvent::Failed(e.to_string()),
                };
                task_list = task_list.reduce(ListEvent::Retry).reduce(event);
                match &task_list {
                    ListState::Success(items) => {
                        for task in items {
                            println!("  #{} {} [{}]", task.id, task.item_name, task.status.as_str());
                        }
                    }
                    ListState::Empty => println!("  no tasks"),
                    ListState::Error(message) => println!("  failed to load tasks: {}", message),
                    ListState::Loading => {}
                }
            }
            "/done" if parts.len() == 2 => match parts[1].parse::<i64>() {
                Ok(task_id) => match tasks.update_status(task_id, TaskStatus::Completed).await {
                    Ok(task) => {
                        println!("  completed {}", task.item_name);
                        task_list = task_list.reduce(ListEvent::Changed(tasks.observe().borrow().clone()));
                    }
                    Err(e) => println!("  failed to update task: {}", e),
                },
                Err(_) => println!("  not a task id: {}", parts[1]),
            },
            "/debts" => {
                let event = match debts.load_balance().await {
                    Ok(loaded) => ListEvent::Loaded(loaded),
                    Err(e) => ListEvent::Failed(e.to_string()),
                };
                balance_list = balance_list.reduce(ListEvent::Retry).reduce(event);
                match &balance_list {
                    ListState::Success(items) => {
                        for balance in items {
                            println!(
                                "  {}: owed {:.2}, owing {:.2}",
                                balance.username, balance.total_owed, balance.total_owing
                            );
                        }
                    }
                    ListState::Empty => println!("  no balance"),
                    ListState::Error(message) => println!("  failed to load balance: {}", message),
                    ListState::Loading => {}
                }
            }
            "/history" => match debts.load_history().await {
                Ok(history) => {
                    for debt in history {
                        let state = if debt.is_settled { "settled" } else { "open" };
                        println!("  {} -> {}: {:.2} ({})", debt.debtor_id, debt.creditor_id, debt.amount, state);
                    }
                }
                Err(e) => println!("  failed to load debt history: {}", e),
            },
            "/settle" if parts.len() == 3 => match (parts[1].parse::<i64>(), parts[2].parse::<f64>()) {
                (Ok(user_id), Ok(amount)) => match debts.settle(user_id, amount).await {
                    Ok(()) => println!("  settled {:.2} with user {}", amount, user_id),
                    Err(e) => println!("  failed to settle: {}", e),
                },
                _ => println!("  usage: /settle <user id> <amount>"),
            },
            "/read" => match sync.mark_all_read(&conversation_id).await {
                Ok(count) => println!("  marked {} message(s) read", count),
                Err(e) => println!("  failed to mark read: {}", e),
            },
            "/sync" => match sync.sync(&conversation_id, directory.peer_id()).await {
                Ok(count) => println!("  fetched {} message(s)", count),
                Err(e) => println!("  sync failed: {}", e),
            },
            command if command.starts_with('/') => println!("{}", HELP),
            _ => {
                if let Err(e) = sync.send(&conversation_id, input).await {
                    println!("  failed to store message: {}", e);
                }
            }
        }
    }

    info!("shutting down");
    channel.disconnect().await;
    printer.abort();
    Ok(())
}

/// Prints every message that is new or changed status since the last call.
fn render(state: &ChatState, seen: &mut HashMap<String, MessageStatus>) {
    if let ChatState::Error { message, .. } = state {
        println!("error: {}", message);
        return;
    }
    for message in unseen_messages(state, seen) {
        let who = if message.is_from_current_user { "me" } else { "them" };
        let ticks = "✓".repeat(message.status.checkmark_count() as usize);
        println!(
            "{} {}: {} {}",
            message.timestamp.with_timezone(&Local).format("%H:%M"),
            who,
            message.content,
            ticks
        );
    }
}
