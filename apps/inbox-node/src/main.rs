use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inbox_store::{ConversationKind, NewMessage, Profile, StoreBackend, StoreConfig};
use inbox_sync::{InboxConfig, InboxSession, LoadOptions, ReadModelEntry, SyncState};
use serde::Deserialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file (overrides the config file)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Tenant the inbox belongs to
    #[arg(short, long, default_value = "default")]
    tenant: String,

    /// User whose inbox is shown
    #[arg(short, long)]
    user: String,

    /// JSON config file with `store` and `inbox` sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the inbox once
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a conversation (direct conversations are reused per pair)
    Create {
        /// direct, group, site-scoped or team-scoped
        #[arg(short, long, default_value = "direct")]
        kind: String,

        #[arg(short, long)]
        name: Option<String>,

        /// Site id for site-scoped conversations
        #[arg(long)]
        site: Option<String>,

        /// Other participants
        participants: Vec<String>,
    },
    /// Send a message as the current user
    Send {
        conversation: String,
        body: Vec<String>,
    },
    /// Add participants to an existing conversation
    Add {
        conversation: String,
        participants: Vec<String>,
    },
    /// Mark a conversation as read
    Read { conversation: String },
    Archive { conversation: String },
    Unarchive { conversation: String },
    Delete { conversation: String },
    /// Set a user's display profile
    Profile {
        user_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Keep the inbox open and print it whenever it changes
    Watch,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeConfig {
    store: StoreConfig,
    inbox: InboxConfig,
}

fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.store.db_path = db;
    }

    let backend = Arc::new(StoreBackend::open(&config.store).await?);
    info!(
        "Opened inbox for {} in tenant {} at {}",
        args.user,
        args.tenant,
        config.store.db_path.display()
    );

    if let Command::Watch = args.command {
        let session = InboxSession::start(
            backend.clone(),
            backend.clone(),
            config.inbox,
            args.tenant,
            args.user,
        );
        let result = watch(&session, &backend).await;
        session.dispose().await;
        return result;
    }

    let session = InboxSession::new(backend.clone(), config.inbox, args.tenant, args.user);

    match args.command {
        Command::List { json } => {
            let inbox = session.load_conversations(LoadOptions::default()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&*inbox)?);
            } else {
                print_inbox(&inbox, session.user_id());
            }
        }
        Command::Create {
            kind,
            name,
            site,
            participants,
        } => {
            let kind: ConversationKind = kind.parse()?;
            let outcome = session
                .create_conversation(kind, &participants, name.as_deref(), site.as_deref())
                .await?;
            if outcome.reused {
                println!("Existing conversation: {}", outcome.conversation.id);
            } else {
                println!("Created conversation: {}", outcome.conversation.id);
            }
            if let Some(e) = outcome.participant_error {
                eprintln!("Participants could not be added: {}", e);
                eprintln!("Retry with the `add` command for {}", outcome.conversation.id);
            }
        }
        Command::Send {
            conversation,
            body,
        } => {
            send(&backend, &conversation, session.user_id(), &body.join(" ")).await?;
        }
        Command::Add {
            conversation,
            participants,
        } => {
            let added = session
                .add_participants(&conversation, &participants)
                .await?;
            println!("Added {} participants to {}", added.len(), conversation);
        }
        Command::Read { conversation } => {
            session.mark_read(&conversation).await?;
            println!("Marked {} as read", conversation);
        }
        Command::Archive { conversation } => {
            session.archive_conversation(&conversation).await?;
            println!("Archived {}", conversation);
        }
        Command::Unarchive { conversation } => {
            session.unarchive_conversation(&conversation).await?;
            println!("Unarchived {}", conversation);
        }
        Command::Delete { conversation } => {
            if session.delete_conversation(&conversation).await? {
                println!("Deleted {}", conversation);
            } else {
                println!("Nothing to delete for {}", conversation);
            }
        }
        Command::Profile {
            user_id,
            name,
            email,
        } => {
            backend
                .upsert_profile(&Profile {
                    user_id: user_id.clone(),
                    display_name: name,
                    email,
                })
                .await?;
            println!("Profile saved for {}", user_id);
        }
        Command::Watch => unreachable!("handled above"),
    }

    Ok(())
}

async fn send(backend: &StoreBackend, conversation: &str, sender: &str, body: &str) -> Result<()> {
    if body.trim().is_empty() {
        anyhow::bail!("Message body is empty");
    }
    let message = backend
        .append_message(NewMessage {
            conversation_id: conversation.to_string(),
            sender_id: sender.to_string(),
            body: body.to_string(),
            created_at: None,
        })
        .await
        .with_context(|| format!("Failed to send message to {}", conversation))?;
    println!("Sent {}", message.id);
    Ok(())
}

async fn watch(session: &InboxSession, backend: &StoreBackend) -> Result<()> {
    let inbox = session.load_conversations(LoadOptions::default()).await?;
    print_inbox(&inbox, session.user_id());
    println!("Commands: /send <id> <text>, /read <id>, /create <user>, /list, /quit");
    prompt();

    let mut status = session.watch_status();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if let Some(e) = &current.last_error {
                    println!("\n! {}", e);
                    prompt();
                } else if current.state == SyncState::Ready {
                    println!();
                    print_inbox(&session.snapshot(), session.user_id());
                    prompt();
                }
            }

            read = stdin.read_line(&mut line) => {
                if read? == 0 {
                    break;
                }
                let input = line.trim().to_string();
                line.clear();
                if input == "/quit" {
                    break;
                }
                if !input.is_empty() {
                    if let Err(e) = handle_command(&input, session, backend).await {
                        eprintln!("{}", e);
                    }
                }
                prompt();
            }

            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    Ok(())
}

async fn handle_command(input: &str, session: &InboxSession, backend: &StoreBackend) -> Result<()> {
    let mut parts = input.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("/send"), Some(id), Some(text)) => send(backend, id, session.user_id(), text).await,
        (Some("/read"), Some(id), None) => {
            session.mark_read(id).await?;
            Ok(())
        }
        (Some("/create"), Some(user), None) => {
            let outcome = session
                .create_conversation(ConversationKind::Direct, &[user.to_string()], None, None)
                .await?;
            println!("Conversation with {}: {}", user, outcome.conversation.id);
            Ok(())
        }
        (Some("/list"), None, None) => {
            print_inbox(&session.snapshot(), session.user_id());
            Ok(())
        }
        _ => {
            warn!("Unknown command: {}", input);
            anyhow::bail!("Unknown command: {}", input)
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

fn print_inbox(entries: &[ReadModelEntry], user_id: &str) {
    if entries.is_empty() {
        println!("Inbox is empty");
        return;
    }
    for entry in entries {
        let unread = match entry.unread_count {
            0 => String::new(),
            n => format!(" [{}]", n),
        };
        let preview = entry
            .last_message
            .as_ref()
            .map(|m| format!("{}: {}", m.sender_id, truncate(&m.body, 48)))
            .unwrap_or_else(|| "(no messages)".to_string());
        println!(
            "{} {:<28}{}  {}",
            entry.conversation.id,
            title(entry, user_id),
            unread,
            preview
        );
    }
}

fn title(entry: &ReadModelEntry, user_id: &str) -> String {
    if let Some(name) = entry.conversation.name.as_deref() {
        return name.to_string();
    }
    let others: Vec<&str> = entry
        .participants
        .iter()
        .filter(|p| p.user_id() != user_id && p.participant.is_active())
        .map(|p| {
            p.profile
                .as_ref()
                .and_then(|profile| profile.label())
                .unwrap_or(p.user_id())
        })
        .collect();
    if others.is_empty() {
        entry.conversation.kind.to_string()
    } else {
        others.join(", ")
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &text[..i]),
        None => text.to_string(),
    }
}
