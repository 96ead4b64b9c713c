//! Xongroh CLI
//!
//! Operator tool for the Xongroh core:
//!
//! 1. **Key provisioning**: generate a base64 256-bit message key to hand
//!    to every client out of band.
//!
//! 2. **Blob inspection**: encrypt or decrypt a single message blob with
//!    the configured key.
//!
//! 3. **History paging**: read one page of a stored conversation and print
//!    the token for the next one.
//!
//! 4. **Event checks**: validate a push event payload before wiring a
//!    realtime transport to it.
//!
//! 5. **Feed demo**: a scripted two-user conversation showing live feed
//!    reconciliation, read receipts and unread counters.

use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use serde_json::json;
use xongroh_core::feed::Cursor;
use xongroh_core::{
    time, CoreConfig, FeedItem, LiveFeed, MessageCipher, MessageKey, NotificationNamespace,
    PushEvent, Scope, XongrohCore,
};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "xongroh", version, about = "Xongroh message cipher and live feed tool")]
struct Args {
    /// Base64-encoded 256-bit message key
    #[arg(long, env = "XONGROH_MESSAGE_KEY", hide_env_values = true, global = true)]
    message_key: Option<String>,

    /// Items per feed page
    #[arg(long, default_value_t = 20, env = "XONGROH_PAGE_SIZE", global = true)]
    page_size: usize,

    /// Page fetch timeout in milliseconds
    #[arg(long, default_value_t = 5000, env = "XONGROH_FETCH_TIMEOUT_MS", global = true)]
    fetch_timeout_ms: u64,

    /// Mark-read timeout in milliseconds
    #[arg(long, default_value_t = 5000, env = "XONGROH_MARK_READ_TIMEOUT_MS", global = true)]
    mark_read_timeout_ms: u64,

    /// SQLite database file (in-memory when unset)
    #[arg(long, env = "XONGROH_DATABASE_PATH", global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a freshly generated message key
    Keygen,
    /// Encrypt one message and print the blob
    Encrypt {
        /// Plaintext to encrypt
        text: String,
    },
    /// Decrypt one blob and print the plaintext
    Decrypt {
        /// base64(nonce || ciphertext || tag)
        blob: String,
    },
    /// Print one page of a conversation, newest first
    History {
        /// Conversation id
        conversation: String,
        /// Whose view to read (their soft deletes are hidden)
        #[arg(long)]
        viewer: String,
        /// Token printed by a previous page
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Validate a push event payload and print where it routes
    Event {
        /// Event JSON
        json: String,
    },
    /// Run a scripted conversation against an in-process core
    Demo,
}

impl Args {
    fn core_config(&self, message_key: String) -> CoreConfig {
        CoreConfig {
            message_key,
            page_size: self.page_size,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            mark_read_timeout: Duration::from_millis(self.mark_read_timeout_ms),
            database_path: self.database.clone(),
        }
    }

    fn cipher(&self) -> Result<MessageCipher> {
        let key = self
            .message_key
            .as_deref()
            .ok_or_else(|| eyre!("--message-key or XONGROH_MESSAGE_KEY is required"))?;
        MessageCipher::from_base64(key).wrap_err("could not import message key")
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xongroh_core=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Keygen => {
            println!("{}", MessageKey::generate().to_base64());
        }
        Command::Encrypt { text } => {
            println!("{}", args.cipher()?.encrypt(text)?);
        }
        Command::Decrypt { blob } => {
            let plaintext = args.cipher()?.decrypt(blob).wrap_err("could not decrypt blob")?;
            println!("{}", plaintext);
        }
        Command::History {
            conversation,
            viewer,
            cursor,
        } => run_history(&args, conversation, viewer, cursor.as_deref()).await?,
        Command::Event { json } => {
            let event = PushEvent::from_json(json).wrap_err("invalid push event")?;
            println!(
                "{}",
                json!({
                    "kind": event.kind.as_str(),
                    "channel": event.channel,
                    "scopeId": event.scope_id(),
                    "itemId": event.item_id(),
                })
            );
            println!("{}", event.to_json()?);
        }
        Command::Demo => run_demo(&args).await?,
    }

    Ok(())
}

// ── History ───────────────────────────────────────────────────────────────────

async fn run_history(
    args: &Args,
    conversation: &str,
    viewer: &str,
    cursor: Option<&str>,
) -> Result<()> {
    if args.database.is_none() {
        return Err(eyre!("--database or XONGROH_DATABASE_PATH is required for history"));
    }
    let key = args
        .message_key
        .clone()
        .ok_or_else(|| eyre!("--message-key or XONGROH_MESSAGE_KEY is required"))?;
    let cursor = cursor
        .map(Cursor::decode)
        .transpose()
        .wrap_err("invalid cursor token")?;

    let core = XongrohCore::initialize(args.core_config(key)).await?;
    let page = core.database().fetch_message_page(
        conversation,
        viewer,
        cursor.as_ref(),
        core.config().page_size,
    )?;

    let messages: Vec<_> = page
        .items
        .iter()
        .map(|m| {
            let text = core.messaging().render(m);
            json!({
                "id": m.id,
                "from": m.sender_id,
                "text": text.as_str(),
                "read": m.is_read,
                "sentAt": time::to_rfc3339(m.created_at),
            })
        })
        .collect();
    println!(
        "{}",
        json!({
            "conversation": conversation,
            "messages": messages,
            "nextCursor": page.next_cursor.as_ref().map(Cursor::encode),
        })
    );
    Ok(())
}

// ── Demo ──────────────────────────────────────────────────────────────────────

async fn run_demo(args: &Args) -> Result<()> {
    let key = match &args.message_key {
        Some(key) => key.clone(),
        None => {
            tracing::warn!("No message key configured; using an ephemeral one");
            MessageKey::generate().to_base64()
        }
    };

    let core = XongrohCore::initialize(args.core_config(key)).await?;
    let messaging = core.messaging();

    let conversation = messaging.get_or_create_conversation("alice", "bob")?;
    let scope = Scope::Conversation(conversation.id.clone());

    let bob_feed = core.conversation_feed("bob");
    bob_feed.spawn_event_pump();
    bob_feed.start(scope.clone()).await?;

    for text in ["hi bob", "are you coming tonight?", "bring the sketches"] {
        messaging.send_text(&conversation.id, "alice", "bob", text)?;
    }
    messaging.send_text(&conversation.id, "bob", "alice", "on my way")?;
    wait_for_items(&bob_feed, 4).await?;

    let rendered: Vec<_> = bob_feed
        .items()
        .iter()
        .map(|m| {
            let text = messaging.render(m);
            json!({
                "from": m.sender_id,
                "text": text.as_str(),
                "read": m.is_read,
            })
        })
        .collect();
    println!(
        "{}",
        json!({ "conversation": conversation.id, "messages": rendered, "unread": bob_feed.unread_count() })
    );

    for message in bob_feed.items() {
        bob_feed.on_item_visible(message.id()).await;
    }
    println!("{}", json!({ "after_scroll_unread": bob_feed.unread_count() }));

    let notifications = core.notification_feed("bob");
    notifications
        .start(Scope::notifications(NotificationNamespace::Personal, "bob"))
        .await?;
    core.notifications().notify(
        NotificationNamespace::Personal,
        "bob",
        "alice",
        &conversation.id,
        "alice sent you a message",
    )?;
    notifications.refresh().await?;
    println!("{}", json!({ "notifications_unread": notifications.unread_count() }));

    core.notifications()
        .mark_all_read(NotificationNamespace::Personal, "bob")?;
    notifications.refresh().await?;
    println!("{}", json!({ "notifications_unread": notifications.unread_count() }));

    notifications.teardown();
    bob_feed.teardown();
    Ok(())
}

async fn wait_for_items<T: FeedItem>(feed: &LiveFeed<T>, count: usize) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while feed.items().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| eyre!("feed did not reach {} items", count))
}
