mod config;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use lobby_blob::BlobStorage;
use lobby_db::{Database, SqliteStore};
use lobby_gateway::{Dispatcher, PublishingStore};
use lobby_sync::{Composer, FeedPhase, FeedSession, FeedView, ProfileResolver, SyncConfig};
use lobby_types::models::{AuthorId, Entry, EntryId, Viewer};

use crate::config::AppConfig;

type Store = PublishingStore<SqliteStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so the feed owns stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lobby=info,lobby_sync=info,lobby_db=info,tower_http=debug".into()),
        )
        .init();

    // Config
    let config = AppConfig::from_env()?;
    let sync_config = SyncConfig::from_env()?;

    let author_id = match config.user_id {
        Some(id) => AuthorId(id),
        None => {
            let id = AuthorId::new();
            warn!("LOBBY_USER_ID not set, using {} for this run", id);
            id
        }
    };
    let viewer = Viewer::new(author_id, config.user_email.clone());

    // Init database and register the viewer
    let db = Database::open(&config.db_path)?;
    db.upsert_profile(&author_id.to_string(), viewer.display_name(), &viewer.email)?;
    info!("Signed in as {} ({})", viewer.display_name(), viewer.email);

    // Shared state
    let dispatcher = Dispatcher::new();
    let store = Arc::new(PublishingStore::new(SqliteStore::new(db), dispatcher.clone()));
    let blobs = Arc::new(BlobStorage::new(config.blob_dir.clone(), config.public_url.clone()).await?);

    // Blob endpoint
    let addr = config.addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {}", addr))?;
    let app = lobby_blob::router(&blobs);
    info!("Serving attachments on {} as {}", addr, config.public_url);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Blob server stopped: {}", e);
        }
    });

    // Feed
    let session = FeedSession::start(store.clone(), Arc::new(dispatcher.clone()), &sync_config)?;
    let composer = Composer::new(store, blobs, viewer.clone(), sync_config.topic.clone());

    let renderer = tokio::spawn(render_feed(session.view(), session.profiles().clone(), viewer));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match run_command(&line, &session, &composer).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => println!("! {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(session);
    dispatcher.shutdown();
    let _ = renderer.await;
    server.abort();
    info!("Bye");

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Say(&'a str),
    Attach { path: &'a str, media_type: Option<&'a str> },
    Retry,
    Quit,
    Nothing,
}

enum Flow {
    Continue,
    Quit,
}

fn parse_command(line: &str) -> Result<Command<'_>, &'static str> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Nothing);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line));
    };

    let mut parts = rest.split_whitespace();
    match parts.next() {
        Some("quit") | Some("exit") => Ok(Command::Quit),
        Some("retry") => Ok(Command::Retry),
        Some("attach") => {
            let path = parts.next().ok_or("usage: /attach <path> [media type]")?;
            Ok(Command::Attach {
                path,
                media_type: parts.next(),
            })
        }
        _ => Err("commands: /attach <path> [media type], /retry, /quit"),
    }
}

async fn run_command(
    line: &str,
    session: &FeedSession<Store, Dispatcher>,
    composer: &Composer<Store, BlobStorage>,
) -> anyhow::Result<Flow> {
    match parse_command(line).map_err(anyhow::Error::msg)? {
        Command::Nothing => {}
        Command::Quit => return Ok(Flow::Quit),
        Command::Say(text) => composer.submit_text(text).await?,
        Command::Retry => {
            if !session.retry_snapshot() {
                println!("! nothing to retry");
            }
        }
        Command::Attach { path, media_type } => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("could not read {}", path))?;
            let filename = Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(path);
            let media_type = media_type.unwrap_or_else(|| guess_media_type(filename));
            composer
                .submit_attachment(Bytes::from(data), filename, media_type)
                .await?;
        }
    }
    Ok(Flow::Continue)
}

/// Empty means "let the composer pick the default".
fn guess_media_type(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "",
    }
}

async fn render_feed(
    mut view: watch::Receiver<FeedView>,
    profiles: ProfileResolver<Store>,
    viewer: Viewer,
) {
    let mut updates = profiles.updates();
    let mut updates_open = true;
    let mut shown: HashSet<EntryId> = HashSet::new();
    let mut names = ProvisionalNames::default();
    let mut last_phase: Option<FeedPhase> = None;

    loop {
        let current = view.borrow_and_update().clone();
        if last_phase.as_ref() != Some(&current.phase) {
            println!("-- {} --", current.status_line());
            if matches!(current.phase, FeedPhase::Failed(_)) {
                println!("-- type /retry to load again --");
            }
            last_phase = Some(current.phase.clone());
        }
        if current.is_ready() && current.is_empty() && shown.is_empty() {
            println!("-- no messages yet, say hello --");
        }

        for entry in current.entries() {
            if shown.insert(entry.id) {
                print_entry(entry, &profiles, &viewer, &mut names);
            }
        }

        // Wait for the next view, reprinting names as profiles settle
        loop {
            tokio::select! {
                changed = view.changed() => {
                    if changed.is_err() {
                        debug!("Feed view closed");
                        return;
                    }
                    break;
                }
                update = updates.recv(), if updates_open => match update {
                    Ok(update) => {
                        debug!(author = %update.author_id, outcome = ?update.outcome, "profile settled");
                        let resolved = profiles.cached(update.author_id);
                        let renamed = resolved
                            .and_then(|p| names.settle(update.author_id, &p.display_handle));
                        if let Some(line) = renamed {
                            println!("{}", line);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Profile update listener lagged, skipped {} updates", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => updates_open = false,
                },
            }
        }
    }
}

/// Names printed from a fallback profile while the real one was loading.
#[derive(Default)]
struct ProvisionalNames {
    printed: HashMap<AuthorId, String>,
}

impl ProvisionalNames {
    fn printed_as(&mut self, author_id: AuthorId, name: &str) {
        self.printed.entry(author_id).or_insert_with(|| name.to_string());
    }

    /// The line announcing the settled name, if it differs from what was shown.
    fn settle(&mut self, author_id: AuthorId, name: &str) -> Option<String> {
        let shown = self.printed.remove(&author_id)?;
        (shown != name).then(|| format!("-- {} is {} --", shown, name))
    }
}

fn print_entry(
    entry: &Entry,
    profiles: &ProfileResolver<Store>,
    viewer: &Viewer,
    names: &mut ProvisionalNames,
) {
    let who = if entry.is_own(viewer) {
        "you".to_string()
    } else {
        let resolution = profiles.resolve(entry);
        let name = resolution.profile().display_handle.clone();
        if resolution.is_pending() {
            names.printed_as(entry.author_id, &name);
        }
        name
    };
    match &entry.attachment {
        Some(attachment) => println!(
            "[{}] {}: {} <{}>",
            entry.pretty_time(),
            who,
            entry.body,
            attachment.url
        ),
        None => println!("[{}] {}: {}", entry.pretty_time(), who, entry.body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  hi there "), Ok(Command::Say("hi there")));
        assert_eq!(parse_command(""), Ok(Command::Nothing));
        assert_eq!(parse_command("/quit"), Ok(Command::Quit));
        assert_eq!(parse_command("/retry"), Ok(Command::Retry));
        assert_eq!(
            parse_command("/attach ./cat.png"),
            Ok(Command::Attach { path: "./cat.png", media_type: None })
        );
        assert_eq!(
            parse_command("/attach notes.bin text/plain"),
            Ok(Command::Attach { path: "notes.bin", media_type: Some("text/plain") })
        );
        assert!(parse_command("/attach").is_err());
        assert!(parse_command("/dance").is_err());
    }

    #[test]
    fn settled_profile_renames_provisional_author_once() {
        let author = AuthorId::new();
        let other = AuthorId::new();
        let mut names = ProvisionalNames::default();
        names.printed_as(author, "eve");
        names.printed_as(author, "ignored");
        names.printed_as(other, "zed");

        assert_eq!(names.settle(author, "Evelyn").as_deref(), Some("-- eve is Evelyn --"));
        assert_eq!(names.settle(author, "Evelyn"), None);
        // Fallback kept: nothing to announce
        assert_eq!(names.settle(other, "zed"), None);
    }

    #[test]
    fn guesses_media_types() {
        assert_eq!(guess_media_type("Photo.JPG"), "image/jpeg");
        assert_eq!(guess_media_type("report.pdf"), "application/pdf");
        assert_eq!(guess_media_type("archive"), "");
    }
}
