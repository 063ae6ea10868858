//! Line-oriented console driver.
//!
//! Lines starting with `/` are commands; any other line is a chat message to
//! the current peer (the most recently connected one, or the one picked with
//! `/use`). Session notices are printed as they arrive. Received files are
//! written under `<data_dir>/downloads/`.

use crate::core::config::SESSION_STORE_FILE;
use crate::core::connection::negotiator::Connector;
use crate::core::connection::webrtc::WebRtcConnector;
use crate::core::identity::EndpointId;
use crate::core::session::{Notice, Session, SessionSnapshot};
use crate::core::signaling::{Discovery, RelayDiscovery, WsPipe};
use crate::core::storage::FileStore;
use crate::core::transfer::{FileSource, ReceivedFile};
use crate::utils::clipboard::SystemClipboard;
use crate::utils::sos::SignalOfStop;
use crate::workers::args::Args;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Console commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Open(String),
    Accept,
    Code(String),
    Answer(String),
    Connect(String),
    Copy,
    Status,
    Use(String),
    File(PathBuf),
    Send,
    Reject(String),
    Close,
    Reconnect,
    Restore,
    Dismiss,
    Help,
    Quit,
}

/// Available commands with short descriptions (for `/help` output).
pub const COMMAND_HELP: &[(&str, &str)] = &[
    ("/start", "Begin a session and produce a link to share"),
    ("/open <link>", "Read a link someone shared with you"),
    ("/accept", "Act on the opened link"),
    ("/code <code>", "Answer a connection code pasted by hand"),
    ("/answer <code>", "Apply the response code sent back to you"),
    ("/connect <peer id>", "Dial a peer id through the relay"),
    ("/copy", "Copy the link or response code to the clipboard"),
    ("/status", "Show state and connections"),
    ("/use <peer>", "Pick the peer that messages and files go to"),
    ("/file <path>", "Select a file"),
    ("/send", "Send the selected file to the current peer"),
    ("/reject [reason]", "Refuse the current peer and close it"),
    ("/close", "Close the current peer"),
    ("/reconnect", "Dial the current peer again"),
    ("/restore", "Re-open connections from the last run"),
    ("/dismiss", "Clear the current error"),
    ("/help", "Show available commands"),
    ("/quit", "Exit"),
];

fn required(arg: &str, usage: &str) -> Result<String, String> {
    if arg.is_empty() {
        Err(format!("Usage: {usage}"))
    } else {
        Ok(arg.to_string())
    }
}

/// Try to parse `input` as a slash-command.
///
/// Returns `None` when the input is a regular message (doesn't start with `/`).
/// Returns `Some(Ok(cmd))` for a recognized command, or `Some(Err(msg))` for an
/// unknown command or a missing argument.
pub fn parse_command(input: &str) -> Option<Result<Command, String>> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let (cmd, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (trimmed, ""),
    };
    let parsed = match cmd {
        "/start" => Ok(Command::Start),
        "/open" => required(arg, "/open <link>").map(Command::Open),
        "/accept" => Ok(Command::Accept),
        "/code" => required(arg, "/code <code>").map(Command::Code),
        "/answer" => required(arg, "/answer <code>").map(Command::Answer),
        "/connect" => required(arg, "/connect <peer id>").map(Command::Connect),
        "/copy" => Ok(Command::Copy),
        "/status" => Ok(Command::Status),
        "/use" => required(arg, "/use <peer>").map(Command::Use),
        "/file" => required(arg, "/file <path>").map(|p| Command::File(PathBuf::from(p))),
        "/send" => Ok(Command::Send),
        "/reject" => Ok(Command::Reject(if arg.is_empty() { "busy".into() } else { arg.into() })),
        "/close" => Ok(Command::Close),
        "/reconnect" => Ok(Command::Reconnect),
        "/restore" => Ok(Command::Restore),
        "/dismiss" => Ok(Command::Dismiss),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        _ => {
            warn!(event = "unknown_command", command = %cmd, "Unknown console command");
            Err(format!("Unknown command: {cmd}"))
        }
    };
    Some(parsed)
}

/// Converts bytes to human-readable file size format
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Shortens a peer id to its first 12 characters.
pub fn short_peer_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Find the connection `token` names: an exact id or a unique prefix.
pub fn resolve_peer(snapshot: &SessionSnapshot, token: &str) -> Option<EndpointId> {
    if let Some(entry) = snapshot.entries.iter().find(|e| e.remote.as_str() == token) {
        return Some(entry.remote.clone());
    }
    let mut matches = snapshot
        .entries
        .iter()
        .filter(|e| e.remote.as_str().starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(entry), None) => Some(entry.remote.clone()),
        _ => None,
    }
}

/// Where a received file is saved: its bare name inside `dir`, with a
/// numeric suffix when that name is taken.
pub fn download_path(dir: &Path, name: &str) -> PathBuf {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .unwrap_or("download");
    let candidate = dir.join(base);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (base, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

struct Console {
    session: Session,
    current: Option<EndpointId>,
    downloads: PathBuf,
}

pub async fn run(args: Args, sos: SignalOfStop, data_dir: &Path) -> anyhow::Result<()> {
    let config = args.session_config()?;
    let store = Arc::new(FileStore::open(data_dir.join(SESSION_STORE_FILE)));
    let connector: Arc<dyn Connector> = Arc::new(WebRtcConnector::new(args.ice_servers()));
    let discovery = args.relay_url()?.map(|url| {
        Arc::new(RelayDiscovery::new(Arc::new(WsPipe::new(url)), connector.clone())) as Arc<dyn Discovery>
    });
    let has_discovery = discovery.is_some();

    let session = Session::new(config, store, connector, discovery, Box::new(SystemClipboard));
    info!(event = "console_start", local = %session.local(), mode = ?args.mode(), "Console ready");

    let mut console = Console {
        session,
        current: None,
        downloads: data_dir.join("downloads"),
    };
    println!("peerlink {} ({:?} mode). Type /help for commands.", console.session.local(), args.mode());

    if has_discovery {
        match console.session.restore().await {
            Ok(restored) if !restored.is_empty() => {
                println!("Restored {} connection(s).", restored.len());
                console.current = restored.last().cloned();
            }
            Ok(_) => {}
            Err(e) => println!("Could not restore connections: {e}"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = sos.wait() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("cannot read stdin")? else {
                    break;
                };
                if !console.on_line(&line).await? {
                    break;
                }
            }
            event = console.session.next_event() => {
                let Some(event) = event else { break };
                let notices = console.session.handle(event).await;
                for notice in notices {
                    console.on_notice(notice).await;
                }
            }
        }
    }

    info!(event = "console_stop", "Console closed");
    Ok(())
}

impl Console {
    fn current_peer(&self) -> Option<EndpointId> {
        let snapshot = self.session.snapshot();
        match &self.current {
            Some(id) if snapshot.entries.iter().any(|e| &e.remote == id) => Some(id.clone()),
            _ => snapshot.entries.last().map(|e| e.remote.clone()),
        }
    }

    /// Handle one input line. Returns `false` to quit.
    async fn on_line(&mut self, line: &str) -> anyhow::Result<bool> {
        let command = match parse_command(line) {
            None if line.trim().is_empty() => return Ok(true),
            None => {
                let Some(peer) = self.current_peer() else {
                    println!("No connection yet.");
                    return Ok(true);
                };
                report(self.session.send_message(&peer, line.trim()).await);
                return Ok(true);
            }
            Some(Err(msg)) => {
                println!("{msg}");
                return Ok(true);
            }
            Some(Ok(command)) => command,
        };

        match command {
            Command::Start => {
                report(self.session.start_session().await);
            }
            Command::Open(link) => {
                if report(self.session.open_link(&link)) {
                    println!("Link read. Type /accept to continue.");
                }
            }
            Command::Accept => {
                report(self.session.accept_link().await);
            }
            Command::Code(code) => {
                report(self.session.accept_remote_token(&code).await);
            }
            Command::Answer(code) => {
                report(self.session.complete_with_answer_token(&code).await);
            }
            Command::Connect(id) => {
                if let Err(e) = self.session.set_target_input(&id) {
                    println!("{e}");
                } else {
                    report(self.session.connect_target());
                }
            }
            Command::Copy => {
                self.session.copy_link();
                if let Some(status) = self.session.snapshot().copy_status {
                    println!("{status}");
                }
            }
            Command::Status => print_status(&self.session.snapshot()),
            Command::Use(token) => match resolve_peer(&self.session.snapshot(), &token) {
                Some(peer) => {
                    println!("Now talking to {}", short_peer_id(peer.as_str()));
                    self.current = Some(peer);
                }
                None => println!("No single connection matches '{token}'."),
            },
            Command::File(path) => match FileSource::from_path(&path).await {
                Ok(file) => {
                    println!("Selected {} ({})", file.name, format_file_size(file.size()));
                    self.session.select_file(file);
                }
                Err(e) => println!("Cannot read {}: {e}", path.display()),
            },
            Command::Send => {
                if let Some(peer) = self.require_peer() {
                    report(self.session.send_file(&peer));
                }
            }
            Command::Reject(reason) => {
                if let Some(peer) = self.require_peer() {
                    report(self.session.reject(&peer, &reason).await);
                }
            }
            Command::Close => {
                if let Some(peer) = self.require_peer() {
                    report(self.session.close(&peer).await);
                }
            }
            Command::Reconnect => {
                if let Some(peer) = self.require_peer() {
                    report(self.session.reconnect(&peer).await);
                }
            }
            Command::Restore => match self.session.restore().await {
                Ok(restored) => println!("Restored {} connection(s).", restored.len()),
                Err(e) => println!("{e}"),
            },
            Command::Dismiss => self.session.dismiss_error(),
            Command::Help => {
                for (usage, description) in COMMAND_HELP {
                    println!("  {usage:<20} {description}");
                }
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn require_peer(&self) -> Option<EndpointId> {
        let peer = self.current_peer();
        if peer.is_none() {
            println!("No connection yet.");
        }
        peer
    }

    async fn on_notice(&mut self, notice: Notice) {
        match notice {
            Notice::State(label) => {
                let snapshot = self.session.snapshot();
                match label {
                    "share-offer" => {
                        if let Some(link) = &snapshot.link {
                            println!("Share this link: {link}");
                        }
                    }
                    "receiver-share" => {
                        if let Some(code) = &snapshot.response_code {
                            println!("Send this code back: {code}");
                        }
                    }
                    _ => println!("[{label}]"),
                }
            }
            Notice::Connected(remote) => {
                println!("Connected to {}", short_peer_id(remote.as_str()));
                self.current = Some(remote);
            }
            Notice::Closed(remote) => println!("Connection to {} closed", short_peer_id(remote.as_str())),
            Notice::Message { remote, text } => println!("{}> {text}", short_peer_id(remote.as_str())),
            Notice::FileIncoming { remote, name, size } => println!(
                "{} is sending {name} ({})",
                short_peer_id(remote.as_str()),
                format_file_size(size)
            ),
            Notice::FileReceived { remote, file } => {
                if let Some(path) = self.keep_received(&file).await {
                    println!(
                        "Received {} from {} -> {}",
                        file.name,
                        short_peer_id(remote.as_str()),
                        path.display()
                    );
                }
            }
            Notice::FileSent { remote } => println!("File delivered to {}", short_peer_id(remote.as_str())),
            Notice::Error(text) => println!("Error: {text}"),
        }
    }

    /// Save a received file. A failed save is reported and the console
    /// keeps running.
    async fn keep_received(&self, file: &ReceivedFile) -> Option<PathBuf> {
        match self.save(&file.name, &file.data).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(event = "file_save_failure", file = %file.name, error = %e, "Could not save received file");
                println!("Error: could not save {}: {e:#}", file.name);
                None
            }
        }
    }

    async fn save(&self, name: &str, data: &[u8]) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.downloads)
            .await
            .with_context(|| format!("cannot create {}", self.downloads.display()))?;
        let path = download_path(&self.downloads, name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;
        info!(event = "file_saved", path = %path.display(), size = data.len(), "Received file saved");
        Ok(path)
    }
}

/// Print the outcome of an operation that failed. The session already keeps
/// the error text; this just shows it. Returns whether it succeeded.
fn report<T, E: std::fmt::Display>(result: Result<T, E>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            println!("Error: {e}");
            false
        }
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    println!("state: {}  local: {}", snapshot.state, snapshot.local);
    if let Some(link) = &snapshot.link {
        println!("link: {link}");
    }
    if let Some(code) = &snapshot.response_code {
        println!("response code: {code}");
    }
    if let Some(file) = &snapshot.selected_file {
        println!("selected file: {file}");
    }
    if let Some(error) = &snapshot.error {
        println!("error: {error}");
    }
    for entry in &snapshot.entries {
        let mut line = format!("  {} [{}]", entry.remote, entry.status.label());
        if entry.sending {
            line.push_str(&format!(" sending {}%", entry.send_progress));
        }
        if entry.receiving {
            line.push_str(&format!(" receiving {}%", entry.receive_progress));
        }
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::memory::{MemoryConnector, MemoryNetwork};
    use crate::core::handshake::HandshakeMode;
    use crate::core::registry::EntryStatus;
    use crate::core::session::{EntrySnapshot, SessionConfig};
    use crate::core::storage::MemoryStore;
    use crate::utils::clipboard::MemoryClipboard;
    use bytes::Bytes;
    use url::Url;

    #[test]
    fn regular_message_is_not_a_command() {
        assert!(parse_command("hello world").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(
            parse_command("/open http://localhost:5173/?peer=abc-123"),
            Some(Ok(Command::Open("http://localhost:5173/?peer=abc-123".into())))
        );
        assert_eq!(parse_command("/reject"), Some(Ok(Command::Reject("busy".into()))));
        assert_eq!(
            parse_command("/reject  not now "),
            Some(Ok(Command::Reject("not now".into())))
        );
        assert_eq!(parse_command("/file a b.txt"), Some(Ok(Command::File("a b.txt".into()))));
        assert!(matches!(parse_command("/answer"), Some(Err(_))));
        assert!(matches!(parse_command("/foo"), Some(Err(_))));
    }

    fn snapshot_with(ids: &[&str]) -> SessionSnapshot {
        SessionSnapshot {
            state: "connected",
            local: "me".into(),
            link: None,
            response_code: None,
            error: None,
            copy_status: None,
            target_input: String::new(),
            target_error: None,
            selected_file: None,
            entries: ids
                .iter()
                .map(|id| EntrySnapshot {
                    remote: (*id).into(),
                    status: EntryStatus::Open,
                    sending: false,
                    send_progress: 0,
                    receiving: false,
                    receive_progress: 0,
                    messages: Vec::new(),
                    received: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_resolve_peer_by_prefix() {
        let snapshot = snapshot_with(&["abc-123", "abd-456", "abc"]);
        assert_eq!(resolve_peer(&snapshot, "abc"), Some("abc".into()));
        assert_eq!(resolve_peer(&snapshot, "abd"), Some("abd-456".into()));
        assert_eq!(resolve_peer(&snapshot, "ab"), None);
        assert_eq!(resolve_peer(&snapshot, "zzz"), None);
    }

    #[test]
    fn test_download_path_strips_dirs_and_avoids_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(download_path(dir.path(), "../../etc/passwd"), dir.path().join("passwd"));
        assert_eq!(download_path(dir.path(), ".."), dir.path().join("download"));

        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(download_path(dir.path(), "notes.txt"), dir.path().join("notes (1).txt"));
    }

    fn console(downloads: PathBuf) -> Console {
        let session = Session::new(
            SessionConfig::new(HandshakeMode::Manual, Url::parse("http://localhost:5173").unwrap()),
            Arc::new(MemoryStore::default()),
            Arc::new(MemoryConnector::new(MemoryNetwork::new())),
            None,
            Box::new(MemoryClipboard::default()),
        );
        Console {
            session,
            current: None,
            downloads,
        }
    }

    #[tokio::test]
    async fn test_unwritable_downloads_do_not_stop_console() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("downloads");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let file = ReceivedFile {
            name: "notes.txt".into(),
            mime: "text/plain".into(),
            data: Bytes::from_static(b"hello"),
        };

        let mut blocked = console(blocker);
        assert_eq!(blocked.keep_received(&file).await, None);
        blocked
            .on_notice(Notice::FileReceived {
                remote: "abc-123".into(),
                file: file.clone(),
            })
            .await;
        assert!(blocked.on_line("/status").await.unwrap());

        let fine = console(dir.path().join("ok"));
        let saved = fine.keep_received(&file).await.unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"hello");
    }

    #[test]
    fn test_formatters() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(40 * 1024), "40.00 KB");
        assert_eq!(short_peer_id("123e4567-e89b-42d3"), "123e4567-e89");
        assert_eq!(short_peer_id("abc-123"), "abc-123");
    }
}
