//! Line-oriented terminal front end.
//!
//! Lines starting with `/` are commands; anything else is sent as chat.
//! `/accept` and `/answer` switch into paste mode, where lines are collected
//! until the JSON braces balance.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::connection::webrtc::WebRtcTransport;
use crate::core::identity::LocalIdentity;
use crate::core::initializer::{AppEvent, Cancelled, PeerNode};
use crate::utils::formatters::{format_file_size, short_id};
use crate::utils::sos::SignalOfStop;
use crate::workers::app::{App, ReceivedFile};
use crate::workers::args::Args;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Offer,
    /// Paste a remote offer; trailing text on the line starts the paste.
    Accept(String),
    /// Paste the answer to our offer.
    Answer(String),
    Send(Vec<String>),
    Cancel(String),
    Peers,
    Nick(String),
    Files,
    Save(String),
    Help,
    Quit,
}

pub const COMMAND_HELP: &[(&str, &str)] = &[
    ("/offer", "Create an offer to paste to a peer"),
    ("/accept", "Paste a peer's offer and print the answer"),
    ("/answer", "Paste the answer to your offer"),
    ("/send <path>...", "Send files to every connected peer"),
    ("/cancel <id>", "Cancel a transfer"),
    ("/peers", "List connections"),
    ("/nick <name>", "Change your nickname"),
    ("/files", "List received files"),
    ("/save <id>", "Save a received file"),
    ("/help", "Show available commands"),
    ("/quit", "Exit"),
];

/// Try to parse `input` as a slash-command.
///
/// Returns `None` for a regular chat line, `Some(Err(msg))` for an unknown
/// command or missing argument.
pub fn parse_command(input: &str) -> Option<Result<Command, String>> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let (cmd, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (trimmed, ""),
    };
    let required = |what: &str| -> Result<String, String> {
        if rest.is_empty() {
            Err(format!("Usage: {cmd} <{what}>"))
        } else {
            Ok(rest.to_string())
        }
    };
    Some(match cmd {
        "/offer" => Ok(Command::Offer),
        "/accept" => Ok(Command::Accept(rest.to_string())),
        "/answer" => Ok(Command::Answer(rest.to_string())),
        "/send" => required("path").map(|_| {
            Command::Send(rest.split_whitespace().map(str::to_string).collect())
        }),
        "/cancel" => required("id").map(Command::Cancel),
        "/peers" => Ok(Command::Peers),
        "/nick" => required("name").map(Command::Nick),
        "/files" => Ok(Command::Files),
        "/save" => required("id").map(Command::Save),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        _ => {
            warn!(event = "unknown_command", command = %cmd, "Unknown command");
            Err(format!("Unknown command: {cmd}"))
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PasteKind {
    Offer,
    Answer,
}

/// Collects pasted JSON until its braces balance. Braces inside strings
/// are ignored.
#[derive(Debug, Default)]
pub struct PasteBuffer {
    text: String,
    depth: i32,
    seen_open: bool,
    in_string: bool,
    escaped: bool,
}

impl PasteBuffer {
    /// Append a line. Returns true once a complete object has been read.
    pub fn push(&mut self, line: &str) -> bool {
        for c in line.chars() {
            if self.in_string {
                match (self.escaped, c) {
                    (true, _) => self.escaped = false,
                    (false, '\\') => self.escaped = true,
                    (false, '"') => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => self.in_string = true,
                '{' => {
                    self.depth += 1;
                    self.seen_open = true;
                }
                '}' => self.depth -= 1,
                _ => {}
            }
        }
        self.text.push_str(line);
        self.text.push('\n');
        self.seen_open && self.depth <= 0
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[derive(Debug, PartialEq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Repl {
    node: PeerNode,
    pasting: Option<(PasteKind, PasteBuffer)>,
}

impl Repl {
    pub fn new(node: PeerNode) -> Self {
        Self {
            node,
            pasting: None,
        }
    }

    #[cfg(test)]
    pub fn is_pasting(&self) -> bool {
        self.pasting.is_some()
    }

    pub async fn handle_line(&mut self, app: &mut App, line: &str) -> Flow {
        if let Some((kind, mut buf)) = self.pasting.take() {
            // A command typed before any JSON leaves paste mode.
            if buf.is_empty() && line.trim_start().starts_with('/') {
                say("(paste aborted)");
            } else {
                if buf.push(line) {
                    self.finish_paste(kind, buf.into_text()).await;
                } else {
                    self.pasting = Some((kind, buf));
                }
                return Flow::Continue;
            }
        }

        match parse_command(line) {
            None => {
                if !line.trim().is_empty() {
                    self.chat(line).await;
                }
                Flow::Continue
            }
            Some(Err(msg)) => {
                say(&msg);
                Flow::Continue
            }
            Some(Ok(cmd)) => self.execute(app, cmd).await,
        }
    }

    async fn execute(&mut self, app: &mut App, cmd: Command) -> Flow {
        match cmd {
            Command::Offer => match self.node.create_offer().await {
                Ok(json) => {
                    say("Send this offer to your peer, then paste their reply with /answer:");
                    say(&json);
                }
                Err(e) => say(&format!("! {e}")),
            },
            Command::Accept(rest) => self.start_paste(PasteKind::Offer, &rest).await,
            Command::Answer(rest) => self.start_paste(PasteKind::Answer, &rest).await,
            Command::Send(paths) => {
                for path in paths {
                    match self.node.send_file(Path::new(&path)).await {
                        Ok(id) => info!(event = "send_requested", transfer_id = %id, path = %path, "File send started"),
                        Err(e) => say(&format!("! {path}: {e}")),
                    }
                }
            }
            Command::Cancel(id) => match self.node.cancel(&id).await {
                Ok(Some(Cancelled::Outgoing)) => say("* cancelling send"),
                Ok(Some(Cancelled::Incoming { file_name })) => {
                    say(&format!("* cancelled {file_name}"))
                }
                Ok(None) => say(&format!("! no transfer matches {id}")),
                Err(e) => say(&format!("! {e}")),
            },
            Command::Peers => {
                let me = self.node.identity().await;
                say(&format!("  you: {} ({})", me.nickname(), me.user_id));
                let peers = self.node.peers().await;
                if peers.is_empty() {
                    say("No connections.");
                } else {
                    say(&format!(
                        "  {} of {} with an open channel",
                        self.node.open_count().await,
                        peers.len()
                    ));
                }
                for p in peers {
                    let who = p
                        .remote
                        .map(|r| format!("{} ({})", r.nickname, r.user_id))
                        .unwrap_or_else(|| "?".into());
                    let channel = p
                        .channel
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "none".into());
                    say(&format!(
                        "  {}  {who}  [{}] channel {channel}",
                        short_id(&p.peer_id),
                        p.signaling
                    ));
                }
                for (id, name) in self.node.active_sends().await {
                    say(&format!("  sending {name} [{}]", short_id(&id)));
                }
            }
            Command::Nick(name) => {
                let nick = self.node.set_nickname(&name).await;
                say(&format!("* you are now {nick}"));
            }
            Command::Files => {
                if app.received.is_empty() {
                    say("No received files.");
                } else {
                    say(&format!("  saving into {}", app.download_dir().display()));
                }
                for r in &app.received {
                    say(&format!("  {}", describe_received(r)));
                }
            }
            Command::Save(id) => match app.save(&id).await {
                Ok(path) => say(&format!("* saved to {}", path.display())),
                Err(e) => say(&format!("! {e}")),
            },
            Command::Help => {
                for (cmd, help) in COMMAND_HELP {
                    say(&format!("  {cmd:<18} {help}"));
                }
            }
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    async fn chat(&self, line: &str) {
        if let Err(e) = self.node.send_text(line).await {
            say(&format!("! {e}"));
        }
    }

    async fn start_paste(&mut self, kind: PasteKind, rest: &str) {
        let mut buf = PasteBuffer::default();
        if !rest.is_empty() && buf.push(rest) {
            self.finish_paste(kind, buf.into_text()).await;
            return;
        }
        say(match kind {
            PasteKind::Offer => "Paste the offer JSON:",
            PasteKind::Answer => "Paste the answer JSON:",
        });
        self.pasting = Some((kind, buf));
    }

    async fn finish_paste(&mut self, kind: PasteKind, text: String) {
        match kind {
            PasteKind::Offer => match self.node.accept_offer(&text).await {
                Ok(answer) => {
                    say("Send this answer back to your peer:");
                    say(&answer);
                }
                Err(e) => say(&format!("! {e}")),
            },
            PasteKind::Answer => match self.node.complete_with_answer(&text).await {
                Ok(peer_id) => say(&format!(
                    "* answer applied, connecting to {}...",
                    short_id(&peer_id)
                )),
                Err(e) => say(&format!("! {e}")),
            },
        }
    }
}

fn describe_received(r: &ReceivedFile) -> String {
    let state = match &r.saved_to {
        Some(p) => format!("saved to {}", p.display()),
        None => "not saved".into(),
    };
    format!(
        "[{}] {} ({}, {}) from {}, {state}",
        short_id(&r.file.transfer_id),
        r.file.file_name,
        format_file_size(r.size),
        r.file.mime,
        r.file.nickname
    )
}

fn say(text: &str) {
    println!("{text}");
}

/// Run the terminal front end until `/quit`, end of input or `sos`.
pub async fn run(args: Args, sos: SignalOfStop) -> Result<()> {
    let transport = Arc::new(WebRtcTransport::new(&args.stun_servers())?);
    let identity = LocalIdentity::generate(args.nickname.clone());
    say(&format!(
        "pastewire: you are {} ({}). Type /help for commands.",
        identity.nickname(),
        identity.user_id
    ));

    let (app_tx, mut app_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (node, dispatcher) = PeerNode::new(transport, identity, sos.clone(), app_tx);
    let dispatch = tokio::spawn(dispatcher.run());

    let mut app = App::new(args.download_dir());
    let mut repl = Repl::new(node.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = sos.wait() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if repl.handle_line(&mut app, &line).await == Flow::Quit {
                        break;
                    }
                }
                None => break,
            },
            Some(event) = app_rx.recv() => {
                if let Some(text) = app.apply(event) {
                    say(&text);
                }
            }
        }
    }

    node.shutdown().await;
    sos.cancel();
    let _ = dispatch.await;
    Ok(())
}
