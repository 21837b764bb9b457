//! Front-end state: received files, transfer progress and the rendering of
//! [`AppEvent`]s into terminal lines.

use anyhow::{Result, bail};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::initializer::AppEvent;
use crate::core::pipeline::receiver::CompletedFile;
use crate::utils::atomic_write::{atomic_write, unique_path};
use crate::utils::formatters::{clock, format_file_size, percent, short_id};

/// Progress is reported every this many percent.
const PROGRESS_STEP: u32 = 25;

/// A completed download. The data is held in memory until it is saved,
/// then released; `size` keeps the original length.
pub struct ReceivedFile {
    pub file: CompletedFile,
    pub size: u64,
    pub saved_to: Option<PathBuf>,
}

struct Progress {
    file_name: String,
    last_step: u32,
}

pub struct App {
    download_dir: PathBuf,
    pub received: Vec<ReceivedFile>,
    pub open_peers: usize,
    progress: HashMap<String, Progress>,
}

impl App {
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            received: Vec::new(),
            open_peers: 0,
            progress: HashMap::new(),
        }
    }

    /// Record `event` and return the lines to show for it, if any.
    pub fn apply(&mut self, event: AppEvent) -> Option<String> {
        match event {
            AppEvent::Chat(line) => {
                let text = if line.own {
                    format!("[{}] me: {}", clock(&line.timestamp), line.content)
                } else {
                    format!("[{}] {}: {}", clock(&line.timestamp), line.nickname, line.content)
                };
                Some(text)
            }
            AppEvent::PeerConnected { peer_id, remote } => Some(match remote {
                Some(r) => format!("* connected to {} ({})", r.nickname, r.user_id),
                None => format!("* connected ({})", short_id(&peer_id)),
            }),
            AppEvent::PeerDisconnected { peer_id, remote } => Some(match remote {
                Some(r) => format!("* {} disconnected", r.nickname),
                None => format!("* peer {} disconnected", short_id(&peer_id)),
            }),
            AppEvent::ChannelOpened { .. } => None,
            AppEvent::ChannelClosed { peer_id } => {
                Some(format!("* channel to {} closed", short_id(&peer_id)))
            }
            AppEvent::Connectivity { open_peers } => {
                if open_peers == self.open_peers {
                    return None;
                }
                self.open_peers = open_peers;
                Some(format!("* {open_peers} peer(s) connected"))
            }
            AppEvent::FileIncoming {
                transfer_id,
                file_name,
                file_size,
                nickname,
                ..
            } => {
                self.track(&transfer_id, &file_name);
                Some(format!(
                    "* {nickname} is sending {file_name} ({}) [{}]",
                    format_file_size(file_size),
                    short_id(&transfer_id)
                ))
            }
            AppEvent::FileProgress {
                transfer_id,
                received,
                total,
                ..
            } => self.step(&transfer_id, received, total, "receiving"),
            AppEvent::FileReceived(file) => {
                self.progress.remove(&file.transfer_id);
                let line = format!(
                    "* received {} ({}) from {} [{}], /save {} to keep it",
                    file.file_name,
                    format_file_size(file.data.len() as u64),
                    file.nickname,
                    short_id(&file.transfer_id),
                    short_id(&file.transfer_id)
                );
                self.received.push(ReceivedFile {
                    size: file.data.len() as u64,
                    file,
                    saved_to: None,
                });
                Some(line)
            }
            AppEvent::SendStarted {
                transfer_id,
                file_name,
                file_size,
                peers,
            } => {
                self.track(&transfer_id, &file_name);
                Some(format!(
                    "* sending {file_name} ({}) to {peers} peer(s) [{}]",
                    format_file_size(file_size),
                    short_id(&transfer_id)
                ))
            }
            AppEvent::SendProgress {
                transfer_id,
                sent,
                total,
            } => self.step(&transfer_id, sent, total, "sending"),
            AppEvent::SendComplete {
                transfer_id,
                file_name,
                delivered,
            } => {
                self.progress.remove(&transfer_id);
                Some(format!("* sent {file_name} to {delivered} peer(s)"))
            }
            AppEvent::RecipientDeclined { file_name, .. } => {
                Some(format!("* a peer declined {file_name}"))
            }
            AppEvent::TransferCancelled {
                transfer_id,
                file_name,
                reason,
            } => {
                self.progress.remove(&transfer_id);
                Some(format!("* {file_name} cancelled: {reason}"))
            }
            AppEvent::TransferFailed {
                transfer_id,
                reason,
            } => {
                let name = self
                    .progress
                    .remove(&transfer_id)
                    .map(|p| p.file_name)
                    .unwrap_or_else(|| short_id(&transfer_id).to_string());
                Some(format!("! transfer {name} failed: {reason}"))
            }
        }
    }

    fn track(&mut self, transfer_id: &str, file_name: &str) {
        self.progress.insert(
            transfer_id.to_string(),
            Progress {
                file_name: file_name.to_string(),
                last_step: 0,
            },
        );
    }

    fn step(&mut self, transfer_id: &str, done: u32, total: u32, verb: &str) -> Option<String> {
        let progress = self.progress.get_mut(transfer_id)?;
        let pct = percent(done, total);
        let step = pct / PROGRESS_STEP * PROGRESS_STEP;
        if step <= progress.last_step || step >= 100 {
            return None;
        }
        progress.last_step = step;
        Some(format!("  {verb} {} {step}%", progress.file_name))
    }

    fn find_received(&self, id: &str) -> Option<usize> {
        self.received
            .iter()
            .position(|r| r.file.transfer_id == id)
            .or_else(|| {
                let mut matches = self
                    .received
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.file.transfer_id.starts_with(id));
                match (matches.next(), matches.next()) {
                    (Some((i, _)), None) => Some(i),
                    _ => None,
                }
            })
    }

    /// Write a received file into the download directory without
    /// overwriting anything. Returns the final path.
    pub async fn save(&mut self, id: &str) -> Result<PathBuf> {
        let Some(idx) = self.find_received(id) else {
            bail!("no received file matches {id}");
        };
        let dir = self.download_dir.clone();
        let entry = &mut self.received[idx];
        if let Some(path) = &entry.saved_to {
            return Ok(path.clone());
        }
        let path = unique_path(&dir, &sanitize_file_name(&entry.file.file_name));
        atomic_write(&path, &entry.file.data).await?;
        info!(
            event = "file_saved",
            transfer_id = %entry.file.transfer_id,
            path = %path.display(),
            bytes = entry.size,
            "Received file saved"
        );
        entry.file.data = Bytes::new();
        entry.saved_to = Some(path.clone());
        Ok(path)
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }
}

/// Reduce a remote-supplied file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "received.bin".to_string()
    } else {
        cleaned
    }
}
