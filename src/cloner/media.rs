//! Media download, video note re-encoding and temp file cleanup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::telegram::{MediaSource, MessageKind, TelegramApi};

/// Side of the square video note output, in pixels.
const VIDEO_NOTE_SIZE: u32 = 384;
/// Maximum video note length, in seconds.
const VIDEO_NOTE_MAX_SECS: u32 = 59;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffmpeg failed: {0}")]
    Transcode(String),
}

/// Files removed when the guard is dropped.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed temp file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
            }
        }
    }
}

/// Local staging area for media on its way to the target.
#[derive(Debug)]
pub struct MediaStore {
    download_dir: PathBuf,
    ffmpeg: PathBuf,
    seq: AtomicU64,
}

impl MediaStore {
    #[must_use]
    pub fn new(download_dir: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ffmpeg: ffmpeg.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Gets `media` ready to send.
    ///
    /// Downloadable kinds are saved locally (and video notes re-encoded);
    /// any failure degrades to the remote reference. Created files are
    /// registered with `temps`.
    pub async fn fetch<T: TelegramApi>(
        &self,
        api: &T,
        media: &T::Media,
        kind: MessageKind,
        message_id: i32,
        temps: &mut TempFiles,
    ) -> MediaSource<T::Media> {
        if !kind.is_downloadable() {
            return MediaSource::Remote(media.clone());
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.download_dir).await {
            warn!(
                "Cannot create download dir {}: {}, sending message {} by reference",
                self.download_dir.display(),
                e,
                message_id
            );
            return MediaSource::Remote(media.clone());
        }

        let stem = format!("{}_{}", message_id, self.seq.fetch_add(1, Ordering::Relaxed));
        let path = match api.download(media, &self.download_dir, &stem).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Download of message {} failed, sending by reference: {}", message_id, e);
                return MediaSource::Remote(media.clone());
            }
        };
        temps.track(path.clone());

        if kind != MessageKind::VideoNote {
            return MediaSource::Local(path);
        }

        match self.transcode_video_note(&path).await {
            Ok(round) => {
                temps.track(round.clone());
                MediaSource::Local(round)
            }
            Err(e) => {
                warn!("Video note {} not re-encoded, sending as is: {}", message_id, e);
                MediaSource::Local(path)
            }
        }
    }

    /// Re-encodes `input` into a square clip suitable for a round video.
    pub async fn transcode_video_note(&self, input: &Path) -> Result<PathBuf, MediaError> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video_note");
        let output = input.with_file_name(format!("{stem}_round.mp4"));

        let filter = format!(
            "crop='min(iw,ih)':'min(iw,ih)',scale={VIDEO_NOTE_SIZE}:{VIDEO_NOTE_SIZE},setsar=1"
        );
        let max_secs = VIDEO_NOTE_MAX_SECS.to_string();
        let result = Command::new(&self.ffmpeg)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-t", max_secs.as_str(), "-vf", filter.as_str()])
            .args(["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"])
            .args(["-c:a", "aac", "-b:a", "96k"])
            .arg(&output)
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            // ffmpeg may leave a partial file behind.
            let _ = tokio::fs::remove_file(&output).await;
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(MediaError::Transcode(stderr.trim().to_owned()));
        }

        debug!("Re-encoded video note to {}", output.display());
        Ok(output)
    }
}
