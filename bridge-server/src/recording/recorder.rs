//! Session recorder - taps the broadcast channel and writes an NBR file.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use super::file_format::{NbrWriter, RecordedFrame, SourceMode};

/// Flush to disk every this many frames (periodic checkpoint).
const FLUSH_INTERVAL_FRAMES: u32 = 50;

/// Recording status information for the control API.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: String,
    pub filename: Option<String>,
    pub frame_count: u32,
    pub duration_ms: u64,
    pub start_time_ms: Option<u64>,
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self {
            state: "idle".to_string(),
            filename: None,
            frame_count: 0,
            duration_ms: 0,
            start_time_ms: None,
        }
    }
}

/// Active recording handle, held by the session while capture runs.
pub struct ActiveRecording {
    stop_flag: Arc<AtomicBool>,
    filename: String,
    frame_count: Arc<AtomicU32>,
    duration_ms: Arc<AtomicU32>,
    start_time_ms: u64,
}

impl ActiveRecording {
    /// Signal the recording task to stop and finalize the file.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::SeqCst)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            state: if self.is_running() {
                "recording".to_string()
            } else {
                "stopped".to_string()
            },
            filename: Some(self.filename.clone()),
            frame_count: self.frame_count.load(Ordering::Relaxed),
            duration_ms: self.duration_ms.load(Ordering::Relaxed) as u64,
            start_time_ms: Some(self.start_time_ms),
        }
    }
}

/// Start capturing the broadcast stream into `path`.
pub fn start_recording(
    data_rx: broadcast::Receiver<Vec<u8>>,
    path: PathBuf,
    source_mode: SourceMode,
) -> Result<ActiveRecording, String> {
    if path.exists() {
        return Err(format!("file already exists: {}", path.display()));
    }
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let start_time_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_millis() as u64;

    let file = File::create(&path).map_err(|e| format!("failed to create file: {}", e))?;
    let writer = NbrWriter::new(BufWriter::new(file), start_time_ms, source_mode)
        .map_err(|e| format!("failed to write header: {}", e))?;

    info!("Starting recording to {}", path.display());

    let stop_flag = Arc::new(AtomicBool::new(false));
    let frame_count = Arc::new(AtomicU32::new(0));
    let duration_ms = Arc::new(AtomicU32::new(0));

    let active = ActiveRecording {
        stop_flag: stop_flag.clone(),
        filename,
        frame_count: frame_count.clone(),
        duration_ms: duration_ms.clone(),
        start_time_ms,
    };

    tokio::spawn(async move {
        recording_task(writer, data_rx, stop_flag, frame_count, duration_ms, path).await;
    });

    Ok(active)
}

/// Background capture loop. Checks the stop flag between receives so a stop
/// request takes effect within 100 ms.
async fn recording_task(
    mut writer: NbrWriter<BufWriter<File>>,
    mut data_rx: broadcast::Receiver<Vec<u8>>,
    stop_flag: Arc<AtomicBool>,
    frame_count: Arc<AtomicU32>,
    duration_ms: Arc<AtomicU32>,
    path: PathBuf,
) {
    let start = Instant::now();
    let mut frames_since_flush = 0u32;

    debug!("Recording task started for {}", path.display());

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            debug!("Recording stop flag detected");
            break;
        }

        let result = tokio::time::timeout(Duration::from_millis(100), data_rx.recv()).await;
        match result {
            Ok(Ok(data)) => {
                let offset_ms = start.elapsed().as_millis().min(u32::MAX as u128) as u32;
                if let Err(e) = writer.write_frame(&RecordedFrame::new(offset_ms, data)) {
                    error!("Failed to write frame: {}", e);
                    break;
                }
                frame_count.store(writer.frame_count(), Ordering::Relaxed);
                duration_ms.store(offset_ms, Ordering::Relaxed);

                frames_since_flush += 1;
                if frames_since_flush >= FLUSH_INTERVAL_FRAMES {
                    if let Err(e) = writer.flush() {
                        error!("Failed to flush recording: {}", e);
                        break;
                    }
                    frames_since_flush = 0;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                warn!("Recording lagged, missed {} payloads", n);
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                info!("Broadcast channel closed, finishing recording");
                break;
            }
            Err(_) => {
                // Timeout - just re-check the stop flag
            }
        }
    }

    let frames = writer.frame_count();
    let duration = writer.duration_ms();
    match writer.finish() {
        Ok(()) => info!(
            "Recording finished: {} frames, {}ms, {}",
            frames,
            duration,
            path.display()
        ),
        Err(e) => error!("Failed to finish recording: {}", e),
    }
    stop_flag.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::file_format::NbrReader;

    #[tokio::test]
    async fn captured_stream_replays_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.nbr");
        let (tx, rx) = broadcast::channel(64);
        let active = start_recording(rx, path.clone(), SourceMode::Live).unwrap();

        let sent: Vec<Vec<u8>> = (0..20)
            .map(|i| format!("$IIHDT,{}.0,T*00\r\n", i).into_bytes())
            .collect();
        for payload in &sent {
            tx.send(payload.clone()).unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Wait for the capture task to drain everything, then stop it
        for _ in 0..50 {
            if active.status().frame_count == sent.len() as u32 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        active.stop();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let file = File::open(&path).unwrap();
        let (header, frames) = NbrReader::open(std::io::BufReader::new(file))
            .unwrap()
            .read_all()
            .unwrap();
        assert_eq!(SourceMode::from_id(header.source_mode), Some(SourceMode::Live));

        let replayed: Vec<Vec<u8>> = frames.iter().map(|f| f.data.clone()).collect();
        assert_eq!(replayed, sent);
        for pair in frames.windows(2) {
            assert!(pair[0].offset_ms <= pair[1].offset_ms);
        }
    }

    #[tokio::test]
    async fn refuses_to_overwrite_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.nbr");
        std::fs::write(&path, b"data").unwrap();
        let (_tx, rx) = broadcast::channel(4);
        assert!(start_recording(rx, path, SourceMode::FreeRun).is_err());
    }
}
