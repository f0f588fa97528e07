//! Recording file management: paths, listing, metadata.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::debug;
use serde::Serialize;

use super::file_format::{NbrReader, SourceMode};

/// File extension for bridge recordings.
pub const NBR_EXTENSION: &str = "nbr";

/// The recordings directory under the data dir.
pub fn recordings_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("recordings")
}

/// Resolve a recording filename (with or without extension) to its path.
pub fn recording_path(data_dir: &Path, filename: &str) -> PathBuf {
    let filename = if filename.ends_with(&format!(".{}", NBR_EXTENSION)) {
        filename.to_string()
    } else {
        format!("{}.{}", filename, NBR_EXTENSION)
    };
    recordings_dir(data_dir).join(filename)
}

/// Generate a timestamped session filename.
pub fn generate_filename() -> String {
    format!(
        "session-{}.{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        NBR_EXTENSION
    )
}

/// Metadata for one recording on disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub filename: String,
    pub size: u64,
    pub frame_count: u32,
    pub duration_ms: u32,
    pub start_time_ms: u64,
    pub source_mode: String,
    pub modified_ms: u64,
}

/// List recordings with metadata read from their headers.
///
/// Unreadable files are skipped with a debug log, never an error - one
/// corrupt capture must not break the listing.
pub fn list_recordings(data_dir: &Path) -> Vec<RecordingInfo> {
    let dir = recordings_dir(data_dir);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut recordings = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(NBR_EXTENSION) {
            continue;
        }
        match read_info(&path) {
            Ok(info) => recordings.push(info),
            Err(e) => debug!("Skipping unreadable recording {}: {}", path.display(), e),
        }
    }
    recordings.sort_by(|a, b| b.start_time_ms.cmp(&a.start_time_ms));
    recordings
}

fn read_info(path: &Path) -> std::io::Result<RecordingInfo> {
    let metadata = fs::metadata(path)?;
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let file = File::open(path)?;
    let mut reader = NbrReader::open(BufReader::new(file))?;
    let header = reader.header().clone();

    // Walk the frames for count and duration; captures are small enough
    // that a linear scan beats maintaining an index
    let mut frame_count = 0u32;
    let mut duration_ms = 0u32;
    while let Some(frame) = reader.read_frame()? {
        frame_count += 1;
        duration_ms = frame.offset_ms;
    }

    Ok(RecordingInfo {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size: metadata.len(),
        frame_count,
        duration_ms,
        start_time_ms: header.start_time_ms,
        source_mode: SourceMode::from_id(header.source_mode)
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("unknown({})", header.source_mode)),
        modified_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::file_format::{NbrWriter, RecordedFrame};
    use std::io::BufWriter;

    #[test]
    fn listing_reads_header_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let rec_dir = recordings_dir(dir.path());
        fs::create_dir_all(&rec_dir).unwrap();

        let path = rec_dir.join("test.nbr");
        let file = File::create(&path).unwrap();
        let mut writer =
            NbrWriter::new(BufWriter::new(file), 42_000, SourceMode::Scenario).unwrap();
        writer
            .write_frame(&RecordedFrame::new(0, b"$IIHDT,90.0,T*0C\r\n".to_vec()))
            .unwrap();
        writer
            .write_frame(&RecordedFrame::new(500, b"$IIDPT,12.0,0.0*6B\r\n".to_vec()))
            .unwrap();
        writer.finish().unwrap();

        let listing = list_recordings(dir.path());
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].filename, "test.nbr");
        assert_eq!(listing[0].frame_count, 2);
        assert_eq!(listing[0].duration_ms, 500);
        assert_eq!(listing[0].start_time_ms, 42_000);
        assert_eq!(listing[0].source_mode, "scenario");
    }

    #[test]
    fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_recordings(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn path_resolution_appends_extension() {
        let dir = Path::new("/data");
        assert_eq!(
            recording_path(dir, "trip"),
            PathBuf::from("/data/recordings/trip.nbr")
        );
        assert_eq!(
            recording_path(dir, "trip.nbr"),
            PathBuf::from("/data/recordings/trip.nbr")
        );
    }
}
