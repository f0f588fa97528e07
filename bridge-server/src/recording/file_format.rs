//! NBR (NMEA Bridge Recording) file format.
//!
//! A simple append-only capture format: a fixed 32-byte header followed by
//! `(offset_ms, len, bytes)` frames. No footer or index - a recording that
//! was cut short (crash, power loss) stays readable up to the last complete
//! frame.

use std::io::{self, Read, Write};

/// Magic bytes for the NBR file header.
pub const NBR_MAGIC: [u8; 4] = *b"NBR1";

/// Current format version.
pub const NBR_VERSION: u16 = 1;

/// Header size in bytes (fixed).
pub const HEADER_SIZE: usize = 32;

/// What fed the broadcast channel when this session was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    FreeRun,
    Scenario,
    Live,
    Playback,
}

impl SourceMode {
    pub fn to_id(self) -> u8 {
        match self {
            SourceMode::FreeRun => 0,
            SourceMode::Scenario => 1,
            SourceMode::Live => 2,
            SourceMode::Playback => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(SourceMode::FreeRun),
            1 => Some(SourceMode::Scenario),
            2 => Some(SourceMode::Live),
            3 => Some(SourceMode::Playback),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceMode::FreeRun => write!(f, "free-run"),
            SourceMode::Scenario => write!(f, "scenario"),
            SourceMode::Live => write!(f, "live"),
            SourceMode::Playback => write!(f, "playback"),
        }
    }
}

/// File header (32 bytes fixed size).
#[derive(Debug, Clone)]
pub struct NbrHeader {
    /// Format version (currently 1).
    pub version: u16,
    /// Reserved flags.
    pub flags: u16,
    /// Recording start time (Unix timestamp in milliseconds).
    pub start_time_ms: u64,
    /// Source mode id, see [`SourceMode`].
    pub source_mode: u8,
}

impl NbrHeader {
    pub fn new(start_time_ms: u64, source_mode: SourceMode) -> Self {
        Self {
            version: NBR_VERSION,
            flags: 0,
            start_time_ms,
            source_mode: source_mode.to_id(),
        }
    }

    /// Write header to writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&NBR_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.start_time_ms.to_le_bytes());
        buf[16] = self.source_mode;
        // Remaining 15 bytes are reserved (already zeroed)
        writer.write_all(&buf)
    }

    /// Read header from reader.
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        if buf[0..4] != NBR_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid NBR file: bad magic bytes",
            ));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > NBR_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported NBR version: {}", version),
            ));
        }

        Ok(Self {
            version,
            flags: u16::from_le_bytes([buf[6], buf[7]]),
            start_time_ms: u64::from_le_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
            source_mode: buf[16],
        })
    }
}

/// One captured broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    /// Milliseconds since recording start.
    pub offset_ms: u32,
    /// Raw wire bytes, exactly as broadcast.
    pub data: Vec<u8>,
}

impl RecordedFrame {
    pub fn new(offset_ms: u32, data: Vec<u8>) -> Self {
        Self { offset_ms, data }
    }

    /// Write frame to writer: offset (4), length (2), bytes.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.offset_ms.to_le_bytes())?;
        writer.write_all(&(self.data.len() as u16).to_le_bytes())?;
        writer.write_all(&self.data)
    }

    /// Read the next frame; `None` at a clean end of file.
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let mut offset_buf = [0u8; 4];
        match reader.read_exact(&mut offset_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let mut len_buf = [0u8; 2];
        reader.read_exact(&mut len_buf)?;
        let len = u16::from_le_bytes(len_buf) as usize;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        Ok(Some(Self {
            offset_ms: u32::from_le_bytes(offset_buf),
            data,
        }))
    }
}

/// Writer for creating NBR files.
pub struct NbrWriter<W: Write> {
    writer: W,
    frame_count: u32,
    last_offset_ms: u32,
}

impl<W: Write> NbrWriter<W> {
    /// Create a new writer and emit the header.
    pub fn new(mut writer: W, start_time_ms: u64, source_mode: SourceMode) -> io::Result<Self> {
        NbrHeader::new(start_time_ms, source_mode).write(&mut writer)?;
        Ok(Self {
            writer,
            frame_count: 0,
            last_offset_ms: 0,
        })
    }

    /// Append one frame.
    pub fn write_frame(&mut self, frame: &RecordedFrame) -> io::Result<()> {
        frame.write(&mut self.writer)?;
        self.frame_count += 1;
        self.last_offset_ms = frame.offset_ms;
        Ok(())
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn duration_ms(&self) -> u32 {
        self.last_offset_ms
    }

    /// Flush buffered frames to durable storage (periodic checkpoint).
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Finish the recording. The format is append-only, so this is just a
    /// final flush.
    pub fn finish(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Reader for NBR files.
pub struct NbrReader<R: Read> {
    reader: R,
    header: NbrHeader,
}

impl<R: Read> NbrReader<R> {
    pub fn open(mut reader: R) -> io::Result<Self> {
        let header = NbrHeader::read(&mut reader)?;
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &NbrHeader {
        &self.header
    }

    /// Read the next frame, `None` at end of file.
    pub fn read_frame(&mut self) -> io::Result<Option<RecordedFrame>> {
        RecordedFrame::read(&mut self.reader)
    }

    /// Drain every remaining frame into memory, for replay.
    pub fn read_all(mut self) -> io::Result<(NbrHeader, Vec<RecordedFrame>)> {
        let mut frames = Vec::new();
        while let Some(frame) = self.read_frame()? {
            frames.push(frame);
        }
        Ok((self.header, frames))
    }
}
