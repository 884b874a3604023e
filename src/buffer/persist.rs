//! Sparse on-disk form of a frame buffer
//!
//! A persisted session is a JSON Lines file: one header line holding the
//! acquisition shape and session metadata, then one record per written
//! coordinate. Unwritten coordinates are simply absent. Records may appear
//! in any order; when a coordinate appears twice the later record wins.

use super::frame_buffer::FrameBuffer;
use crate::config::BufferSettings;
use crate::error::{BridgeError, Result, ResultExt};
use crate::session::SessionMetadata;
use crate::types::{AcquisitionShape, Coordinate, FramePlane};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Recommended file extension
pub const FILE_EXTENSION: &str = "mdajsonl";

/// First line of a persisted session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedHeader {
    pub version: u32,
    pub shape: AcquisitionShape,
    pub metadata: SessionMetadata,
    /// Number of records that follow (informational)
    #[serde(default)]
    pub record_count: usize,
}

/// One written coordinate and its plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub coordinate: Coordinate,
    pub plane: FramePlane,
}

/// Write a buffer as header + records. Returns the number of records written.
pub fn write_buffer<W: Write>(
    writer: W,
    buffer: &FrameBuffer,
    metadata: &SessionMetadata,
) -> Result<usize> {
    let mut writer = BufWriter::new(writer);
    let written = buffer.written();

    let header = PersistedHeader {
        version: FORMAT_VERSION,
        shape: buffer.shape().clone(),
        metadata: metadata.clone(),
        record_count: written.len(),
    };
    serde_json::to_writer(&mut writer, &header)?;
    writer.write_all(b"\n")?;

    for (coordinate, plane) in &written {
        let record = PersistedRecord {
            coordinate: coordinate.clone(),
            plane: FramePlane::clone(plane),
        };
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    Ok(written.len())
}

/// Rebuild a buffer from a persisted stream
pub fn read_buffer<R: BufRead>(
    reader: R,
    settings: BufferSettings,
) -> Result<(SessionMetadata, FrameBuffer)> {
    let mut lines = reader.lines();

    let header_line = lines
        .next()
        .ok_or_else(|| BridgeError::Serialization("missing header line".to_string()))??;
    let header: PersistedHeader =
        serde_json::from_str(&header_line).map_err(|e| BridgeError::Serialization(format!("bad header: {}", e)))?;
    if header.version > FORMAT_VERSION {
        return Err(BridgeError::Serialization(format!(
            "unsupported format version {} (newest known is {})",
            header.version, FORMAT_VERSION
        )));
    }

    let buffer = FrameBuffer::new(header.shape, settings)?;
    for (line_no, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PersistedRecord = serde_json::from_str(&line).map_err(|e| {
            BridgeError::Serialization(format!("bad record on line {}: {}", line_no + 2, e))
        })?;
        buffer
            .ensure_capacity(&record.coordinate)
            .and_then(|_| buffer.write(&record.coordinate, record.plane))
            .with_context(|| format!("record on line {}", line_no + 2))?;
    }

    if buffer.written_count() != header.record_count {
        tracing::warn!(
            "Persisted session declared {} records but {} distinct coordinates were loaded",
            header.record_count,
            buffer.written_count()
        );
    }

    Ok((header.metadata, buffer))
}

/// Save a buffer to a file, creating parent directories as needed
pub fn save_to_file(path: impl AsRef<Path>, buffer: &FrameBuffer, metadata: &SessionMetadata) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path).map_err(|e| {
        BridgeError::Io(e).with_context(format!("Failed to create session file {:?}", path))
    })?;
    let count = write_buffer(file, buffer, metadata)?;
    tracing::info!("Saved {} planes to {:?}", count, path);
    Ok(count)
}

/// Load a buffer previously written by [`save_to_file`]
pub fn load_from_file(path: impl AsRef<Path>, settings: BufferSettings) -> Result<(SessionMetadata, FrameBuffer)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        BridgeError::Io(e).with_context(format!("Failed to open session file {:?}", path))
    })?;
    read_buffer(BufReader::new(file), settings)
}
