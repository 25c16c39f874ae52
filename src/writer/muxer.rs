//! Container muxing
//!
//! [`ContainerMuxer`] is the seam between the stream writer and whatever
//! produces the container file. Recordings go to MP4 through
//! [`FfmpegMuxer`](crate::writer::ffmpeg::FfmpegMuxer) by default.
//! [`TimedContainerMuxer`] is a raw sample sink that keeps every payload and
//! its exact timestamps, useful for debugging a capture pipeline and for
//! inspecting what the writer received:
//!
//! ```text
//! "TSC1"
//! sample*   [track u8][pts i64][pts scale u32][dur i64][dur scale u32][len u32][payload]
//! index     JSON ContainerIndex
//! trailer   [index len u64]["TSCIDX01"]
//! ```
//!
//! All integers are little endian.

use crate::capture::frame::{Frame, Track};
use crate::utils::error::{WriterError, WriterResult};
use crate::utils::time::MediaTime;
use crate::writer::settings::EncoderSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

const FILE_MAGIC: &[u8; 4] = b"TSC1";
const INDEX_MAGIC: &[u8; 8] = b"TSCIDX01";
const RECORD_HEADER_LEN: u64 = 1 + 8 + 4 + 8 + 4 + 4;

/// Default extension for files written by [`TimedContainerMuxer`]
pub const CONTAINER_EXTENSION: &str = "tsc";

/// Produces the output container for one recording
///
/// Calls arrive in order: `open`, one `add_track` per track, any number of
/// `write_sample`, then `finish`. A muxer is dropped without `finish` when
/// the recording is aborted.
pub trait ContainerMuxer: Send {
    /// Create the output file at `path`
    fn open(&mut self, path: &Path) -> WriterResult<()>;

    fn add_track(&mut self, settings: &EncoderSettings) -> WriterResult<()>;

    fn write_sample(&mut self, frame: &Frame) -> WriterResult<()>;

    /// Flush all buffered data and close the file, returning its size
    fn finish(&mut self) -> WriterResult<u64>;

    /// Extension for generated destination names
    fn file_extension(&self) -> &'static str;
}

/// Per-track summary stored in the container index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackIndex {
    pub track: Track,
    /// Settings the track was configured with
    pub settings: EncoderSettings,
    /// Samples written to the track
    pub sample_count: u64,
    /// Timestamp of the first sample
    pub first_timestamp: Option<MediaTime>,
    /// Timestamp of the last sample
    pub last_timestamp: Option<MediaTime>,
    /// End of the last sample minus the first timestamp
    pub duration: MediaTime,
    /// Byte offset of every sample record
    pub sample_offsets: Vec<u64>,
}

/// Trailer index of a finished container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerIndex {
    /// Container format version
    pub version: u32,
    /// When finish was called
    pub created_at: DateTime<Utc>,
    /// Configured tracks in configuration order
    pub tracks: Vec<TrackIndex>,
}

impl ContainerIndex {
    pub fn track(&self, track: Track) -> Option<&TrackIndex> {
        self.tracks.iter().find(|t| t.track == track)
    }
}

/// One sample read back from a container
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub track: Track,
    /// Output presentation timestamp
    pub timestamp: MediaTime,
    pub duration: MediaTime,
    /// Bytes as handed to the writer
    pub payload: Vec<u8>,
}

/// Raw timed sample container writer
#[derive(Default)]
pub struct TimedContainerMuxer {
    file: Option<BufWriter<File>>,
    offset: u64,
    tracks: Vec<TrackIndex>,
}

impl TimedContainerMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    fn file(&mut self) -> WriterResult<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or(WriterError::NotAppending("container not open"))
    }
}

impl ContainerMuxer for TimedContainerMuxer {
    fn open(&mut self, path: &Path) -> WriterResult<()> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(FILE_MAGIC)?;
        self.file = Some(file);
        self.offset = FILE_MAGIC.len() as u64;
        tracing::debug!(path = %path.display(), "Opened container");
        Ok(())
    }

    fn add_track(&mut self, settings: &EncoderSettings) -> WriterResult<()> {
        let track = settings.track();
        if self.tracks.iter().any(|t| t.track == track) {
            return Err(WriterError::TrackAlreadyConfigured(track));
        }
        self.tracks.push(TrackIndex {
            track,
            settings: settings.clone(),
            sample_count: 0,
            first_timestamp: None,
            last_timestamp: None,
            duration: MediaTime::ZERO,
            sample_offsets: Vec::new(),
        });
        Ok(())
    }

    fn write_sample(&mut self, frame: &Frame) -> WriterResult<()> {
        let track = frame.track();
        let offset = self.offset;
        let payload = frame.payload();
        let len = u32::try_from(payload.len())
            .map_err(|_| WriterError::Encoder(format!("{} sample too large", track)))?;

        if !self.tracks.iter().any(|t| t.track == track) {
            return Err(WriterError::TrackNotReady(track));
        }

        let pts = frame.presentation_timestamp();
        let duration = frame.duration();

        let file = self.file()?;
        file.write_all(&[track.tag()])?;
        file.write_all(&pts.value.to_le_bytes())?;
        file.write_all(&pts.timescale.to_le_bytes())?;
        file.write_all(&duration.value.to_le_bytes())?;
        file.write_all(&duration.timescale.to_le_bytes())?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(payload)?;

        self.offset += RECORD_HEADER_LEN + len as u64;

        if let Some(index) = self.tracks.iter_mut().find(|t| t.track == track) {
            let first = *index.first_timestamp.get_or_insert(pts);
            index.last_timestamp = Some(pts);
            index.duration = frame.end_timestamp() - first;
            index.sample_count += 1;
            index.sample_offsets.push(offset);
        }
        Ok(())
    }

    fn finish(&mut self) -> WriterResult<u64> {
        let index = ContainerIndex {
            version: 1,
            created_at: Utc::now(),
            tracks: std::mem::take(&mut self.tracks),
        };
        let json = serde_json::to_vec(&index)
            .map_err(|e| WriterError::Encoder(format!("Failed to encode index: {}", e)))?;

        let mut file = self
            .file
            .take()
            .ok_or(WriterError::NotAppending("container not open"))?;
        file.write_all(&json)?;
        file.write_all(&(json.len() as u64).to_le_bytes())?;
        file.write_all(INDEX_MAGIC)?;
        file.flush()?;

        let file = file
            .into_inner()
            .map_err(|e| WriterError::from(e.into_error()))?;
        file.sync_all()?;

        let size = self.offset + json.len() as u64 + 8 + INDEX_MAGIC.len() as u64;
        tracing::debug!(bytes = size, "Container finished");
        Ok(size)
    }

    fn file_extension(&self) -> &'static str {
        CONTAINER_EXTENSION
    }
}

fn bad_container(message: &str) -> WriterError {
    WriterError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.to_string(),
    ))
}

/// Read the trailer index of a finished container
pub fn read_index(path: &Path) -> WriterResult<ContainerIndex> {
    let (index, _) = read_index_with_start(path)?;
    Ok(index)
}

fn read_index_with_start(path: &Path) -> WriterResult<(ContainerIndex, u64)> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let trailer_len = 8 + INDEX_MAGIC.len() as u64;
    if file_len < FILE_MAGIC.len() as u64 + trailer_len {
        return Err(bad_container("container too short"));
    }

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != FILE_MAGIC {
        return Err(bad_container("not a timed sample container"));
    }

    file.seek(SeekFrom::End(-(trailer_len as i64)))?;
    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes)?;
    let mut index_magic = [0u8; 8];
    file.read_exact(&mut index_magic)?;
    if &index_magic != INDEX_MAGIC {
        return Err(bad_container("container is incomplete (no index)"));
    }

    let index_len = u64::from_le_bytes(len_bytes);
    let index_start = file_len
        .checked_sub(trailer_len + index_len)
        .ok_or_else(|| bad_container("index length out of range"))?;
    file.seek(SeekFrom::Start(index_start))?;
    let mut json = vec![0u8; index_len as usize];
    file.read_exact(&mut json)?;

    let index = serde_json::from_slice(&json)
        .map_err(|e| bad_container(&format!("invalid index: {}", e)))?;
    Ok((index, index_start))
}

/// Read every sample record of a finished container in file order
pub fn read_samples(path: &Path) -> WriterResult<Vec<SampleRecord>> {
    let (_, index_start) = read_index_with_start(path)?;
    let mut reader = BufReader::new(File::open(path)?);
    reader.seek(SeekFrom::Start(FILE_MAGIC.len() as u64))?;

    let mut position = FILE_MAGIC.len() as u64;
    let mut samples = Vec::new();
    while position < index_start {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        let track = Track::from_tag(tag[0]).ok_or_else(|| bad_container("unknown track tag"))?;

        let pts = MediaTime::new(read_i64(&mut reader)?, read_u32(&mut reader)?);
        let duration = MediaTime::new(read_i64(&mut reader)?, read_u32(&mut reader)?);
        let len = read_u32(&mut reader)?;
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;

        position += RECORD_HEADER_LEN + len as u64;
        samples.push(SampleRecord {
            track,
            timestamp: pts,
            duration,
            payload,
        });
    }
    Ok(samples)
}

fn read_i64(reader: &mut impl Read) -> std::io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
