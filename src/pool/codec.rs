//! Value framing over pipe ends.
//!
//! Two framings share this module:
//!
//! - [`Encoder`]/[`Decoder`] write one compact JSON value per line. They
//!   carry completion notices on the shared notification pipe, where every
//!   message is small and a single `write(2)` keeps lines from different
//!   workers apart. `serde_json` escapes control characters inside strings,
//!   so line boundaries are frame boundaries.
//! - [`FrameWriter`]/[`FrameReader`] carry task and result payloads on the
//!   dedicated pipes: a little-endian `u32` length followed by the value in
//!   bincode. Bincode stores floats bit for bit, so every value of a payload
//!   type survives the trip (JSON would turn `NaN` into `null`).

use super::ipc::{LineReader, LineWriter, PipeFd};
use crate::error::{Result, SpawnError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

/// Default buffer size for payload frames (64KB).
const FRAME_BUFFER_SIZE: usize = 64 * 1024;

/// Largest payload frame accepted in either direction (256MB).
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Writes serialized values to a pipe, one JSON line each.
pub struct Encoder {
    writer: LineWriter,
}

impl Encoder {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: LineWriter::new(fd),
        }
    }

    /// Serialize `value` and write it as one line.
    pub fn encode<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)?;
        self.writer.write_line(&line)?;
        Ok(())
    }
}

/// Reads JSON-line values from a pipe.
pub struct Decoder {
    reader: LineReader,
}

impl Decoder {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: LineReader::new(fd),
        }
    }

    /// Read the next value.
    ///
    /// Returns `None` when the writing side has been closed.
    pub fn try_decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.reader.read_line()? {
            Some(line) => {
                let value = serde_json::from_str(line).map_err(|e| {
                    SpawnError::Protocol(format!("Undecodable frame ({}): {:.80}", e, line))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Read the next value, treating EOF as [`SpawnError::ChannelClosed`].
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.try_decode()?.ok_or(SpawnError::ChannelClosed)
    }
}

/// Writes length-prefixed bincode payload frames.
pub struct FrameWriter {
    writer: BufWriter<PipeFd>,
}

impl FrameWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(FRAME_BUFFER_SIZE, fd),
        }
    }

    /// Serialize `value` into one frame and flush it.
    ///
    /// Nothing is written if the value cannot be serialized or is too large.
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let body = bincode::serialize(value)?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|&n| n as usize <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                SpawnError::Protocol(format!(
                    "Payload of {} bytes exceeds the {} byte frame limit",
                    body.len(),
                    MAX_FRAME_LEN
                ))
            })?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&body)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads length-prefixed bincode payload frames.
pub struct FrameReader {
    reader: BufReader<PipeFd>,
    body: Vec<u8>,
}

impl FrameReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(FRAME_BUFFER_SIZE, fd),
            body: Vec::new(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `None` when the writing side closed between frames. EOF
    /// inside a frame is a protocol error.
    pub fn try_read<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let mut header = [0u8; 4];
        self.reader.read_exact(&mut header).map_err(truncated)?;
        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(SpawnError::Protocol(format!(
                "Frame header announces {} bytes, limit is {}",
                len, MAX_FRAME_LEN
            )));
        }

        self.body.resize(len, 0);
        self.reader.read_exact(&mut self.body).map_err(truncated)?;
        bincode::deserialize(&self.body)
            .map(Some)
            .map_err(|e| SpawnError::Protocol(format!("Undecodable frame ({} bytes): {}", len, e)))
    }

    /// Read the next frame, treating EOF as [`SpawnError::ChannelClosed`].
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.try_read()?.ok_or(SpawnError::ChannelClosed)
    }
}

fn truncated(e: io::Error) -> SpawnError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SpawnError::Protocol("Peer closed the pipe in the middle of a frame".into())
    } else {
        SpawnError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ipc::Pipe;
    use serde::Deserialize;

    fn channel() -> (Encoder, Decoder) {
        let mut pipe = Pipe::open().unwrap();
        let decoder = Decoder::new(pipe.take_read_end().unwrap());
        let encoder = Encoder::new(pipe.take_write_end().unwrap());
        (encoder, decoder)
    }

    fn frames() -> (FrameWriter, FrameReader) {
        let mut pipe = Pipe::open().unwrap();
        let reader = FrameReader::new(pipe.take_read_end().unwrap());
        let writer = FrameWriter::new(pipe.take_write_end().unwrap());
        (writer, reader)
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
        label: String,
        weight: f64,
    }

    #[test]
    fn test_struct_with_embedded_newline() {
        let (mut enc, mut dec) = channel();
        let job = Job {
            id: 7,
            label: "two\nlines".into(),
            weight: 0.5,
        };
        enc.encode(&job).unwrap();
        enc.encode(&Job {
            id: 8,
            label: String::new(),
            weight: 1.0,
        })
        .unwrap();

        assert_eq!(dec.decode::<Job>().unwrap(), job);
        assert_eq!(dec.decode::<Job>().unwrap().id, 8);
    }

    #[test]
    fn test_eof_is_channel_closed() {
        let (enc, mut dec) = channel();
        drop(enc);
        assert!(dec.try_decode::<u32>().unwrap().is_none());
        assert!(matches!(
            dec.decode::<u32>().unwrap_err(),
            SpawnError::ChannelClosed
        ));
    }

    #[test]
    fn test_shape_mismatch_is_protocol_error() {
        let (mut enc, mut dec) = channel();
        enc.encode(&"not a number").unwrap();
        let err = dec.decode::<u64>().unwrap_err();
        assert!(matches!(err, SpawnError::Protocol(_)));
    }

    #[test]
    fn test_frames_keep_non_finite_floats() {
        let (mut writer, mut reader) = frames();
        writer.write(&f64::NAN).unwrap();
        writer.write(&f64::INFINITY).unwrap();
        writer.write(&f64::NEG_INFINITY).unwrap();
        writer.write(&-0.0f64).unwrap();

        assert!(reader.read::<f64>().unwrap().is_nan());
        assert_eq!(reader.read::<f64>().unwrap(), f64::INFINITY);
        assert_eq!(reader.read::<f64>().unwrap(), f64::NEG_INFINITY);
        assert!(reader.read::<f64>().unwrap().is_sign_negative());
    }

    #[test]
    fn test_frames_keep_structs() {
        let (mut writer, mut reader) = frames();
        let job = Job {
            id: 3,
            label: "multi\nline \u{1F980}".into(),
            weight: f64::NAN,
        };
        writer.write(&job).unwrap();
        writer.write(&Some(f64::INFINITY)).unwrap();

        let got: Job = reader.read().unwrap();
        assert_eq!(got.id, 3);
        assert_eq!(got.label, job.label);
        assert!(got.weight.is_nan());
        assert_eq!(reader.read::<Option<f64>>().unwrap(), Some(f64::INFINITY));
    }

    #[test]
    fn test_frame_eof_between_frames_is_channel_closed() {
        let (mut writer, mut reader) = frames();
        writer.write(&1u64).unwrap();
        drop(writer);
        assert_eq!(reader.read::<u64>().unwrap(), 1);
        assert!(reader.try_read::<u64>().unwrap().is_none());
        assert!(matches!(
            reader.read::<u64>().unwrap_err(),
            SpawnError::ChannelClosed
        ));
    }

    #[test]
    fn test_truncated_frame_is_protocol_error() {
        let mut pipe = Pipe::open().unwrap();
        let mut reader = FrameReader::new(pipe.take_read_end().unwrap());
        let mut raw = pipe.take_write_end().unwrap();
        // Header promises eight bytes, only three follow.
        raw.write_all(&8u32.to_le_bytes()).unwrap();
        raw.write_all(&[1, 2, 3]).unwrap();
        drop(raw);

        let err = reader.read::<u64>().unwrap_err();
        assert!(matches!(err, SpawnError::Protocol(ref m) if m.contains("middle of a frame")));
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let mut pipe = Pipe::open().unwrap();
        let mut reader = FrameReader::new(pipe.take_read_end().unwrap());
        let mut raw = pipe.take_write_end().unwrap();
        raw.write_all(&u32::MAX.to_le_bytes()).unwrap();

        let err = reader.read::<u64>().unwrap_err();
        assert!(matches!(err, SpawnError::Protocol(ref m) if m.contains("limit")));
    }

    #[test]
    fn test_frame_type_mismatch_is_protocol_error() {
        let (mut writer, mut reader) = frames();
        writer.write(&7u8).unwrap();
        let err = reader.read::<u64>().unwrap_err();
        assert!(matches!(err, SpawnError::Protocol(_)));
    }
}
