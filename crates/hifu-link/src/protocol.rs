//! Wire protocol definitions for the plan/command/status link
//!
//! Every message starts with an `i64` header tag. PLAN and STATUS messages
//! follow it with an `i64` total frame length (header included) and a
//! positional payload; COMMAND messages follow it with a single `i64` command
//! tag. All integers and floats are big-endian.
//!
//! | Message | Bytes on wire |
//! |---|---|
//! | COMMAND | `i64 1`, `i64 command` |
//! | PLAN | `i64 2`, `i64 length`, X map, Y map, Z map, spot order, volt, total time, period, duty cycle, cooling time, receipt |
//! | PLAN reply | receipt string, no header |
//! | STATUS | `i64 3`, `i64 length`, status map |

use crate::command::CommandTag;
use crate::plan::PlanTransfer;
use crate::types::{GroupKey, StatusSnapshot};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use tracing::{debug, trace};

/// Maximum message size (100MB by default)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Size of the `[tag][length]` prefix of PLAN and STATUS frames
pub const FRAMED_HEADER_LEN: usize = 16;

/// Message types in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Header {
    Command = 1,
    Plan = 2,
    Status = 3,
}

impl Header {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Command),
            2 => Some(Self::Plan),
            3 => Some(Self::Status),
            _ => None,
        }
    }
}

/// Protocol error types
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Message too large: {size} bytes exceeds maximum {max_size} bytes")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Invalid frame length: {0}")]
    InvalidLength(i64),

    #[error("Axis lengths differ for group {key}: x={x}, y={y}, z={z}")]
    AxisMismatch {
        key: GroupKey,
        x: usize,
        y: usize,
        z: usize,
    },

    #[error("Unknown status value type: {0}")]
    UnknownStatusValue(u8),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Collection of {0} elements cannot be encoded")]
    CountOverflow(usize),

    #[error("Group key {0} is not representable as f32")]
    InvalidGroupKey(f64),

    #[error("Group key {0} appears more than once")]
    DuplicateGroupKey(GroupKey),
}

/// Write helpers for the protocol's primitive encodings
pub(crate) trait WireWrite: Write {
    fn write_count(&mut self, count: usize) -> Result<(), ProtocolError> {
        let count = u32::try_from(count).map_err(|_| ProtocolError::CountOverflow(count))?;
        self.write_u32::<BigEndian>(count)?;
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.write_count(value.len())?;
        self.write_all(value.as_bytes())?;
        Ok(())
    }

    fn write_group_key(&mut self, key: GroupKey) -> io::Result<()> {
        self.write_f64::<BigEndian>(f64::from(key.value()))
    }

    /// Write a `map<group key, seq<T>>`
    fn write_keyed_seq<T, F>(
        &mut self,
        map: &BTreeMap<GroupKey, Vec<T>>,
        mut write_item: F,
    ) -> Result<(), ProtocolError>
    where
        F: FnMut(&mut Self, &T) -> io::Result<()>,
    {
        self.write_count(map.len())?;
        for (key, items) in map {
            self.write_group_key(*key)?;
            self.write_count(items.len())?;
            for item in items {
                write_item(self, item)?;
            }
        }
        Ok(())
    }
}

impl<W: Write + ?Sized> WireWrite for W {}

/// Read helpers mirroring [`WireWrite`]
pub(crate) trait WireRead: Read {
    fn read_count(&mut self) -> Result<usize, ProtocolError> {
        Ok(self.read_u32::<BigEndian>()? as usize)
    }

    fn read_string(&mut self) -> Result<String, ProtocolError>
    where
        Self: Sized,
    {
        let len = self.read_count()?;
        let mut bytes = Vec::new();
        self.take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "string field truncated",
            )));
        }
        Ok(String::from_utf8(bytes)?)
    }

    /// Read an f64 group key that must narrow to f32 without loss
    fn read_group_key(&mut self) -> Result<GroupKey, ProtocolError> {
        let wire = self.read_f64::<BigEndian>()?;
        let narrowed = wire as f32;
        if f64::from(narrowed) != wire && !(wire.is_nan() && narrowed.is_nan()) {
            return Err(ProtocolError::InvalidGroupKey(wire));
        }
        Ok(GroupKey::new(narrowed))
    }

    /// Read a `map<group key, seq<T>>`
    fn read_keyed_seq<T, F>(
        &mut self,
        mut read_item: F,
    ) -> Result<BTreeMap<GroupKey, Vec<T>>, ProtocolError>
    where
        F: FnMut(&mut Self) -> io::Result<T>,
    {
        let entries = self.read_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..entries {
            let key = self.read_group_key()?;
            let len = self.read_count()?;
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(read_item(self)?);
            }
            if map.insert(key, items).is_some() {
                return Err(ProtocolError::DuplicateGroupKey(key));
            }
        }
        Ok(map)
    }
}

impl<R: Read + ?Sized> WireRead for R {}

/// Buffer for a length-prefixed frame
///
/// The `[tag][length]` prefix is reserved with zeros when the writer is
/// created and backfilled by [`FrameWriter::finish`] once the payload size is
/// known.
pub struct FrameWriter {
    header: Header,
    cursor: Cursor<Vec<u8>>,
}

impl FrameWriter {
    pub fn new(header: Header) -> Self {
        let mut cursor = Cursor::new(Vec::with_capacity(256));
        cursor.get_mut().resize(FRAMED_HEADER_LEN, 0);
        cursor.set_position(FRAMED_HEADER_LEN as u64);
        Self { header, cursor }
    }

    /// Writer positioned after the reserved prefix
    pub fn payload(&mut self) -> &mut Cursor<Vec<u8>> {
        &mut self.cursor
    }

    /// Backfill the header and return the complete frame
    pub fn finish(mut self) -> Result<Vec<u8>, ProtocolError> {
        let total = self.cursor.get_ref().len();
        self.cursor.seek(SeekFrom::Start(0))?;
        self.cursor.write_i64::<BigEndian>(self.header as i64)?;
        self.cursor.write_i64::<BigEndian>(total as i64)?;
        trace!("Backfilled {:?} frame header, {} bytes", self.header, total);
        Ok(self.cursor.into_inner())
    }
}

/// A fully decoded message
#[derive(Debug, Clone)]
pub enum Message {
    Command(CommandTag),
    Plan(PlanTransfer),
    Status(StatusSnapshot),
}

/// Protocol handler for reading and writing messages
#[derive(Debug, Clone, Copy)]
pub struct Protocol {
    max_message_size: usize,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encode a COMMAND message
    pub fn encode_command(&self, command: CommandTag) -> Vec<u8> {
        let mut frame = Vec::with_capacity(16);
        frame.extend_from_slice(&(Header::Command as i64).to_be_bytes());
        frame.extend_from_slice(&(command as i64).to_be_bytes());
        frame
    }

    /// Reject frames above the configured size
    pub fn check_size(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        if frame.len() > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: frame.len(),
                max_size: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Read the header tag, `None` when the tag is not a known message type
    pub fn read_header<R: Read>(&self, reader: &mut R) -> Result<Option<Header>, ProtocolError> {
        let raw = reader.read_i64::<BigEndian>()?;
        let header = Header::from_i64(raw);
        match header {
            Some(header) => trace!("Read header {:?}", header),
            None => debug!("Dropping message with unknown header tag {}", raw),
        }
        Ok(header)
    }

    /// Read the command tag following a COMMAND header
    pub fn read_command<R: Read>(
        &self,
        reader: &mut R,
    ) -> Result<Option<CommandTag>, ProtocolError> {
        let raw = reader.read_i64::<BigEndian>()?;
        let command = CommandTag::from_i64(raw);
        if command.is_none() {
            debug!("Dropping command with unknown tag {}", raw);
        }
        Ok(command)
    }

    /// Read the length field and the rest of a PLAN or STATUS frame
    pub fn read_framed_payload<R: Read>(&self, reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
        let total = reader.read_i64::<BigEndian>()?;
        if total < FRAMED_HEADER_LEN as i64 {
            return Err(ProtocolError::InvalidLength(total));
        }
        let total = usize::try_from(total).map_err(|_| ProtocolError::InvalidLength(total))?;
        if total > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: total,
                max_size: self.max_message_size,
            });
        }

        let mut payload = vec![0u8; total - FRAMED_HEADER_LEN];
        reader.read_exact(&mut payload)?;
        debug!("Read framed payload of {} bytes", payload.len());
        Ok(payload)
    }

    /// Read one complete message
    ///
    /// Unknown header and command tags yield `Ok(None)`; they are not errors.
    pub fn read_message<R: Read>(&self, reader: &mut R) -> Result<Option<Message>, ProtocolError> {
        let Some(header) = self.read_header(reader)? else {
            return Ok(None);
        };

        match header {
            Header::Command => Ok(self.read_command(reader)?.map(Message::Command)),
            Header::Plan => {
                let payload = self.read_framed_payload(reader)?;
                let transfer = PlanTransfer::decode(&mut Cursor::new(payload))?;
                Ok(Some(Message::Plan(transfer)))
            }
            Header::Status => {
                let payload = self.read_framed_payload(reader)?;
                let status = crate::status::decode_status(&mut Cursor::new(payload))?;
                Ok(Some(Message::Status(status)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_layout() {
        let frame = Protocol::default().encode_command(CommandTag::Pause);
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[..8], &1i64.to_be_bytes());
        assert_eq!(&frame[8..], &3i64.to_be_bytes());
    }

    #[test]
    fn test_frame_writer_backfills_header() {
        let mut writer = FrameWriter::new(Header::Status);
        writer.payload().write_string("abc").unwrap();
        let frame = writer.finish().unwrap();

        assert_eq!(frame.len(), FRAMED_HEADER_LEN + 4 + 3);
        assert_eq!(&frame[..8], &3i64.to_be_bytes());
        assert_eq!(&frame[8..16], &(frame.len() as i64).to_be_bytes());
        assert_eq!(&frame[16..20], &3u32.to_be_bytes());
        assert_eq!(&frame[20..], b"abc");
    }

    #[test]
    fn test_unknown_header_is_dropped() {
        let protocol = Protocol::default();
        let mut frame = Vec::new();
        frame.extend_from_slice(&42i64.to_be_bytes());
        frame.extend_from_slice(&[0xAB; 32]);

        let result = protocol.read_message(&mut Cursor::new(frame)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_unknown_command_is_dropped() {
        let protocol = Protocol::default();
        let mut frame = Vec::new();
        frame.extend_from_slice(&1i64.to_be_bytes());
        frame.extend_from_slice(&9i64.to_be_bytes());

        let result = protocol.read_message(&mut Cursor::new(frame)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_length_below_header_rejected() {
        let protocol = Protocol::default();
        let mut frame = Vec::new();
        frame.extend_from_slice(&3i64.to_be_bytes());
        frame.extend_from_slice(&8i64.to_be_bytes());

        let result = protocol.read_message(&mut Cursor::new(frame));
        assert!(matches!(result, Err(ProtocolError::InvalidLength(8))));
    }

    #[test]
    fn test_message_too_large() {
        let protocol = Protocol::default().with_max_message_size(100);
        let mut frame = Vec::new();
        frame.extend_from_slice(&2i64.to_be_bytes());
        frame.extend_from_slice(&1000i64.to_be_bytes());

        let result = protocol.read_message(&mut Cursor::new(frame));
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge {
                size: 1000,
                max_size: 100
            })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let protocol = Protocol::default();
        let mut frame = Vec::new();
        frame.extend_from_slice(&3i64.to_be_bytes());
        frame.extend_from_slice(&64i64.to_be_bytes());
        frame.extend_from_slice(&[0; 4]);

        let result = protocol.read_message(&mut Cursor::new(frame));
        assert!(matches!(result, Err(ProtocolError::Io(_))));
    }

    #[test]
    fn test_string_truncated() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&10u32.to_be_bytes());
        bytes.extend_from_slice(b"short");

        let result = Cursor::new(bytes).read_string();
        assert!(matches!(result, Err(ProtocolError::Io(_))));
    }

    fn keyed_seq_bytes(keys: &[f64]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(keys.len() as u32).to_be_bytes());
        for key in keys {
            bytes.extend_from_slice(&key.to_be_bytes());
            bytes.extend_from_slice(&1u32.to_be_bytes());
            bytes.extend_from_slice(&7.5f64.to_be_bytes());
        }
        bytes
    }

    fn read_f64_seq(bytes: Vec<u8>) -> Result<BTreeMap<GroupKey, Vec<f64>>, ProtocolError> {
        Cursor::new(bytes).read_keyed_seq(|r| r.read_f64::<BigEndian>())
    }

    #[test]
    fn test_group_key_beyond_f32_rejected() {
        let result = read_f64_seq(keyed_seq_bytes(&[1.0, 1.0 + 1e-12]));
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidGroupKey(k)) if k == 1.0 + 1e-12
        ));
    }

    #[test]
    fn test_duplicate_group_key_rejected() {
        let result = read_f64_seq(keyed_seq_bytes(&[2.5, -1.0, 2.5]));
        assert!(matches!(
            result,
            Err(ProtocolError::DuplicateGroupKey(k)) if k == GroupKey::new(2.5)
        ));
    }

    #[test]
    fn test_f32_keys_accepted() {
        let keys = [-3.25, 0.1f32 as f64, 1e30f32 as f64];
        let map = read_f64_seq(keyed_seq_bytes(&keys)).unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.contains_key(&GroupKey::new(0.1)));
    }
}
