//! STATUS messages: progress reports from the workstation

use crate::protocol::{FrameWriter, Header, ProtocolError, WireRead, WireWrite};
use crate::types::{StatusSnapshot, StatusValue};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use tracing::debug;

const NULL: u8 = 0;
const BOOL: u8 = 1;
const INT: u8 = 2;
const FLOAT: u8 = 3;
const TEXT: u8 = 4;

fn write_value<W: Write>(writer: &mut W, value: &StatusValue) -> Result<(), ProtocolError> {
    match value {
        StatusValue::Null => writer.write_u8(NULL)?,
        StatusValue::Bool(flag) => {
            writer.write_u8(BOOL)?;
            writer.write_u8(u8::from(*flag))?;
        }
        StatusValue::Int(number) => {
            writer.write_u8(INT)?;
            writer.write_i64::<BigEndian>(*number)?;
        }
        StatusValue::Float(number) => {
            writer.write_u8(FLOAT)?;
            writer.write_f64::<BigEndian>(*number)?;
        }
        StatusValue::Text(text) => {
            writer.write_u8(TEXT)?;
            writer.write_string(text)?;
        }
    }
    Ok(())
}

fn read_value<R: Read>(reader: &mut R) -> Result<StatusValue, ProtocolError> {
    let value = match reader.read_u8()? {
        NULL => StatusValue::Null,
        BOOL => StatusValue::Bool(reader.read_u8()? != 0),
        INT => StatusValue::Int(reader.read_i64::<BigEndian>()?),
        FLOAT => StatusValue::Float(reader.read_f64::<BigEndian>()?),
        TEXT => StatusValue::Text(reader.read_string()?),
        other => return Err(ProtocolError::UnknownStatusValue(other)),
    };
    Ok(value)
}

/// Encode the complete STATUS frame, header included
pub fn encode_status(status: &StatusSnapshot) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = FrameWriter::new(Header::Status);
    let out = frame.payload();

    out.write_count(status.len())?;
    for (key, value) in status {
        out.write_string(key)?;
        write_value(out, value)?;
    }

    let frame = frame.finish()?;
    debug!("Encoded status: {} entries, {} bytes", status.len(), frame.len());
    Ok(frame)
}

/// Decode the payload that follows the `[tag][length]` prefix
pub fn decode_status<R: Read>(reader: &mut R) -> Result<StatusSnapshot, ProtocolError> {
    let entries = reader.read_count()?;
    let mut status = StatusSnapshot::new();
    for _ in 0..entries {
        let key = reader.read_string()?;
        let value = read_value(reader)?;
        status.insert(key, value);
    }
    Ok(status)
}
