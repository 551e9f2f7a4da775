//! Binary datum codec
//!
//! Each datum is a one-byte tag followed by its payload. Integers and floats
//! are fixed 8-byte big-endian values; strings and byte strings carry a 4-byte
//! big-endian length prefix.

use bytes::{Buf, BufMut};

use crate::datum::Datum;
use crate::error::CodecError;

const NIL_FLAG: u8 = 0x00;
const BYTES_FLAG: u8 = 0x01;
const STRING_FLAG: u8 = 0x02;
const INT_FLAG: u8 = 0x03;
const UINT_FLAG: u8 = 0x04;
const FLOAT_FLAG: u8 = 0x05;

/// Append the encoding of `datums` to `buf`
pub fn encode_datums(buf: &mut Vec<u8>, datums: &[Datum]) {
    for datum in datums {
        encode_datum(buf, datum);
    }
}

fn encode_datum(buf: &mut Vec<u8>, datum: &Datum) {
    match datum {
        Datum::Null => buf.put_u8(NIL_FLAG),
        Datum::Int(v) => {
            buf.put_u8(INT_FLAG);
            buf.put_i64(*v);
        }
        Datum::UInt(v) => {
            buf.put_u8(UINT_FLAG);
            buf.put_u64(*v);
        }
        Datum::Float(v) => {
            buf.put_u8(FLOAT_FLAG);
            buf.put_f64(*v);
        }
        Datum::String(v) => {
            buf.put_u8(STRING_FLAG);
            buf.put_u32(v.len() as u32);
            buf.put_slice(v.as_bytes());
        }
        Datum::Bytes(v) => {
            buf.put_u8(BYTES_FLAG);
            buf.put_u32(v.len() as u32);
            buf.put_slice(v);
        }
    }
}

/// Decode exactly `count` datums; leftover bytes are an error
pub fn decode_datums(mut data: &[u8], count: usize) -> Result<Vec<Datum>, CodecError> {
    let mut datums = Vec::with_capacity(count);
    while datums.len() < count {
        if !data.has_remaining() {
            return Err(CodecError::CountMismatch {
                expected: count,
                actual: datums.len(),
            });
        }
        datums.push(decode_datum(&mut data)?);
    }
    if data.has_remaining() {
        return Err(CodecError::TrailingBytes(data.remaining()));
    }
    Ok(datums)
}

/// Decode every datum in `data`
pub fn decode_all(mut data: &[u8]) -> Result<Vec<Datum>, CodecError> {
    let mut datums = Vec::new();
    while data.has_remaining() {
        datums.push(decode_datum(&mut data)?);
    }
    Ok(datums)
}

fn decode_datum(data: &mut &[u8]) -> Result<Datum, CodecError> {
    ensure(data, 1)?;
    let flag = data.get_u8();
    let datum = match flag {
        NIL_FLAG => Datum::Null,
        INT_FLAG => {
            ensure(data, 8)?;
            Datum::Int(data.get_i64())
        }
        UINT_FLAG => {
            ensure(data, 8)?;
            Datum::UInt(data.get_u64())
        }
        FLOAT_FLAG => {
            ensure(data, 8)?;
            Datum::Float(data.get_f64())
        }
        STRING_FLAG => {
            let raw = take_prefixed(data)?;
            Datum::String(String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?)
        }
        BYTES_FLAG => Datum::Bytes(take_prefixed(data)?),
        other => return Err(CodecError::UnknownTag(other)),
    };
    Ok(datum)
}

fn take_prefixed(data: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    ensure(data, 4)?;
    let len = data.get_u32() as usize;
    ensure(data, len)?;
    let raw = data[..len].to_vec();
    data.advance(len);
    Ok(raw)
}

fn ensure(data: &&[u8], needed: usize) -> Result<(), CodecError> {
    if data.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: data.remaining(),
        });
    }
    Ok(())
}
