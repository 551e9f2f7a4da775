//! Typed values carried in rows

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::DatumError;

/// How text datums are ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collation {
    /// Plain byte order
    #[default]
    Binary,
    /// ASCII case-insensitive byte order
    CaseInsensitive,
}

impl Collation {
    fn compare(&self, left: &[u8], right: &[u8]) -> Ordering {
        match self {
            Collation::Binary => left.cmp(right),
            Collation::CaseInsensitive => left
                .iter()
                .map(u8::to_ascii_lowercase)
                .cmp(right.iter().map(u8::to_ascii_lowercase)),
        }
    }
}

/// Context required to compare datums
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareContext {
    pub collation: Collation,
}

impl CompareContext {
    pub fn new(collation: Collation) -> Self {
        Self { collation }
    }
}

/// A single typed value within a row
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Datum {
    /// Name of the datum kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Int(_) => "int",
            Datum::UInt(_) => "uint",
            Datum::Float(_) => "float",
            Datum::String(_) => "string",
            Datum::Bytes(_) => "bytes",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(v) => Some(*v),
            Datum::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Compare two datums.
    ///
    /// Numeric kinds coerce into each other and text kinds compare bytewise
    /// under the context's collation. `Null` orders before everything else.
    /// Mixing numeric and text kinds, or ordering a NaN, is an error.
    pub fn compare(&self, ctx: &CompareContext, other: &Datum) -> Result<Ordering, DatumError> {
        use Datum::*;

        match (self, other) {
            (Null, Null) => Ok(Ordering::Equal),
            (Null, _) => Ok(Ordering::Less),
            (_, Null) => Ok(Ordering::Greater),

            (Int(a), Int(b)) => Ok(a.cmp(b)),
            (UInt(a), UInt(b)) => Ok(a.cmp(b)),
            (Int(a), UInt(b)) => Ok(compare_int_uint(*a, *b)),
            (UInt(a), Int(b)) => Ok(compare_int_uint(*b, *a).reverse()),

            (Float(a), Float(b)) => compare_floats(*a, *b),
            (Int(a), Float(b)) => compare_int_float(i128::from(*a), *b),
            (Float(a), Int(b)) => compare_int_float(i128::from(*b), *a).map(Ordering::reverse),
            (UInt(a), Float(b)) => compare_int_float(i128::from(*a), *b),
            (Float(a), UInt(b)) => compare_int_float(i128::from(*b), *a).map(Ordering::reverse),

            (String(a), String(b)) => Ok(ctx.collation.compare(a.as_bytes(), b.as_bytes())),
            (String(a), Bytes(b)) => Ok(ctx.collation.compare(a.as_bytes(), b)),
            (Bytes(a), String(b)) => Ok(ctx.collation.compare(a, b.as_bytes())),
            (Bytes(a), Bytes(b)) => Ok(ctx.collation.compare(a, b)),

            _ => Err(DatumError::Incomparable {
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }

    /// Parse a text field into a string datum
    pub fn from_field(field: &[u8]) -> Datum {
        match std::str::from_utf8(field) {
            Ok(s) => Datum::String(s.to_string()),
            Err(_) => Datum::Bytes(field.to_vec()),
        }
    }
}

fn compare_int_uint(a: i64, b: u64) -> Ordering {
    if a < 0 {
        Ordering::Less
    } else {
        (a as u64).cmp(&b)
    }
}

fn compare_floats(a: f64, b: f64) -> Result<Ordering, DatumError> {
    a.partial_cmp(&b).ok_or(DatumError::NotANumber)
}

/// Exact comparison of an integer with a float. Casting the integer would
/// round above 2^53 and make mixed keys compare non-transitively.
fn compare_int_float(a: i128, b: f64) -> Result<Ordering, DatumError> {
    // every i64 and u64 lies in [-2^63, 2^64)
    const ABOVE_ALL: f64 = 18_446_744_073_709_551_616.0;
    const MIN: f64 = -9_223_372_036_854_775_808.0;

    if b.is_nan() {
        return Err(DatumError::NotANumber);
    }
    if b >= ABOVE_ALL {
        return Ok(Ordering::Less);
    }
    if b < MIN {
        return Ok(Ordering::Greater);
    }
    let whole = b.trunc();
    match a.cmp(&(whole as i128)) {
        Ordering::Equal => Ok(0f64.partial_cmp(&(b - whole)).unwrap_or(Ordering::Equal)),
        ord => Ok(ord),
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => Ok(()),
            Datum::Int(v) => write!(f, "{}", v),
            Datum::UInt(v) => write!(f, "{}", v),
            Datum::Float(v) => write!(f, "{}", v),
            Datum::String(v) => f.write_str(v),
            Datum::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        Datum::UInt(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::String(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::String(v)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Self {
        Datum::Bytes(v)
    }
}
