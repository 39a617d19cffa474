//! Signal element types and typed access to raw signal memory.
//!
//! Signal memory is plain bytes in host byte order; [`SignalType`] knows how
//! wide each element is and how to store an engineering value into it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UeiError};

/// Element type of a framework signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Signed 64-bit integer.
    Int64,
    /// IEEE-754 single precision.
    Float32,
    /// IEEE-754 double precision.
    Float64,
    /// One byte, zero or one.
    Boolean,
}

impl SignalType {
    /// Every numeric type, in declaration order.
    pub const NUMERIC: [SignalType; 10] = [
        Self::Uint8,
        Self::Int8,
        Self::Uint16,
        Self::Int16,
        Self::Uint32,
        Self::Int32,
        Self::Uint64,
        Self::Int64,
        Self::Float32,
        Self::Float64,
    ];

    /// Size in bytes of one element.
    pub fn byte_size(self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 | Self::Boolean => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Whether values of this type are numbers (everything but boolean).
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Boolean)
    }

    /// Whether this is a floating point type.
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    fn check_len(self, len: usize) -> Result<()> {
        let needed = self.byte_size();
        if len < needed {
            return Err(UeiError::BufferTooSmall {
                needed,
                actual: len,
            });
        }
        Ok(())
    }

    /// Store `value` into the first element of `dst`.
    ///
    /// Integer targets round to nearest and saturate at the type limits.
    pub fn write_f64(self, value: f64, dst: &mut [u8]) -> Result<()> {
        self.check_len(dst.len())?;
        let rounded = value.round();
        match self {
            Self::Uint8 => dst[..1].copy_from_slice(&(rounded as u8).to_ne_bytes()),
            Self::Int8 => dst[..1].copy_from_slice(&(rounded as i8).to_ne_bytes()),
            Self::Uint16 => dst[..2].copy_from_slice(&(rounded as u16).to_ne_bytes()),
            Self::Int16 => dst[..2].copy_from_slice(&(rounded as i16).to_ne_bytes()),
            Self::Uint32 => dst[..4].copy_from_slice(&(rounded as u32).to_ne_bytes()),
            Self::Int32 => dst[..4].copy_from_slice(&(rounded as i32).to_ne_bytes()),
            Self::Uint64 => dst[..8].copy_from_slice(&(rounded as u64).to_ne_bytes()),
            Self::Int64 => dst[..8].copy_from_slice(&(rounded as i64).to_ne_bytes()),
            Self::Float32 => dst[..4].copy_from_slice(&(value as f32).to_ne_bytes()),
            Self::Float64 => dst[..8].copy_from_slice(&value.to_ne_bytes()),
            Self::Boolean => dst[0] = u8::from(value != 0.0),
        }
        Ok(())
    }

    /// Read the first element of `src` as `f64`.
    pub fn read_f64(self, src: &[u8]) -> Result<f64> {
        self.check_len(src.len())?;
        let value = match self {
            Self::Uint8 => f64::from(src[0]),
            Self::Int8 => f64::from(src[0] as i8),
            Self::Uint16 => f64::from(u16::from_ne_bytes([src[0], src[1]])),
            Self::Int16 => f64::from(i16::from_ne_bytes([src[0], src[1]])),
            Self::Uint32 => f64::from(u32::from_ne_bytes(word4(src))),
            Self::Int32 => f64::from(i32::from_ne_bytes(word4(src))),
            Self::Uint64 => u64::from_ne_bytes(word8(src)) as f64,
            Self::Int64 => i64::from_ne_bytes(word8(src)) as f64,
            Self::Float32 => f64::from(f32::from_ne_bytes(word4(src))),
            Self::Float64 => f64::from_ne_bytes(word8(src)),
            Self::Boolean => f64::from(src[0] != 0),
        };
        Ok(value)
    }

    /// Read the first element of `src` and compare it against zero.
    ///
    /// Integers are compared exactly, without going through `f64`. Floats use
    /// a direct `!= 0.0` comparison, so `-0.0` is false and `NaN` is true.
    pub fn read_nonzero(self, src: &[u8]) -> Result<bool> {
        self.check_len(src.len())?;
        let nonzero = match self {
            Self::Uint8 | Self::Int8 | Self::Boolean => src[0] != 0,
            Self::Uint16 | Self::Int16 => u16::from_ne_bytes([src[0], src[1]]) != 0,
            Self::Uint32 | Self::Int32 => u32::from_ne_bytes(word4(src)) != 0,
            Self::Uint64 | Self::Int64 => u64::from_ne_bytes(word8(src)) != 0,
            Self::Float32 => f32::from_ne_bytes(word4(src)) != 0.0,
            Self::Float64 => f64::from_ne_bytes(word8(src)) != 0.0,
        };
        Ok(nonzero)
    }
}

fn word4(src: &[u8]) -> [u8; 4] {
    [src[0], src[1], src[2], src[3]]
}

fn word8(src: &[u8]) -> [u8; 8] {
    [
        src[0], src[1], src[2], src[3], src[4], src[5], src[6], src[7],
    ]
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uint8 => "uint8",
            Self::Int8 => "int8",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Uint64 => "uint64",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Boolean => "boolean",
        };
        write!(f, "{}", name)
    }
}
