//! Binary encoding primitives shared by every packet.
//!
//! Format rules (little-endian throughout):
//! - fixed-width integers and floats are written as-is
//! - [`CompressedUnsigned`] is LEB128, at most 5 bytes for a `u32`
//! - [`CompressedSigned`] zigzag-maps an `i32` and writes it as a compressed unsigned
//! - optionals are a `bool` byte (0 or 1) followed by the value when present
//! - vectors are a compressed length followed by the elements
//! - [`BoundedString`] is a compressed byte length followed by UTF-8, capped at
//!   a compile-time maximum

use std::{fmt, ops::Deref};

use cgmath::{Quaternion, Vector3};
use thiserror::Error;

/// Failure to decode a value from a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload ended before the value did.
    #[error("short read: needed {needed} byte(s), {remaining} left")]
    UnexpectedEnd {
        /// Bytes the value needed.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },
    /// A compressed integer was overlong or did not fit its type.
    #[error("malformed compressed integer")]
    MalformedCompressed,
    /// A string was longer than its declared maximum.
    #[error("string of {len} bytes exceeds maximum of {max}")]
    StringTooLong {
        /// Declared length.
        len: usize,
        /// Maximum length.
        max: usize,
    },
    /// A string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// A field held a value outside of its domain.
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field being decoded.
        field: &'static str,
        /// Raw value found.
        value: u32,
    },
    /// A collection declared more elements than the payload can hold.
    #[error("collection length {len} exceeds the {remaining} byte(s) left")]
    LengthTooLarge {
        /// Declared element count.
        len: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },
    /// Bytes were left after the message was decoded.
    #[error("{0} trailing byte(s) after message")]
    TrailingBytes(usize),
}

/// Raised when building a [`BoundedString`] from a string that is too long.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("string of {len} bytes exceeds maximum of {max}")]
pub struct StringTooLong {
    /// Length of the rejected string, in bytes.
    pub len: usize,
    /// Maximum length, in bytes.
    pub max: usize,
}

/// Types that write themselves into a packet payload.
pub trait Encode {
    /// Appends the encoded value to `out`.
    fn encode(&self, out: &mut Vec<u8>);
}

/// Types that read themselves back from a packet payload.
pub trait Decode: Sized {
    /// Decodes one value, advancing `inp` past it.
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError>;
}

/// Takes exactly `N` bytes off the front of `inp`.
pub fn take<const N: usize>(inp: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    if inp.len() < N {
        return Err(DecodeError::UnexpectedEnd {
            needed: N,
            remaining: inp.len(),
        });
    }
    let (head, tail) = inp.split_at(N);
    *inp = tail;
    let mut buf = [0u8; N];
    buf.copy_from_slice(head);
    Ok(buf)
}

/// Takes `len` bytes off the front of `inp`.
pub fn take_slice<'a>(inp: &mut &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
    if inp.len() < len {
        return Err(DecodeError::UnexpectedEnd {
            needed: len,
            remaining: inp.len(),
        });
    }
    let (head, tail) = inp.split_at(len);
    *inp = tail;
    Ok(head)
}

/// Decodes a complete message: the whole payload must be consumed.
pub fn decode_exact<T: Decode>(mut inp: &[u8]) -> Result<T, DecodeError> {
    let value = T::decode(&mut inp)?;
    if !inp.is_empty() {
        return Err(DecodeError::TrailingBytes(inp.len()));
    }
    Ok(value)
}

/// Encodes a value into a fresh buffer.
pub fn encode_to_vec<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

macro_rules! fixed_width {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Decode for $ty {
                fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
                    Ok(<$ty>::from_le_bytes(take(inp)?))
                }
            }
        )*
    };
}

fixed_width!(u8, u16, u32, u64, i32, f32);

impl Encode for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(inp)? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidValue {
                field: "bool",
                value: u32::from(value),
            }),
        }
    }
}

impl Encode for Vector3<f32> {
    fn encode(&self, out: &mut Vec<u8>) {
        self.x.encode(out);
        self.y.encode(out);
        self.z.encode(out);
    }
}

impl Decode for Vector3<f32> {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Vector3::new(
            f32::decode(inp)?,
            f32::decode(inp)?,
            f32::decode(inp)?,
        ))
    }
}

impl Encode for Quaternion<f32> {
    fn encode(&self, out: &mut Vec<u8>) {
        self.s.encode(out);
        self.v.encode(out);
    }
}

impl Decode for Quaternion<f32> {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        let s = f32::decode(inp)?;
        let v = Vector3::decode(inp)?;
        Ok(Quaternion::from_sv(s, v))
    }
}

/// `u32` written as LEB128.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompressedUnsigned(pub u32);

impl Encode for CompressedUnsigned {
    fn encode(&self, out: &mut Vec<u8>) {
        let mut value = self.0;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }
}

impl Decode for CompressedUnsigned {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut value = 0u32;
        for position in 0..5u32 {
            let [byte] = take::<1>(inp)?;
            let payload = u32::from(byte & 0x7F);
            let shift = position * 7;

            if position == 4 && (byte & 0x80 != 0 || payload > 0x0F) {
                return Err(DecodeError::MalformedCompressed);
            }
            value |= payload << shift;

            if byte & 0x80 == 0 {
                // A zero final byte means the previous byte could have ended the number.
                if position > 0 && byte == 0 {
                    return Err(DecodeError::MalformedCompressed);
                }
                return Ok(CompressedUnsigned(value));
            }
        }
        Err(DecodeError::MalformedCompressed)
    }
}

/// `i32` zigzag-mapped onto a [`CompressedUnsigned`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompressedSigned(pub i32);

impl Encode for CompressedSigned {
    fn encode(&self, out: &mut Vec<u8>) {
        let zigzag = ((self.0 << 1) ^ (self.0 >> 31)) as u32;
        CompressedUnsigned(zigzag).encode(out);
    }
}

impl Decode for CompressedSigned {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        let CompressedUnsigned(zigzag) = CompressedUnsigned::decode(inp)?;
        Ok(CompressedSigned((zigzag >> 1) as i32 ^ -((zigzag & 1) as i32)))
    }
}

fn encode_len(len: usize, out: &mut Vec<u8>) {
    CompressedUnsigned(u32::try_from(len).unwrap_or(u32::MAX)).encode(out);
}

fn decode_len(inp: &mut &[u8]) -> Result<usize, DecodeError> {
    let CompressedUnsigned(len) = CompressedUnsigned::decode(inp)?;
    let len = len as usize;
    // Every element takes at least one byte.
    if len > inp.len() {
        return Err(DecodeError::LengthTooLarge {
            len,
            remaining: inp.len(),
        });
    }
    Ok(len)
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        encode_len(self.len(), out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(inp)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(inp)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        self.is_some().encode(out);
        if let Some(value) = self {
            value.encode(out);
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        if bool::decode(inp)? {
            Ok(Some(T::decode(inp)?))
        } else {
            Ok(None)
        }
    }
}

/// UTF-8 string whose encoded length never exceeds `MAX` bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoundedString<const MAX: usize>(String);

impl<const MAX: usize> BoundedString<MAX> {
    /// Maximum length in bytes.
    pub const MAX_LEN: usize = MAX;

    /// Wraps `value`, rejecting it if it is longer than `MAX` bytes.
    pub fn new(value: impl Into<String>) -> Result<Self, StringTooLong> {
        let value = value.into();
        if value.len() > MAX {
            return Err(StringTooLong {
                len: value.len(),
                max: MAX,
            });
        }
        Ok(Self(value))
    }

    /// Wraps `value`, cutting it at the last character boundary that fits.
    pub fn truncated(value: &str) -> Self {
        let mut end = value.len().min(MAX);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        Self(value[..end].to_string())
    }

    /// Borrows the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl<const MAX: usize> Deref for BoundedString<MAX> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> fmt::Display for BoundedString<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const MAX: usize> TryFrom<&str> for BoundedString<MAX> {
    type Error = StringTooLong;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<const MAX: usize> Encode for BoundedString<MAX> {
    fn encode(&self, out: &mut Vec<u8>) {
        encode_len(self.0.len(), out);
        out.extend_from_slice(self.0.as_bytes());
    }
}

impl<const MAX: usize> Decode for BoundedString<MAX> {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        let CompressedUnsigned(len) = CompressedUnsigned::decode(inp)?;
        let len = len as usize;
        if len > MAX {
            return Err(DecodeError::StringTooLong { len, max: MAX });
        }
        let bytes = take_slice(inp, len)?;
        let value = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(Self(value.to_string()))
    }
}
