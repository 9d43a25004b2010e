//! Binary data helpers shared by the container engine.
//!
//! Little-endian access to allocation table entries and UTF-16LE handling
//! for directory entry names.

use zerocopy::{FromBytes, I32, LE};

/// Binary parsing error type
#[derive(Debug, Clone)]
pub enum BinaryError {
    /// Not enough data to read the requested type
    InsufficientData { expected: usize, available: usize },
    /// Failed to parse the data
    ParseError(String),
}

impl std::fmt::Display for BinaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryError::InsufficientData {
                expected,
                available,
            } => {
                write!(
                    f,
                    "Insufficient data: expected {}, got {}",
                    expected, available
                )
            },
            BinaryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for BinaryError {}

/// Result type for binary operations
pub type BinaryResult<T> = Result<T, BinaryError>;

#[inline]
fn check_len(data: &[u8], offset: usize, width: usize) -> BinaryResult<()> {
    if offset + width > data.len() {
        return Err(BinaryError::InsufficientData {
            expected: offset + width,
            available: data.len(),
        });
    }
    Ok(())
}

/// Read a little-endian i32 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use leofile::common::binary::read_i32_le;
/// let data = [0xFE, 0xFF, 0xFF, 0xFF];
/// assert_eq!(read_i32_le(&data, 0).unwrap(), -2i32);
/// ```
#[inline]
pub fn read_i32_le(data: &[u8], offset: usize) -> BinaryResult<i32> {
    check_len(data, offset, 4)?;
    I32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read i32".to_string()))
}

/// Decode a sequence of little-endian i32 values.
///
/// Trailing bytes that do not form a whole value are ignored.
pub fn read_i32_array(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Parse a UTF-16LE string, stopping at the first null code unit.
///
/// Unpaired surrogates are replaced rather than rejected.
///
/// # Examples
///
/// ```
/// use leofile::common::binary::parse_utf16le_string;
/// let data = vec![0x48, 0x00, 0x69, 0x00, 0x00, 0x00];
/// assert_eq!(parse_utf16le_string(&data), "Hi");
/// ```
pub fn parse_utf16le_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a string as UTF-16LE, truncated to at most `max_units` code units.
///
/// Truncation never splits a surrogate pair.
pub fn encode_utf16le(text: &str, max_units: usize) -> Vec<u8> {
    let mut units = 0;
    let mut out = Vec::with_capacity(max_units.min(text.len()) * 2);
    let mut buf = [0u16; 2];
    for ch in text.chars() {
        let encoded = ch.encode_utf16(&mut buf);
        if units + encoded.len() > max_units {
            break;
        }
        units += encoded.len();
        out.extend(encoded.iter().flat_map(|unit| unit.to_le_bytes()));
    }
    out
}
