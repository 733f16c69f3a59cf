//! Abstract read-only access to a live process, plus the static
//! pattern-scanning used to locate its key tables before a single byte of
//! domain data is ever walked (§4.B).

use crate::result::{Error, Result};

/// Process bitness, which changes a handful of field widths and offsets
/// throughout the live-memory walker (§4.K, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    Bits32,
    Bits64,
}

impl Bitness {
    pub fn pointer_size(self) -> u64 {
        match self {
            Bitness::Bits32 => 4,
            Bitness::Bits64 => 8,
        }
    }

    pub fn is_64(self) -> bool {
        matches!(self, Bitness::Bits64)
    }
}

/// Read-only attach to a live process's address space. Implementations wrap
/// whatever OS-level attach primitive is available; this crate treats it as
/// an opaque capability (§1, §4.B).
pub trait ProcessMemory {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>>;
    fn bitness(&self) -> Bitness;
    fn close(&mut self);

    fn read_u8(&self, addr: u64) -> Result<u8> {
        Ok(self.read_bytes(addr, 1)?[0])
    }

    fn read_i8(&self, addr: u64) -> Result<i8> {
        Ok(self.read_u8(addr)? as i8)
    }

    fn read_u16(&self, addr: u64) -> Result<u16> {
        let b = self.read_bytes(addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&self, addr: u64) -> Result<u32> {
        let b = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&self, addr: u64) -> Result<i32> {
        Ok(self.read_u32(addr)? as i32)
    }

    fn read_u64(&self, addr: u64) -> Result<u64> {
        let b = self.read_bytes(addr, 8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_i64(&self, addr: u64) -> Result<i64> {
        Ok(self.read_u64(addr)? as i64)
    }

    fn read_f32(&self, addr: u64) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(addr)?))
    }

    fn read_f64(&self, addr: u64) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(addr)?))
    }

    fn read_bool(&self, addr: u64) -> Result<bool> {
        match self.read_u8(addr)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::decode(format!("bad bool byte {other:#04x} at {addr:#x}"))),
        }
    }

    /// Reads a pointer-sized field, zero-extended to `u64` regardless of
    /// process bitness.
    fn read_pointer(&self, addr: u64) -> Result<u64> {
        match self.bitness() {
            Bitness::Bits32 => Ok(self.read_u32(addr)? as u64),
            Bitness::Bits64 => self.read_u64(addr),
        }
    }
}

/// One byte of a `find_static_offset` pattern: either a concrete value or a
/// run of wildcard bytes (§4.B, `?N` meaning `N+1` wildcards).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternByte {
    Exact(u8),
    Wildcard,
}

fn parse_pattern(pattern: &str) -> Result<Vec<PatternByte>> {
    let mut out = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '?' {
            let mut digits = String::new();
            while chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                digits.push(chars.next().unwrap());
            }
            let n: usize = digits
                .parse()
                .map_err(|_| Error::decode(format!("bad wildcard run in pattern {pattern:?}")))?;
            out.extend(std::iter::repeat(PatternByte::Wildcard).take(n + 1));
        } else {
            let mut hex = String::new();
            hex.push(c);
            hex.push(
                chars
                    .next()
                    .ok_or_else(|| Error::decode(format!("odd hex digit in pattern {pattern:?}")))?,
            );
            let byte = u8::from_str_radix(&hex, 16)
                .map_err(|_| Error::decode(format!("bad hex byte {hex:?} in pattern {pattern:?}")))?;
            out.push(PatternByte::Exact(byte));
        }
    }
    Ok(out)
}

fn find_pattern(haystack: &[u8], pattern: &[PatternByte]) -> Option<usize> {
    if pattern.is_empty() || haystack.len() < pattern.len() {
        return None;
    }
    'outer: for start in 0..=haystack.len() - pattern.len() {
        for (offset, p) in pattern.iter().enumerate() {
            if let PatternByte::Exact(expected) = p {
                if haystack[start + offset] != *expected {
                    continue 'outer;
                }
            }
        }
        return Some(start);
    }
    None
}

/// Scans `image_bytes` for `pattern`'s first match, reads a 32-bit
/// little-endian value at `match_index + displacement`, and resolves it to
/// an absolute address: RIP-relative for 64-bit targets, absolute as-is for
/// 32-bit ones (§4.B).
pub fn find_static_offset(
    image_bytes: &[u8],
    pattern: &str,
    displacement: i64,
    is_64bit: bool,
    base: u64,
) -> Result<u64> {
    let compiled = parse_pattern(pattern)?;
    let index = find_pattern(image_bytes, &compiled)
        .ok_or_else(|| Error::PatternNotFound { name: "static_offset" })?;

    let value_at = (index as i64 + displacement) as usize;
    let value_bytes = image_bytes
        .get(value_at..value_at + 4)
        .ok_or_else(|| Error::decode("pattern displacement out of bounds"))?;
    let value = i32::from_le_bytes(value_bytes.try_into().unwrap());

    if is_64bit {
        let resolved = index as i64 + displacement + 4 + value as i64 + base as i64;
        Ok(resolved as u64)
    } else {
        Ok(value as u32 as u64)
    }
}

/// The four required static tables (§4.B), keyed by name so callers can
/// report which one failed to resolve.
pub struct RequiredPattern {
    pub name: &'static str,
    pub pattern_64: &'static str,
    pub displacement_64: i64,
    pub pattern_32: &'static str,
    pub displacement_32: i64,
}

pub const REQUIRED_PATTERNS: &[RequiredPattern] = &[
    RequiredPattern {
        name: "entities",
        pattern_64: "48895c2408????488b0d",
        displacement_64: 16,
        pattern_32: "8b0d",
        displacement_32: 2,
    },
    RequiredPattern {
        name: "references",
        pattern_64: "488b05",
        displacement_64: 3,
        pattern_32: "8b476468",
        displacement_32: -9,
    },
    RequiredPattern {
        name: "client_account_data",
        pattern_64: "48893d",
        displacement_64: 3,
        pattern_32: "85c974078b01",
        displacement_32: -4,
    },
    RequiredPattern {
        name: "storage",
        pattern_64: "4883ec28????488d0d",
        displacement_64: 12,
        pattern_32: "6a016a02b9",
        displacement_32: 5,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_with_wildcards_matches() {
        let compiled = parse_pattern("48?18b").unwrap();
        assert_eq!(
            compiled,
            vec![
                PatternByte::Exact(0x48),
                PatternByte::Wildcard,
                PatternByte::Wildcard,
                PatternByte::Exact(0x8b),
            ]
        );
    }

    #[test]
    fn resolves_64bit_rip_relative_address() {
        let mut image = vec![0u8; 0x1000];
        image.extend_from_slice(&[0x48, 0x8b, 0x05]);
        image.extend_from_slice(&0x44332211u32.to_le_bytes());
        let addr = find_static_offset(&image, "488b05", 3, true, 0x1_0000_0000).unwrap();
        assert_eq!(addr, 0x1000 + 3 + 4 + 0x44332211 + 0x1_0000_0000);
    }

    #[test]
    fn resolves_32bit_absolute_address() {
        let mut image = vec![0x8bu8, 0x0d];
        image.extend_from_slice(&0x00401234u32.to_le_bytes());
        let addr = find_static_offset(&image, "8b0d", 2, false, 0).unwrap();
        assert_eq!(addr, 0x00401234);
    }

    #[test]
    fn missing_pattern_is_an_error() {
        let image = vec![0u8; 16];
        assert!(find_static_offset(&image, "ffeeddcc", 0, true, 0).is_err());
    }
}
