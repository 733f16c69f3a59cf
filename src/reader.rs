//! `BinaryReader`: typed little-endian reads over any `io::Read`, plus the
//! VLE/TSize/Pascal-string/UTF-16/bitset primitives the archive and
//! property/WState formats are built from (§4.A).

use std::io::{self, Read};

use byteorder::{ReadBytesExt, LE};

use crate::bitset::BitSet;
use crate::result::{Error, Result};

pub struct BinaryReader<R> {
    inner: R,
}

impl<R: Read> BinaryReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn map_eof<T>(res: io::Result<T>) -> Result<T> {
        res.map_err(Error::from)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Self::map_eof(self.inner.read_u8())
    }

    pub fn i8(&mut self) -> Result<i8> {
        Self::map_eof(self.inner.read_i8())
    }

    pub fn u16(&mut self) -> Result<u16> {
        Self::map_eof(self.inner.read_u16::<LE>())
    }

    pub fn i16(&mut self) -> Result<i16> {
        Self::map_eof(self.inner.read_i16::<LE>())
    }

    pub fn u32(&mut self) -> Result<u32> {
        Self::map_eof(self.inner.read_u32::<LE>())
    }

    pub fn i32(&mut self) -> Result<i32> {
        Self::map_eof(self.inner.read_i32::<LE>())
    }

    pub fn u64(&mut self) -> Result<u64> {
        Self::map_eof(self.inner.read_u64::<LE>())
    }

    pub fn i64(&mut self) -> Result<i64> {
        Self::map_eof(self.inner.read_i64::<LE>())
    }

    pub fn f32(&mut self) -> Result<f32> {
        Self::map_eof(self.inner.read_f32::<LE>())
    }

    pub fn f64(&mut self) -> Result<f64> {
        Self::map_eof(self.inner.read_f64::<LE>())
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::decode(format!("bad bool value {other:#04x}"))),
        }
    }

    pub fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        Self::map_eof(self.inner.read_exact(&mut buf))?;
        Ok(buf)
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        let mut sink = io::sink();
        Self::map_eof(io::copy(&mut (&mut self.inner).take(n), &mut sink))?;
        Ok(())
    }

    /// Variable-length unsigned integer (§4.A, §6). The first byte's top
    /// bits select one of four encodings: one byte, a following `u32`, a
    /// two-byte form with a 14-bit payload, or a three-byte form with a
    /// 22-bit payload.
    pub fn vle(&mut self) -> Result<u32> {
        let a = self.u8()?;
        if a & 0x80 == 0 {
            return Ok(a as u32);
        }
        if a == 0xE0 {
            return self.u32();
        }
        let b = self.u8()?;
        if a & 0x40 == 0x40 {
            let c = self.u16()? as u32;
            Ok(((a as u32 & 0x3F) << 24) | ((b as u32) << 16) | c)
        } else {
            Ok((b as u32) | ((a as u32 & 0x7F) << 8))
        }
    }

    /// A one-byte bucket-count (implementation detail of the hashtable the
    /// value came from) followed by a `vle` element count.
    pub fn tsize(&mut self) -> Result<u32> {
        self.u8()?;
        self.vle()
    }

    pub fn pascal_string(&mut self) -> Result<String> {
        let len = self.vle()? as usize;
        let bytes = self.bytes(len)?;
        Ok(bytes.into_iter().map(|b| b as char).collect())
    }

    pub fn prefixed_utf16(&mut self) -> Result<String> {
        let len = self.vle()? as usize;
        let units = (0..len)
            .map(|_| self.u16())
            .collect::<Result<Vec<_>>>()?;
        String::from_utf16(&units).map_err(|e| Error::decode(e.to_string()))
    }

    /// Reads a `Color` as four raw `r, g, b, a` bytes, distinct from
    /// `Color::from_packed`'s `0xAARRGGBB` layout (§3).
    pub fn color(&mut self) -> Result<crate::position::Color> {
        let bytes = self.bytes(4)?;
        Ok(crate::position::Color::new(bytes[0], bytes[1], bytes[2], bytes[3]))
    }

    pub fn vector3d(&mut self) -> Result<crate::position::Vector3D> {
        crate::position::Vector3D::read(self)
    }

    pub fn quaternion(&mut self) -> Result<crate::position::Quaternion> {
        crate::position::Quaternion::read(self)
    }

    pub fn position(&mut self) -> Result<crate::position::Position> {
        crate::position::Position::from_dat(self)
    }

    pub fn bitset_stream(&mut self) -> Result<BitSet> {
        let bit_count = self.vle()? as usize;
        let byte_count = (bit_count + 7) / 8;
        let bytes = self.bytes(byte_count)?;
        Ok(BitSet::from_bytes(&bytes, bit_count))
    }

    pub fn bytes_available(&mut self) -> Result<u64>
    where
        R: io::Seek,
    {
        let current = self.inner.stream_position()?;
        let end = self.inner.seek(io::SeekFrom::End(0))?;
        self.inner.seek(io::SeekFrom::Start(current))?;
        Ok(end - current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: &[u8]) -> BinaryReader<Cursor<Vec<u8>>> {
        BinaryReader::new(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn vle_round_trips_single_byte() {
        assert_eq!(reader(&[0x00]).vle().unwrap(), 0);
        assert_eq!(reader(&[0x7F]).vle().unwrap(), 0x7F);
    }

    #[test]
    fn vle_round_trips_two_byte_form() {
        // a=0x80 (top bit set, bit 0x40 clear) => (b) | ((a&0x7F)<<8)
        assert_eq!(reader(&[0x80, 0x80]).vle().unwrap(), 0x80);
        assert_eq!(reader(&[0xBF, 0xFF]).vle().unwrap(), 0x3FFF);
    }

    #[test]
    fn vle_round_trips_three_byte_form() {
        // a=0xC0 (bits 0x80 and 0x40 set) => 22-bit payload
        let bytes = [0xC0u8, 0x00, 0x40, 0x00];
        assert_eq!(reader(&bytes).vle().unwrap(), 0x4000);
    }

    #[test]
    fn vle_round_trips_u32_form() {
        let mut bytes = vec![0xE0u8];
        bytes.extend_from_slice(&0xFFFFu32.to_le_bytes());
        assert_eq!(reader(&bytes).vle().unwrap(), 0xFFFF);

        let mut bytes = vec![0xE0u8];
        bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes());
        assert_eq!(reader(&bytes).vle().unwrap(), 0xFFFFFFFF);

        let mut bytes = vec![0xE0u8];
        bytes.extend_from_slice(&0x00100000u32.to_le_bytes());
        assert_eq!(reader(&bytes).vle().unwrap(), 0x00100000);

        let mut bytes = vec![0xE0u8];
        bytes.extend_from_slice(&0x0FFFFFFFu32.to_le_bytes());
        assert_eq!(reader(&bytes).vle().unwrap(), 0x0FFFFFFF);
    }

    #[test]
    fn pascal_string_reads_latin1_bytes() {
        let mut bytes = vec![3u8];
        bytes.extend_from_slice(b"abc");
        assert_eq!(reader(&bytes).pascal_string().unwrap(), "abc");
    }

    #[test]
    fn prefixed_utf16_reads_code_units() {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&0x0041u16.to_le_bytes());
        bytes.extend_from_slice(&0x0042u16.to_le_bytes());
        assert_eq!(reader(&bytes).prefixed_utf16().unwrap(), "AB");
    }

    #[test]
    fn bitset_stream_reads_lsb_first() {
        let bytes = [8u8, 0b0000_0101];
        let set = reader(&bytes).bitset_stream().unwrap();
        assert!(set.contains(0));
        assert!(!set.contains(1));
        assert!(set.contains(2));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        assert!(reader(&[]).u32().is_err());
    }
}
