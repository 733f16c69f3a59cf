//! The compound value types carried by properties and native packages:
//! `Color`, `Vector3D`, `Quaternion`, and the flag-driven `Position` (§3,
//! §4.A, §4.K).

use std::io::Read;

use crate::mem::{Bitness, ProcessMemory};
use crate::reader::BinaryReader;
use crate::result::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// `0xAARRGGBB` packed form used by a handful of native package fields.
    pub fn from_packed(val: u32) -> Self {
        Self {
            a: (val >> 24) as u8,
            r: ((val >> 16) & 0xFF) as u8,
            g: ((val >> 8) & 0xFF) as u8,
            b: (val & 0xFF) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3D {
    const F_EPSILON: f32 = 0.0002;

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn read<R: Read>(reader: &mut BinaryReader<R>) -> Result<Self> {
        Ok(Self {
            x: reader.f32()?,
            y: reader.f32()?,
            z: reader.f32()?,
        })
    }

    pub fn nearly_eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() <= Self::F_EPSILON
            && (self.y - other.y).abs() <= Self::F_EPSILON
            && (self.z - other.z).abs() <= Self::F_EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn read<R: Read>(reader: &mut BinaryReader<R>) -> Result<Self> {
        Ok(Self {
            w: reader.f32()?,
            x: reader.f32()?,
            y: reader.f32()?,
            z: reader.f32()?,
        })
    }
}

bitflags::bitflags! {
    /// Which sub-fields a `Position` carries, plus two bits that suppress
    /// rendering a region/cell value that's merely a structural default
    /// (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PositionFlags: u8 {
        const REGION          = 0x01;
        const BLOCK           = 0x02;
        const INSTANCE        = 0x04;
        const CELL            = 0x08;
        const POS             = 0x10;
        const ROT             = 0x20;
        const INHIBIT_REGION  = 0x40;
        const INHIBIT_CELL    = 0x80;
    }
}

/// A world location: region/block/instance/cell indices plus an optional
/// offset and rotation, assembled from whichever flag bits are set (§3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub flags: PositionFlags,
    pub region: i8,
    pub bx: u8,
    pub by: u8,
    pub instance: u16,
    pub cell: u16,
    pub pos: Option<Vector3D>,
    pub rot: Option<Quaternion>,
}

impl Position {
    pub fn from_dat<R: Read>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let flags = PositionFlags::from_bits_truncate(reader.u8()?);
        let mut region = 1i8;
        let mut bx = 0u8;
        let mut by = 0u8;
        let mut instance = 0u16;
        let mut cell = 0u16;
        let mut pos = None;
        let mut rot = None;

        if flags.contains(PositionFlags::REGION) {
            region = reader.i8()?;
        }
        if flags.contains(PositionFlags::BLOCK) {
            bx = reader.u8()?;
            by = reader.u8()?;
        }
        if flags.contains(PositionFlags::INSTANCE) {
            instance = reader.u16()?;
        }
        if flags.contains(PositionFlags::CELL) {
            cell = reader.u16()?;
        }
        if flags.contains(PositionFlags::POS) {
            pos = Some(reader.vector3d()?);
        }
        if flags.contains(PositionFlags::ROT) {
            rot = Some(reader.quaternion()?);
        }

        Ok(Self {
            flags,
            region,
            bx,
            by,
            instance,
            cell,
            pos,
            rot,
        })
    }

    /// Like `from_dat`, but a set `INHIBIT_REGION`/`INHIBIT_CELL` bit
    /// suppresses reading the corresponding field even when its own flag is
    /// set — the network-wire variant of the same layout (§3).
    pub fn from_net<R: Read>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let flags = PositionFlags::from_bits_truncate(reader.u8()?);
        let mut region = 1i8;
        let mut bx = 0u8;
        let mut by = 0u8;
        let mut instance = 0u16;
        let mut cell = 0u16;
        let mut pos = None;
        let mut rot = None;

        if flags.contains(PositionFlags::REGION) && !flags.contains(PositionFlags::INHIBIT_REGION)
        {
            region = reader.i8()?;
        }
        if flags.contains(PositionFlags::BLOCK) {
            bx = reader.u8()?;
            by = reader.u8()?;
        }
        if flags.contains(PositionFlags::INSTANCE) {
            instance = reader.u16()?;
        }
        if flags.contains(PositionFlags::CELL) && !flags.contains(PositionFlags::INHIBIT_CELL) {
            cell = reader.u16()?;
        }
        if flags.contains(PositionFlags::POS) {
            pos = Some(reader.vector3d()?);
        }
        if flags.contains(PositionFlags::ROT) {
            rot = Some(reader.quaternion()?);
        }

        Ok(Self {
            flags,
            region,
            bx,
            by,
            instance,
            cell,
            pos,
            rot,
        })
    }

    /// Reads a `Position` out of live process memory at `ptr + offset`,
    /// skipping a leading pointer-sized field. 64-bit targets carry 6 extra
    /// padding bytes before the vector/quaternion floats, 32-bit ones carry
    /// 2 (§4.K).
    pub fn from_mem(mem: &dyn ProcessMemory, ptr: u64, offset: u64) -> Result<Self> {
        let start = ptr + offset + mem.bitness().pointer_size();
        let pad: u64 = if mem.bitness() == Bitness::Bits64 { 6 } else { 2 };

        let region = mem.read_i32(start)? as i8;
        let bx = (mem.read_u32(start + 4)? & 0xFF) as u8;
        let by = (mem.read_u32(start + 5)? & 0xFF) as u8;
        let cell = mem.read_u16(start + 6)?;
        let instance = mem.read_u16(start + 8)?;

        let x = mem.read_f32(start + 10 + pad)?;
        let y = mem.read_f32(start + 14 + pad)?;
        let z = mem.read_f32(start + 18 + pad)?;
        let vec = Vector3D::new(x, y, z);

        let qw = mem.read_f32(start + 22 + pad)?;
        let qx = mem.read_f32(start + 24 + pad)?;
        let qy = mem.read_f32(start + 28 + pad)?;
        let qz = mem.read_f32(start + 32 + pad)?;
        let quat = Quaternion::new(qw, qx, qy, qz);

        Ok(Self::synthesize(region, bx, by, instance, cell, vec, quat))
    }

    /// Builds a synthetic `Position` the way the live-memory decoder does:
    /// every field present, flags derived from which values were actually
    /// read rather than stored on the wire (§4.K).
    #[allow(clippy::too_many_arguments)]
    pub fn synthesize(
        region: i8,
        bx: u8,
        by: u8,
        instance: u16,
        cell: u16,
        pos: Vector3D,
        rot: Quaternion,
    ) -> Self {
        let mut flags = PositionFlags::BLOCK
            | PositionFlags::INSTANCE
            | PositionFlags::CELL
            | PositionFlags::POS
            | PositionFlags::ROT
            | PositionFlags::REGION;
        if region == 1 {
            flags |= PositionFlags::INHIBIT_REGION;
        }
        flags |= PositionFlags::INHIBIT_CELL;
        Self {
            flags,
            region,
            bx,
            by,
            instance,
            cell,
            pos: Some(pos),
            rot: Some(rot),
        }
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
    fn color_from_packed_unpacks_argb() {
        let c = Color::from_packed(0xFF112233);
        assert_eq!(c, Color::new(0x11, 0x22, 0x33, 0xFF));
    }

    #[test]
    fn position_from_dat_reads_only_flagged_fields() {
        let bytes = [PositionFlags::REGION.bits(), 5i8 as u8];
        let pos = Position::from_dat(&mut reader(&bytes)).unwrap();
        assert_eq!(pos.region, 5);
        assert_eq!(pos.bx, 0);
        assert!(pos.pos.is_none());
    }

    #[test]
    fn position_from_dat_reads_pos_and_rot() {
        let mut bytes = vec![(PositionFlags::POS | PositionFlags::ROT).bits()];
        for f in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        for f in [1.0f32, 0.0, 0.0, 0.0] {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        let pos = Position::from_dat(&mut reader(&bytes)).unwrap();
        assert_eq!(pos.pos.unwrap(), Vector3D::new(1.0, 2.0, 3.0));
        assert_eq!(pos.rot.unwrap(), Quaternion::new(1.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn position_from_net_honors_inhibit_bits() {
        let bytes = [(PositionFlags::REGION | PositionFlags::INHIBIT_REGION).bits()];
        let pos = Position::from_net(&mut reader(&bytes)).unwrap();
        assert_eq!(pos.region, 1);
    }

    #[test]
    fn vector3d_nearly_eq_tolerates_epsilon() {
        let a = Vector3D::new(1.0, 1.0, 1.0);
        let b = Vector3D::new(1.0001, 1.0, 1.0);
        assert!(a.nearly_eq(&b));
    }
}
