//! The fixed-size patch header
//!
//! The header is read and written field by field in on-disk order. The
//! signature material is carried verbatim; nothing here checks it.

use crate::error::Result;
use crate::io::{Reader, WriteLeExt};
use bitfield::bitfield;
use std::fmt;

/// Size of the signature, modulus and check blocks
pub const SIGNATURE_SIZE: usize = 256;

/// On-disk size of [`PatchHeader`]
pub const HEADER_SIZE: usize = 0x328;

bitfield! {
    /// The CPU identification field of the header
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuIdentifier(u32);
    impl Debug;

    pub u8, stepping, set_stepping: 3, 0;
    pub u8, model, set_model: 7, 4;
    pub u8, ext_model, set_ext_model: 11, 8;
    pub u8, ext_family, set_ext_family: 15, 12;
    pub u16, reserved_16_31, set_reserved_16_31: 31, 16;
}

impl CpuIdentifier {
    pub const fn from_raw(raw: u32) -> Self {
        CpuIdentifier(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Display family: the base family `0xf` plus the extended family
    pub fn family(&self) -> u32 {
        0xf + self.ext_family() as u32
    }

    /// Display model: extended model in the high nibble
    pub fn model_number(&self) -> u32 {
        ((self.ext_model() as u32) << 4) | self.model() as u32
    }
}

impl fmt::Display for CpuIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#06x} (family {:#x}, model {:#x}, stepping {})",
            self.0,
            self.family(),
            self.model_number(),
            self.stepping()
        )
    }
}

/// The options sub-record near the end of the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PatchOptions {
    pub autorun: u8,
    pub encrypted: u8,
    pub unknown1: u8,
    pub unknown2: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHeader {
    /// Release date, BCD encoded as `0xMMDDYYYY`
    pub date: u32,
    /// Patch revision the processor compares against the running one
    pub revision: u32,
    pub format: u16,
    /// Declared payload length
    pub patch_len: u8,
    pub init: u8,
    pub checksum: u32,
    pub nb_vendor: u16,
    pub nb_device: u16,
    pub sb_vendor: u16,
    pub sb_device: u16,
    pub cpuid: CpuIdentifier,
    pub bios_revision: u8,
    pub flags: u8,
    pub reserved: u8,
    pub reserved2: u8,
    pub signature: [u8; SIGNATURE_SIZE],
    pub modulus: [u8; SIGNATURE_SIZE],
    pub check: [u8; SIGNATURE_SIZE],
    pub options: PatchOptions,
    /// Second revision field at the end of the header
    pub trailing_revision: u32,
}

impl Default for PatchHeader {
    fn default() -> Self {
        PatchHeader {
            date: 0,
            revision: 0,
            format: 0,
            patch_len: 0,
            init: 0,
            checksum: 0,
            nb_vendor: 0,
            nb_device: 0,
            sb_vendor: 0,
            sb_device: 0,
            cpuid: CpuIdentifier::default(),
            bios_revision: 0,
            flags: 0,
            reserved: 0,
            reserved2: 0,
            signature: [0; SIGNATURE_SIZE],
            modulus: [0; SIGNATURE_SIZE],
            check: [0; SIGNATURE_SIZE],
            options: PatchOptions::default(),
            trailing_revision: 0,
        }
    }
}

impl PatchHeader {
    pub(crate) fn read(reader: &mut Reader<'_>) -> Result<PatchHeader> {
        Ok(PatchHeader {
            date: reader.read_u32_le("header date")?,
            revision: reader.read_u32_le("header revision")?,
            format: reader.read_u16_le("header format")?,
            patch_len: reader.read_u8("header patch length")?,
            init: reader.read_u8("header init flags")?,
            checksum: reader.read_u32_le("header checksum")?,
            nb_vendor: reader.read_u16_le("header northbridge vendor")?,
            nb_device: reader.read_u16_le("header northbridge device")?,
            sb_vendor: reader.read_u16_le("header southbridge vendor")?,
            sb_device: reader.read_u16_le("header southbridge device")?,
            cpuid: CpuIdentifier(reader.read_u32_le("header cpuid")?),
            bios_revision: reader.read_u8("header bios revision")?,
            flags: reader.read_u8("header flags")?,
            reserved: reader.read_u8("header reserved")?,
            reserved2: reader.read_u8("header reserved")?,
            signature: reader.read_array("header signature")?,
            modulus: reader.read_array("header modulus")?,
            check: reader.read_array("header check")?,
            options: PatchOptions {
                autorun: reader.read_u8("header options")?,
                encrypted: reader.read_u8("header options")?,
                unknown1: reader.read_u8("header options")?,
                unknown2: reader.read_u8("header options")?,
            },
            trailing_revision: reader.read_u32_le("header trailing revision")?,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.write_u32_le(self.date);
        out.write_u32_le(self.revision);
        out.write_u16_le(self.format);
        out.write_u8(self.patch_len);
        out.write_u8(self.init);
        out.write_u32_le(self.checksum);
        out.write_u16_le(self.nb_vendor);
        out.write_u16_le(self.nb_device);
        out.write_u16_le(self.sb_vendor);
        out.write_u16_le(self.sb_device);
        out.write_u32_le(self.cpuid.raw());
        out.write_u8(self.bios_revision);
        out.write_u8(self.flags);
        out.write_u8(self.reserved);
        out.write_u8(self.reserved2);
        out.write_bytes(&self.signature);
        out.write_bytes(&self.modulus);
        out.write_bytes(&self.check);
        out.write_u8(self.options.autorun);
        out.write_u8(self.options.encrypted);
        out.write_u8(self.options.unknown1);
        out.write_u8(self.options.unknown2);
        out.write_u32_le(self.trailing_revision);
    }

    /// The release date as `YYYY-MM-DD`, read from its BCD digits
    pub fn release_date(&self) -> String {
        format!(
            "{:04x}-{:02x}-{:02x}",
            self.date & 0xffff,
            self.date >> 24,
            (self.date >> 16) & 0xff
        )
    }
}

impl fmt::Display for PatchHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Date:        {:#010x} ({})", self.date, self.release_date())?;
        writeln!(f, "Revision:    {:#010x}", self.revision)?;
        writeln!(f, "Format:      {:#06x}", self.format)?;
        writeln!(f, "Patchlen:    {:#04x}", self.patch_len)?;
        writeln!(f, "Init:        {:#04x}", self.init)?;
        writeln!(f, "Checksum:    {:#010x}", self.checksum)?;
        writeln!(f, "NorthBridge: {:04x}:{:04x}", self.nb_vendor, self.nb_device)?;
        writeln!(f, "SouthBridge: {:04x}:{:04x}", self.sb_vendor, self.sb_device)?;
        writeln!(f, "Cpuid:       {}", self.cpuid)?;
        writeln!(f, "BiosRev:     {:#04x}", self.bios_revision)?;
        writeln!(f, "Flags:       {:#04x}", self.flags)?;
        writeln!(
            f,
            "Options:     autorun={} encrypted={} unknown1={} unknown2={}",
            self.options.autorun, self.options.encrypted, self.options.unknown1, self.options.unknown2
        )?;
        write!(f, "Rev:         {:#010x}", self.trailing_revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_fixed_size() {
        let mut out = Vec::new();
        PatchHeader::default().write(&mut out);
        assert_eq!(out.len(), HEADER_SIZE);
    }

    #[test]
    fn header_field_offsets() {
        let mut header = PatchHeader {
            date: 0x03222024,
            revision: 0x0a20_120a,
            cpuid: CpuIdentifier::from_raw(0xa201),
            trailing_revision: 0x1122_3344,
            ..Default::default()
        };
        header.signature[0] = 0x5a;
        header.options.encrypted = 1;

        let mut out = Vec::new();
        header.write(&mut out);
        assert_eq!(&out[0..4], &[0x24, 0x20, 0x22, 0x03]);
        assert_eq!(&out[4..8], &0x0a20_120au32.to_le_bytes());
        assert_eq!(&out[24..28], &[0x01, 0xa2, 0, 0]);
        assert_eq!(out[32], 0x5a);
        assert_eq!(out[801], 1);
        assert_eq!(&out[804..808], &0x1122_3344u32.to_le_bytes());

        let parsed = PatchHeader::read(&mut Reader::new(&out)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn cpuid_fields() {
        let cpuid = CpuIdentifier::from_raw(0xa201);
        assert_eq!(cpuid.stepping(), 1);
        assert_eq!(cpuid.model(), 0);
        assert_eq!(cpuid.ext_model(), 2);
        assert_eq!(cpuid.ext_family(), 0xa);
        assert_eq!(cpuid.family(), 0x19);
        assert_eq!(cpuid.model_number(), 0x20);
    }

    #[test]
    fn release_date_from_bcd() {
        let header = PatchHeader {
            date: 0x03222024,
            ..Default::default()
        };
        assert_eq!(header.release_date(), "2024-03-22");
    }
}
