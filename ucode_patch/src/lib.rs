//! # Patch container
//!
//! In-memory model of a whole patch file and its little-endian on-disk layout:
//!
//! ```plain
//! | header (0x328) | match entries (nmatch * 4) | quad groups (nquad * 36) | hash (16) |
//! ```
//!
//! Nothing is validated beyond the structure. Whether a patch is acceptable is
//! decided by the processor when it is loaded.

use data_types::patch::RAW_QUAD_SIZE;
use data_types::RawQuad;
use log::{debug, trace};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use ucode_codec::QuadGroup;

mod error;
pub mod header;
mod io;
pub mod match_entry;

pub use error::{FormatError, Result};
pub use header::{CpuIdentifier, PatchHeader, PatchOptions, HEADER_SIZE};
pub use match_entry::{MatchEntry, MATCH_ENTRY_SIZE};

use crate::io::{Reader, WriteLeExt};

/// Number of match entries when the layout does not say otherwise
pub const DEFAULT_MATCH_COUNT: usize = 22;

/// Public exponent paired with the modulus in the header
pub const DEFAULT_EXPONENT: u32 = 65537;

/// Size of the trailing hash
pub const HASH_SIZE: usize = 16;

/// How many match entries and quad groups a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchLayout {
    pub match_count: usize,
    /// `None` derives the count from the bytes left after the fixed parts
    pub quad_count: Option<usize>,
}

impl Default for PatchLayout {
    fn default() -> Self {
        PatchLayout {
            match_count: DEFAULT_MATCH_COUNT,
            quad_count: None,
        }
    }
}

impl PatchLayout {
    /// Size of the file this layout describes for `quad_count` quads, `None`
    /// when it does not fit in a `usize`
    pub fn encoded_len(&self, quad_count: usize) -> Option<usize> {
        let matches = self.match_count.checked_mul(MATCH_ENTRY_SIZE)?;
        let program = quad_count.checked_mul(RAW_QUAD_SIZE)?;
        HEADER_SIZE
            .checked_add(matches)?
            .checked_add(program)?
            .checked_add(HASH_SIZE)
    }

    fn fixed_len(&self) -> Option<usize> {
        self.encoded_len(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub header: PatchHeader,
    pub matches: Vec<MatchEntry>,
    pub quads: Vec<QuadGroup>,
    pub hash: [u8; HASH_SIZE],
    /// Kept in memory only, never written
    pub exponent: u32,
}

impl Default for Patch {
    fn default() -> Self {
        Patch {
            header: PatchHeader::default(),
            matches: vec![MatchEntry::default(); DEFAULT_MATCH_COUNT],
            quads: Vec::new(),
            hash: [0; HASH_SIZE],
            exponent: DEFAULT_EXPONENT,
        }
    }
}

impl Patch {
    /// Parses a patch with the default layout
    pub fn parse(bytes: &[u8]) -> Result<Patch> {
        Self::parse_with_layout(bytes, PatchLayout::default())
    }

    pub fn parse_with_layout(bytes: &[u8], layout: PatchLayout) -> Result<Patch> {
        let quad_count = match layout.quad_count {
            Some(count) => {
                let expected = layout.encoded_len(count).unwrap_or(usize::MAX);
                if bytes.len() != expected {
                    return Err(FormatError::SizeMismatch {
                        match_count: layout.match_count,
                        quad_count: count,
                        expected,
                        found: bytes.len(),
                    });
                }
                count
            }
            None => match layout.fixed_len() {
                Some(fixed) if bytes.len() >= fixed => {
                    let program = bytes.len() - fixed;
                    if program % RAW_QUAD_SIZE != 0 {
                        return Err(FormatError::PartialQuad {
                            offset: fixed - HASH_SIZE + program / RAW_QUAD_SIZE * RAW_QUAD_SIZE,
                            trailing: program % RAW_QUAD_SIZE,
                        });
                    }
                    program / RAW_QUAD_SIZE
                }
                // the reader reports which part ran short
                _ => 0,
            },
        };

        let mut reader = Reader::new(bytes);
        let header = PatchHeader::read(&mut reader)?;
        trace!(
            "header read, revision {:#010x}, match table at {:#x}",
            header.revision,
            reader.offset()
        );

        let mut matches = Vec::with_capacity(layout.match_count.min(reader.remaining() / MATCH_ENTRY_SIZE));
        for _ in 0..layout.match_count {
            matches.push(MatchEntry::from_raw(reader.read_u32_le("match entry")?));
        }

        let mut quads = Vec::with_capacity(quad_count);
        for _ in 0..quad_count {
            let raw = RawQuad::from_le_bytes(&reader.read_array("quad group")?);
            quads.push(QuadGroup::disassemble(raw));
        }

        let hash = reader.read_array("hash")?;

        debug!(
            "parsed patch revision {:#010x}: {} match entries, {} quads",
            header.revision,
            matches.len(),
            quads.len()
        );

        Ok(Patch {
            header,
            matches,
            quads,
            hash,
            exponent: DEFAULT_EXPONENT,
        })
    }

    /// Reads the whole source and parses it with the default layout
    pub fn load<R: Read>(mut source: R) -> Result<Patch> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        Self::parse(&bytes)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Patch> {
        let file = File::open(path.as_ref())?;
        Self::load(file)
    }

    /// The layout this patch is written with
    pub fn layout(&self) -> PatchLayout {
        PatchLayout {
            match_count: self.matches.len(),
            quad_count: Some(self.quads.len()),
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.matches.len() * MATCH_ENTRY_SIZE + self.quads.len() * RAW_QUAD_SIZE + HASH_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.header.write(&mut out);
        for entry in &self.matches {
            out.write_u32_le(entry.raw());
        }
        for quad in &self.quads {
            out.write_bytes(&quad.assemble().to_le_bytes());
        }
        out.write_bytes(&self.hash);
        out
    }

    pub fn save<W: Write>(&self, mut sink: W) -> Result<()> {
        sink.write_all(&self.to_bytes())?;
        sink.flush()?;
        Ok(())
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.save(BufWriter::new(file))
    }

    /// Match entries with at least one slot enabled, with their table index
    pub fn active_matches(&self) -> impl Iterator<Item = (usize, &MatchEntry)> {
        self.matches
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_active())
    }
}
