//! Sequence Word Module
//!
//! This module provides functionality for working with sequence words, which control
//! the flow from one quad group to the next and the dispatch timing between groups.

use bitfield::bitfield;
use core::fmt::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How the target of a sequence word is interpreted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SequenceAction {
    /// Target is relative to the current quad
    Relative,
    /// Target is an absolute quad address
    Absolute,
    /// Action value without known meaning
    Reserved(u8),
}

impl SequenceAction {
    const RELATIVE: u8 = 0;
    const ABSOLUTE: u8 = 2;

    /// Maps the raw 4-bit action field
    pub const fn from_bits(bits: u8) -> SequenceAction {
        match bits {
            Self::RELATIVE => SequenceAction::Relative,
            Self::ABSOLUTE => SequenceAction::Absolute,
            other => SequenceAction::Reserved(other),
        }
    }

    /// The raw 4-bit action field
    pub const fn bits(&self) -> u8 {
        match self {
            SequenceAction::Relative => Self::RELATIVE,
            SequenceAction::Absolute => Self::ABSOLUTE,
            SequenceAction::Reserved(bits) => *bits,
        }
    }
}

/// The decoded flow of a sequence word
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SequenceTarget {
    Relative(u16),
    Absolute(u16),
    /// A target under an action without known meaning
    Reserved { action: u8, target: u16 },
}

bitfield! {
    /// A sequence word is the control word attached to every quad group.
    /// The format is as follows:
    /// ```plain
    ///  31          21  20   19    16 15  13 12          0 Index
    /// -+-------------+----+--------+------+-------------|
    ///  |  reserved   | nd | action | rsvd |   target    |
    /// -+-------------+----+--------+------+-------------|
    ///        11        1      4       3        13         Width
    /// ```
    ///
    /// # Fields
    /// - `target`: quad to continue with, interpreted according to `action`.
    /// - `action`: `0` relative, `2` absolute. Other values are kept but not interpreted.
    /// - `nd` (`nodelay`): dispatch the next quad without the inter-group delay.
    ///
    /// No value is rejected; every bit survives a disassemble/assemble cycle.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SequenceWord(u32);
    impl Debug;

    pub u16, target, set_target: 12, 0;
    pub u8, reserved_13_15, set_reserved_13_15: 15, 13;
    pub u8, action_bits, set_action_bits: 19, 16;
    pub nodelay, set_nodelay: 20;
    pub u16, reserved_21_31, set_reserved_21_31: 31, 21;
}

impl Serialize for SequenceWord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.assemble().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SequenceWord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Ok(SequenceWord::disassemble(value))
    }
}

impl SequenceWord {
    /// An all-zero sequence word: relative, target 0, with delay
    pub const NOP: SequenceWord = SequenceWord(0);

    /// Mask of the 13-bit target field
    pub const TARGET_MASK: u16 = 0x1fff;

    /// Creates a sequence word from its raw value
    pub const fn disassemble(seqw: u32) -> SequenceWord {
        SequenceWord(seqw)
    }

    /// Returns the raw value
    pub const fn assemble(&self) -> u32 {
        self.0
    }

    /// Creates a relative sequence word
    ///
    /// # Arguments
    ///
    /// * `target` - The target, truncated to 13 bits
    pub fn relative(target: u16) -> SequenceWord {
        let mut word = SequenceWord::NOP;
        word.set_target(target & Self::TARGET_MASK);
        word.set_action(SequenceAction::Relative);
        word
    }

    /// Creates an absolute sequence word
    ///
    /// # Arguments
    ///
    /// * `target` - The target, truncated to 13 bits
    pub fn absolute(target: u16) -> SequenceWord {
        let mut word = SequenceWord::NOP;
        word.set_target(target & Self::TARGET_MASK);
        word.set_action(SequenceAction::Absolute);
        word
    }

    /// Sets the no-delay flag and returns self for chaining
    pub fn apply_nodelay(mut self, nodelay: bool) -> Self {
        self.set_nodelay(nodelay);
        self
    }

    /// The addressing mode selected by the action field
    pub fn action(&self) -> SequenceAction {
        SequenceAction::from_bits(self.action_bits())
    }

    pub fn set_action(&mut self, action: SequenceAction) -> &mut Self {
        self.set_action_bits(action.bits());
        self
    }

    /// The target interpreted under the current action
    pub fn flow(&self) -> SequenceTarget {
        let target = self.target();
        match self.action() {
            SequenceAction::Relative => SequenceTarget::Relative(target),
            SequenceAction::Absolute => SequenceTarget::Absolute(target),
            SequenceAction::Reserved(action) => SequenceTarget::Reserved { action, target },
        }
    }
}

impl Display for SequenceWord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.flow() {
            SequenceTarget::Relative(target) => write!(f, "SEQ REL +{:#x}", target)?,
            SequenceTarget::Absolute(target) => write!(f, "SEQ ABS {:#06x}", target)?,
            SequenceTarget::Reserved { action, target } => {
                write!(f, "SEQ ACT{} {:#06x}", action, target)?
            }
        }
        if self.nodelay() {
            write!(f, " NODELAY")?;
        }
        Ok(())
    }
}

impl From<u32> for SequenceWord {
    fn from(seqw: u32) -> Self {
        SequenceWord::disassemble(seqw)
    }
}

impl From<SequenceWord> for u32 {
    fn from(seqw: SequenceWord) -> Self {
        seqw.assemble()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sequencewords() {
        assert_eq!(SequenceWord::relative(1).assemble(), 0x0000_0001);
        assert_eq!(SequenceWord::absolute(0x1fff).assemble(), 0x0002_1fff);
        assert_eq!(
            SequenceWord::absolute(0x20).apply_nodelay(true).assemble(),
            0x0012_0020
        );
        // only 13 bits of target
        assert_eq!(SequenceWord::relative(0xffff).target(), 0x1fff);
    }

    #[test]
    fn test_flow() {
        let word = SequenceWord::disassemble(0x0012_0042);
        assert_eq!(word.action(), SequenceAction::Absolute);
        assert_eq!(word.flow(), SequenceTarget::Absolute(0x42));
        assert!(word.nodelay());

        let word = SequenceWord::disassemble(0x0005_0007);
        assert_eq!(word.action(), SequenceAction::Reserved(5));
        assert_eq!(
            word.flow(),
            SequenceTarget::Reserved {
                action: 5,
                target: 7
            }
        );
    }

    #[test]
    fn test_reserved_bits_survive() {
        let raw = 0xffe0_e000;
        let word = SequenceWord::disassemble(raw);
        assert_eq!(word.target(), 0);
        assert_eq!(word.reserved_13_15(), 0b111);
        assert_eq!(word.reserved_21_31(), 0x7ff);
        assert_eq!(word.assemble(), raw);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", SequenceWord::relative(3)), "SEQ REL +0x3");
        assert_eq!(
            format!("{}", SequenceWord::absolute(0x10).apply_nodelay(true)),
            "SEQ ABS 0x0010 NODELAY"
        );
    }

    proptest! {
        #[test]
        fn test_disasm_asm_seqw(raw in any::<u32>()) {
            let word = SequenceWord::disassemble(raw);
            prop_assert_eq!(word.assemble(), raw);

            let mut rebuilt = SequenceWord::NOP;
            rebuilt.set_target(word.target());
            rebuilt.set_reserved_13_15(word.reserved_13_15());
            rebuilt.set_action(word.action());
            rebuilt.set_nodelay(word.nodelay());
            rebuilt.set_reserved_21_31(word.reserved_21_31());
            prop_assert_eq!(rebuilt.assemble(), raw);
        }
    }
}
