use bitfield::bitfield;
use std::fmt;

/// On-disk size of one [`MatchEntry`]
pub const MATCH_ENTRY_SIZE: usize = 4;

bitfield! {
    /// One row of the applicability table.
    /// ```plain
    ///  31  28 27  26          14 13  12           0 Index
    /// -+-----+---+--------------+---+-------------|
    ///  | rsvd| e2|      m2      | e1|     m1      |
    /// -+-----+---+--------------+---+-------------|
    ///     4    1        13        1       13        Width
    /// ```
    /// The processor decides what the values mean; they are carried as-is.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MatchEntry(u32);
    impl Debug;

    pub u16, m1, set_m1: 12, 0;
    pub m1_enabled, set_m1_enabled: 13;
    pub u16, m2, set_m2: 26, 14;
    pub m2_enabled, set_m2_enabled: 27;
    pub u8, reserved_28_31, set_reserved_28_31: 31, 28;
}

impl MatchEntry {
    pub const fn from_raw(raw: u32) -> Self {
        MatchEntry(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Whether either slot is switched on
    pub fn is_active(&self) -> bool {
        self.m1_enabled() || self.m2_enabled()
    }
}

impl fmt::Display for MatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn slot(f: &mut fmt::Formatter<'_>, value: u16, enabled: bool) -> fmt::Result {
            if enabled {
                write!(f, "{:#06x}", value)
            } else {
                write!(f, "   -  ")
            }
        }
        slot(f, self.m1(), self.m1_enabled())?;
        write!(f, " ")?;
        slot(f, self.m2(), self.m2_enabled())
    }
}

impl From<u32> for MatchEntry {
    fn from(raw: u32) -> Self {
        MatchEntry(raw)
    }
}

impl From<MatchEntry> for u32 {
    fn from(entry: MatchEntry) -> Self {
        entry.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fields() {
        let mut entry = MatchEntry::default();
        entry.set_m1(0x0abc);
        entry.set_m1_enabled(true);
        entry.set_m2(0x1fff);
        assert_eq!(entry.raw(), 0x07ff_c000 | 0x2000 | 0x0abc);
        assert!(entry.is_active());
        assert!(!entry.m2_enabled());
        assert_eq!(format!("{}", entry), "0x0abc    -  ");
    }

    proptest! {
        #[test]
        fn every_bit_is_kept(raw in any::<u32>()) {
            let entry = MatchEntry::from_raw(raw);
            let mut rebuilt = MatchEntry::default();
            rebuilt.set_m1(entry.m1());
            rebuilt.set_m1_enabled(entry.m1_enabled());
            rebuilt.set_m2(entry.m2());
            rebuilt.set_m2_enabled(entry.m2_enabled());
            rebuilt.set_reserved_28_31(entry.reserved_28_31());
            prop_assert_eq!(rebuilt.raw(), raw);
        }
    }
}
