use core::fmt;
use core::ops::Add;

pub trait Address:
    Clone + Copy + PartialEq + Eq + PartialOrd + Ord + fmt::Debug + fmt::Display
{
    /// The raw address, for handing to the driver
    fn address(&self) -> u64;
}

macro_rules! address_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(u64);

        impl Address for $name {
            fn address(&self) -> u64 {
                self.0
            }
        }

        impl $name {
            pub const ZERO: $name = $name(0);

            pub const fn from_const(value: u64) -> Self {
                $name(value)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{:#x}"), self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            fn add(self, offset: u64) -> Self {
                $name(self.0 + offset)
            }
        }
    };
}

address_type!(
    /// Physical memory address of a driver allocation
    PhysicalAddress,
    "P"
);

address_type!(
    /// Kernel virtual address mapping a driver allocation, the operand of the patch loader MSR
    VirtualAddress,
    "V"
);

/// Index of a logical processor core.
///
/// Affinity masks are built as `1 << index`, so the index is bounded by the
/// width of the mask.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreIndex(u32);
impl CoreIndex {
    /// Largest index representable in a 64-bit affinity mask
    pub const MAX: CoreIndex = CoreIndex(63);

    pub const fn new(index: u32) -> Option<Self> {
        if index > Self::MAX.0 {
            None
        } else {
            Some(CoreIndex(index))
        }
    }

    pub const fn index(&self) -> u32 {
        self.0
    }

    /// The single-core affinity mask selecting this core
    pub const fn affinity_mask(&self) -> u64 {
        1u64 << self.0
    }
}
impl TryFrom<i64> for CoreIndex {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .ok()
            .and_then(CoreIndex::new)
            .ok_or(value)
    }
}
impl From<CoreIndex> for usize {
    fn from(value: CoreIndex) -> Self {
        value.0 as usize
    }
}
impl fmt::Display for CoreIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Debug for CoreIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core#{}", self.0)
    }
}
