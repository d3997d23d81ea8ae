//! Instruction class views
//!
//! Every view wraps the complete 64-bit micro-op word. Fields without a known
//! meaning are exposed as `reserved_*` spans so that no bit is ever dropped.
//! The layout of each view, low bit first:
//!
//! ```plain
//!  Register / Special / Branch          Short-register
//!   0-15  imm16                           0-9   imm10
//!  16     imm_signed                     10-15  reserved
//!  17-18  reserved                       16-63  as Special
//!  19     mode3
//!  20     reserved                      Load/Store
//!  21-25  reg0                            0-9   displacement
//!  26-30  reg1                           10-13  segment
//!  31-35  reg2                           14-16  reserved
//!  36     rmod                           17-18  mode
//!  37-40  cc        (Register only)      19     word_scaled
//!  41     update_flags (Register only)   20     reserved
//!  42-43  size                           21-35  reg0, reg1, reg2
//!  44     size_msb                       36     rmod
//!  45-46  reserved                       37     indexed
//!  47-54  op_type                        38-41  reserved
//!  55-58  ext       (Register only)      42-43  size
//!  59-61  class                          44     wide
//!  62-63  reserved                       45     load
//!                                        46-54  reserved
//!                                        55-58  op_type
//!                                        59-61  class
//!                                        62-63  reserved
//! ```
//!
//! Bits 37-41 and 55-58 are reserved in the Special, Short-register and Branch views.

use crate::instruction::MicroOp;
use bitfield::bitfield;
use core::fmt;

/// A class-specific interpretation of a micro-op word
pub trait OpView: Copy {
    /// Reinterprets the micro-op as this view
    fn from_micro_op(op: MicroOp) -> Self;

    /// Packs the view back into a micro-op
    fn micro_op(&self) -> MicroOp;
}

macro_rules! op_view {
    ($name:ident) => {
        impl OpView for $name {
            fn from_micro_op(op: MicroOp) -> Self {
                $name(op.assemble())
            }

            fn micro_op(&self) -> MicroOp {
                MicroOp::disassemble(self.0)
            }
        }

        impl From<MicroOp> for $name {
            fn from(op: MicroOp) -> Self {
                <$name as OpView>::from_micro_op(op)
            }
        }

        impl From<$name> for MicroOp {
            fn from(view: $name) -> Self {
                view.micro_op()
            }
        }

        impl $name {
            /// A view with every bit cleared
            pub const ZERO: $name = $name(0);
        }
    };
}

/// Operand size for views with a size-MSB bit: `8 << size`, doubled when the MSB is set
fn scaled_operand_size(size: u8, msb: bool) -> u32 {
    let size = 8u32 << size;
    if msb {
        size << 1
    } else {
        size
    }
}

bitfield! {
    /// Register-op
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegisterOp(u64);
    impl Debug;

    pub u16, imm16, set_imm16: 15, 0;
    /// Immediate is signed
    pub imm_signed, set_imm_signed: 16;
    pub u8, reserved_17_18, set_reserved_17_18: 18, 17;
    /// Third operand is the immediate
    pub mode3, set_mode3: 19;
    pub u8, reserved_20, set_reserved_20: 20, 20;
    pub u8, reg0, set_reg0: 25, 21;
    pub u8, reg1, set_reg1: 30, 26;
    pub u8, reg2, set_reg2: 35, 31;
    pub rmod, set_rmod: 36;
    /// Condition code
    pub u8, cc, set_cc: 40, 37;
    /// Update the status flags
    pub update_flags, set_update_flags: 41;
    pub u8, size, set_size: 43, 42;
    pub size_msb, set_size_msb: 44;
    pub u8, reserved_45_46, set_reserved_45_46: 46, 45;
    pub u8, op_type, set_op_type: 54, 47;
    pub u8, ext, set_ext: 58, 55;
    pub u8, class, set_class: 61, 59;
    pub u8, reserved_62_63, set_reserved_62_63: 63, 62;
}
op_view!(RegisterOp);

impl RegisterOp {
    /// Operand size decoded from `size` and `size_msb`
    pub fn operand_size(&self) -> u32 {
        scaled_operand_size(self.size(), self.size_msb())
    }
}

impl fmt::Display for RegisterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reg type={:#04x} ext={:#x} r{},r{},r{} rmod={} mode3={} imm={:#06x}{} cc={:#x} ss={} sz={}",
            self.op_type(),
            self.ext(),
            self.reg0(),
            self.reg1(),
            self.reg2(),
            self.rmod() as u8,
            self.mode3() as u8,
            self.imm16(),
            if self.imm_signed() { "s" } else { "" },
            self.cc(),
            self.update_flags() as u8,
            self.operand_size(),
        )
    }
}

bitfield! {
    /// Special-op
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SpecialOp(u64);
    impl Debug;

    pub u16, imm16, set_imm16: 15, 0;
    pub imm_signed, set_imm_signed: 16;
    pub u8, reserved_17_18, set_reserved_17_18: 18, 17;
    pub mode3, set_mode3: 19;
    pub u8, reserved_20, set_reserved_20: 20, 20;
    pub u8, reg0, set_reg0: 25, 21;
    pub u8, reg1, set_reg1: 30, 26;
    pub u8, reg2, set_reg2: 35, 31;
    pub rmod, set_rmod: 36;
    pub u8, reserved_37_41, set_reserved_37_41: 41, 37;
    pub u8, size, set_size: 43, 42;
    pub size_msb, set_size_msb: 44;
    pub u8, reserved_45_46, set_reserved_45_46: 46, 45;
    pub u8, op_type, set_op_type: 54, 47;
    pub u8, reserved_55_58, set_reserved_55_58: 58, 55;
    pub u8, class, set_class: 61, 59;
    pub u8, reserved_62_63, set_reserved_62_63: 63, 62;
}
op_view!(SpecialOp);

impl SpecialOp {
    pub fn operand_size(&self) -> u32 {
        scaled_operand_size(self.size(), self.size_msb())
    }
}

impl fmt::Display for SpecialOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "special type={:#04x} r{},r{},r{} rmod={} mode3={} imm={:#06x}{} sz={}",
            self.op_type(),
            self.reg0(),
            self.reg1(),
            self.reg2(),
            self.rmod() as u8,
            self.mode3() as u8,
            self.imm16(),
            if self.imm_signed() { "s" } else { "" },
            self.operand_size(),
        )
    }
}

bitfield! {
    /// Register-op with a 10-bit immediate
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShortRegisterOp(u64);
    impl Debug;

    pub u16, imm10, set_imm10: 9, 0;
    pub u8, reserved_10_15, set_reserved_10_15: 15, 10;
    pub imm_signed, set_imm_signed: 16;
    pub u8, reserved_17_18, set_reserved_17_18: 18, 17;
    pub mode3, set_mode3: 19;
    pub u8, reserved_20, set_reserved_20: 20, 20;
    pub u8, reg0, set_reg0: 25, 21;
    pub u8, reg1, set_reg1: 30, 26;
    pub u8, reg2, set_reg2: 35, 31;
    pub rmod, set_rmod: 36;
    pub u8, reserved_37_41, set_reserved_37_41: 41, 37;
    pub u8, size, set_size: 43, 42;
    pub size_msb, set_size_msb: 44;
    pub u8, reserved_45_46, set_reserved_45_46: 46, 45;
    pub u8, op_type, set_op_type: 54, 47;
    pub u8, reserved_55_58, set_reserved_55_58: 58, 55;
    pub u8, class, set_class: 61, 59;
    pub u8, reserved_62_63, set_reserved_62_63: 63, 62;
}
op_view!(ShortRegisterOp);

impl ShortRegisterOp {
    pub fn operand_size(&self) -> u32 {
        scaled_operand_size(self.size(), self.size_msb())
    }
}

impl fmt::Display for ShortRegisterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sreg type={:#04x} r{},r{},r{} rmod={} mode3={} imm={:#05x}{} sz={}",
            self.op_type(),
            self.reg0(),
            self.reg1(),
            self.reg2(),
            self.rmod() as u8,
            self.mode3() as u8,
            self.imm10(),
            if self.imm_signed() { "s" } else { "" },
            self.operand_size(),
        )
    }
}

bitfield! {
    /// Branch-op
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BranchOp(u64);
    impl Debug;

    pub u16, imm16, set_imm16: 15, 0;
    pub imm_signed, set_imm_signed: 16;
    pub u8, reserved_17_18, set_reserved_17_18: 18, 17;
    pub mode3, set_mode3: 19;
    pub u8, reserved_20, set_reserved_20: 20, 20;
    pub u8, reg0, set_reg0: 25, 21;
    pub u8, reg1, set_reg1: 30, 26;
    pub u8, reg2, set_reg2: 35, 31;
    pub rmod, set_rmod: 36;
    pub u8, reserved_37_41, set_reserved_37_41: 41, 37;
    pub u8, size, set_size: 43, 42;
    pub size_msb, set_size_msb: 44;
    pub u8, reserved_45_46, set_reserved_45_46: 46, 45;
    pub u8, op_type, set_op_type: 54, 47;
    pub u8, reserved_55_58, set_reserved_55_58: 58, 55;
    pub u8, class, set_class: 61, 59;
    pub u8, reserved_62_63, set_reserved_62_63: 63, 62;
}
op_view!(BranchOp);

impl BranchOp {
    pub fn operand_size(&self) -> u32 {
        scaled_operand_size(self.size(), self.size_msb())
    }
}

impl fmt::Display for BranchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "br type={:#04x} r{},r{},r{} rmod={} mode3={} imm={:#06x}{} sz={}",
            self.op_type(),
            self.reg0(),
            self.reg1(),
            self.reg2(),
            self.rmod() as u8,
            self.mode3() as u8,
            self.imm16(),
            if self.imm_signed() { "s" } else { "" },
            self.operand_size(),
        )
    }
}

bitfield! {
    /// Load/Store-op
    ///
    /// With `rmod` set the memory operand is `[reg1 + imm]`, or
    /// `[reg1 + reg2 + imm]` when `indexed` is set as well.
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoadStoreOp(u64);
    impl Debug;

    pub u16, displacement, set_displacement: 9, 0;
    pub u8, segment, set_segment: 13, 10;
    pub u8, reserved_14_16, set_reserved_14_16: 16, 14;
    pub u8, mode, set_mode: 18, 17;
    /// Third operand is scaled by the word size instead of bytes
    pub word_scaled, set_word_scaled: 19;
    pub u8, reserved_20, set_reserved_20: 20, 20;
    pub u8, reg0, set_reg0: 25, 21;
    pub u8, reg1, set_reg1: 30, 26;
    pub u8, reg2, set_reg2: 35, 31;
    pub rmod, set_rmod: 36;
    pub indexed, set_indexed: 37;
    pub u8, reserved_38_41, set_reserved_38_41: 41, 38;
    pub u8, size, set_size: 43, 42;
    /// Destination is a qword, otherwise a dword
    pub wide, set_wide: 44;
    /// Load when set, store when clear
    pub load, set_load: 45;
    pub u8, reserved_46_51, set_reserved_46_51: 51, 46;
    pub u8, reserved_52_54, set_reserved_52_54: 54, 52;
    pub u8, op_type, set_op_type: 58, 55;
    pub u8, class, set_class: 61, 59;
    pub u8, reserved_62_63, set_reserved_62_63: 63, 62;
}
op_view!(LoadStoreOp);

impl LoadStoreOp {
    /// Memory operand size, `8 << size`
    pub fn operand_size(&self) -> u32 {
        8u32 << self.size()
    }

    pub fn is_store(&self) -> bool {
        !self.load()
    }
}

impl fmt::Display for LoadStoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} type={:#x} r{},r{},r{} seg={} mode={} rmod={} idx={} disp={:#05x} sz={} {}",
            if self.load() { "ld" } else { "st" },
            self.op_type(),
            self.reg0(),
            self.reg1(),
            self.reg2(),
            self.segment(),
            self.mode(),
            self.rmod() as u8,
            self.indexed() as u8,
            self.displacement(),
            self.operand_size(),
            if self.wide() { "q" } else { "d" },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instruction::{OpClass, CLASS_SHIFT};
    use proptest::prelude::*;

    // Each rebuild copies every named and reserved field into a cleared view.
    // If the spans left a bit uncovered or overlapped, the result would differ
    // from the source word.

    fn rebuild_register(op: RegisterOp) -> RegisterOp {
        let mut out = RegisterOp::ZERO;
        out.set_imm16(op.imm16());
        out.set_imm_signed(op.imm_signed());
        out.set_reserved_17_18(op.reserved_17_18());
        out.set_mode3(op.mode3());
        out.set_reserved_20(op.reserved_20());
        out.set_reg0(op.reg0());
        out.set_reg1(op.reg1());
        out.set_reg2(op.reg2());
        out.set_rmod(op.rmod());
        out.set_cc(op.cc());
        out.set_update_flags(op.update_flags());
        out.set_size(op.size());
        out.set_size_msb(op.size_msb());
        out.set_reserved_45_46(op.reserved_45_46());
        out.set_op_type(op.op_type());
        out.set_ext(op.ext());
        out.set_class(op.class());
        out.set_reserved_62_63(op.reserved_62_63());
        out
    }

    fn rebuild_special(op: SpecialOp) -> SpecialOp {
        let mut out = SpecialOp::ZERO;
        out.set_imm16(op.imm16());
        out.set_imm_signed(op.imm_signed());
        out.set_reserved_17_18(op.reserved_17_18());
        out.set_mode3(op.mode3());
        out.set_reserved_20(op.reserved_20());
        out.set_reg0(op.reg0());
        out.set_reg1(op.reg1());
        out.set_reg2(op.reg2());
        out.set_rmod(op.rmod());
        out.set_reserved_37_41(op.reserved_37_41());
        out.set_size(op.size());
        out.set_size_msb(op.size_msb());
        out.set_reserved_45_46(op.reserved_45_46());
        out.set_op_type(op.op_type());
        out.set_reserved_55_58(op.reserved_55_58());
        out.set_class(op.class());
        out.set_reserved_62_63(op.reserved_62_63());
        out
    }

    fn rebuild_short_register(op: ShortRegisterOp) -> ShortRegisterOp {
        let mut out = ShortRegisterOp::ZERO;
        out.set_imm10(op.imm10());
        out.set_reserved_10_15(op.reserved_10_15());
        out.set_imm_signed(op.imm_signed());
        out.set_reserved_17_18(op.reserved_17_18());
        out.set_mode3(op.mode3());
        out.set_reserved_20(op.reserved_20());
        out.set_reg0(op.reg0());
        out.set_reg1(op.reg1());
        out.set_reg2(op.reg2());
        out.set_rmod(op.rmod());
        out.set_reserved_37_41(op.reserved_37_41());
        out.set_size(op.size());
        out.set_size_msb(op.size_msb());
        out.set_reserved_45_46(op.reserved_45_46());
        out.set_op_type(op.op_type());
        out.set_reserved_55_58(op.reserved_55_58());
        out.set_class(op.class());
        out.set_reserved_62_63(op.reserved_62_63());
        out
    }

    fn rebuild_branch(op: BranchOp) -> BranchOp {
        let mut out = BranchOp::ZERO;
        out.set_imm16(op.imm16());
        out.set_imm_signed(op.imm_signed());
        out.set_reserved_17_18(op.reserved_17_18());
        out.set_mode3(op.mode3());
        out.set_reserved_20(op.reserved_20());
        out.set_reg0(op.reg0());
        out.set_reg1(op.reg1());
        out.set_reg2(op.reg2());
        out.set_rmod(op.rmod());
        out.set_reserved_37_41(op.reserved_37_41());
        out.set_size(op.size());
        out.set_size_msb(op.size_msb());
        out.set_reserved_45_46(op.reserved_45_46());
        out.set_op_type(op.op_type());
        out.set_reserved_55_58(op.reserved_55_58());
        out.set_class(op.class());
        out.set_reserved_62_63(op.reserved_62_63());
        out
    }

    fn rebuild_load_store(op: LoadStoreOp) -> LoadStoreOp {
        let mut out = LoadStoreOp::ZERO;
        out.set_displacement(op.displacement());
        out.set_segment(op.segment());
        out.set_reserved_14_16(op.reserved_14_16());
        out.set_mode(op.mode());
        out.set_word_scaled(op.word_scaled());
        out.set_reserved_20(op.reserved_20());
        out.set_reg0(op.reg0());
        out.set_reg1(op.reg1());
        out.set_reg2(op.reg2());
        out.set_rmod(op.rmod());
        out.set_indexed(op.indexed());
        out.set_reserved_38_41(op.reserved_38_41());
        out.set_size(op.size());
        out.set_wide(op.wide());
        out.set_load(op.load());
        out.set_reserved_46_51(op.reserved_46_51());
        out.set_reserved_52_54(op.reserved_52_54());
        out.set_op_type(op.op_type());
        out.set_class(op.class());
        out.set_reserved_62_63(op.reserved_62_63());
        out
    }

    #[test]
    fn register_fields() {
        let mut op = RegisterOp::ZERO;
        op.set_class(OpClass::Register.bits());
        op.set_op_type(0xa5);
        op.set_reg0(1);
        op.set_reg1(2);
        op.set_reg2(31);
        op.set_imm16(0x1337);
        op.set_cc(0xf);
        op.set_update_flags(true);

        let raw = op.micro_op().assemble();
        assert_eq!(raw & 0xffff, 0x1337);
        assert_eq!((raw >> 21) & 0x1f, 1);
        assert_eq!((raw >> 26) & 0x1f, 2);
        assert_eq!((raw >> 31) & 0x1f, 31);
        assert_eq!((raw >> 37) & 0xf, 0xf);
        assert_eq!((raw >> 41) & 1, 1);
        assert_eq!((raw >> 47) & 0xff, 0xa5);
        assert_eq!(raw >> CLASS_SHIFT, 0);
    }

    #[test]
    fn load_store_direction_and_width() {
        let mut op = LoadStoreOp::ZERO;
        op.set_class(OpClass::LoadStore.bits());
        op.set_load(true);
        op.set_wide(true);
        op.set_size(2);
        op.set_segment(0x9);
        op.set_displacement(0x3ff);

        let raw = op.micro_op().assemble();
        assert_eq!(raw, (4u64 << 59) | (1 << 45) | (1 << 44) | (2 << 42) | (0x9 << 10) | 0x3ff);
        assert!(!op.is_store());
        assert_eq!(op.operand_size(), 32);
        assert_eq!(op.micro_op().decode(), crate::DecodedOp::LoadStore(op));
    }

    #[test]
    fn operand_size_doubles_with_msb() {
        let mut op = RegisterOp::ZERO;
        for size in 0..4u8 {
            op.set_size(size);
            op.set_size_msb(false);
            assert_eq!(op.operand_size(), 8 << size);
            op.set_size_msb(true);
            assert_eq!(op.operand_size(), 16 << size);
        }
    }

    #[test]
    fn short_register_immediate_is_ten_bits() {
        let op: ShortRegisterOp = MicroOp::disassemble(0xffff).view();
        assert_eq!(op.imm10(), 0x3ff);
        assert_eq!(op.reserved_10_15(), 0x3f);
        assert_eq!(rebuild_short_register(op).micro_op().assemble(), 0xffff);
    }

    proptest! {
        #[test]
        fn every_view_covers_all_bits(raw in any::<u64>()) {
            let op = MicroOp::disassemble(raw);
            prop_assert_eq!(rebuild_register(op.view()).micro_op().assemble(), raw);
            prop_assert_eq!(rebuild_special(op.view()).micro_op().assemble(), raw);
            prop_assert_eq!(rebuild_short_register(op.view()).micro_op().assemble(), raw);
            prop_assert_eq!(rebuild_branch(op.view()).micro_op().assemble(), raw);
            prop_assert_eq!(rebuild_load_store(op.view()).micro_op().assemble(), raw);
        }

        #[test]
        fn class_is_stable_across_views(raw in any::<u64>()) {
            let op = MicroOp::disassemble(raw);
            let class = op.class_bits();
            prop_assert_eq!(op.view::<RegisterOp>().class(), class);
            prop_assert_eq!(op.view::<SpecialOp>().class(), class);
            prop_assert_eq!(op.view::<ShortRegisterOp>().class(), class);
            prop_assert_eq!(op.view::<BranchOp>().class(), class);
            prop_assert_eq!(op.view::<LoadStoreOp>().class(), class);
        }
    }
}
