// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Load/store decoding for aborts whose syndrome is invalid.
//!
//! The decoder works on the canonical instruction form: 16-bit Thumb
//! instructions masked to their low halfword, 32-bit Thumb-2 instructions
//! with the first halfword in the high bits, A32 instructions as fetched.

use crate::arch::hsr::{self, HSR_INST32};
use crate::arch::psr::ProcessorMode;
use crate::error::{ErrorKind, Result};
use crate::fault::FaultWidth;
use crate::host::BankedReg;

/// Decoded operand of a trapped load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdStOp {
    pub rt: usize,
    pub width: FaultWidth,
    /// Two for LDRD/STRD, one otherwise.
    pub stages: u32,
}

impl LdStOp {
    fn single(rt: usize, width: FaultWidth) -> LdStOp {
        LdStOp { rt, width, stages: 1 }
    }

    fn double(rt: usize) -> LdStOp {
        LdStOp {
            rt,
            width: FaultWidth::DoubleWord,
            stages: 2,
        }
    }
}

/// The top five bits of the first halfword classify a Thumb-2 instruction.
pub fn thumb_is_32bit(inst: u32) -> bool {
    matches!((inst >> 11) & 0x1f, 0b11101 | 0b11110 | 0b11111)
}

/// Fold a raw 4-byte fetch from the guest into canonical form and patch the
/// instruction-length flag into `fsr`. Thumb-2 halfwords are swapped so the
/// first halfword lands in the high bits; for ARM state every instruction is
/// 32-bit and the flag is synthesized.
pub fn canonical_inst(raw: u32, thumb: bool, fsr: u32) -> (u32, u32) {
    if thumb {
        let fsr = if thumb_is_32bit(raw) { fsr | HSR_INST32 } else { fsr };
        let inst = if hsr::is_inst32(fsr) {
            ((raw & 0xffff) << 16) | ((raw >> 16) & 0xffff)
        } else {
            raw & 0xffff
        };
        (inst, fsr)
    } else {
        (raw, fsr | HSR_INST32)
    }
}

/// Where a T16 encoding keeps Rt.
#[derive(Clone, Copy)]
enum T16Rt {
    Low,
    Bits8,
}

const T16_LDST: &[(u32, u32, FaultWidth, T16Rt)] = &[
    // register-offset forms carry the operation in bits 9..11
    (0xfe00, 0x5000, FaultWidth::Word, T16Rt::Low),     // STR (reg)
    (0xfe00, 0x5200, FaultWidth::HalfWord, T16Rt::Low), // STRH (reg)
    (0xfe00, 0x5400, FaultWidth::Byte, T16Rt::Low),     // STRB (reg)
    (0xfe00, 0x5600, FaultWidth::Byte, T16Rt::Low),     // LDRSB (reg)
    (0xfe00, 0x5800, FaultWidth::Word, T16Rt::Low),     // LDR (reg)
    (0xfe00, 0x5a00, FaultWidth::HalfWord, T16Rt::Low), // LDRH (reg)
    (0xfe00, 0x5c00, FaultWidth::Byte, T16Rt::Low),     // LDRB (reg)
    (0xfe00, 0x5e00, FaultWidth::HalfWord, T16Rt::Low), // LDRSH (reg)
    (0xf000, 0x6000, FaultWidth::Word, T16Rt::Low),     // STR/LDR (imm5)
    (0xf000, 0x7000, FaultWidth::Byte, T16Rt::Low),     // STRB/LDRB (imm5)
    (0xf000, 0x8000, FaultWidth::HalfWord, T16Rt::Low), // STRH/LDRH (imm5)
    (0xf000, 0x9000, FaultWidth::Word, T16Rt::Bits8),   // STR/LDR (SP + imm8)
];

fn decode_t16(inst: u32) -> Result<LdStOp> {
    for &(mask, value, width, rt_at) in T16_LDST {
        if (inst & mask) == value {
            let rt = match rt_at {
                T16Rt::Low => (inst & 0x7) as usize,
                T16Rt::Bits8 => ((inst >> 8) & 0x7) as usize,
            };
            return Ok(LdStOp::single(rt, width));
        }
    }
    error!("Unable to decode THUMB16 inst {:#06x}", inst);
    ErrorKind::FaultDecode.into()
}

fn decode_t32(inst: u32) -> Result<LdStOp> {
    if (inst & 0xfe40_0000) == 0xe840_0000 {
        // LDRD/STRD transfers two words through one abort
        return Ok(LdStOp::double(((inst >> 12) & 0xf) as usize));
    }
    if (inst & 0xfe00_0000) == 0xf800_0000 {
        let rt = ((inst >> 12) & 0xf) as usize;
        let width = match (inst >> 21) & 0x3 {
            0 => FaultWidth::Byte,
            1 => FaultWidth::HalfWord,
            2 => FaultWidth::Word,
            _ => {
                error!("Unable to decode THUMB32 load/store size, inst {:#010x}", inst);
                return ErrorKind::FaultDecode.into();
            }
        };
        return Ok(LdStOp::single(rt, width));
    }
    error!("Unable to decode THUMB32 inst {:#010x}", inst);
    ErrorKind::FaultDecode.into()
}

fn decode_a32(inst: u32) -> Result<LdStOp> {
    if (inst & 0x0c00_0000) == 0x0400_0000 {
        // single data transfer, B selects byte over word
        let rt = ((inst >> 12) & 0xf) as usize;
        let width = if (inst & (1 << 22)) != 0 {
            FaultWidth::Byte
        } else {
            FaultWidth::Word
        };
        return Ok(LdStOp::single(rt, width));
    }
    if (inst & 0x0e00_0090) == 0x0000_0090 {
        // extra load/store: halfword, signed, and the doubleword pair
        let rt = ((inst >> 12) & 0xf) as usize;
        let load = (inst & (1 << 20)) != 0;
        return match (inst >> 5) & 0x3 {
            1 => Ok(LdStOp::single(rt, FaultWidth::HalfWord)),
            2 if !load => Ok(LdStOp::double(rt)),
            2 => Ok(LdStOp::single(rt, FaultWidth::Byte)),
            3 if !load => Ok(LdStOp::double(rt)),
            3 => Ok(LdStOp::single(rt, FaultWidth::HalfWord)),
            _ => {
                error!("Unable to decode ARM extra load/store, inst {:#010x}", inst);
                ErrorKind::FaultDecode.into()
            }
        };
    }
    error!("Unable to decode ARM inst {:#010x}", inst);
    ErrorKind::FaultDecode.into()
}

/// Recover Rt and access width from a canonical instruction.
pub fn decode_load_store(inst: u32, thumb: bool, inst32: bool) -> Result<LdStOp> {
    if thumb {
        if inst32 {
            decode_t32(inst)
        } else {
            decode_t16(inst)
        }
    } else {
        decode_a32(inst)
    }
}

/// Rt recovery for platforms where the syndrome reports a bogus Rt for Thumb
/// stores (ARM errata 766422). Only the Rt field can be trusted from the
/// instruction here; the width still comes from the syndrome.
pub fn errata766422_rt(inst: u32, inst32: bool) -> Result<usize> {
    if inst32 {
        if (inst & 0xff70_0000) == 0xf840_0000
            || (inst & 0xfff0_0000) == 0xf880_0000
            || (inst & 0xfff0_0000) == 0xf000_0000
            || (inst & 0x0e50_0000) == 0x0640_0000
            || (inst & 0xfff0_0000) == 0xf800_0000
        {
            Ok(((inst >> 12) & 0xf) as usize)
        } else {
            error!("errata766422: unable to decode inst {:#010x}", inst);
            ErrorKind::FaultDecode.into()
        }
    } else if (inst & 0xf800) == 0x6000
        || (inst & 0xf800) == 0x5000
        || (inst & 0xfe00) == 0x5400
        || (inst & 0xf800) == 0x7000
        || (inst & 0xf800) == 0x8000
    {
        Ok((inst & 0x7) as usize)
    } else if (inst & 0xf800) == 0x9000 {
        Ok(((inst >> 8) & 0x7) as usize)
    } else {
        error!("errata766422: unable to decode inst {:#06x}", inst);
        ErrorKind::FaultDecode.into()
    }
}

/// Map Rt to a banked vCPU register when the current mode shadows it.
/// `None` means the plain user context holds the operand.
pub fn banked_reg(rt: usize, pmode: ProcessorMode) -> Option<BankedReg> {
    if !pmode.has_banked_regs() {
        return None;
    }
    if pmode == ProcessorMode::Hypervisor {
        panic!("banked_reg: fault taken in hypervisor mode");
    }
    if pmode == ProcessorMode::Fiq {
        return match rt {
            8 => Some(BankedReg::R8Fiq),
            9 => Some(BankedReg::R9Fiq),
            10 => Some(BankedReg::R10Fiq),
            11 => Some(BankedReg::R11Fiq),
            12 => Some(BankedReg::R12Fiq),
            13 => Some(BankedReg::SpFiq),
            14 => Some(BankedReg::LrFiq),
            _ => None,
        };
    }
    match rt {
        13 => Some(match pmode {
            ProcessorMode::Irq => BankedReg::SpIrq,
            ProcessorMode::Supervisor => BankedReg::SpSvc,
            ProcessorMode::Abort => BankedReg::SpAbt,
            ProcessorMode::Undefined => BankedReg::SpUnd,
            _ => unreachable!(),
        }),
        14 => Some(match pmode {
            ProcessorMode::Irq => BankedReg::LrIrq,
            ProcessorMode::Supervisor => BankedReg::LrSvc,
            ProcessorMode::Abort => BankedReg::LrAbt,
            ProcessorMode::Undefined => BankedReg::LrUnd,
            _ => unreachable!(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumb2_classifier() {
        assert!(thumb_is_32bit(0xe840)); // 0b11101...
        assert!(thumb_is_32bit(0xf8c0));
        assert!(thumb_is_32bit(0xf000));
        assert!(!thumb_is_32bit(0x6003));
        assert!(!thumb_is_32bit(0x9801));
    }

    #[test]
    fn canonical_thumb16_masks_low_halfword() {
        // STR r3, [r0] followed by garbage in the second halfword
        let (inst, fsr) = canonical_inst(0xbeef_6003, true, 0);
        assert_eq!(inst, 0x6003);
        assert!(!hsr::is_inst32(fsr));
    }

    #[test]
    fn canonical_thumb32_swaps_halfwords() {
        // LDRD r4, r5, [r0] fetched as two little-endian halfwords
        let (inst, fsr) = canonical_inst(0x4500_e9d0, true, 0);
        assert_eq!(inst, 0xe9d0_4500);
        assert!(hsr::is_inst32(fsr));
    }

    #[test]
    fn canonical_arm_sets_inst32() {
        let (inst, fsr) = canonical_inst(0xe580_3000, false, 0);
        assert_eq!(inst, 0xe580_3000);
        assert!(hsr::is_inst32(fsr));
    }

    #[test]
    fn t16_str_word() {
        // STR r3, [r0]
        let op = decode_load_store(0x6003, true, false).unwrap();
        assert_eq!(op, LdStOp::single(3, FaultWidth::Word));
    }

    #[test]
    fn t16_strb_and_strh() {
        // STRB r1, [r3]; STRH r2, [r0]
        assert_eq!(
            decode_load_store(0x7019, true, false).unwrap(),
            LdStOp::single(1, FaultWidth::Byte)
        );
        assert_eq!(
            decode_load_store(0x8002, true, false).unwrap(),
            LdStOp::single(2, FaultWidth::HalfWord)
        );
    }

    #[test]
    fn t16_sp_relative() {
        // STR r1, [sp, #4]
        let op = decode_load_store(0x9101, true, false).unwrap();
        assert_eq!(op, LdStOp::single(1, FaultWidth::Word));
    }

    #[test]
    fn t32_single_sizes() {
        // STR.W r3, [r0]; STRH.W r3, [r0]; STRB.W r3, [r0]
        assert_eq!(
            decode_load_store(0xf8c0_3000, true, true).unwrap(),
            LdStOp::single(3, FaultWidth::Word)
        );
        assert_eq!(
            decode_load_store(0xf8a0_3000, true, true).unwrap(),
            LdStOp::single(3, FaultWidth::HalfWord)
        );
        assert_eq!(
            decode_load_store(0xf880_3000, true, true).unwrap(),
            LdStOp::single(3, FaultWidth::Byte)
        );
    }

    #[test]
    fn t32_ldrd_two_stage() {
        // LDRD r4, r5, [r0]
        let op = decode_load_store(0xe9d0_4500, true, true).unwrap();
        assert_eq!(op.rt, 4);
        assert_eq!(op.stages, 2);
        assert_eq!(op.width, FaultWidth::DoubleWord);
    }

    #[test]
    fn a32_single() {
        // STR r3, [r0]; LDRB r2, [r1]
        assert_eq!(
            decode_load_store(0xe580_3000, false, true).unwrap(),
            LdStOp::single(3, FaultWidth::Word)
        );
        assert_eq!(
            decode_load_store(0xe5d1_2000, false, true).unwrap(),
            LdStOp::single(2, FaultWidth::Byte)
        );
    }

    #[test]
    fn a32_extra_load_store() {
        // STRH r4, [r1]; LDRD r4, [r1]; STRD r4, [r1]
        assert_eq!(
            decode_load_store(0xe1c1_40b0, false, true).unwrap(),
            LdStOp::single(4, FaultWidth::HalfWord)
        );
        assert_eq!(decode_load_store(0xe1c1_40d0, false, true).unwrap(), LdStOp::double(4));
        assert_eq!(decode_load_store(0xe1c1_40f0, false, true).unwrap(), LdStOp::double(4));
    }

    #[test]
    fn unknown_encodings_are_fatal() {
        assert!(decode_load_store(0x4000, true, false).is_err()); // T16 data processing
        assert!(decode_load_store(0xea4f_0000, true, true).is_err()); // MOV.W
        assert!(decode_load_store(0xe080_0000, false, true).is_err()); // ADD
    }

    #[test]
    fn errata_rt_tables() {
        assert_eq!(errata766422_rt(0x6003, false).unwrap(), 3); // STR r3, [r0]
        assert_eq!(errata766422_rt(0x9101, false).unwrap(), 1); // STR r1, [sp, #4]
        assert_eq!(errata766422_rt(0xf8c0_3000, true).unwrap(), 3); // STR.W r3, [r0]
        assert!(errata766422_rt(0x4000, false).is_err());
    }

    #[test]
    fn banked_routing() {
        assert_eq!(banked_reg(3, ProcessorMode::Fiq), None);
        assert_eq!(banked_reg(8, ProcessorMode::Fiq), Some(BankedReg::R8Fiq));
        assert_eq!(banked_reg(13, ProcessorMode::Supervisor), Some(BankedReg::SpSvc));
        assert_eq!(banked_reg(14, ProcessorMode::Irq), Some(BankedReg::LrIrq));
        assert_eq!(banked_reg(13, ProcessorMode::User), None);
        assert_eq!(banked_reg(14, ProcessorMode::System), None);
    }
}
