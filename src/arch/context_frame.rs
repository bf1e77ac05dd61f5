// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use core::fmt;

use crate::arch::psr::{self, CPSR_BOOT};

/// Guest register file for AArch32 as read from and written back to the host
/// TCB. Banked copies of SP/LR and the FIQ registers are not part of this
/// frame; they are accessed through the vCPU register interface.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Aarch32ContextFrame {
    gpr: [u32; 13],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

impl fmt::Display for Aarch32ContextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        for i in 0..13 {
            write!(f, "r{:02}: {:08x}   ", i, self.gpr[i])?;
            if (i + 1) % 4 == 0 {
                writeln!(f)?;
            }
        }
        writeln!(f, "sp:  {:08x}", self.sp)?;
        write!(f, "lr:  {:08x}   pc:  {:08x}", self.lr, self.pc)?;
        writeln!(f, "   cpsr: {:08x}", self.cpsr)?;
        Ok(())
    }
}

impl fmt::Debug for Aarch32ContextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "pc {:x} lr {:x} cpsr {:x}", self.pc, self.lr, self.cpsr)
    }
}

impl Aarch32ContextFrame {
    pub fn default() -> Aarch32ContextFrame {
        Aarch32ContextFrame {
            gpr: [0; 13],
            sp: 0,
            lr: 0,
            pc: 0,
            cpsr: CPSR_BOOT,
        }
    }

    /// General purpose register by its ARM encoding, r0..r15.
    pub fn gpr(&self, index: usize) -> u32 {
        match index {
            0..=12 => self.gpr[index],
            13 => self.sp,
            14 => self.lr,
            15 => self.pc,
            _ => panic!("Invalid register r{}", index),
        }
    }

    pub fn set_gpr(&mut self, index: usize, val: u32) {
        match index {
            0..=12 => self.gpr[index] = val,
            13 => self.sp = val,
            14 => self.lr = val,
            15 => self.pc = val,
            _ => panic!("Invalid register r{}", index),
        }
    }

    pub fn exception_pc(&self) -> usize {
        self.pc as usize
    }

    pub fn set_exception_pc(&mut self, pc: usize) {
        self.pc = pc as u32;
    }

    pub fn is_thumb(&self) -> bool {
        psr::cpsr_is_thumb(self.cpsr)
    }
}
