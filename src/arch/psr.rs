// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! AArch32 program status register fields.

pub const CPSR_MODE_MASK: u32 = 0x1f;
pub const CPSR_THUMB: u32 = 1 << 5;
pub const CPSR_FIQ_MASKED: u32 = 1 << 6;
pub const CPSR_IRQ_MASKED: u32 = 1 << 7;

/// CPSR value for guest kernel entry: SVC mode, asynchronous exceptions masked.
pub const CPSR_BOOT: u32 = ProcessorMode::Supervisor as u32 | CPSR_IRQ_MASKED | CPSR_FIQ_MASKED;

#[inline(always)]
pub fn cpsr_is_thumb(cpsr: u32) -> bool {
    (cpsr & CPSR_THUMB) != 0
}

/// Processor mode encoded in CPSR\[4:0\].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProcessorMode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Supervisor = 0x13,
    Abort = 0x17,
    Hypervisor = 0x1a,
    Undefined = 0x1b,
    System = 0x1f,
}

impl From<u32> for ProcessorMode {
    /// The mode field comes from live guest state; a reserved encoding
    /// (e.g. after a botched exception return) is treated as User so the
    /// operand access stays unbanked instead of taking the host down.
    fn from(cpsr: u32) -> Self {
        match cpsr & CPSR_MODE_MASK {
            0x10 => Self::User,
            0x11 => Self::Fiq,
            0x12 => Self::Irq,
            0x13 => Self::Supervisor,
            0x17 => Self::Abort,
            0x1a => Self::Hypervisor,
            0x1b => Self::Undefined,
            0x1f => Self::System,
            mode => {
                warn!("reserved processor mode {:#x}, treating as user", mode);
                Self::User
            }
        }
    }
}

impl ProcessorMode {
    /// User and System share the plain register file; every other mode banks
    /// at least SP/LR.
    pub fn has_banked_regs(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}
