// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! The per-vCPU fault object: captures a stage-2 abort, lazily decodes the
//! operand register, width and direction, replays the access against an
//! emulated device and restarts the guest.
//!
//! Callers only pay for the fields they touch: the register file, operand
//! data, the faulting instruction, the access width and the processor mode
//! are each fetched on first use and recorded in [`FaultContent`].

use bitflags::bitflags;

use crate::arch::decode;
use crate::arch::hsr;
use crate::arch::Aarch32ContextFrame;
use crate::arch::ProcessorMode;
use crate::error::{ErrorKind, Result};
use crate::host::{ReplySlot, VmmHost};

bitflags! {
    /// Which lazily loaded fields of the fault are currently valid.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultContent: u32 {
        const REGS = 1 << 0;
        const DATA = 1 << 1;
        const INST = 1 << 2;
        const WIDTH = 1 << 3;
        const STAGE = 1 << 4;
        const PMODE = 1 << 5;
    }
}

/// Access width of a trapped load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultWidth {
    Byte,
    HalfWord,
    Word,
    /// LDRD/STRD; served as two word-sized stages.
    DoubleWord,
}

impl FaultWidth {
    pub fn bytes(self) -> usize {
        match self {
            FaultWidth::Byte => 1,
            FaultWidth::HalfWord => 2,
            FaultWidth::Word => 4,
            FaultWidth::DoubleWord => 8,
        }
    }
}

/// One fault per vCPU, created at vCPU init and reused across faults.
pub struct Fault {
    vcpu: usize,
    reply: ReplySlot,
    regs: Aarch32ContextFrame,
    /// IPA of the fault as reported by the kernel.
    base_addr: usize,
    /// IPA of the current stage for multi-word accesses.
    addr: usize,
    /// Guest PC of the faulting instruction.
    ip: usize,
    /// Data to be written, or the data to return to the guest.
    data: u32,
    /// IL and ISS fields of the HSR, exception class stripped.
    fsr: u32,
    is_prefetch: bool,
    is_wfi: bool,
    /// Remaining emulation passes; -1 until an invalid syndrome is decoded.
    stage: i32,
    instruction: u32,
    width: FaultWidth,
    pmode: ProcessorMode,
    content: FaultContent,
    errata_thumb_rt: bool,
}

impl Fault {
    /// Reserve the reply slot and build an idle fault for `vcpu`.
    pub fn init<H: VmmHost>(host: &mut H, vcpu: usize, errata_thumb_rt: bool) -> Result<Fault> {
        let reply = host.reply_alloc()?;
        Ok(Fault {
            vcpu,
            reply,
            regs: Aarch32ContextFrame::default(),
            base_addr: 0,
            addr: 0,
            ip: 0,
            data: 0,
            fsr: 0,
            is_prefetch: false,
            is_wfi: false,
            stage: 0,
            instruction: 0,
            width: FaultWidth::Word,
            pmode: ProcessorMode::User,
            content: FaultContent::empty(),
            errata_thumb_rt,
        })
    }

    /// Capture a new stage-2 abort from the kernel message and park the
    /// reply right.
    pub fn new_fault<H: VmmHost>(
        &mut self,
        host: &mut H,
        is_prefetch: bool,
        addr: usize,
        fsr: u32,
        ip: usize,
    ) -> Result<()> {
        trace!("new fault @ {:#x} from PC {:#x}", addr, ip);
        self.is_prefetch = is_prefetch;
        self.is_wfi = false;
        self.ip = ip;
        self.base_addr = addr;
        self.addr = addr;
        self.fsr = fsr;
        self.instruction = 0;
        self.data = 0;
        self.content = if self.is_data() {
            if self.is_read() {
                // a read has no operand data to capture
                FaultContent::DATA
            } else {
                FaultContent::empty()
            }
        } else {
            FaultContent::DATA | FaultContent::WIDTH
        };
        if hsr::is_syndrome_valid(fsr) {
            self.stage = 1;
            self.content |= FaultContent::STAGE;
        } else {
            self.stage = -1;
        }
        host.reply_save(self.reply)
    }

    /// Synthesize a wait-for-interrupt fault with no address. The guest stays
    /// suspended until the distributor restarts it on the next assertion.
    pub fn new_wfi<H: VmmHost>(&mut self, host: &mut H) -> Result<()> {
        self.is_prefetch = false;
        self.is_wfi = true;
        self.ip = 0;
        self.base_addr = 0;
        self.addr = 0;
        self.fsr = 0;
        self.instruction = 0;
        self.data = 0;
        self.stage = 1;
        self.content = FaultContent::DATA | FaultContent::WIDTH | FaultContent::STAGE;
        host.reply_save(self.reply)
    }

    pub fn vcpu(&self) -> usize {
        self.vcpu
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn base_addr(&self) -> usize {
        self.base_addr
    }

    pub fn fsr(&self) -> u32 {
        self.fsr
    }

    pub fn is_prefetch(&self) -> bool {
        self.is_prefetch
    }

    pub fn is_wfi(&self) -> bool {
        self.is_wfi
    }

    pub fn is_data(&self) -> bool {
        !self.is_prefetch && !self.is_wfi
    }

    pub fn is_write(&self) -> bool {
        self.is_data() && hsr::is_write(self.fsr)
    }

    pub fn is_read(&self) -> bool {
        !self.is_write()
    }

    /// True once every emulation stage of the access has completed.
    pub fn handled(&self) -> bool {
        self.stage == 0
    }

    pub fn content(&self) -> FaultContent {
        self.content
    }

    /// Device handlers deposit read results here.
    pub fn set_data(&mut self, data: u32) {
        self.data = data;
        self.content |= FaultContent::DATA;
    }

    /// Guest register file at the time of the fault, fetched on first use.
    pub fn get_ctx<H: VmmHost>(&mut self, host: &mut H) -> Result<&mut Aarch32ContextFrame> {
        if !self.content.contains(FaultContent::REGS) {
            self.regs = host.vcpu_read_ctx(self.vcpu)?;
            self.content |= FaultContent::REGS;
        }
        Ok(&mut self.regs)
    }

    fn pmode<H: VmmHost>(&mut self, host: &mut H) -> Result<ProcessorMode> {
        if !self.content.contains(FaultContent::PMODE) {
            self.pmode = ProcessorMode::from(self.get_ctx(host)?.cpsr);
            self.content |= FaultContent::PMODE;
        }
        Ok(self.pmode)
    }

    /// Fetch the faulting instruction through a stage-2 walk and put it into
    /// canonical form, patching the instruction-length flag into the FSR.
    fn fetch_instruction<H: VmmHost>(&mut self, host: &mut H) -> Result<u32> {
        if !self.content.contains(FaultContent::INST) {
            let mut buf = [0u8; 4];
            if let Err(err) = host.guest_mem_read(self.ip, &mut buf) {
                error!("Failed to fetch instruction at PC {:#x}: {}", self.ip, err);
                return ErrorKind::FaultDecode.into();
            }
            let raw = u32::from_le_bytes(buf);
            let thumb = self.get_ctx(host)?.is_thumb();
            let (inst, fsr) = decode::canonical_inst(raw, thumb, self.fsr);
            self.instruction = inst;
            self.fsr = fsr;
            self.content |= FaultContent::INST;
        }
        Ok(self.instruction)
    }

    /// Decode the faulting load/store when the syndrome is invalid. Returns
    /// Rt for the current stage and fills in width and stage count.
    fn decode_instruction<H: VmmHost>(&mut self, host: &mut H) -> Result<usize> {
        let inst = self.fetch_instruction(host)?;
        let thumb = self.get_ctx(host)?.is_thumb();
        let op = decode::decode_load_store(inst, thumb, hsr::is_inst32(self.fsr))?;
        if !self.content.contains(FaultContent::STAGE) {
            self.stage = op.stages as i32;
            self.content |= FaultContent::STAGE;
        }
        if !self.content.contains(FaultContent::WIDTH) {
            self.width = op.width;
            self.content |= FaultContent::WIDTH;
        }
        if op.stages == 2 {
            // each stage transfers one word and bumps the register pair
            let done = 2 - self.stage as usize;
            self.addr = self.base_addr + done * 4;
            Ok(op.rt + done)
        } else {
            Ok(op.rt)
        }
    }

    /// Operand register of the access.
    fn rt<H: VmmHost>(&mut self, host: &mut H) -> Result<usize> {
        self.pmode(host)?;
        if hsr::is_syndrome_valid(self.fsr) {
            if self.errata_thumb_rt && self.is_write() && self.get_ctx(host)?.is_thumb() {
                // the syndrome lies about Rt for Thumb stores on this platform
                let inst = self.fetch_instruction(host)?;
                decode::errata766422_rt(inst, hsr::is_inst32(self.fsr))
            } else {
                Ok(hsr::syndrome_rt(self.fsr))
            }
        } else {
            self.decode_instruction(host)
        }
    }

    /// Operand value: the data a store wants to write, fetched from the
    /// (possibly banked) guest register on first use.
    pub fn get_data<H: VmmHost>(&mut self, host: &mut H) -> Result<u32> {
        if !self.content.contains(FaultContent::DATA) {
            let rt = self.rt(host)?;
            let data = match decode::banked_reg(rt, self.pmode) {
                Some(reg) => host.vcpu_read_reg(self.vcpu, reg)?,
                None => self.get_ctx(host)?.gpr(rt),
            };
            self.data = data;
            self.content |= FaultContent::DATA;
        }
        Ok(self.data)
    }

    /// Access width, from the syndrome when valid, otherwise decoded.
    pub fn width<H: VmmHost>(&mut self, host: &mut H) -> Result<FaultWidth> {
        if !self.content.contains(FaultContent::WIDTH) {
            if hsr::is_syndrome_valid(self.fsr) {
                self.width = match hsr::syndrome_width_bits(self.fsr) {
                    0 => FaultWidth::Byte,
                    1 => FaultWidth::HalfWord,
                    2 => FaultWidth::Word,
                    bits => {
                        self.log_fatal(host);
                        error!("Invalid syndrome width {}", bits);
                        return ErrorKind::FaultDecode.into();
                    }
                };
                self.content |= FaultContent::WIDTH;
            } else {
                self.decode_instruction(host)?;
            }
        }
        Ok(self.width)
    }

    /// The aligned 32-bit mask covering the bytes the access touches.
    /// Misaligned accesses are fatal.
    pub fn data_mask<H: VmmHost>(&mut self, host: &mut H) -> Result<u32> {
        let mask: u32 = match self.width(host)? {
            FaultWidth::Byte => 0x0000_00ff,
            FaultWidth::HalfWord => {
                if self.addr & 0x1 != 0 {
                    error!("misaligned halfword access at {:#x}", self.addr);
                    return ErrorKind::FaultDecode.into();
                }
                0x0000_ffff
            }
            FaultWidth::Word | FaultWidth::DoubleWord => {
                if self.addr & 0x3 != 0 {
                    error!("misaligned word access at {:#x}", self.addr);
                    return ErrorKind::FaultDecode.into();
                }
                0xffff_ffff
            }
        };
        Ok(mask << ((self.addr & 0x3) * 8))
    }

    /// True if the trapped instruction is 32-bit; may trigger a decode when
    /// the syndrome is invalid.
    pub fn is_inst32<H: VmmHost>(&mut self, host: &mut H) -> Result<bool> {
        if !hsr::is_syndrome_valid(self.fsr) {
            self.width(host)?;
        }
        Ok(hsr::is_inst32(self.fsr))
    }

    /// Merge the access into `orig`, the current value of the emulated
    /// register. Reads shift the device data down to the guest's lane;
    /// writes shift the operand up and mask it in.
    pub fn emulate<H: VmmHost>(&mut self, host: &mut H, orig: u32) -> Result<u32> {
        let m = self.data_mask(host)?;
        let s = ((self.addr & 0x3) * 8) as u32;
        let n = self.get_data(host)?;
        if self.is_read() {
            Ok((orig & !(m >> s)) | ((n & m) >> s))
        } else {
            Ok((orig & !m) | ((n << s) & m))
        }
    }

    /// Commit the current stage: write any read result back to the operand
    /// register, then either move to the next stage or step the guest past
    /// the instruction and reply.
    pub fn advance<H: VmmHost>(&mut self, host: &mut H) -> Result<()> {
        if self.is_data() && self.is_read() {
            let rt = self.rt(host)?;
            match decode::banked_reg(rt, self.pmode) {
                Some(reg) => {
                    let cur = host.vcpu_read_reg(self.vcpu, reg)?;
                    let val = self.emulate(host, cur)?;
                    host.vcpu_write_reg(self.vcpu, reg, val)?;
                }
                None => {
                    let cur = self.get_ctx(host)?.gpr(rt);
                    let val = self.emulate(host, cur)?;
                    self.get_ctx(host)?.set_gpr(rt, val);
                }
            }
        }
        trace!("emulate fault @ {:#x} from PC {:#x}", self.addr, self.ip);
        assert!(self.stage > 0, "advance without a pending stage");
        self.stage -= 1;
        if self.stage > 0 {
            // operand data becomes stale between stages, and the next pass
            // targets the second word of the pair
            self.content.remove(FaultContent::DATA);
            if self.width == FaultWidth::DoubleWord {
                self.addr = self.base_addr + 4;
            }
            Ok(())
        } else {
            self.ignore(host)
        }
    }

    /// Step the guest PC over the faulting instruction, write the register
    /// file back and reply.
    pub fn ignore<H: VmmHost>(&mut self, host: &mut H) -> Result<()> {
        let step: u32 = if self.is_wfi {
            if self.get_ctx(host)?.is_thumb() {
                2
            } else {
                4
            }
        } else if self.is_inst32(host)? {
            4
        } else {
            2
        };
        let ctx = self.get_ctx(host)?;
        ctx.pc = ctx.pc.wrapping_add(step);
        let regs = *self.get_ctx(host)?;
        host.vcpu_write_ctx(self.vcpu, &regs)?;
        self.restart(host)
    }

    /// Reply without touching any register; used after a new stage-2 mapping
    /// has been installed and the guest should retry the same instruction.
    pub fn restart<H: VmmHost>(&mut self, host: &mut H) -> Result<()> {
        self.stage = 0;
        trace!("restart fault @ {:#x} from PC {:#x}", self.addr, self.ip);
        host.reply_send(self.reply)
    }

    /// Release the fault without replying; the guest stays blocked.
    pub fn abandon(&mut self) {
        debug!("release fault @ {:#x} from PC {:#x}", self.addr, self.ip);
    }

    /// Wake a vCPU parked in WFI: step over the instruction and reply.
    pub fn wfi_resume<H: VmmHost>(&mut self, host: &mut H) -> Result<()> {
        assert!(self.is_wfi, "wfi_resume on a non-WFI fault");
        self.ignore(host)?;
        self.is_wfi = false;
        Ok(())
    }

    /// Dump the fault and the guest register file for fatal paths.
    pub fn log_fatal<H: VmmHost>(&mut self, host: &mut H) {
        error!(
            "Pagefault: {} {} @ PC {:#x} IPA {:#x}, FSR {:#x}",
            if self.is_read() { "read" } else { "write" },
            if self.is_prefetch { "prefetch fault" } else { "fault" },
            self.ip,
            self.addr,
            self.fsr
        );
        match self.get_ctx(host) {
            Ok(ctx) => error!("Context:\n{}", ctx),
            Err(err) => error!("Context unavailable: {}", err),
        }
    }
}
