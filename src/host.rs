// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! The seam between the VM runtime and the host kernel.
//!
//! Any kernel that can deliver the [`VmEvent`] message set, park and send
//! reply rights, read and write guest registers and install stage-2 mappings
//! can drive a [`crate::vm::Vm`].

use core::ptr;

use crate::arch::Aarch32ContextFrame;
use crate::error::Result;

/// A slot in which the host parks the reply right of an in-flight guest
/// message. Allocated once per fault object and reused across faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplySlot(pub usize);

/// One message out of the host kernel's receive primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmEvent {
    /// Stage-2 data or prefetch abort.
    VmFault {
        vcpu: usize,
        is_prefetch: bool,
        addr: usize,
        fsr: u32,
        ip: usize,
    },
    /// The guest issued a hypercall.
    UnknownSyscall { vcpu: usize, syscall: usize, pc: usize },
    /// Illegal instruction trap.
    UserException { vcpu: usize, ip: usize },
    /// A hardware list register drained.
    VgicMaintenance { vcpu: usize, idx: usize },
    /// HCR/HSR report, e.g. a trapped WFI/WFE.
    VcpuFault { vcpu: usize, hsr: u32 },
    /// An external interrupt arrived, identified by the sender badge.
    VirqAssert { virq: u32 },
}

/// Banked guest registers accessed through the vCPU register interface
/// rather than the plain TCB context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BankedReg {
    R8Fiq,
    R9Fiq,
    R10Fiq,
    R11Fiq,
    R12Fiq,
    SpFiq,
    LrFiq,
    SpIrq,
    LrIrq,
    SpSvc,
    LrSvc,
    SpAbt,
    LrAbt,
    SpUnd,
    LrUnd,
}

/// Hypervisor-side window onto a frame shared with the guest.
#[derive(Clone, Copy, Debug)]
pub struct DeviceFrame {
    base: *mut u8,
    size: usize,
}

// SAFETY: frames are only touched from the owning VM's event loop thread.
unsafe impl Send for DeviceFrame {}

impl DeviceFrame {
    /// # Safety
    /// `base` must point at `size` bytes that stay mapped read-write for the
    /// lifetime of the frame.
    pub unsafe fn new(base: *mut u8, size: usize) -> DeviceFrame {
        DeviceFrame { base, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size && offset % 4 == 0);
        // SAFETY: in range per the constructor contract and the assert above
        unsafe { ptr::read_volatile(self.base.add(offset) as *const u32) }
    }

    pub fn write32(&self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size && offset % 4 == 0);
        // SAFETY: in range per the constructor contract and the assert above
        unsafe { ptr::write_volatile(self.base.add(offset) as *mut u32, val) }
    }
}

/// Host kernel operations the runtime depends on.
pub trait VmmHost {
    /// Block until the kernel delivers the next event for this VM. The only
    /// suspension point of the event loop.
    fn recv_event(&mut self) -> Result<VmEvent>;

    /// Reserve a slot for parking reply rights.
    fn reply_alloc(&mut self) -> Result<ReplySlot>;
    /// Park the reply right of the message just received into `slot`.
    fn reply_save(&mut self, slot: ReplySlot) -> Result<()>;
    /// Send the parked reply, restarting the guest.
    fn reply_send(&mut self, slot: ReplySlot) -> Result<()>;
    /// Reply to the message just received without parking it.
    fn reply_now(&mut self) -> Result<()>;

    fn vcpu_read_ctx(&mut self, vcpu: usize) -> Result<Aarch32ContextFrame>;
    fn vcpu_write_ctx(&mut self, vcpu: usize, ctx: &Aarch32ContextFrame) -> Result<()>;
    fn vcpu_read_reg(&mut self, vcpu: usize, reg: BankedReg) -> Result<u32>;
    fn vcpu_write_reg(&mut self, vcpu: usize, reg: BankedReg, val: u32) -> Result<()>;

    /// Write hardware list register `idx` with a virtual interrupt.
    fn vcpu_inject_irq(&mut self, vcpu: usize, idx: usize, group: u32, priority: u32, virq: u32) -> Result<()>;
    fn vcpu_resume(&mut self, vcpu: usize) -> Result<()>;
    fn vcpu_suspend(&mut self, vcpu: usize) -> Result<()>;

    /// Map the host frames backing `[ipa, ipa + size)` at the same IPA,
    /// read-write for the guest.
    fn map_passthrough(&mut self, ipa: usize, size: usize) -> Result<()>;
    /// Allocate fresh zeroed frames, guest read-write and cacheable, also
    /// visible to the hypervisor.
    fn map_ram(&mut self, ipa: usize, size: usize) -> Result<DeviceFrame>;
    /// Allocate fresh frames mapped read-only into the guest and read-write
    /// into the hypervisor, so writes trap while reads are zero-copy.
    fn map_emulated(&mut self, ipa: usize, size: usize) -> Result<DeviceFrame>;
    /// Map a physical device read-only into the guest (reads pass through,
    /// writes trap) and read-write into the hypervisor.
    fn map_device_readonly(&mut self, ipa: usize, size: usize) -> Result<DeviceFrame>;
    /// Map the hardware GIC VCPU interface frame at the guest's GIC CPU base.
    fn map_gic_vcpu(&mut self, ipa: usize, size: usize) -> Result<()>;

    /// Copy guest memory through a stage-2 walk, without side effects.
    fn guest_mem_read(&mut self, ipa: usize, buf: &mut [u8]) -> Result<()>;
    fn ipa_to_pa(&mut self, ipa: usize) -> Result<usize>;
    fn pa_to_ipa(&mut self, pa: usize) -> Result<usize>;
}
