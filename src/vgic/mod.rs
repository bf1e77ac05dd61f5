// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! The virtual GICv2: a software distributor shadow plus the per-vCPU list
//! register mirror, overflow ring and maintenance handling.
//!
//! Interrupt sources register a [`VirqHandle`]; the ack callback fires when
//! the guest retires the virtual IRQ, so the upstream source (typically a
//! disabled hardware IRQ) can be re-armed.

pub mod dist;

pub use dist::GicDistMap;

use alloc::vec::Vec;
use core::array;

use crate::error::{ErrorKind, Result};
use crate::host::VmmHost;

/// Hardware list registers mirrored per vCPU.
// TODO: probe the list register count from the kernel instead of assuming four.
pub const NUM_LIST_REGS: usize = 4;
/// Capacity of the pending-but-unloaded ring, power of two so wrap-around
/// masking is free.
pub const MAX_IRQ_QUEUE_LEN: usize = 64;
/// Slot count for registered SPIs; most systems use far fewer than the
/// architectural maximum.
pub const NUM_SLOTS_SPI_VIRQ: usize = 200;
pub const NUM_SGI_VIRQS: usize = 16;
pub const NUM_PPI_VIRQS: usize = 16;
pub const NUM_VCPU_LOCAL_VIRQS: usize = NUM_SGI_VIRQS + NUM_PPI_VIRQS;

const _: () = assert!(MAX_IRQ_QUEUE_LEN & (MAX_IRQ_QUEUE_LEN - 1) == 0);

/// Fires when the guest retires the virtual IRQ.
pub type IrqAckFn<H> = fn(host: &mut H, virq: u32, token: usize);

/// Observable state of one virtual interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirqState {
    Disabled,
    Idle,
    /// Asserted but not yet presented through a list register.
    Pending,
    /// Presented to the guest and not yet retired.
    Active,
    /// Re-asserted while the guest is still handling it.
    ActivePending,
}

/// Per-virtual-IRQ record, exclusively owned by the vGIC.
pub struct VirqHandle<H: VmmHost> {
    virq: u32,
    ack: IrqAckFn<H>,
    token: usize,
}

impl<H: VmmHost> VirqHandle<H> {
    pub fn new(virq: u32, ack: IrqAckFn<H>, token: usize) -> VirqHandle<H> {
        VirqHandle { virq, ack, token }
    }

    pub fn virq(&self) -> u32 {
        self.virq
    }

    fn do_ack(&self, host: &mut H) {
        (self.ack)(host, self.virq, self.token);
    }
}

/// Circular FIFO of virq numbers; one slot is kept free to tell full from
/// empty.
struct IrqQueue {
    irqs: [u32; MAX_IRQ_QUEUE_LEN],
    head: usize,
    tail: usize,
}

impl IrqQueue {
    const fn next(i: usize) -> usize {
        (i + 1) & (MAX_IRQ_QUEUE_LEN - 1)
    }

    fn new() -> IrqQueue {
        IrqQueue {
            irqs: [0; MAX_IRQ_QUEUE_LEN],
            head: 0,
            tail: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn len(&self) -> usize {
        (self.tail.wrapping_sub(self.head)) & (MAX_IRQ_QUEUE_LEN - 1)
    }

    fn push(&mut self, virq: u32) -> Result<()> {
        let next = Self::next(self.tail);
        if next == self.head {
            return ErrorKind::QueueFull.into();
        }
        self.irqs[self.tail] = virq;
        self.tail = next;
        Ok(())
    }

    fn pop(&mut self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let virq = self.irqs[self.head];
        self.head = Self::next(self.head);
        Some(virq)
    }

    fn remove(&mut self, virq: u32) {
        let mut read = self.head;
        let mut write = self.head;
        while read != self.tail {
            if self.irqs[read] != virq {
                self.irqs[write] = self.irqs[read];
                write = Self::next(write);
            }
            read = Self::next(read);
        }
        self.tail = write;
    }

    fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

/// Per-vCPU interrupt context: the list register mirror, the overflow ring,
/// the local SGI/PPI handles and the banked distributor words.
pub struct VgicVcpu<H: VmmHost> {
    lr_shadow: [Option<u32>; NUM_LIST_REGS],
    irq_queue: IrqQueue,
    local_virqs: [Option<VirqHandle<H>>; NUM_VCPU_LOCAL_VIRQS],
    pub(crate) group0: u32,
    pub(crate) enable0: u32,
    pub(crate) pending0: u32,
    pub(crate) active0: u32,
    pub(crate) prio0: [u32; 8],
    pub(crate) targets0: [u32; 8],
    pub(crate) sgi_pend: [u32; 4],
}

impl<H: VmmHost> VgicVcpu<H> {
    fn new() -> VgicVcpu<H> {
        let mut v = VgicVcpu {
            lr_shadow: [None; NUM_LIST_REGS],
            irq_queue: IrqQueue::new(),
            local_virqs: array::from_fn(|_| None),
            group0: 0,
            enable0: 0,
            pending0: 0,
            active0: 0,
            prio0: [0; 8],
            targets0: [0; 8],
            sgi_pend: [0; 4],
        };
        v.reset();
        v
    }

    fn reset(&mut self) {
        self.lr_shadow = [None; NUM_LIST_REGS];
        self.irq_queue.clear();
        self.group0 = 0;
        // SGIs are permanently enabled
        self.enable0 = 0x0000_ffff;
        self.pending0 = 0;
        self.active0 = 0;
        self.prio0 = [0; 8];
        self.targets0 = [0; 8];
        self.sgi_pend = [0; 4];
    }
}

/// Per-VM virtual GIC record.
pub struct Vgic<H: VmmHost> {
    pub(crate) dist: GicDistMap,
    spis: [Option<VirqHandle<H>>; NUM_SLOTS_SPI_VIRQ],
    pub(crate) vcpus: Vec<VgicVcpu<H>>,
}

impl<H: VmmHost> Vgic<H> {
    pub fn new() -> Vgic<H> {
        Vgic {
            dist: GicDistMap::reset_map(),
            spis: array::from_fn(|_| None),
            vcpus: Vec::new(),
        }
    }

    pub(crate) fn vcpu_add(&mut self) {
        self.vcpus.push(VgicVcpu::new());
    }

    pub fn num_vcpus(&self) -> usize {
        self.vcpus.len()
    }

    /// Drop delivery state and restore distributor reset values. Registered
    /// handles survive a reset.
    pub fn reset(&mut self) {
        self.dist = GicDistMap::reset_map();
        for vcpu in self.vcpus.iter_mut() {
            vcpu.reset();
        }
    }

    /// Register a shared peripheral interrupt.
    pub fn virq_new(&mut self, virq: u32, ack: IrqAckFn<H>, token: usize) -> Result<()> {
        if (virq as usize) < NUM_VCPU_LOCAL_VIRQS {
            error!("virq {} is vCPU-local, register it per vCPU", virq);
            return ErrorKind::InvalidConfig.into();
        }
        if self.spis.iter().flatten().any(|h| h.virq == virq) {
            error!("virq {} is already registered", virq);
            return ErrorKind::InvalidConfig.into();
        }
        match self.spis.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(VirqHandle::new(virq, ack, token));
                Ok(())
            }
            None => {
                error!("out of SPI virq slots registering virq {}", virq);
                ErrorKind::DeviceFull.into()
            }
        }
    }

    /// Register an SGI or PPI for one vCPU.
    pub fn local_virq_new(&mut self, vcpu: usize, virq: u32, ack: IrqAckFn<H>, token: usize) -> Result<()> {
        if (virq as usize) >= NUM_VCPU_LOCAL_VIRQS {
            error!("virq {} is not vCPU-local", virq);
            return ErrorKind::InvalidConfig.into();
        }
        let slot = &mut self.vcpus[vcpu].local_virqs[virq as usize];
        if slot.is_some() {
            error!("virq {} is already registered on vcpu {}", virq, vcpu);
            return ErrorKind::InvalidConfig.into();
        }
        *slot = Some(VirqHandle::new(virq, ack, token));
        Ok(())
    }

    fn find_handle(&self, vcpu: usize, virq: u32) -> Option<&VirqHandle<H>> {
        if (virq as usize) < NUM_VCPU_LOCAL_VIRQS {
            self.vcpus[vcpu].local_virqs[virq as usize].as_ref()
        } else {
            self.spis.iter().flatten().find(|h| h.virq == virq)
        }
    }

    pub fn lr(&self, vcpu: usize, idx: usize) -> Option<u32> {
        self.vcpus[vcpu].lr_shadow[idx]
    }

    /// Walk the enable/pending/active bits and the list register mirror into
    /// the GICv2 per-IRQ state machine.
    pub fn irq_state(&self, vcpu: usize, irq: usize) -> VirqState {
        if !self.is_enabled(vcpu, irq) {
            return VirqState::Disabled;
        }
        let in_lr = self.vcpus[vcpu]
            .lr_shadow
            .iter()
            .flatten()
            .any(|&virq| virq as usize == irq);
        let active = in_lr || self.active_word(vcpu, irq / 32) & (1 << (irq % 32)) != 0;
        let backlogged = self.is_pending(vcpu, irq) && !in_lr;
        match (active, backlogged) {
            (false, false) => VirqState::Idle,
            (false, true) => VirqState::Pending,
            (true, false) => VirqState::Active,
            (true, true) => VirqState::ActivePending,
        }
    }

    pub fn queue_len(&self, vcpu: usize) -> usize {
        self.vcpus[vcpu].irq_queue.len()
    }

    fn find_free_lr(&self, vcpu: usize) -> Option<usize> {
        self.vcpus[vcpu].lr_shadow.iter().position(|slot| slot.is_none())
    }

    fn load_lr(&mut self, host: &mut H, vcpu: usize, idx: usize, virq: u32) -> Result<()> {
        host.vcpu_inject_irq(vcpu, idx, 0, 0, virq)?;
        self.vcpus[vcpu].lr_shadow[idx] = Some(virq);
        Ok(())
    }

    /// Deliver a virtual IRQ to `vcpu`: mark it pending and hand it to the
    /// hardware, spilling into the overflow ring when the list registers are
    /// full. The same path serves external assertions, guest pending-set
    /// writes and SGIs.
    pub(crate) fn inject(&mut self, host: &mut H, vcpu: usize, virq: u32) -> Result<()> {
        if self.find_handle(vcpu, virq).is_none() {
            debug!("asserted virq {} has no handle", virq);
            return Ok(());
        }
        if self.dist.enable == 0 || !self.is_enabled(vcpu, virq as usize) {
            debug!("virq {} not enabled on vcpu {}", virq, vcpu);
            return Ok(());
        }
        if self.is_pending(vcpu, virq as usize) {
            // the guest has not retired the previous assertion yet
            return Ok(());
        }
        self.set_pending(vcpu, virq as usize, true);
        if let Err(err) = self.vcpus[vcpu].irq_queue.push(virq) {
            error!("virq queue exhausted on vcpu {}, dropping virq {}", vcpu, virq);
            return Err(err);
        }
        if let Some(idx) = self.find_free_lr(vcpu) {
            if let Some(next) = self.vcpus[vcpu].irq_queue.pop() {
                self.load_lr(host, vcpu, idx, next)?;
            }
        }
        Ok(())
    }

    /// A hardware list register drained: retire the virq it carried and
    /// reload the slot from the overflow ring.
    pub(crate) fn on_maintenance(&mut self, host: &mut H, vcpu: usize, idx: usize) -> Result<()> {
        let virq = match self.vcpus[vcpu].lr_shadow[idx].take() {
            Some(virq) => virq,
            None => {
                error!("maintenance for empty list register {} on vcpu {}", idx, vcpu);
                return ErrorKind::NotFound.into();
            }
        };
        self.set_pending(vcpu, virq as usize, false);
        if let Some(handle) = self.find_handle(vcpu, virq) {
            handle.do_ack(host);
        }
        if let Some(next) = self.vcpus[vcpu].irq_queue.pop() {
            self.load_lr(host, vcpu, idx, next)?;
        }
        Ok(())
    }

    /// Guest enabled an IRQ. A backlogged assertion that was dropped while
    /// the IRQ was disabled is acked so the next one is delivered fresh.
    pub(crate) fn enable_irq(&mut self, host: &mut H, vcpu: usize, irq: usize) {
        trace!("enabling irq {}", irq);
        self.set_enable(vcpu, irq, true);
        match self.find_handle(vcpu, irq as u32) {
            Some(handle) => {
                if !self.is_pending(vcpu, irq) {
                    handle.do_ack(host);
                }
            }
            None => {
                debug!("enabled irq {} has no handle", irq);
            }
        }
    }

    pub(crate) fn disable_irq(&mut self, vcpu: usize, irq: usize) {
        // SGIs cannot be disabled
        if irq >= NUM_SGI_VIRQS {
            trace!("disabling irq {}", irq);
            self.set_enable(vcpu, irq, false);
        }
    }

    pub(crate) fn clr_pending_irq(&mut self, vcpu: usize, irq: usize) {
        self.vcpus[vcpu].irq_queue.remove(irq as u32);
        self.set_pending(vcpu, irq, false);
    }
}
