// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! The VM record: vCPUs, installed devices, reboot hooks and the virtual
//! GIC, all exclusively owned by the [`Vm`].

mod event;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arch::psr::CPSR_BOOT;
use crate::arch::PAGE_SIZE;
use crate::device::{
    AcAction, AcState, CustomDevice, DevId, Device, DeviceDesc, DevicePolicy, DeviceTable, EmuFrameState, MaskStore,
};
use crate::error::{ErrorKind, Result};
use crate::fault::Fault;
use crate::host::{DeviceFrame, VmmHost};
use crate::vgic::{IrqAckFn, Vgic};

pub const MAX_REBOOT_HOOKS_PER_VM: usize = 10;

/// Runs on VM reset, e.g. to quiesce a passthrough device.
pub type RebootHookFn<H> = fn(host: &mut H, token: usize) -> Result<()>;

struct RebootHook<H: VmmHost> {
    hook: RebootHookFn<H>,
    token: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub name: &'static str,
    pub id: usize,
    /// Blind-map unclaimed IPAs (passthrough, then RAM) instead of failing.
    /// Off by default because it silently masks bugs; some guests probe for
    /// hardware and need it.
    pub ondemand_install: bool,
    /// Recover Rt from the instruction for Thumb stores whose syndrome lies
    /// (ARM errata 766422).
    pub errata_thumb_rt: bool,
}

pub struct Vcpu {
    id: usize,
    pub(crate) fault: Fault,
    pub(crate) online: bool,
    pub(crate) wfi_pending: bool,
}

impl Vcpu {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_online(&self) -> bool {
        self.online
    }
}

/// A guest VM bound to one host kernel connection.
pub struct Vm<H: VmmHost> {
    name: &'static str,
    id: usize,
    errata_thumb_rt: bool,
    ondemand_install: bool,
    pub(crate) host: H,
    pub(crate) vcpus: Vec<Vcpu>,
    pub(crate) devices: DeviceTable<H>,
    hooks: Vec<RebootHook<H>>,
    pub(crate) vgic: Vgic<H>,
}

impl<H: VmmHost> Vm<H> {
    /// Create a VM with its boot vCPU, suspended.
    pub fn new(config: VmConfig, mut host: H) -> Result<Vm<H>> {
        let fault = Fault::init(&mut host, 0, config.errata_thumb_rt)?;
        let mut vgic = Vgic::new();
        vgic.vcpu_add();
        Ok(Vm {
            name: config.name,
            id: config.id,
            errata_thumb_rt: config.errata_thumb_rt,
            ondemand_install: config.ondemand_install,
            host,
            vcpus: vec![Vcpu {
                id: 0,
                fault,
                online: false,
                wfi_pending: false,
            }],
            devices: DeviceTable::new(),
            hooks: Vec::new(),
            vgic,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn host(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn num_vcpus(&self) -> usize {
        self.vcpus.len()
    }

    pub fn vcpu(&self, idx: usize) -> &Vcpu {
        &self.vcpus[idx]
    }

    pub fn vgic(&self) -> &Vgic<H> {
        &self.vgic
    }

    /// Add a secondary vCPU, suspended. Returns its index.
    pub fn vcpu_add(&mut self) -> Result<usize> {
        let id = self.vcpus.len();
        let fault = Fault::init(&mut self.host, id, self.errata_thumb_rt)?;
        self.vcpus.push(Vcpu {
            id,
            fault,
            online: false,
            wfi_pending: false,
        });
        self.vgic.vcpu_add();
        Ok(id)
    }

    /// Linux boot register convention: r0 = 0, r1 = machine type,
    /// r2 = atag list IPA, SVC mode with asynchronous exceptions masked.
    pub fn set_bootargs(&mut self, entry: usize, machine_type: u32, atags_ipa: u32) -> Result<()> {
        let mut regs = self.host.vcpu_read_ctx(0)?;
        regs.set_gpr(0, 0);
        regs.set_gpr(1, machine_type);
        regs.set_gpr(2, atags_ipa);
        regs.pc = entry as u32;
        regs.cpsr = CPSR_BOOT;
        self.host.vcpu_write_ctx(0, &regs)
    }

    pub fn vcpu_start(&mut self, vcpu: usize) -> Result<()> {
        self.host.vcpu_resume(vcpu)?;
        self.vcpus[vcpu].online = true;
        Ok(())
    }

    /// Resume the boot vCPU.
    pub fn start(&mut self) -> Result<()> {
        self.vcpu_start(0)
    }

    pub fn stop(&mut self) -> Result<()> {
        for idx in 0..self.vcpus.len() {
            self.host.vcpu_suspend(idx)?;
            self.vcpus[idx].online = false;
        }
        Ok(())
    }

    /// Run the reboot hooks in registration order, then put the vGIC back
    /// into reset state. The first failing hook aborts the chain.
    pub fn reset(&mut self) -> Result<()> {
        let name = self.name;
        let Vm { host, hooks, .. } = self;
        for hook in hooks.iter() {
            if let Err(err) = (hook.hook)(host, hook.token) {
                error!("[{}] reboot hook failed: {}", name, err);
                return Err(err);
            }
        }
        self.vgic.reset();
        Ok(())
    }

    pub fn register_reboot_hook(&mut self, hook: RebootHookFn<H>, token: usize) -> Result<()> {
        if self.hooks.len() >= MAX_REBOOT_HOOKS_PER_VM {
            error!("[{}] reboot hook table full", self.name);
            return ErrorKind::DeviceFull.into();
        }
        self.hooks.push(RebootHook { hook, token });
        Ok(())
    }

    /// Map host frames for the range one-to-one; faults are never expected.
    pub fn install_passthrough_device(&mut self, desc: DeviceDesc) -> Result<()> {
        self.host.map_passthrough(desc.pstart, desc.size)?;
        self.devices.add(Device {
            desc,
            policy: DevicePolicy::Passthrough,
        })
    }

    /// Back the range with fresh zeroed frames, guest read-write cacheable.
    pub fn install_ram_only_device(&mut self, desc: DeviceDesc) -> Result<()> {
        self.host.map_ram(desc.pstart, desc.size)?;
        self.devices.add(Device {
            desc,
            policy: DevicePolicy::RamOnly,
        })
    }

    /// Back the range with a frame the guest reads directly while writes
    /// trap. Returns the hypervisor-side view for presetting state.
    pub fn install_emulated_device(&mut self, desc: DeviceDesc) -> Result<DeviceFrame> {
        let frame = self.host.map_emulated(desc.pstart, desc.size)?;
        self.devices.add(Device {
            desc,
            policy: DevicePolicy::Emulated(EmuFrameState::new(frame)),
        })?;
        Ok(frame)
    }

    /// Passthrough reads, write filtering through a caller-owned per-bit
    /// mask. The mask may cover a prefix of the device; the rest is
    /// read-only to the guest.
    pub fn install_ac_device(&mut self, desc: DeviceDesc, mask: MaskStore, action: AcAction) -> Result<()> {
        if mask.lock().len() * 4 > desc.size {
            error!("[{}] mask is larger than the device", desc.name);
            return ErrorKind::InvalidConfig.into();
        }
        let regs = self.host.map_device_readonly(desc.pstart, desc.size)?;
        self.devices.add(Device {
            desc,
            policy: DevicePolicy::AccessControlled(AcState::new(regs, mask, action)),
        })
    }

    pub fn install_custom_device(&mut self, desc: DeviceDesc, model: Box<dyn CustomDevice<H>>) -> Result<()> {
        self.devices.add(Device {
            desc,
            policy: DevicePolicy::Custom(model),
        })
    }

    /// Install the virtual GIC: the emulated distributor frame plus the
    /// hardware VCPU interface mapped at the guest's GIC CPU base.
    pub fn install_vgic(&mut self, dist_base: usize, cpu_base: usize) -> Result<()> {
        self.devices.add(Device {
            desc: DeviceDesc {
                devid: DevId::VgicDist,
                name: "vgic.dist",
                pstart: dist_base,
                size: PAGE_SIZE,
            },
            policy: DevicePolicy::VgicDist,
        })?;
        self.host.map_gic_vcpu(cpu_base, PAGE_SIZE)?;
        self.devices.add(Device {
            desc: DeviceDesc {
                devid: DevId::VgicCpu,
                name: "vgic.cpu",
                pstart: cpu_base,
                size: PAGE_SIZE,
            },
            policy: DevicePolicy::Passthrough,
        })
    }

    /// Register a shared peripheral interrupt with its ack callback.
    pub fn virq_new(&mut self, virq: u32, ack: IrqAckFn<H>, token: usize) -> Result<()> {
        self.vgic.virq_new(virq, ack, token)
    }

    /// Register an SGI or PPI for one vCPU.
    pub fn local_virq_new(&mut self, vcpu: usize, virq: u32, ack: IrqAckFn<H>, token: usize) -> Result<()> {
        self.vgic.local_virq_new(vcpu, virq, ack, token)
    }

    /// Deliver an external interrupt assertion. SPIs are routed to the boot
    /// vCPU; a vCPU parked in WFI is woken.
    pub fn inject_irq(&mut self, virq: u32) -> Result<()> {
        let target = 0;
        let Vm { host, vgic, vcpus, .. } = self;
        vgic.inject(host, target, virq)?;
        if vcpus[target].wfi_pending {
            vcpus[target].fault.wfi_resume(host)?;
            vcpus[target].wfi_pending = false;
        }
        Ok(())
    }

    pub(crate) fn online_mask(&self) -> u32 {
        self.vcpus
            .iter()
            .enumerate()
            .fold(0, |mask, (i, vcpu)| if vcpu.online { mask | (1 << i) } else { mask })
    }
}
