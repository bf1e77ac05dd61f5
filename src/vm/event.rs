// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! The VM event loop: one blocking receive, one message handled to
//! completion, one reply. Fault and vGIC paths share the thread, so no
//! locking is needed between them.

use super::Vm;
use crate::arch::hsr::{HSR_WFE, HSR_WFI};
use crate::arch::PAGE_SIZE;
use crate::device::DevicePolicy;
use crate::device::{handle_ac_fault, handle_emulated_fault};
use crate::error::{ErrorKind, Result};
use crate::host::{VmEvent, VmmHost};
use crate::utils::round_down;
use crate::vgic::dist::handle_dist_fault;

/// Guest-to-host hypercall numbers.
const SYSCALL_PA_TO_IPA: usize = 65;
const SYSCALL_IPA_TO_PA: usize = 66;
const SYSCALL_NOP: usize = 67;

impl<H: VmmHost> Vm<H> {
    /// Receive and handle events until one is fatal. A fatal return
    /// terminates the VM; the outer driver may tear it down or restart it.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let event = self.host.recv_event()?;
            self.handle_event(event)?;
        }
    }

    /// Dispatch one kernel message.
    pub fn handle_event(&mut self, event: VmEvent) -> Result<()> {
        match event {
            VmEvent::VmFault {
                vcpu,
                is_prefetch,
                addr,
                fsr,
                ip,
            } => {
                {
                    let Vm { host, vcpus, .. } = self;
                    vcpus[vcpu].fault.new_fault(host, is_prefetch, addr, fsr, ip)?;
                }
                // one guest instruction may need multi-stage emulation
                loop {
                    self.handle_page_fault(vcpu)?;
                    if self.vcpus[vcpu].fault.handled() {
                        break;
                    }
                }
                Ok(())
            }
            VmEvent::UnknownSyscall { vcpu, syscall, pc } => self.handle_syscall(vcpu, syscall, pc),
            VmEvent::UserException { vcpu, ip } => {
                error!("Invalid instruction from [{}] at PC {:#x}", self.name(), ip);
                let regs = self.host.vcpu_read_ctx(vcpu)?;
                error!("Context:\n{}", regs);
                ErrorKind::FaultUnhandled.into()
            }
            VmEvent::VgicMaintenance { vcpu, idx } => {
                let Vm { host, vgic, .. } = self;
                vgic.on_maintenance(host, vcpu, idx)?;
                host.reply_now()
            }
            VmEvent::VcpuFault { vcpu, hsr } => match hsr {
                HSR_WFI | HSR_WFE => {
                    // park the vCPU; the next assertion restarts it
                    let Vm { host, vcpus, .. } = self;
                    vcpus[vcpu].fault.new_wfi(host)?;
                    vcpus[vcpu].wfi_pending = true;
                    Ok(())
                }
                _ => {
                    error!("Unhandled VCPU fault from [{}]: HSR {:#010x}", self.name(), hsr);
                    let regs = self.host.vcpu_read_ctx(vcpu)?;
                    error!("Context:\n{}", regs);
                    ErrorKind::FaultUnhandled.into()
                }
            },
            VmEvent::VirqAssert { virq } => self.inject_irq(virq),
        }
    }

    /// Classify a stage-2 abort and hand it to the owning device policy.
    fn handle_page_fault(&mut self, vcpu: usize) -> Result<()> {
        let ipa = self.vcpus[vcpu].fault.addr();
        match self.devices.find_by_ipa(ipa) {
            Some(idx) => {
                let online = self.online_mask();
                let Vm {
                    host,
                    vcpus,
                    devices,
                    vgic,
                    ..
                } = self;
                let fault = &mut vcpus[vcpu].fault;
                let dev = devices.get_mut(idx);
                let desc = dev.desc;
                trace!(
                    "[{}] {} fault @ {:#x} from PC {:#x}",
                    desc.name,
                    if fault.is_read() { "read" } else { "write" },
                    ipa,
                    fault.ip()
                );
                match &mut dev.policy {
                    DevicePolicy::RamOnly => {
                        // RAM is fully mapped at install; an abort is a hole
                        error!("[{}] fault in guest ram @ {:#x}", desc.name, ipa);
                        fault.log_fatal(host);
                        fault.abandon();
                        ErrorKind::FaultUnhandled.into()
                    }
                    DevicePolicy::Passthrough => {
                        error!("[{}] unexpected fault on passthrough range @ {:#x}", desc.name, ipa);
                        fault.log_fatal(host);
                        fault.abandon();
                        ErrorKind::FaultUnhandled.into()
                    }
                    DevicePolicy::AccessControlled(st) => handle_ac_fault(host, st, desc.name, desc.pstart, fault),
                    DevicePolicy::Emulated(st) => handle_emulated_fault(host, st, desc.pstart, fault),
                    DevicePolicy::VgicDist => handle_dist_fault(vgic, host, vcpu, online, desc.pstart, fault),
                    DevicePolicy::Custom(model) => model.handle_fault(host, &desc, fault),
                }
            }
            None => self.handle_unmapped_fault(vcpu, ipa),
        }
    }

    /// No installed device claims the IPA. With on-demand install enabled,
    /// blind-map the page and retry the instruction; otherwise fatal.
    fn handle_unmapped_fault(&mut self, vcpu: usize, ipa: usize) -> Result<()> {
        let ondemand = self.ondemand_install;
        let Vm { host, vcpus, .. } = self;
        let fault = &mut vcpus[vcpu].fault;
        if ondemand {
            let page = round_down(ipa, PAGE_SIZE);
            if page == 0 {
                error!("VM fault on IPA page 0");
            } else if blind_map_page(host, ipa).is_ok() {
                warn!("Blindly mapped @ {:#x} for PC {:#x}", ipa, fault.ip());
                return fault.restart(host);
            } else {
                error!("Unhandled fault on address {:#x}", ipa);
            }
        } else {
            error!("no device claims fault IPA {:#x}", ipa);
        }
        fault.log_fatal(host);
        fault.abandon();
        ErrorKind::FaultUnhandled.into()
    }

    /// Translation and NOP hypercalls; anything else kills the VM.
    fn handle_syscall(&mut self, vcpu: usize, syscall: usize, pc: usize) -> Result<()> {
        let mut regs = self.host.vcpu_read_ctx(vcpu)?;
        regs.pc = regs.pc.wrapping_add(4);
        trace!("Syscall {} from [{}]", syscall, self.name());
        match syscall {
            SYSCALL_PA_TO_IPA => {
                let ipa = self.host.pa_to_ipa(regs.gpr(0) as usize)?;
                regs.set_gpr(0, ipa as u32);
            }
            SYSCALL_IPA_TO_PA => {
                let ipa = regs.gpr(0) as usize;
                let pa = match self.host.ipa_to_pa(ipa) {
                    Ok(pa) => pa,
                    Err(_) => {
                        // nothing mapped there yet: back the page on demand
                        // and retranslate
                        if blind_map_page(&mut self.host, ipa).is_err() {
                            warn!("Could not map address for IPA translation: {:#x}", ipa);
                            self.host.vcpu_write_ctx(vcpu, &regs)?;
                            return self.host.reply_now();
                        }
                        self.host.ipa_to_pa(ipa)?
                    }
                };
                regs.set_gpr(0, pa as u32);
            }
            SYSCALL_NOP => {}
            _ => {
                error!("Bad syscall from [{}]: scno {} at PC {:#x}", self.name(), syscall, pc);
                return ErrorKind::FaultUnhandled.into();
            }
        }
        self.host.vcpu_write_ctx(vcpu, &regs)?;
        self.host.reply_now()
    }
}

/// Back the page holding `ipa` with whatever the host can provide:
/// passthrough frames first, fresh RAM second.
fn blind_map_page<H: VmmHost>(host: &mut H, ipa: usize) -> Result<()> {
    let page = round_down(ipa, PAGE_SIZE);
    if host.map_passthrough(page, PAGE_SIZE).is_ok() {
        return Ok(());
    }
    host.map_ram(page, PAGE_SIZE).map(|_| ())
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;
    use crate::arch::hsr;
    use crate::arch::psr::CPSR_THUMB;
    use crate::device::{AcAction, CustomDevice, DevId, DeviceDesc};
    use crate::fault::Fault;
    use crate::host::mock::MockHost;
    use crate::host::DeviceFrame;
    use crate::vm::VmConfig;
    use alloc::sync::Arc;
    use spin::Mutex;

    const EMU_BASE: usize = 0x3000_0000;
    const DIST_BASE: usize = 0x1048_1000;
    const GIC_CPU_BASE: usize = 0x1048_2000;

    fn config() -> VmConfig {
        VmConfig {
            name: "linux",
            id: 0,
            ondemand_install: false,
            errata_thumb_rt: false,
        }
    }

    fn vm_with_emulated() -> (Vm<MockHost>, DeviceFrame) {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        let frame = vm
            .install_emulated_device(DeviceDesc {
                devid: DevId::Custom,
                name: "emu",
                pstart: EMU_BASE,
                size: 0x1000,
            })
            .unwrap();
        (vm, frame)
    }

    fn ack_record(host: &mut MockHost, virq: u32, _token: usize) {
        host.acked.push(virq);
    }

    #[test]
    fn thumb_store_reaches_the_device() {
        // STR r3, [r0] (0x6003) in Thumb state, syndrome invalid
        let (mut vm, frame) = vm_with_emulated();
        vm.host.ctx(0).cpsr |= CPSR_THUMB;
        vm.host.ctx(0).pc = 0x8000;
        vm.host.ctx(0).set_gpr(3, 0xcafe_babe);
        vm.host.load_text(0x8000, &0x0000_6003u32.to_le_bytes());

        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: EMU_BASE,
            fsr: hsr::HSR_WNR,
            ip: 0x8000,
        })
        .unwrap();

        assert_eq!(frame.read32(0), 0xcafe_babe);
        // 16-bit instruction: PC steps by 2, one reply sent
        assert_eq!(vm.host.ctx(0).pc, 0x8002);
        assert_eq!(vm.host.sent.len(), 1);
    }

    #[test]
    fn ldrd_two_stage_through_the_loop() {
        // LDRD r4, r5, [r0] against an emulated range
        let (mut vm, frame) = vm_with_emulated();
        frame.write32(0, 0x1111_1111);
        frame.write32(4, 0x2222_2222);
        vm.host.ctx(0).cpsr |= CPSR_THUMB;
        vm.host.ctx(0).pc = 0x8000;
        vm.host.load_text(0x8000, &0x4500_e9d0u32.to_le_bytes());

        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: EMU_BASE,
            fsr: 0,
            ip: 0x8000,
        })
        .unwrap();

        assert_eq!(vm.host.ctx(0).gpr(4), 0x1111_1111);
        assert_eq!(vm.host.ctx(0).gpr(5), 0x2222_2222);
        // PC advances by 4 exactly once
        assert_eq!(vm.host.ctx(0).pc, 0x8004);
        assert_eq!(vm.host.sent.len(), 1);
    }

    #[test]
    fn access_control_denial_keeps_device_value() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        let mask = Arc::new(Mutex::new(vec![0u32]));
        vm.install_ac_device(
            DeviceDesc {
                devid: DevId::Uart0,
                name: "uart0",
                pstart: 0x1398_0000,
                size: 0x1000,
            },
            mask,
            AcAction::ReportAndMask,
        )
        .unwrap();
        vm.host.ctx(0).set_gpr(1, 0x1234);

        let fsr = hsr::HSR_SYNDROME_VALID | hsr::HSR_INST32 | hsr::HSR_WNR | (1 << 16) | (2 << 22);
        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: 0x1398_0000,
            fsr,
            ip: 0x8000,
        })
        .unwrap();
        // ULCON is fully denied: the write is dropped, the guest restarted
        assert_eq!(vm.host.sent.len(), 1);
    }

    #[test]
    fn oversized_mask_is_rejected() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        let mask = Arc::new(Mutex::new(vec![0u32; 0x2000 / 4]));
        let err = vm
            .install_ac_device(
                DeviceDesc {
                    devid: DevId::Uart0,
                    name: "uart0",
                    pstart: 0x1398_0000,
                    size: 0x1000,
                },
                mask,
                AcAction::MaskOnly,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn vgic_enable_assert_maintenance_cycle() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.install_vgic(DIST_BASE, GIC_CPU_BASE).unwrap();
        vm.virq_new(35, ack_record, 0).unwrap();
        vm.vgic.dist.enable = 1;
        assert_eq!(vm.host.gic_vcpu_maps, vec![(GIC_CPU_BASE, PAGE_SIZE)]);

        // guest writes ISENABLER1 |= BIT(3)
        vm.host.ctx(0).set_gpr(1, 1 << 3);
        let fsr = hsr::HSR_SYNDROME_VALID | hsr::HSR_INST32 | hsr::HSR_WNR | (1 << 16) | (2 << 22);
        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: DIST_BASE + 0x104,
            fsr,
            ip: 0x8000,
        })
        .unwrap();
        vm.host.acked.clear();

        // the device asserts IRQ 35: loaded into slot 0, group 0
        vm.handle_event(VmEvent::VirqAssert { virq: 35 }).unwrap();
        assert_eq!(vm.host.injected, vec![(0, 0, 35)]);

        // guest EOI drains the list register
        vm.handle_event(VmEvent::VgicMaintenance { vcpu: 0, idx: 0 }).unwrap();
        assert_eq!(vm.host.acked, vec![35]);
        assert_eq!(vm.vgic.lr(0, 0), None);
        assert!(!vm.vgic.is_pending(0, 35));
        assert_eq!(vm.host.immediate_replies, 1);
    }

    #[test]
    fn wfi_parks_until_assertion() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.install_vgic(DIST_BASE, GIC_CPU_BASE).unwrap();
        vm.virq_new(35, ack_record, 0).unwrap();
        vm.vgic.dist.enable = 1;
        vm.vgic.set_enable(0, 35, true);
        vm.host.ctx(0).pc = 0x8000;

        vm.handle_event(VmEvent::VcpuFault { vcpu: 0, hsr: HSR_WFI }).unwrap();
        // no reply: the vCPU stays suspended
        assert!(vm.host.sent.is_empty());
        assert!(vm.vcpu(0).wfi_pending);

        vm.handle_event(VmEvent::VirqAssert { virq: 35 }).unwrap();
        assert_eq!(vm.host.injected, vec![(0, 0, 35)]);
        // WFI stepped over, guest restarted
        assert_eq!(vm.host.ctx(0).pc, 0x8004);
        assert_eq!(vm.host.sent.len(), 1);
        assert!(!vm.vcpu(0).wfi_pending);
    }

    #[test]
    fn unknown_vcpu_fault_is_fatal() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        let err = vm
            .handle_event(VmEvent::VcpuFault {
                vcpu: 0,
                hsr: 0x1234_5678,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FaultUnhandled);
    }

    #[test]
    fn nop_syscall_steps_and_replies() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.host.ctx(0).pc = 0x9000;
        vm.handle_event(VmEvent::UnknownSyscall {
            vcpu: 0,
            syscall: SYSCALL_NOP,
            pc: 0x9000,
        })
        .unwrap();
        assert_eq!(vm.host.ctx(0).pc, 0x9004);
        assert_eq!(vm.host.immediate_replies, 1);
    }

    #[test]
    fn translation_syscalls() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.host.ctx(0).set_gpr(0, 0x8000_0000);
        vm.handle_event(VmEvent::UnknownSyscall {
            vcpu: 0,
            syscall: SYSCALL_IPA_TO_PA,
            pc: 0x9000,
        })
        .unwrap();
        assert_eq!(vm.host.ctx(0).gpr(0), 0xc000_0000);

        vm.host.ctx(0).set_gpr(0, 0xc000_0000);
        vm.handle_event(VmEvent::UnknownSyscall {
            vcpu: 0,
            syscall: SYSCALL_PA_TO_IPA,
            pc: 0x9004,
        })
        .unwrap();
        assert_eq!(vm.host.ctx(0).gpr(0), 0x8000_0000);
    }

    #[test]
    fn ipa_to_pa_maps_ram_on_demand() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.host.fail_passthrough = true;
        vm.host.unmapped_ipas.push(0x8000_0000);
        vm.host.ctx(0).pc = 0x9000;
        vm.host.ctx(0).set_gpr(0, 0x8000_0040);
        vm.handle_event(VmEvent::UnknownSyscall {
            vcpu: 0,
            syscall: SYSCALL_IPA_TO_PA,
            pc: 0x9000,
        })
        .unwrap();
        // the missing page was backed with RAM, then translated
        assert_eq!(vm.host.ram_maps, vec![(0x8000_0000, PAGE_SIZE)]);
        assert_eq!(vm.host.ctx(0).gpr(0), 0xc000_0040);
        assert_eq!(vm.host.ctx(0).pc, 0x9004);
        assert_eq!(vm.host.immediate_replies, 1);
    }

    #[test]
    fn ipa_to_pa_unmappable_is_not_fatal() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.host.fail_passthrough = true;
        vm.host.fail_ram = true;
        vm.host.unmapped_ipas.push(0x8000_0000);
        vm.host.ctx(0).pc = 0x9000;
        vm.host.ctx(0).set_gpr(0, 0x8000_0040);
        vm.handle_event(VmEvent::UnknownSyscall {
            vcpu: 0,
            syscall: SYSCALL_IPA_TO_PA,
            pc: 0x9000,
        })
        .unwrap();
        // r0 untouched, guest still restarted past the hypercall
        assert_eq!(vm.host.ctx(0).gpr(0), 0x8000_0040);
        assert_eq!(vm.host.ctx(0).pc, 0x9004);
        assert_eq!(vm.host.immediate_replies, 1);
    }

    #[test]
    fn unknown_syscall_is_fatal() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        let err = vm
            .handle_event(VmEvent::UnknownSyscall {
                vcpu: 0,
                syscall: 99,
                pc: 0x9000,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FaultUnhandled);
    }

    #[test]
    fn unmapped_fault_is_fatal_by_default() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        let fsr = hsr::HSR_SYNDROME_VALID | hsr::HSR_INST32 | hsr::HSR_WNR | (1 << 16) | (2 << 22);
        let err = vm
            .handle_event(VmEvent::VmFault {
                vcpu: 0,
                is_prefetch: false,
                addr: 0x5000_0000,
                fsr,
                ip: 0x8000,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FaultUnhandled);
        assert!(vm.host.sent.is_empty());
    }

    #[test]
    fn ondemand_install_passthrough_then_ram() {
        let mut cfg = config();
        cfg.ondemand_install = true;
        let mut vm = Vm::new(cfg, MockHost::new()).unwrap();
        let fsr = hsr::HSR_SYNDROME_VALID | hsr::HSR_INST32 | hsr::HSR_WNR | (1 << 16) | (2 << 22);

        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: 0x5000_0123,
            fsr,
            ip: 0x8000,
        })
        .unwrap();
        assert_eq!(vm.host.passthrough_maps, vec![(0x5000_0000, PAGE_SIZE)]);
        assert_eq!(vm.host.sent.len(), 1);

        // passthrough unavailable: fall back to RAM
        vm.host.fail_passthrough = true;
        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: 0x6000_0000,
            fsr,
            ip: 0x8000,
        })
        .unwrap();
        assert_eq!(vm.host.ram_maps, vec![(0x6000_0000, PAGE_SIZE)]);

        // both unavailable: fatal
        vm.host.fail_ram = true;
        let err = vm
            .handle_event(VmEvent::VmFault {
                vcpu: 0,
                is_prefetch: false,
                addr: 0x7000_0000,
                fsr,
                ip: 0x8000,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FaultUnhandled);
    }

    #[test]
    fn user_exception_is_fatal() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        let err = vm
            .handle_event(VmEvent::UserException { vcpu: 0, ip: 0x8000 })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FaultUnhandled);
    }

    struct TickDevice {
        writes: usize,
    }

    impl CustomDevice<MockHost> for TickDevice {
        fn handle_fault(&mut self, host: &mut MockHost, _desc: &DeviceDesc, fault: &mut Fault) -> Result<()> {
            if fault.is_read() {
                fault.set_data(self.writes as u32);
            } else {
                self.writes += 1;
            }
            fault.advance(host)
        }
    }

    #[test]
    fn custom_device_dispatch() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.install_custom_device(
            DeviceDesc {
                devid: DevId::Custom,
                name: "tick",
                pstart: 0x4400_0000,
                size: 0x1000,
            },
            Box::new(TickDevice { writes: 0 }),
        )
        .unwrap();
        vm.host.ctx(0).set_gpr(1, 7);
        let write = hsr::HSR_SYNDROME_VALID | hsr::HSR_INST32 | hsr::HSR_WNR | (1 << 16) | (2 << 22);
        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: 0x4400_0000,
            fsr: write,
            ip: 0x8000,
        })
        .unwrap();

        let read = hsr::HSR_SYNDROME_VALID | hsr::HSR_INST32 | (2 << 16) | (2 << 22);
        vm.handle_event(VmEvent::VmFault {
            vcpu: 0,
            is_prefetch: false,
            addr: 0x4400_0000,
            fsr: read,
            ip: 0x8004,
        })
        .unwrap();
        assert_eq!(vm.host.ctx(0).gpr(2), 1);
    }

    #[test]
    fn run_drains_events_until_fatal() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.host.events.push_back(VmEvent::UnknownSyscall {
            vcpu: 0,
            syscall: SYSCALL_NOP,
            pc: 0x9000,
        });
        vm.host.events.push_back(VmEvent::UserException { vcpu: 0, ip: 0x9004 });
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FaultUnhandled);
        assert_eq!(vm.host.immediate_replies, 1);
    }

    fn hook_ok(host: &mut MockHost, token: usize) -> Result<()> {
        host.hook_log.push(token);
        Ok(())
    }

    fn hook_fail(host: &mut MockHost, token: usize) -> Result<()> {
        host.hook_log.push(token);
        ErrorKind::HostError.into()
    }

    #[test]
    fn reboot_hooks_run_in_order_and_short_circuit() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.register_reboot_hook(hook_ok, 1).unwrap();
        vm.register_reboot_hook(hook_fail, 2).unwrap();
        vm.register_reboot_hook(hook_ok, 3).unwrap();
        let err = vm.reset().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HostError);
        assert_eq!(vm.host.hook_log, vec![1, 2]);
    }

    #[test]
    fn bootargs_follow_the_linux_convention() {
        let mut vm = Vm::new(config(), MockHost::new()).unwrap();
        vm.set_bootargs(0x8000, 3243, 0x4000_0100).unwrap();
        vm.start().unwrap();
        let regs = *vm.host.ctx(0);
        assert_eq!(regs.gpr(0), 0);
        assert_eq!(regs.gpr(1), 3243);
        assert_eq!(regs.gpr(2), 0x4000_0100);
        assert_eq!(regs.pc, 0x8000);
        assert_eq!(regs.cpsr & 0x1f, 0x13);
        assert_eq!(vm.host.resumed, vec![0]);
        assert!(vm.vcpu(0).is_online());
    }
}
