// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Access-controlled device: a real register block whose reads pass through
//! while writes are filtered by a per-bit writable mask.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::fault::Fault;
use crate::host::{DeviceFrame, VmmHost};
use crate::Result;

/// What to do when a write touches bits outside the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcAction {
    ReportOnly,
    MaskOnly,
    ReportAndMask,
}

/// One writable-bit word per device register word. Caller-owned so the mask
/// can be tightened or relaxed while the VM runs; words beyond the stored
/// length are read-only to the guest.
pub type MaskStore = Arc<Mutex<Vec<u32>>>;

pub struct AcState {
    pub(crate) regs: DeviceFrame,
    pub(crate) mask: MaskStore,
    pub(crate) action: AcAction,
}

impl AcState {
    pub fn new(regs: DeviceFrame, mask: MaskStore, action: AcAction) -> AcState {
        AcState { regs, mask, action }
    }
}

pub(crate) fn handle_ac_fault<H: VmmHost>(
    host: &mut H,
    st: &mut AcState,
    name: &str,
    pstart: usize,
    fault: &mut Fault,
) -> Result<()> {
    let offset = (fault.addr() - pstart) & !0x3;

    if fault.is_read() {
        fault.set_data(st.regs.read32(offset));
        return fault.advance(host);
    }

    let mask_len = st.mask.lock().len();
    if offset < mask_len * 4 {
        let orig = st.regs.read32(offset);
        let emu = fault.emulate(host, orig)?;
        let mask = st.mask.lock()[offset / 4];
        let denied = (emu ^ orig) & !mask;
        let mut commit = emu;
        if denied != 0 {
            match st.action {
                AcAction::ReportOnly | AcAction::ReportAndMask => {
                    warn!(
                        "[ac/{}] pc {:#x} | access violation: bits {:#010x} @ {:#x}",
                        name,
                        fault.ip(),
                        denied,
                        fault.addr()
                    );
                }
                AcAction::MaskOnly => {}
            }
            match st.action {
                AcAction::MaskOnly | AcAction::ReportAndMask => {
                    commit = (emu & mask) | (orig & !mask);
                }
                AcAction::ReportOnly => {}
            }
        }
        st.regs.write32(offset, commit);
    }
    // words past the mask window stay untouched: read-only to the guest
    fault.advance(host)
}
