// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Emulated-frame device: the hypervisor prepares register state in a frame
//! the guest reads directly, while every write traps and is replayed here.
//!
//! Reads at the hardware level must be side-effect free, so this policy is
//! unsuitable for FIFO-type devices; those need a custom model.

use crate::fault::Fault;
use crate::host::{DeviceFrame, VmmHost};
use crate::Result;

pub struct EmuFrameState {
    pub(crate) frame: DeviceFrame,
}

impl EmuFrameState {
    pub fn new(frame: DeviceFrame) -> EmuFrameState {
        EmuFrameState { frame }
    }

    /// Hypervisor-side view, e.g. for presetting reset values.
    pub fn frame(&self) -> DeviceFrame {
        self.frame
    }
}

pub(crate) fn handle_emulated_fault<H: VmmHost>(
    host: &mut H,
    st: &mut EmuFrameState,
    pstart: usize,
    fault: &mut Fault,
) -> Result<()> {
    let offset = (fault.addr() - pstart) & !0x3;
    if fault.is_read() {
        // reads are served zero-copy from the guest mapping and normally
        // never trap; answer from the frame if one arrives anyway
        fault.set_data(st.frame.read32(offset));
        fault.advance(host)
    } else {
        let orig = st.frame.read32(offset);
        let val = fault.emulate(host, orig)?;
        st.frame.write32(offset, val);
        fault.advance(host)
    }
}
