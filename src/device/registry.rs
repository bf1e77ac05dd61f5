// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use alloc::vec::Vec;

use super::{DevId, Device, MAX_DEVICES_PER_VM};
use crate::arch::PAGE_SIZE;
use crate::error::{ErrorKind, Result};
use crate::host::VmmHost;
use crate::utils::in_range;

/// Append-only ordered table of the devices installed in one VM.
///
/// Lookup is a linear scan; the table is small and bounded by
/// [`MAX_DEVICES_PER_VM`].
pub struct DeviceTable<H: VmmHost> {
    devices: Vec<Device<H>>,
}

impl<H: VmmHost> DeviceTable<H> {
    pub fn new() -> DeviceTable<H> {
        DeviceTable { devices: Vec::new() }
    }

    /// Install a device. Ranges must be page-granular and disjoint from
    /// every installed device.
    pub fn add(&mut self, dev: Device<H>) -> Result<()> {
        if self.devices.len() >= MAX_DEVICES_PER_VM {
            error!("device table full, dropping [{}]", dev.desc.name);
            return ErrorKind::DeviceFull.into();
        }
        let pstart = dev.desc.pstart;
        let size = dev.desc.size;
        if size == 0 || size % PAGE_SIZE != 0 || pstart % PAGE_SIZE != 0 {
            error!("[{}] range {:#x}..{:#x} is not page granular", dev.desc.name, pstart, pstart + size);
            return ErrorKind::InvalidConfig.into();
        }
        if pstart.checked_add(size).is_none() {
            error!("[{}] range wraps the address space", dev.desc.name);
            return ErrorKind::InvalidConfig.into();
        }
        for other in &self.devices {
            if in_range(pstart, other.desc.pstart, other.desc.size) || in_range(other.desc.pstart, pstart, size) {
                error!(
                    "duplicated device region: prev address {:#x} size {:#x}, next address {:#x} size {:#x}",
                    other.desc.pstart, other.desc.size, pstart, size
                );
                return ErrorKind::InvalidConfig.into();
            }
        }
        self.devices.push(dev);
        Ok(())
    }

    pub fn find_by_ipa(&self, ipa: usize) -> Option<usize> {
        self.devices.iter().position(|d| in_range(ipa, d.desc.pstart, d.desc.size))
    }

    /// First installed device carrying `devid`.
    pub fn find_by_id(&self, devid: DevId) -> Option<&Device<H>> {
        self.devices.iter().find(|d| d.desc.devid == devid)
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Device<H> {
        &mut self.devices[idx]
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
