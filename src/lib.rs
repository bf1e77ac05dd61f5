// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! A guest VM runtime for AArch32 guests running under an ARM hypervisor
//! host kernel.
//!
//! The host kernel traps stage-2 aborts, hypercalls and GIC maintenance
//! interrupts and forwards them to this library as [`host::VmEvent`]
//! messages. The runtime decodes each trap ([`fault::Fault`],
//! [`arch::decode`]), routes it through the per-VM device table
//! ([`device`]) and replays the access against the selected backing policy,
//! while the virtual GICv2 distributor ([`vgic`]) multiplexes interrupt
//! delivery through the hardware list registers.
//!
//! Everything the runtime needs from the host kernel is collected behind the
//! [`host::VmmHost`] trait; any kernel that can deliver the message set of
//! [`host::VmEvent`] can drive a [`vm::Vm`].

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate alloc;
#[macro_use]
extern crate log;

pub mod arch;
pub mod device;
mod error;
pub mod fault;
pub mod host;
pub mod utils;
pub mod vgic;
pub mod vm;

pub use error::{Error, ErrorKind, Result};
