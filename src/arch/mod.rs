// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Armvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! AArch32 trap decoding: PSR modes, HYP syndrome fields, the guest register
//! file and the load/store instruction decoder.

mod context_frame;
pub mod decode;
pub mod hsr;
pub mod psr;

pub use context_frame::Aarch32ContextFrame;
pub use psr::ProcessorMode;

pub const PAGE_SIZE: usize = 0x1000;
