// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The ECPS:VM assist engine for a hosted S/370 processor model.
//!
//! The engine performs, on behalf of the processor model, the microcode
//! assists that speed up a VM/370 control program: VM assists for privileged
//! instructions issued by a virtual machine, and CP assists for the control
//! program's own hot paths. Every assist either completes, committing all of
//! its storage and register effects at once, or declines and leaves the
//! processor exactly as it was.

#![forbid(unsafe_code)]

mod alloc;
mod config;
mod dispatch;
mod engine;
mod gate;
pub mod layout;
mod lctl;
mod locate;
mod pagelock;
mod policy;
mod registers;
mod registry;
mod staged;
mod support;
mod transition;
mod vmassist;

pub use config::EcpsVmConfig;
pub use config::DEFAULT_LEVEL;
pub use engine::Disposition;
pub use engine::EcpsVm;
pub use engine::Error;
pub use engine::InterruptLock;
pub use engine::OperationKind;
pub use engine::Outcome;
pub use lctl::apply as apply_lctl;
pub use lctl::register_range;
pub use lctl::LctlReject;
pub use policy::AddressingPolicy;
pub use policy::S370Key4K;
pub use policy::S370;
pub use registers::CpuState;
pub use registry::Assist;
pub use registry::AssistClass;
pub use registry::AssistRegistry;
pub use registry::AssistStatistic;
pub use registry::Selector;
pub use registry::StatisticsReport;
pub use registry::UnknownAssist;
pub use support::AssistSupport;
pub use support::TranslateFault;
pub use transition::check_transition;
pub use transition::TransitionReject;
