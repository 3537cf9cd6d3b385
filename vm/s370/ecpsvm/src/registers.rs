// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register state of the real engine, as seen by the assists.

use s370defs::Psw;

/// The current register state of the real engine. Assists update it only when
/// they complete.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuState {
    /// General registers 0-15.
    pub gps: [u32; 16],
    /// Floating point registers 0, 2, 4 and 6.
    pub fprs: [u64; 4],
    /// Control registers 0-15.
    pub crs: [u32; 16],
    /// The real PSW.
    pub psw: Psw,
    /// CPU timer.
    pub cpu_timer: i64,
    /// CPU timer interruption pending. Only changed under the interrupt lock.
    pub timer_pending: bool,
    /// The engine is interpreting a guest under SIE.
    pub sie_active: bool,
    /// A virtual interval timer interruption is pending for the running VM.
    pub vtimer_pending: bool,
    /// Real address of the running VM's virtual interval timer, when the
    /// virtual timer assist is on.
    pub vtimer_address: Option<u32>,
}

impl CpuState {
    /// Index of general register 0 in `gps`.
    pub const R0: usize = 0;
    /// Index of general register 1 in `gps`.
    pub const R1: usize = 1;
    /// Index of general register 2 in `gps`.
    pub const R2: usize = 2;
    /// Index of general register 3 in `gps`.
    pub const R3: usize = 3;
    /// Index of general register 4 in `gps`.
    pub const R4: usize = 4;
    /// Index of general register 5 in `gps`.
    pub const R5: usize = 5;
    /// Index of general register 6 in `gps`.
    pub const R6: usize = 6;
    /// Index of general register 7 in `gps`.
    pub const R7: usize = 7;
    /// Index of general register 8 in `gps`.
    pub const R8: usize = 8;
    /// Index of general register 9 in `gps`.
    pub const R9: usize = 9;
    /// Index of general register 10 in `gps`.
    pub const R10: usize = 10;
    /// Index of general register 11 in `gps`.
    pub const R11: usize = 11;
    /// Index of general register 12 in `gps`.
    pub const R12: usize = 12;
    /// Index of general register 13 in `gps`.
    pub const R13: usize = 13;
    /// Index of general register 14 in `gps`.
    pub const R14: usize = 14;
    /// Index of general register 15 in `gps`.
    pub const R15: usize = 15;

    /// Control register 6, the assist control register.
    pub fn cr6(&self) -> s370defs::AssistControl {
        self.crs[6].into()
    }
}
