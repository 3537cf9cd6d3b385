// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions relating to the System/370 architecture: the program status
//! word, storage keys, the fixed prefixed storage area, dynamic address
//! translation tables, and the control register 6 assist controls.

#![no_std]
#![forbid(unsafe_code)]

use bitfield_struct::bitfield;

/// Real addresses on S/370 are 24 bits wide.
pub const ADDRESS_MASK_24: u32 = 0x00ff_ffff;

/// Size of a 4K page.
pub const PAGE_SIZE: u32 = 0x1000;
/// The page frame bits of a real address.
pub const PAGE_FRAME_MASK: u32 = 0x00ff_f000;
/// Size of the storage block a 2K storage key covers.
pub const KEY_BLOCK_2K: u32 = 0x800;

/// Fixed storage locations in the prefixed storage area.
pub mod psa {
    /// External old PSW.
    pub const EXTERNAL_OLD_PSW: u32 = 0x18;
    /// SVC old PSW.
    pub const SVC_OLD_PSW: u32 = 0x20;
    /// Program old PSW.
    pub const PROGRAM_OLD_PSW: u32 = 0x28;
    /// Machine-check old PSW.
    pub const MACHINE_CHECK_OLD_PSW: u32 = 0x30;
    /// I/O old PSW.
    pub const IO_OLD_PSW: u32 = 0x38;
    /// The interval timer word.
    pub const INTERVAL_TIMER: u32 = 0x50;
    /// External new PSW.
    pub const EXTERNAL_NEW_PSW: u32 = 0x58;
    /// SVC new PSW.
    pub const SVC_NEW_PSW: u32 = 0x60;
    /// Program new PSW.
    pub const PROGRAM_NEW_PSW: u32 = 0x68;
    /// Machine-check new PSW.
    pub const MACHINE_CHECK_NEW_PSW: u32 = 0x70;
    /// I/O new PSW.
    pub const IO_NEW_PSW: u32 = 0x78;
    /// External interruption code, stored only for EC-mode interruptions.
    pub const EXTERNAL_INTERRUPTION_CODE: u32 = 0x84;
    /// ILC and SVC number, stored only for EC-mode interruptions.
    pub const SVC_INTERRUPTION_CODE: u32 = 0x88;
    /// ILC and program interruption code, stored only for EC-mode interruptions.
    pub const PROGRAM_INTERRUPTION_CODE: u32 = 0x8c;
}

/// BC mode system mask: channels 0 to 5.
pub const BC_SYSMASK_CHANNELS_0_5: u8 = 0xfc;
/// BC mode system mask: channel 6 and up.
pub const BC_SYSMASK_CHANNELS_6_UP: u8 = 0x02;
/// EC mode system mask: program event recording.
pub const EC_SYSMASK_PER: u8 = 0x40;
/// EC mode system mask: dynamic address translation.
pub const EC_SYSMASK_DAT: u8 = 0x04;
/// EC mode system mask: I/O.
pub const EC_SYSMASK_IO: u8 = 0x02;
/// EC mode system mask bits that must be zero.
pub const EC_SYSMASK_RESERVED: u8 = 0xb8;
/// System mask, both modes: external interruptions.
pub const SYSMASK_EXTERNAL: u8 = 0x01;

/// The second byte of the PSW: protection key and machine states.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct PswStates {
    /// P bit.
    pub problem_state: bool,
    /// W bit.
    pub wait: bool,
    /// M bit.
    pub machine_check: bool,
    /// EC mode when set, BC mode otherwise.
    pub extended_control: bool,
    /// Protection key.
    #[bits(4)]
    pub key: u8,
}

/// A decoded S/370 program status word.
///
/// The interruption code and ILC only exist in the BC-mode format; they
/// decode as zero from an EC-mode PSW and are dropped when encoding one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Psw {
    /// The first byte.
    pub system_mask: u8,
    /// The second byte.
    pub states: PswStates,
    /// BC mode only.
    pub interruption_code: u16,
    /// Instruction length code, BC mode only.
    pub ilc: u8,
    /// Condition code.
    pub cc: u8,
    /// Program mask.
    pub program_mask: u8,
    /// Instruction address.
    pub ia: u32,
}

impl Psw {
    /// Decodes a PSW in the format its EC bit selects.
    pub fn from_bytes(b: [u8; 8]) -> Self {
        let states = PswStates::from(b[1]);
        let ia = u32::from_be_bytes([0, b[5], b[6], b[7]]);
        if states.extended_control() {
            Self {
                system_mask: b[0],
                states,
                interruption_code: 0,
                ilc: 0,
                cc: (b[2] >> 4) & 3,
                program_mask: b[2] & 0xf,
                ia,
            }
        } else {
            Self {
                system_mask: b[0],
                states,
                interruption_code: u16::from_be_bytes([b[2], b[3]]),
                ilc: b[4] >> 6,
                cc: (b[4] >> 4) & 3,
                program_mask: b[4] & 0xf,
                ia,
            }
        }
    }

    /// Encodes the PSW in the format its EC bit selects.
    pub fn to_bytes(&self) -> [u8; 8] {
        let ia = (self.ia & ADDRESS_MASK_24).to_be_bytes();
        let cc_pm = ((self.cc & 3) << 4) | (self.program_mask & 0xf);
        if self.states.extended_control() {
            [
                self.system_mask,
                self.states.into(),
                cc_pm,
                0,
                0,
                ia[1],
                ia[2],
                ia[3],
            ]
        } else {
            let code = self.interruption_code.to_be_bytes();
            [
                self.system_mask,
                self.states.into(),
                code[0],
                code[1],
                ((self.ilc & 3) << 6) | cc_pm,
                ia[1],
                ia[2],
                ia[3],
            ]
        }
    }

    /// EC mode.
    pub fn is_ec(&self) -> bool {
        self.states.extended_control()
    }

    /// Wait state.
    pub fn is_wait(&self) -> bool {
        self.states.wait()
    }

    /// Problem state.
    pub fn is_problem_state(&self) -> bool {
        self.states.problem_state()
    }

    /// Protection key.
    pub fn key(&self) -> u8 {
        self.states.key()
    }

    /// Whether dynamic address translation applies to logical addresses.
    pub fn dat_enabled(&self) -> bool {
        self.is_ec() && self.system_mask & EC_SYSMASK_DAT != 0
    }

    /// Whether external interruptions are enabled.
    pub fn external_enabled(&self) -> bool {
        self.system_mask & SYSMASK_EXTERNAL != 0
    }
}

/// A storage key as held for each key block of real storage.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct StorageKey {
    _reserved: bool,
    /// Change bit.
    pub change: bool,
    /// Reference bit.
    pub reference: bool,
    /// Fetch protection.
    pub fetch_protect: bool,
    /// Access control bits.
    #[bits(4)]
    pub access_key: u8,
}

/// Control register 6 as used by the VM assist facility.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct AssistControl {
    #[bits(3)]
    _reserved: u8,
    /// MICBLOK address in doublewords.
    #[bits(21)]
    pub micblok_dw: u32,
    /// Virtual interval timer assist.
    pub virtual_timer: bool,
    /// CP assists.
    pub cp_assist: bool,
    /// Shadow table bypass.
    pub shadow_tables: bool,
    /// SVC assist off.
    pub svc_inhibit: bool,
    /// The virtual machine is S/360 only.
    pub s360_only: bool,
    /// ISK assist off.
    pub isk_inhibit: bool,
    /// The virtual machine is in virtual problem state.
    pub virtual_problem_state: bool,
    /// VM assists.
    pub vm_assist: bool,
}

impl AssistControl {
    /// The real address of the MICBLOK.
    pub fn micblok(&self) -> u32 {
        self.micblok_dw() << 3
    }

    /// The flag byte alone, as kept in the VMBLOK copy of CR6.
    pub fn flags(&self) -> u8 {
        (u32::from(*self) >> 24) as u8
    }
}

/// CR6 flag byte: VM assists.
pub const CR6_VM_ASSIST: u8 = 0x80;
/// CR6 flag byte: virtual problem state.
pub const CR6_VIRTUAL_PROBLEM: u8 = 0x40;
/// CR6 flag byte: ISK assist off.
pub const CR6_ISK_INHIBIT: u8 = 0x20;
/// CR6 flag byte: S/360 only.
pub const CR6_S360_ONLY: u8 = 0x10;
/// CR6 flag byte: SVC assist off.
pub const CR6_SVC_INHIBIT: u8 = 0x08;
/// CR6 flag byte: shadow table bypass.
pub const CR6_SHADOW_TABLES: u8 = 0x04;
/// CR6 flag byte: CP assists.
pub const CR6_CP_ASSIST: u8 = 0x02;
/// CR6 flag byte: virtual interval timer.
pub const CR6_VIRTUAL_TIMER: u8 = 0x01;

/// Segment table entry, 64K segments with 4K pages.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SegmentTableEntry {
    /// I bit.
    pub invalid: bool,
    #[bits(2)]
    _reserved: u8,
    /// Page table origin in doublewords.
    #[bits(21)]
    pub page_table_dw: u32,
    #[bits(4)]
    _reserved2: u8,
    /// Page table length, in units of 16 entries less one.
    #[bits(4)]
    pub page_table_length: u8,
}

/// Page table entry, 4K pages.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    #[bits(3)]
    _reserved: u8,
    /// I bit.
    pub invalid: bool,
    /// Page frame number.
    #[bits(12)]
    pub frame: u16,
}

/// Control register 1: segment table designation.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SegmentTableDesignation {
    #[bits(6)]
    _reserved: u8,
    /// Segment table origin in units of 64 bytes.
    #[bits(18)]
    pub origin_64: u32,
    /// Segment table length, in units of 16 entries less one.
    pub length: u8,
}

impl SegmentTableDesignation {
    /// The real address of the segment table.
    pub fn origin(&self) -> u32 {
        self.origin_64() << 6
    }
}
