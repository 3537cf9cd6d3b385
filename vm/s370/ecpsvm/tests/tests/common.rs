// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use ecpsvm::AssistRegistry;
use ecpsvm::AssistSupport;
use ecpsvm::CpuState;
use ecpsvm::EcpsVm;
use ecpsvm::EcpsVmConfig;
use ecpsvm::InterruptLock;
use ecpsvm::TranslateFault;
use s370defs::AssistControl;
use s370defs::PageTableEntry;
use s370defs::Psw;
use s370defs::PswStates;
use s370defs::SegmentTableDesignation;
use s370defs::SegmentTableEntry;
use s370defs::StorageKey;
use std::sync::Arc;
use std::sync::Once;

pub const STORAGE_SIZE: usize = 0x10_0000;
const KEY_BLOCK: usize = 0x800;

#[derive(Debug, PartialEq, Eq)]
pub struct OutOfRange(pub u32);

/// Flat real storage with 2K storage keys, 64K segments and 4K pages.
#[derive(Debug, Clone, PartialEq)]
pub struct TestMachine {
    pub storage: Vec<u8>,
    pub keys: Vec<StorageKey>,
    pub purges: usize,
}

impl TestMachine {
    pub fn new() -> Self {
        Self {
            storage: vec![0; STORAGE_SIZE],
            keys: vec![StorageKey::new(); STORAGE_SIZE / KEY_BLOCK],
            purges: 0,
        }
    }

    pub fn put(&mut self, addr: u32, bytes: &[u8]) {
        let addr = addr as usize;
        self.storage[addr..addr + bytes.len()].copy_from_slice(bytes);
    }

    pub fn get(&self, addr: u32, len: usize) -> &[u8] {
        let addr = addr as usize;
        &self.storage[addr..addr + len]
    }

    pub fn put_u8(&mut self, addr: u32, v: u8) {
        self.put(addr, &[v]);
    }

    pub fn put_u16(&mut self, addr: u32, v: u16) {
        self.put(addr, &v.to_be_bytes());
    }

    pub fn put_u32(&mut self, addr: u32, v: u32) {
        self.put(addr, &v.to_be_bytes());
    }

    pub fn put_u64(&mut self, addr: u32, v: u64) {
        self.put(addr, &v.to_be_bytes());
    }

    pub fn put_psw(&mut self, addr: u32, psw: &Psw) {
        self.put(addr, &psw.to_bytes());
    }

    pub fn u8(&self, addr: u32) -> u8 {
        self.get(addr, 1)[0]
    }

    pub fn u16(&self, addr: u32) -> u16 {
        u16::from_be_bytes(self.get(addr, 2).try_into().unwrap())
    }

    pub fn u32(&self, addr: u32) -> u32 {
        u32::from_be_bytes(self.get(addr, 4).try_into().unwrap())
    }

    pub fn u64(&self, addr: u32) -> u64 {
        u64::from_be_bytes(self.get(addr, 8).try_into().unwrap())
    }

    pub fn psw(&self, addr: u32) -> Psw {
        Psw::from_bytes(self.get(addr, 8).try_into().unwrap())
    }

    pub fn key(&self, addr: u32) -> StorageKey {
        self.keys[addr as usize / KEY_BLOCK]
    }

    pub fn set_key(&mut self, addr: u32, key: StorageKey) {
        self.keys[addr as usize / KEY_BLOCK] = key;
    }

    /// Maps the 4K page at `vaddr` to `frame` through a one-segment-table,
    /// sixteen-entry page table layout. Returns the CR1 value to use.
    pub fn map(&mut self, segment_table: u32, page_table: u32, vaddr: u32, frame: u32) -> u32 {
        let sx = vaddr >> 16;
        let px = (vaddr >> 12) & 0xf;
        let ste = SegmentTableEntry::new()
            .with_page_table_dw(page_table >> 3)
            .with_page_table_length(0);
        self.put_u32(segment_table + sx * 4, ste.into());
        for i in 0..16 {
            let pte = self.u16(page_table + i * 2);
            if pte == 0 {
                self.put_u16(page_table + i * 2, PageTableEntry::new().with_invalid(true).into());
            }
        }
        let pte = PageTableEntry::new().with_frame((frame >> 12) as u16);
        self.put_u16(page_table + px * 2, pte.into());
        SegmentTableDesignation::new()
            .with_origin_64(segment_table >> 6)
            .with_length(0x0f)
            .into()
    }

    fn check(&self, addr: u32, len: usize) -> Result<(), OutOfRange> {
        if addr as usize + len > self.storage.len() {
            return Err(OutOfRange(addr));
        }
        Ok(())
    }

    fn touch(&mut self, addr: u32, len: usize, change: bool) {
        if len == 0 {
            return;
        }
        let first = addr as usize / KEY_BLOCK;
        let last = (addr as usize + len - 1) / KEY_BLOCK;
        for key in &mut self.keys[first..=last] {
            key.set_reference(true);
            if change {
                key.set_change(true);
            }
        }
    }
}

impl AssistSupport for TestMachine {
    type Error = OutOfRange;

    fn read_real(&mut self, addr: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check(addr, bytes.len())?;
        bytes.copy_from_slice(self.get(addr, bytes.len()));
        self.touch(addr, bytes.len(), false);
        Ok(())
    }

    fn write_real(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check(addr, bytes.len())?;
        self.put(addr, bytes);
        self.touch(addr, bytes.len(), true);
        Ok(())
    }

    fn storage_key(&mut self, addr: u32) -> Result<StorageKey, Self::Error> {
        self.check(addr, 1)?;
        Ok(self.key(addr))
    }

    fn translate(
        &mut self,
        _cr0: u32,
        cr1: u32,
        vaddr: u32,
    ) -> Result<Result<u32, TranslateFault>, Self::Error> {
        let std = SegmentTableDesignation::from(cr1);
        let sx = vaddr >> 16;
        if sx >= (u32::from(std.length()) + 1) * 16 {
            return Ok(Err(TranslateFault::Length));
        }
        let ste_addr = std.origin() + sx * 4;
        self.check(ste_addr, 4)?;
        let ste = SegmentTableEntry::from(self.u32(ste_addr));
        if ste.invalid() {
            return Ok(Err(TranslateFault::Segment));
        }
        let px = (vaddr >> 12) & 0xf;
        if px >= (u32::from(ste.page_table_length()) + 1) * 16 {
            return Ok(Err(TranslateFault::Length));
        }
        let pte_addr = (ste.page_table_dw() << 3) + px * 2;
        self.check(pte_addr, 2)?;
        let pte = PageTableEntry::from(self.u16(pte_addr));
        if pte.invalid() {
            return Ok(Err(TranslateFault::Page));
        }
        Ok(Ok((u32::from(pte.frame()) << 12) | (vaddr & 0xfff)))
    }

    fn purge_tlb(&mut self) {
        self.purges += 1;
    }
}

pub fn init_tracing() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    });
}

/// An engine on an installed facility with every supported assist enabled.
pub fn engine() -> EcpsVm {
    init_tracing();
    let registry = AssistRegistry::new(&EcpsVmConfig {
        available: true,
        debug: true,
        ..Default::default()
    })
    .unwrap();
    EcpsVm::new(Arc::new(registry), InterruptLock::new())
}

/// The control program running in supervisor state with CP assists on.
pub fn cp_state() -> CpuState {
    let mut state = CpuState {
        psw: Psw {
            states: PswStates::new().with_extended_control(true),
            ia: 0x1000,
            ..Default::default()
        },
        ..Default::default()
    };
    state.crs[6] = AssistControl::new().with_cp_assist(true).into();
    state.gps[14] = 0x2000;
    state
}

pub const MICBLOK: u32 = 0x800;
pub const VMBLOK: u32 = 0x1000;
pub const VPSW: u32 = VMBLOK + ecpsvm::layout::vmblok::VMPSW;

/// A virtual machine in virtual supervisor state, run in real problem state
/// with VM assists on and translation off. The MICBLOK at [`MICBLOK`] points at the virtual PSW
/// in the VMBLOK at [`VMBLOK`].
pub fn vm_setup(machine: &mut TestMachine, vpsw: &Psw) -> CpuState {
    machine.put_u32(MICBLOK + 8, VPSW);
    machine.put_psw(VPSW, vpsw);
    // MICEVMA: LPSW and SSM.
    machine.put_u8(MICBLOK + 20, 0x88);
    let mut state = CpuState {
        psw: Psw {
            system_mask: 0x03,
            states: PswStates::new()
                .with_extended_control(true)
                .with_problem_state(true)
                .with_machine_check(true),
            ia: 0x3004,
            ..Default::default()
        },
        ..Default::default()
    };
    state.crs[6] = AssistControl::new()
        .with_vm_assist(true)
        .with_micblok_dw(MICBLOK >> 3)
        .into();
    state
}

/// A supervisor state EC virtual PSW enabled for I/O and externals.
pub fn virtual_psw(ia: u32) -> Psw {
    Psw {
        system_mask: 0x03,
        states: PswStates::new().with_extended_control(true),
        ia,
        ..Default::default()
    }
}
