// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Staged storage and register access for a single assist.
//!
//! Stores are journaled and registers are changed on a scratch copy. Nothing
//! reaches real storage or the live register state until [`Staged::commit`].

use crate::engine::decline;
use crate::engine::Error;
use crate::engine::InternalError;
use crate::engine::InterruptLock;
use crate::engine::OperationKind;
use crate::policy::AddressingPolicy;
use crate::registers::CpuState;
use crate::support::AssistSupport;
use crate::support::TranslateFault;
use s370defs::Psw;
use s370defs::StorageKey;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

pub(crate) struct Staged<T, P> {
    support: T,
    /// Scratch copy of the live registers.
    pub regs: CpuState,
    writes: BTreeMap<u32, u8>,
    purge_tlb: bool,
    timer_set: bool,
    handoff: Vec<(usize, u32)>,
    _policy: PhantomData<fn() -> P>,
}

impl<T: AssistSupport, P: AddressingPolicy> Staged<T, P> {
    pub fn new(support: T, regs: CpuState) -> Self {
        Self {
            support,
            regs,
            writes: BTreeMap::new(),
            purge_tlb: false,
            timer_set: false,
            handoff: Vec::new(),
            _policy: PhantomData,
        }
    }

    /// Reads real storage through the journal, wrapping at the end of the
    /// address space.
    pub fn read(&mut self, addr: u32, bytes: &mut [u8]) -> Result<(), Error<T::Error>> {
        let addr = addr & P::ADDRESS_WRAP;
        let room = (P::ADDRESS_WRAP - addr) as usize + 1;
        if bytes.len() > room {
            let (low, high) = bytes.split_at_mut(room);
            self.read_contiguous(addr, low)?;
            return self.read(0, high);
        }
        self.read_contiguous(addr, bytes)
    }

    fn read_contiguous(&mut self, addr: u32, bytes: &mut [u8]) -> Result<(), Error<T::Error>> {
        self.support
            .read_real(addr, bytes)
            .map_err(|err| Error::MemoryAccess(addr, OperationKind::Read, err))?;
        let end = addr + bytes.len() as u32;
        for (&a, &v) in self.writes.range(addr..end) {
            bytes[(a - addr) as usize] = v;
        }
        Ok(())
    }

    /// Journals a store to real storage.
    pub fn write(&mut self, addr: u32, bytes: &[u8]) {
        for (i, &v) in bytes.iter().enumerate() {
            self.writes
                .insert(addr.wrapping_add(i as u32) & P::ADDRESS_WRAP, v);
        }
    }

    pub fn fetch_u8(&mut self, addr: u32) -> Result<u8, Error<T::Error>> {
        let mut b = [0; 1];
        self.read(addr, &mut b)?;
        Ok(b[0])
    }

    pub fn fetch_u16(&mut self, addr: u32) -> Result<u16, Error<T::Error>> {
        let mut b = [0; 2];
        self.read(addr, &mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn fetch_u32(&mut self, addr: u32) -> Result<u32, Error<T::Error>> {
        let mut b = [0; 4];
        self.read(addr, &mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn fetch_u64(&mut self, addr: u32) -> Result<u64, Error<T::Error>> {
        let mut b = [0; 8];
        self.read(addr, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Fetches a word and masks it to a real address.
    pub fn fetch_addr(&mut self, addr: u32) -> Result<u32, Error<T::Error>> {
        Ok(self.fetch_u32(addr)? & P::ADDRESS_WRAP)
    }

    pub fn fetch_struct<S: FromBytes + IntoBytes>(
        &mut self,
        addr: u32,
    ) -> Result<S, Error<T::Error>> {
        let mut value = S::new_zeroed();
        self.read(addr, value.as_mut_bytes())?;
        Ok(value)
    }

    pub fn fetch_psw(&mut self, addr: u32) -> Result<Psw, Error<T::Error>> {
        let mut b = [0; 8];
        self.read(addr, &mut b)?;
        Ok(Psw::from_bytes(b))
    }

    // Stores only journal. Storage errors surface at commit.
    pub fn store_u8(&mut self, addr: u32, value: u8) -> Result<(), Error<T::Error>> {
        self.write(addr, &[value]);
        Ok(())
    }

    pub fn store_u16(&mut self, addr: u32, value: u16) -> Result<(), Error<T::Error>> {
        self.write(addr, &value.to_be_bytes());
        Ok(())
    }

    pub fn store_u32(&mut self, addr: u32, value: u32) -> Result<(), Error<T::Error>> {
        self.write(addr, &value.to_be_bytes());
        Ok(())
    }

    pub fn store_u64(&mut self, addr: u32, value: u64) -> Result<(), Error<T::Error>> {
        self.write(addr, &value.to_be_bytes());
        Ok(())
    }

    pub fn store_psw(&mut self, addr: u32, psw: &Psw) -> Result<(), Error<T::Error>> {
        self.write(addr, &psw.to_bytes());
        Ok(())
    }

    /// Sets bits in a byte of real storage.
    pub fn or_u8(&mut self, addr: u32, bits: u8) -> Result<(), Error<T::Error>> {
        let v = self.fetch_u8(addr)?;
        self.store_u8(addr, v | bits)
    }

    /// Clears bits in a byte of real storage.
    pub fn and_not_u8(&mut self, addr: u32, bits: u8) -> Result<(), Error<T::Error>> {
        let v = self.fetch_u8(addr)?;
        self.store_u8(addr, v & !bits)
    }

    pub fn storage_key(&mut self, addr: u32) -> Result<StorageKey, Error<T::Error>> {
        let addr = addr & P::ADDRESS_WRAP;
        self.support
            .storage_key(addr)
            .map_err(|err| Error::StorageKey(addr, err))
    }

    /// LRA through the scratch CR0 and CR1.
    pub fn load_real_address(
        &mut self,
        vaddr: u32,
    ) -> Result<Result<u32, TranslateFault>, Error<T::Error>> {
        let vaddr = vaddr & P::ADDRESS_WRAP;
        let raddr = self
            .support
            .translate(self.regs.crs[0], self.regs.crs[1], vaddr)
            .map_err(|err| Error::Translate(vaddr, err))?;
        Ok(raddr.map(|raddr| raddr & P::ADDRESS_WRAP))
    }

    /// Translates a logical address under the scratch registers. Returns the
    /// real address, or declines when translation faults.
    fn real_address(&mut self, vaddr: u32) -> Result<u32, InternalError<T::Error>> {
        let vaddr = vaddr & P::ADDRESS_WRAP;
        if !self.regs.psw.dat_enabled() {
            return Ok(vaddr);
        }
        match self.load_real_address(vaddr)? {
            Ok(raddr) => Ok(raddr),
            Err(fault) => {
                tracing::trace!(vaddr, ?fault, "logical access faulted");
                Err(decline("translation exception"))
            }
        }
    }

    /// Splits a logical range at key block boundaries and yields each piece's
    /// offset, real address and length.
    fn logical_pieces(
        &mut self,
        vaddr: u32,
        len: usize,
        key: u8,
        store: bool,
    ) -> Result<Vec<(usize, u32, usize)>, InternalError<T::Error>> {
        let mut pieces = Vec::new();
        let mut done = 0;
        while done < len {
            let va = vaddr.wrapping_add(done as u32) & P::ADDRESS_WRAP;
            let in_block = (P::KEY_BLOCK - (va & (P::KEY_BLOCK - 1))) as usize;
            let n = in_block.min(len - done);
            let raddr = self.real_address(va)?;
            let sk = self.storage_key(raddr)?;
            if key != 0 && sk.access_key() != key && (store || sk.fetch_protect()) {
                return Err(decline("protection exception"));
            }
            pieces.push((done, raddr, n));
            done += n;
        }
        Ok(pieces)
    }

    /// Fetches from a logical address under the current PSW's translation and
    /// key.
    pub fn fetch_logical(
        &mut self,
        vaddr: u32,
        bytes: &mut [u8],
    ) -> Result<(), InternalError<T::Error>> {
        let key = self.regs.psw.key();
        self.fetch_logical_with_key(vaddr, bytes, key)
    }

    pub fn fetch_logical_with_key(
        &mut self,
        vaddr: u32,
        bytes: &mut [u8],
        key: u8,
    ) -> Result<(), InternalError<T::Error>> {
        for (offset, raddr, n) in self.logical_pieces(vaddr, bytes.len(), key, false)? {
            self.read(raddr, &mut bytes[offset..offset + n])?;
        }
        Ok(())
    }

    pub fn store_logical_with_key(
        &mut self,
        vaddr: u32,
        bytes: &[u8],
        key: u8,
    ) -> Result<(), InternalError<T::Error>> {
        for (offset, raddr, n) in self.logical_pieces(vaddr, bytes.len(), key, true)? {
            self.write(raddr, &bytes[offset..offset + n]);
        }
        Ok(())
    }

    /// Sets the PSW instruction address.
    pub fn branch(&mut self, ia: u32) {
        self.regs.psw.ia = ia & P::ADDRESS_WRAP;
    }

    /// BR 14.
    pub fn return_via_r14(&mut self) {
        self.branch(self.regs.gps[CpuState::R14]);
    }

    pub fn cpu_timer(&self) -> i64 {
        self.regs.cpu_timer
    }

    /// SPT. The timer interruption is re-armed at commit.
    pub fn set_cpu_timer(&mut self, value: i64) {
        self.regs.cpu_timer = value;
        self.timer_set = true;
    }

    /// PTLB at commit.
    pub fn request_tlb_purge(&mut self) {
        self.purge_tlb = true;
    }

    /// Registers passed to the software path if the assist declines.
    pub fn hand_off(&mut self, reg: usize, value: u32) {
        self.handoff.push((reg, value));
    }

    pub fn into_handoff(self) -> Vec<(usize, u32)> {
        self.handoff
    }

    /// Applies the journal and the scratch registers.
    pub fn commit(
        self,
        live: &mut CpuState,
        interrupt_lock: &InterruptLock,
    ) -> Result<(), Error<T::Error>> {
        let Self {
            mut support,
            regs,
            writes,
            purge_tlb,
            timer_set,
            ..
        } = self;

        let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
        for (addr, v) in writes {
            match runs.last_mut() {
                Some((start, data)) if *start + data.len() as u32 == addr => data.push(v),
                _ => runs.push((addr, vec![v])),
            }
        }

        // Every run must be accessible before any of them is stored.
        let mut probe = Vec::new();
        for (addr, data) in &runs {
            probe.resize(data.len(), 0);
            support
                .read_real(*addr, &mut probe)
                .map_err(|err| Error::MemoryAccess(*addr, OperationKind::Write, err))?;
        }
        for (addr, data) in &runs {
            support
                .write_real(*addr, data)
                .map_err(|err| Error::MemoryAccess(*addr, OperationKind::Write, err))?;
        }

        *live = regs;
        if timer_set {
            let _guard = interrupt_lock.lock();
            live.timer_pending = live.cpu_timer < 0;
        }
        if purge_tlb {
            support.purge_tlb();
        }
        Ok(())
    }
}
