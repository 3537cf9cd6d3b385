// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Trait for callouts from the assist engine to the processor model.

use s370defs::StorageKey;

/// Reason the "load real address" primitive could not translate an address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TranslateFault {
    /// Segment table length exceeded or segment invalid.
    Segment,
    /// Page table entry invalid.
    Page,
    /// Page table length exceeded.
    Length,
}

impl TranslateFault {
    /// The condition code LRA would set.
    pub fn condition_code(self) -> u8 {
        match self {
            TranslateFault::Segment => 1,
            TranslateFault::Page => 2,
            TranslateFault::Length => 3,
        }
    }
}

/// Trait for callouts from the assist engine to the processor model that owns
/// real storage, storage keys and the translation lookaside buffer.
///
/// All addresses passed to this trait are real addresses already masked to the
/// addressing policy's width, except for the virtual address passed to
/// [`AssistSupport::translate`].
pub trait AssistSupport {
    /// The error type for storage access failures.
    type Error;

    /// Reads real storage. Sets the reference bit of every key block touched.
    fn read_real(&mut self, addr: u32, bytes: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes real storage. Sets the reference and change bits of every key
    /// block touched.
    fn write_real(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Returns the storage key of the key block containing `addr`.
    fn storage_key(&mut self, addr: u32) -> Result<StorageKey, Self::Error>;

    /// Translates `vaddr` through the segment table designated by `cr1`, with
    /// the page and segment sizes selected by `cr0`, as LRA would.
    ///
    /// The outer result reports a failure of the primitive itself; the inner
    /// result reports a translation exception.
    fn translate(
        &mut self,
        cr0: u32,
        cr1: u32,
        vaddr: u32,
    ) -> Result<Result<u32, TranslateFault>, Self::Error>;

    /// Purges the translation lookaside buffer.
    fn purge_tlb(&mut self);
}

impl<T: AssistSupport + ?Sized> AssistSupport for &mut T {
    type Error = T::Error;

    fn read_real(&mut self, addr: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        (*self).read_real(addr, bytes)
    }

    fn write_real(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        (*self).write_real(addr, bytes)
    }

    fn storage_key(&mut self, addr: u32) -> Result<StorageKey, Self::Error> {
        (*self).storage_key(addr)
    }

    fn translate(
        &mut self,
        cr0: u32,
        cr1: u32,
        vaddr: u32,
    ) -> Result<Result<u32, TranslateFault>, Self::Error> {
        (*self).translate(cr0, cr1, vaddr)
    }

    fn purge_tlb(&mut self) {
        (*self).purge_tlb()
    }
}
