// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Addressing policies the engine can be instantiated with.

/// The addressing parameters of one supported machine configuration.
pub trait AddressingPolicy: 'static {
    /// Name used in log output.
    const NAME: &'static str;
    /// Mask applied to every real address.
    const ADDRESS_WRAP: u32;
    /// Mask selecting the page frame of a real address. Core tables are
    /// indexed by `(addr & FRAME_MASK) >> 8`.
    const FRAME_MASK: u32;
    /// Size of the storage area covered by one storage key.
    const KEY_BLOCK: u32;
}

/// S/370 with 24-bit addressing and split 2K storage keys.
pub enum S370 {}

impl AddressingPolicy for S370 {
    const NAME: &'static str = "S/370";
    const ADDRESS_WRAP: u32 = s370defs::ADDRESS_MASK_24;
    const FRAME_MASK: u32 = s370defs::PAGE_FRAME_MASK;
    const KEY_BLOCK: u32 = s370defs::KEY_BLOCK_2K;
}

/// S/370 with 24-bit addressing and one storage key per 4K page.
pub enum S370Key4K {}

impl AddressingPolicy for S370Key4K {
    const NAME: &'static str = "S/370 (4K keys)";
    const ADDRESS_WRAP: u32 = s370defs::ADDRESS_MASK_24;
    const FRAME_MASK: u32 = s370defs::PAGE_FRAME_MASK;
    const KEY_BLOCK: u32 = s370defs::PAGE_SIZE;
}
