//! xHCI register offsets used for interrupt moderation, and the address arithmetic built on them.
//!
//! Only the handful of registers the tuner touches are modelled here. Offsets are relative to the
//! controller's MMIO base (capability registers) or to the runtime register base (`RTSOFF`).

/// Capability registers (base of MMIO region).
pub mod cap {
    /// HCSPARAMS1 (u32): structural parameters; `MaxIntrs` lives in bits 8..=15.
    pub const HCSPARAMS1: u32 = 0x04;
    /// RTSOFF (u32): runtime register space offset from the MMIO base.
    pub const RTSOFF: u32 = 0x18;
}

/// Runtime registers (base at `RTSOFF`).
pub mod runtime {
    /// Offset of interrupter register set 0.
    pub const INTERRUPTER_BASE: u64 = 0x20;
    /// Interrupter register set stride in bytes.
    pub const INTERRUPTER_STRIDE: u64 = 0x20;
    /// IMOD register offset within an interrupter register set.
    pub const IMOD: u64 = 0x04;
}

/// Number of interrupters advertised by an HCSPARAMS1 value.
pub const fn max_interrupters(hcsparams1: u32) -> u32 {
    (hcsparams1 >> 8) & 0xff
}

/// Runtime register base given the MMIO base and the RTSOFF register value.
pub fn runtime_base(mmio_base: u64, rtsoff_value: u32) -> Option<u64> {
    mmio_base.checked_add(u64::from(rtsoff_value))
}

/// Physical address of interrupter `index`'s IMOD register.
pub fn interrupter_imod_address(runtime_base: u64, index: u32) -> Option<u64> {
    let offset = runtime::INTERRUPTER_BASE
        + runtime::IMOD
        + runtime::INTERRUPTER_STRIDE * u64::from(index);
    runtime_base.checked_add(offset)
}
