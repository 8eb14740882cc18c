//! Event kinds and their counter encodings
//!
//! The agent watches four precise memory events. Each has a symbolic
//! descriptor (the libpfm4 name) and a raw PMU encoding. The raw
//! encodings below are Intel `MEM_INST_RETIRED` (event 0xD0) umasks,
//! valid from Skylake onwards.
//!
//! Descriptors may also be given in perf's raw form, `r<hex>`, where
//! the hex value is `umask << 8 | event`.

use core::fmt;

use crate::error::{HptError, HptResult};

/// `MEM_INST_RETIRED` event select
const MEM_INST_RETIRED: u64 = 0xd0;

/// The four memory events sampled per thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Load,
    Store,
    TlbMissLoad,
    TlbMissStore,
}

impl EventKind {
    /// Every tracked kind, in session start order
    pub const ALL: [EventKind; 4] = [
        EventKind::TlbMissLoad,
        EventKind::TlbMissStore,
        EventKind::Load,
        EventKind::Store,
    ];

    /// Symbolic descriptor for this kind
    pub const fn descriptor(self) -> &'static str {
        match self {
            EventKind::Load => "MEM_INST_RETIRED:ALL_LOADS",
            EventKind::Store => "MEM_INST_RETIRED:ALL_STORES",
            EventKind::TlbMissLoad => "MEM_INST_RETIRED:STLB_MISS_LOADS",
            EventKind::TlbMissStore => "MEM_INST_RETIRED:STLB_MISS_STORES",
        }
    }

    /// Short name used in thread names and logs
    pub const fn short_name(self) -> &'static str {
        match self {
            EventKind::Load => "ld",
            EventKind::Store => "st",
            EventKind::TlbMissLoad => "tlb-ld",
            EventKind::TlbMissStore => "tlb-st",
        }
    }

    const fn umask(self) -> u64 {
        match self {
            EventKind::Load => 0x81,
            EventKind::Store => 0x82,
            EventKind::TlbMissLoad => 0x11,
            EventKind::TlbMissStore => 0x12,
        }
    }

    #[inline]
    pub const fn is_store(self) -> bool {
        matches!(self, EventKind::Store | EventKind::TlbMissStore)
    }

    #[inline]
    pub const fn is_tlb_miss(self) -> bool {
        matches!(self, EventKind::TlbMissLoad | EventKind::TlbMissStore)
    }

    /// Look up a kind by its symbolic descriptor (case-insensitive)
    pub fn from_descriptor(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.descriptor().eq_ignore_ascii_case(name.trim()))
    }

    /// Counter configuration for this kind
    pub fn counter_config(self) -> CounterConfig {
        CounterConfig {
            raw: (self.umask() << 8) | MEM_INST_RETIRED,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor())
    }
}

/// Raw PMU configuration for a sampling counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterConfig {
    /// Value for `perf_event_attr.config` with `PERF_TYPE_RAW`
    pub raw: u64,
}

/// Encode an event descriptor into a counter configuration
///
/// Accepts the four symbolic names and perf-style `r<hex>` strings.
pub fn encode(descriptor: &str) -> HptResult<CounterConfig> {
    let d = descriptor.trim();
    if let Some(kind) = EventKind::from_descriptor(d) {
        return Ok(kind.counter_config());
    }
    if let Some(hex) = d.strip_prefix('r').or_else(|| d.strip_prefix('R')) {
        if !hex.is_empty() {
            if let Ok(raw) = u64::from_str_radix(hex, 16) {
                return Ok(CounterConfig { raw });
            }
        }
    }
    Err(HptError::UnknownEvent(d.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_encoding() {
        assert_eq!(encode("MEM_INST_RETIRED:ALL_LOADS").unwrap().raw, 0x81d0);
        assert_eq!(encode("MEM_INST_RETIRED:ALL_STORES").unwrap().raw, 0x82d0);
        assert_eq!(encode("mem_inst_retired:stlb_miss_loads").unwrap().raw, 0x11d0);
        assert_eq!(encode("MEM_INST_RETIRED:STLB_MISS_STORES").unwrap().raw, 0x12d0);
    }

    #[test]
    fn test_raw_encoding() {
        assert_eq!(encode("r81d0").unwrap(), EventKind::Load.counter_config());
        assert_eq!(encode("R20cd").unwrap().raw, 0x20cd);
        assert!(matches!(encode("r"), Err(HptError::UnknownEvent(_))));
        assert!(matches!(encode("rxyz"), Err(HptError::UnknownEvent(_))));
        assert!(matches!(encode("CYCLES"), Err(HptError::UnknownEvent(_))));
    }

    #[test]
    fn test_descriptor_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_descriptor(kind.descriptor()), Some(kind));
        }
    }

    #[test]
    fn test_kind_flags() {
        assert!(EventKind::TlbMissStore.is_store());
        assert!(EventKind::TlbMissStore.is_tlb_miss());
        assert!(!EventKind::Load.is_store());
        assert!(!EventKind::Store.is_tlb_miss());
    }
}
