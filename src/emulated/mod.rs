//! An in-process guest used by the tests, the benchmark and `balloon-ctl`.
//!
//! Every collaborator keeps just enough state to check the balloon's
//! bookkeeping against: which frames the host backs, which pages are mapped
//! and scrubbed, and the translation in both directions.

use crate::{platform::GuestPlatform, types::BootInfo};

mod allocator;
mod hypervisor;
mod mmu;
mod p2m;
mod store;

pub use allocator::EmulatedAllocator;
pub use hypervisor::{EmulatedHypervisor, HostCall};
pub use mmu::EmulatedMmu;
pub use p2m::EmulatedP2m;
pub use store::EmulatedStore;

/// First machine frame handed out by the emulated host.
///
/// Boot frames are identity-offset from it: `pfn` is backed by
/// `MFN_BASE + pfn`.
pub const MFN_BASE: u64 = 0x10_0000;

/// A guest whose host, page tables and allocator live in memory.
#[derive(Debug)]
pub struct EmulatedGuest {
    boot: BootInfo,
    allocator: EmulatedAllocator,
    mmu: EmulatedMmu,
    p2m: EmulatedP2m,
    hypervisor: EmulatedHypervisor,
}

impl EmulatedGuest {
    pub fn new(boot: BootInfo) -> Self {
        Self {
            boot,
            allocator: EmulatedAllocator::new(&boot),
            mmu: EmulatedMmu::new(&boot),
            p2m: EmulatedP2m::new(&boot),
            hypervisor: EmulatedHypervisor::new(&boot),
        }
    }

    pub fn mmu(&self) -> &EmulatedMmu {
        &self.mmu
    }

    pub fn p2m(&self) -> &EmulatedP2m {
        &self.p2m
    }
}

impl GuestPlatform for EmulatedGuest {
    type Allocator = EmulatedAllocator;
    type Mapper = EmulatedMmu;
    type Translation = EmulatedP2m;
    type Hypervisor = EmulatedHypervisor;

    fn boot_info(&self) -> BootInfo {
        self.boot
    }

    fn allocator(&self) -> &Self::Allocator {
        &self.allocator
    }

    fn mapper(&self) -> &Self::Mapper {
        &self.mmu
    }

    fn translation(&self) -> &Self::Translation {
        &self.p2m
    }

    fn hypervisor(&self) -> &Self::Hypervisor {
        &self.hypervisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mem::{FrameTranslation, PageAllocator},
        types::{Mfn, Pfn},
    };

    #[test]
    fn boot_layout_is_consistent() {
        let guest = EmulatedGuest::new(BootInfo::new(8, 16, 12));
        assert_eq!(guest.hypervisor().reservation(), 8);
        assert_eq!(guest.p2m().lookup(Pfn(7)), Some(Mfn(MFN_BASE + 7)));
        assert_eq!(guest.p2m().lookup(Pfn(8)), None);
        assert!(guest.mmu().is_mapped(Pfn(7)));
        assert!(!guest.mmu().is_mapped(Pfn(8)));

        let held = guest.allocator().hold_pages(16);
        assert_eq!(held.len(), 8);
        assert!(held.iter().all(|pfn| pfn.0 < 8));
    }
}
