use std::fmt;

/// Guest physical frame number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pfn(pub u64);

/// Machine frame number assigned by the host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mfn(pub u64);

impl Pfn {
    pub fn into_inner(self) -> u64 {
        self.0
    }

    /// Returns the frame `n` pages above this one.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)]
    pub fn add(self, n: u64) -> Self {
        Self(self.0 + n)
    }

    #[allow(clippy::as_conversions)]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl Mfn {
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl From<u64> for Pfn {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u64> for Mfn {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {:#x}", self.0)
    }
}

impl fmt::Display for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mfn {:#x}", self.0)
    }
}

/// Whether a page lives in the kernel's linear mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Always mapped; re-populated first.
    Direct,
    /// Needs a transient mapping to be touched.
    NonDirect,
}

/// A guest page as seen by the balloon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Page {
    pub pfn: Pfn,
    pub class: MemoryClass,
}

impl Page {
    pub fn new(pfn: Pfn, class: MemoryClass) -> Self {
        Self { pfn, class }
    }

    pub fn is_direct(&self) -> bool {
        self.class == MemoryClass::Direct
    }
}

/// Memory layout of the guest at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfo {
    /// Pages the host backed when the guest started.
    pub nr_pages: u64,
    /// One past the highest addressable frame.
    pub max_pfn: u64,
    /// One past the highest directly addressable frame.
    pub max_low_pfn: u64,
}

impl BootInfo {
    pub fn new(nr_pages: u64, max_pfn: u64, max_low_pfn: u64) -> Self {
        Self {
            nr_pages,
            max_pfn,
            max_low_pfn,
        }
    }

    pub fn classify(&self, pfn: Pfn) -> MemoryClass {
        if pfn.0 < self.max_low_pfn {
            MemoryClass::Direct
        } else {
            MemoryClass::NonDirect
        }
    }

    pub fn page(&self, pfn: Pfn) -> Page {
        Page::new(pfn, self.classify(pfn))
    }

    /// Pages resident at boot.
    pub fn initial_pages(&self) -> u64 {
        self.nr_pages.min(self.max_pfn)
    }
}
