use crate::{
    gateway::ReservationHypervisor,
    mem::{FrameTranslation, PageAllocator, VirtualMapper},
    types::BootInfo,
};

/// The guest environment the balloon runs in.
///
/// Bundles every collaborator the balloon drives, so a controller can be
/// built over real hypercalls or over the emulated back end alike.
pub trait GuestPlatform: Send + Sync + 'static {
    type Allocator: PageAllocator;
    type Mapper: VirtualMapper;
    type Translation: FrameTranslation;
    type Hypervisor: ReservationHypervisor;

    fn boot_info(&self) -> BootInfo;
    fn allocator(&self) -> &Self::Allocator;
    fn mapper(&self) -> &Self::Mapper;
    fn translation(&self) -> &Self::Translation;
    fn hypervisor(&self) -> &Self::Hypervisor;
}
