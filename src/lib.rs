//! Xen memory balloon driver.
//!
//! Grows and shrinks a guest's host-backed memory reservation to follow a
//! target set through the configuration store or the control file. Pages
//! handed back to the host wait in the balloon pool until the target rises
//! again; drivers can also excise contiguous ranges for their own use.
//!
//! The driver runs over a [`GuestPlatform`], which bundles the page
//! allocator, the virtual mapper, the frame translation table and the
//! reservation hypercalls. [`emulated::EmulatedGuest`] provides an
//! in-process implementation of all four.

#![warn(
    clippy::all,
    clippy::arithmetic_side_effects,
    clippy::as_conversions,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::wildcard_enum_match_arm,
    rust_2018_idioms,
    unused_must_use,
    unused_qualifications
)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

/// Balloon controller
mod balloon;

/// Driver configuration
pub mod config;

/// Constants
mod constants;

/// Control file and store watch
pub mod control;

/// In-process guest platform
pub mod emulated;

/// Error types
pub mod error;

/// Host reservation gateway
mod gateway;

/// Reservation ledger and target resolver
mod ledger;

/// Guest memory collaborators
pub mod mem;

/// Guest platform abstraction
pub mod platform;

/// Balloon page pool
mod pool;

/// Frame and page types
pub mod types;

/// Worker threads
mod workers;

pub use balloon::{Balloon, BalloonStats, RunReport, WorkerState};
pub use config::{BalloonConfig, ConfigLoader};
pub use control::{BalloonControl, ControlError, Privilege, TargetControl, UserBuffer};
pub use error::{BalloonError, Fault, Result};
pub use gateway::ReservationHypervisor;
pub use ledger::HardLimit;
pub use mem::tracking::PageLocation;
pub use platform::GuestPlatform;
pub use types::{BootInfo, MemoryClass, Mfn, Page, Pfn};
