//! Allocate → verify → lock state machine for accelerator memory validation.
//!
//! A [`Session`] repeatedly claims a fixed-size slice of device memory, fills
//! it with [`FILL_PATTERN`], reads it back twice and compares the two copies.
//! Slices whose readbacks differ are marked faulty and held. When the device
//! refuses another allocation every non-faulty slice is freed and the session
//! parks, keeping the faulty memory allocated for inspection.
//!
//! | Module       | Role                                                |
//! |--------------|-----------------------------------------------------|
//! | [`backend`]  | [`DeviceMemory`] capability implemented per API     |
//! | [`registry`] | slices in allocation order, verdict counters        |
//! | [`verify`]   | fill + double readback + compare                    |
//! | [`reclaim`]  | exhaustion policy                                   |
//! | [`report`]   | counters and glyph map                              |
//! | [`session`]  | the loop and its parked terminal state              |
//!
//! # Usage
//!
//! ```rust
//! use vramlock_core::mock::SimulatedMemory;
//! use vramlock_core::screen::RecordingScreen;
//! use vramlock_core::{LockConfig, Session, SliceState};
//!
//! let config = LockConfig { slice_mib: 1, ..LockConfig::default() };
//! let device = SimulatedMemory::new(4).with_unstable(2);
//! let mut screen = RecordingScreen::new();
//!
//! let parked = Session::new(device, &config).run(&mut screen).unwrap();
//! assert_eq!(parked.registry().faulty_count(), 1);
//! assert_eq!(parked.registry().count(SliceState::Released), 3);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod mock;
pub mod reclaim;
pub mod registry;
pub mod report;
pub mod screen;
pub mod session;
pub mod slice;
pub mod verify;

pub use backend::DeviceMemory;
pub use config::{BackendKind, ConfigError, DEFAULT_SLICE_MIB, LockConfig};
pub use error::{BackendFault, LockError, Result};
pub use reclaim::Exhaustion;
pub use registry::Registry;
pub use report::Report;
pub use session::{ParkedSession, Session, SessionState};
pub use slice::{Outcome, Slice, SliceState};
pub use verify::{FILL_PATTERN, ScratchBuffers, Verdict};
