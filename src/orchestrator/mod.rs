//! Application-level orchestration.
//!
//! [`cycle`] composes catalog, policy, backup and deletion into one
//! single-flight cleanup cycle shared by the daemon and the interactive
//! session. [`controller`] drives it for the UI; [`status`] gathers what the
//! dashboard shows.

#[cfg(feature = "tui")]
mod controller;
mod cycle;
#[cfg(feature = "tui")]
mod status;

#[cfg(feature = "tui")]
pub(crate) use controller::{run_controller, SessionEvent, UiCommand};
pub use cycle::{silent, CycleRequest, CycleSettings, Orchestrator};
#[cfg(feature = "tui")]
pub use status::StatusSnapshot;
