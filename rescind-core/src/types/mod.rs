//! Domain types for rescind.
//!
//! - [`RevokeEvent`]: a revoke accepted by the guard, awaiting reclamation
//! - [`GuardMode`]: Active or Disabled, derived from the guard switch
//! - [`CompletionFlag`]: a ready-made [`CallHandle`](crate::CallHandle)
//! - [`GuardToggle`]: a ready-made [`GuardSwitch`](crate::GuardSwitch)
//! - [`GuardStats`] / [`SweepReport`]: observability snapshots

mod event;
mod handle;
mod stats;
mod switch;

pub use event::*;
pub use handle::*;
pub use stats::*;
pub use switch::*;
