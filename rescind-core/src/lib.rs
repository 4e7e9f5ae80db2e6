//! # rescind core
//!
//! Core types, errors, and traits shared by the rescind crates.
//!
//! - **Errors**: [`RescindError`] and the crate-wide [`Result`] alias
//! - **Constants**: default windows, intervals and ceilings
//! - **Time**: the [`Clock`] abstraction plus UTC parsing helpers
//! - **Traits**: [`CallHandle`] and [`GuardSwitch`], the seams between the
//!   guard and its collaborators
//! - **Types**: revoke events, guard mode, stats and sweep reports
//!
//! ## Example
//!
//! ```rust
//! use rescind_core::{CallHandle, CompletionFlag};
//!
//! let flag = CompletionFlag::new();
//! assert!(!flag.is_completed());
//! flag.complete();
//! assert!(flag.is_completed());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{RescindError, Result};
pub use time::{Clock, ManualClock, SystemClock};
pub use traits::*;
pub use types::*;
