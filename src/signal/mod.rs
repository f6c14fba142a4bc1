//! Unix signal handling for the event loop.
//!
//! # Components
//!
//! - [`SignalKind`]: typed Unix signal numbers
//! - [`SignalBridge`]: converts raw signal delivery into loop-scheduled
//!   callbacks via a self-pipe wakeup descriptor
//!
//! The raw OS handler installed by the bridge performs no unsafe work beyond
//! writing the signal number into the wakeup pipe; all dispatch happens on
//! the loop thread.

mod bridge;
mod kind;

pub use bridge::SignalBridge;
pub use kind::SignalKind;
