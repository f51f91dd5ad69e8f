//! Time-based building blocks of a touchpad input stack.
//!
//! - [`timer`]: many logical deadline timers multiplexed onto a single `timerfd`, with dispatch
//!   that stays correct while callbacks cancel and re-arm each other.
//! - [`edge_motion`]: continues a tap-and-drag past the physical edge of a touchpad by injecting
//!   synthetic pointer motion at a fixed cadence while the dragging finger rests at the edge.
//!
//! Both are single-threaded: all timer callbacks and state machine transitions run synchronously
//! from the caller's event loop.
//!
//! This crate logs via the [`log`] facade and never installs a logger itself.
#![warn(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod macros;
#[macro_use]
pub mod ratelimit;


mod abs_info;
pub mod edge_motion;
pub mod time;
pub mod timer;
mod timerfd;
pub mod touchpad;
mod util;

pub use abs_info::AbsInfo;
#[doc(inline)]
pub use edge_motion::{EdgeMotion, EdgeMotionConfig};
pub use time::Usec;
#[doc(inline)]
pub use timer::{Timer, TimerConfig, TimerSubsystem};
pub use timerfd::TimerFd;
