//! kmon: an x86_64 kernel built around an interactive debug monitor.
//!
//! The monitor core (command dispatch, page-mapping inspection and
//! mutation, frame-pointer backtraces, ANSI-filtered console output) lives
//! here behind trait seams for its external collaborators, so it runs both
//! on bare metal and under the host test harness.

#![cfg_attr(not(test), no_std)]
#![feature(abi_x86_interrupt)]

extern crate alloc;

pub mod backtrace;
pub mod console;
pub mod drivers;
#[cfg(not(test))]
pub mod interrupts;
#[cfg(not(test))]
pub mod kernel;
pub mod logger;
pub mod memory;
pub mod monitor;
