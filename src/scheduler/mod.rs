//! Background tasks.

mod beat;

pub use beat::*;
