//! Host terminal input handling.
//!
//! - **keymapper**: keyboard input to console input byte mapping

pub mod keymapper;

pub use keymapper::*;
