//! Sync Engine
//!
//! Wire format, deviation filtering and correction state shared by the
//! publisher and the controller.

mod protocol;
mod state;
mod window;

pub use protocol::*;
pub use state::*;
pub use window::*;
