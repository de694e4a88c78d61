//! Route handlers, one module per area.

pub mod control;
pub mod server;
pub mod target;
