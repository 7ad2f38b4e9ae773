//! Data models

mod controller;
mod event;
mod manifest;
mod task;

pub use controller::*;
pub use event::*;
pub use manifest::*;
pub use task::*;
