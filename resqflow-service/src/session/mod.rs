//! Screen routing driven by the signed-in principal.

pub mod controller;
pub mod resolver;
pub mod screen;

pub use controller::{AppController, AppSnapshot, Command, Role, MAX_SETTLE_PASSES};
pub use resolver::{Classification, SessionResolver};
pub use screen::Screen;
