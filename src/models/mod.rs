// src/models/mod.rs
pub mod driver;
pub mod geo;
pub mod notification;
pub mod request;
pub mod ride;
pub mod rider;

pub use driver::*;
pub use geo::*;
pub use notification::*;
pub use request::*;
pub use ride::*;
pub use rider::*;
