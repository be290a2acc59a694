pub mod clock;
pub mod id_generator;

pub use clock::{Clock, ManualClock, SystemClock};
