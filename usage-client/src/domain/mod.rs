pub mod identity;
pub mod reading;

pub use identity::AccountIdentity;
pub use reading::{Reading, ReadingsBatch};
