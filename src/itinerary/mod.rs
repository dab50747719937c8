//! Versioned itinerary logs

mod change;
mod history;
mod journal;

pub use change::{Change, ChangeOp};
pub use journal::{ItineraryLog, ItinerarySnapshot};
