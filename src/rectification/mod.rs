//! Rectification of mirrored itineraries
//!
//! Consumers detect missing versions with a `RectificationTracker` and ask
//! the source to resend them through a `RectificationRequester`, which in
//! turn drives the source log's `Rectifier`.

mod mirror;
mod rectifier;
mod tracker;

pub use mirror::ScheduleMirror;
pub use rectifier::{
    ChannelRequesterFactory, InlineRequesterFactory, RectificationRequester,
    RectificationRequesterFactory, Rectifier,
};
pub use tracker::{Ingestion, RectificationState, RectificationTracker, RetransmitRequest};
