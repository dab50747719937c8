// Traffic Schedule - Versioned Multi-Robot Itinerary Database

pub mod config;
pub mod error;
pub mod geometry;
pub mod itinerary;
pub mod query;
pub mod rectification;
pub mod registry;
pub mod trajectory;
pub mod transport;
pub mod version;

pub use config::ScheduleConfig;
pub use error::{Result, ScheduleError};
pub use geometry::{BoundingCircleOverlap, ConvexShape, Region, ShapeContext, ShapeId, ShapeOverlap, Space};
pub use itinerary::{Change, ChangeOp, ItineraryLog, ItinerarySnapshot};
pub use query::{
    ItinerarySource, ParticipantPatch, Participants, Patch, Query, QueryEngine, QueryResult,
    Spacetime, Timespan, Versions,
};
pub use rectification::{
    ChannelRequesterFactory, Ingestion, InlineRequesterFactory, RectificationRequester,
    RectificationRequesterFactory, RectificationState, RectificationTracker, Rectifier,
    RetransmitRequest, ScheduleMirror,
};
pub use registry::{ParticipantDescription, ParticipantRegistry, Responsiveness};
pub use trajectory::{Itinerary, Profile, ProfileId, Segment, Time, Trajectory};
pub use transport::{BroadcastTransport, ChangeTransport, NullTransport};
pub use version::{ItineraryVersion, ParticipantId, ScheduleClock, ScheduleVersion};
