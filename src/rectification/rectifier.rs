//! Rectifier handles and requester factories

use std::sync::Weak;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{Result, ScheduleError};
use crate::itinerary::ItineraryLog;
use crate::rectification::tracker::RetransmitRequest;
use crate::version::{ItineraryVersion, ParticipantId};

/// Capability to ask one authoritative itinerary log for retransmissions.
///
/// Only issued by the log itself (or the registry on its behalf) and not
/// cloneable, so each requester owns exactly one.
#[derive(Debug)]
pub struct Rectifier {
    participant: ParticipantId,
    log: Weak<ItineraryLog>,
}

impl Rectifier {
    pub(crate) fn new(participant: ParticipantId, log: Weak<ItineraryLog>) -> Self {
        Self { participant, log }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Resend the retained changes in `[from, min(to, latest)]` through the
    /// log's transport. Returns how many were sent.
    pub fn retransmit(&self, from: ItineraryVersion, to: ItineraryVersion) -> Result<usize> {
        self.upgrade()?.retransmit(from, to)
    }

    /// Send the full current itinerary as a baseline `Set`
    pub fn resynchronize(&self) -> Result<ItineraryVersion> {
        Ok(self.upgrade()?.resynchronize())
    }

    /// Current version of the source log
    pub fn latest_version(&self) -> Result<ItineraryVersion> {
        Ok(self.upgrade()?.version())
    }

    fn upgrade(&self) -> Result<std::sync::Arc<ItineraryLog>> {
        match self.log.upgrade() {
            Some(log) if !log.is_retired() => Ok(log),
            _ => Err(ScheduleError::UnknownParticipant(self.participant)),
        }
    }
}

/// Consumer-side trigger for retransmission of one participant.
///
/// `request` is called from the ingestion path and must return without
/// waiting on the source.
pub trait RectificationRequester: Send + Sync {
    fn request(&self, from: ItineraryVersion, to: ItineraryVersion);
}

/// Builds a requester for each participant a mirror starts tracking
pub trait RectificationRequesterFactory: Send + Sync {
    fn make(&self, rectifier: Rectifier, participant: ParticipantId) -> Box<dyn RectificationRequester>;
}

/// Retransmit, falling back to a full resynchronization when the range is
/// no longer retained.
fn fulfil(rectifier: &Rectifier, request: RetransmitRequest) {
    match rectifier.retransmit(request.from, request.to) {
        Ok(count) => {
            log::debug!(
                "Participant {}: {} change(s) resent for [{}, {}]",
                rectifier.participant(),
                count,
                request.from,
                request.to
            );
        }
        Err(ScheduleError::HistoryExpired { requested, oldest }) => {
            log::warn!(
                "Participant {}: version {} no longer retained (oldest {}), resynchronizing",
                rectifier.participant(),
                requested,
                oldest
            );
            if let Err(e) = rectifier.resynchronize() {
                log::warn!("Failed to resynchronize: {}", e);
            }
        }
        Err(e) => {
            log::warn!(
                "Participant {}: retransmission failed: {}",
                rectifier.participant(),
                e
            );
        }
    }
}

/// Retransmits on the calling thread. Suited to in-process wiring where
/// the source log is local and retransmission is cheap.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineRequesterFactory;

struct InlineRequester {
    rectifier: Rectifier,
}

impl RectificationRequester for InlineRequester {
    fn request(&self, from: ItineraryVersion, to: ItineraryVersion) {
        fulfil(&self.rectifier, RetransmitRequest { from, to });
    }
}

impl RectificationRequesterFactory for InlineRequesterFactory {
    fn make(&self, rectifier: Rectifier, _participant: ParticipantId) -> Box<dyn RectificationRequester> {
        Box::new(InlineRequester { rectifier })
    }
}

/// Hands requests to a task on a tokio runtime.
///
/// Each requester owns the sending half of an unbounded channel; the task
/// owns the rectifier and exits once the requester is dropped.
#[derive(Clone, Debug)]
pub struct ChannelRequesterFactory {
    handle: Handle,
}

impl ChannelRequesterFactory {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| ScheduleError::Config(format!("No tokio runtime available: {}", e)))?;
        Ok(Self::new(handle))
    }
}

struct ChannelRequester {
    participant: ParticipantId,
    request_tx: mpsc::UnboundedSender<RetransmitRequest>,
}

impl RectificationRequester for ChannelRequester {
    fn request(&self, from: ItineraryVersion, to: ItineraryVersion) {
        if self.request_tx.send(RetransmitRequest { from, to }).is_err() {
            log::warn!(
                "Rectification task for participant {} has stopped",
                self.participant
            );
        }
    }
}

impl RectificationRequesterFactory for ChannelRequesterFactory {
    fn make(&self, rectifier: Rectifier, participant: ParticipantId) -> Box<dyn RectificationRequester> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<RetransmitRequest>();

        self.handle.spawn(async move {
            while let Some(request) = request_rx.recv().await {
                fulfil(&rectifier, request);
            }
            log::debug!("Rectification task for participant {} finished", participant);
        });

        Box::new(ChannelRequester {
            participant,
            request_tx,
        })
    }
}
