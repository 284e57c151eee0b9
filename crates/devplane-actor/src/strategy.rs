//! Submit-strategy behavior table.

use devplane_core::rpc::RpcSubmitStrategy;

use crate::pending::PendingQueue;

/// What a backlog flush should push next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Every listed entry, oldest first.
    All(Vec<u64>),
    /// Exactly this entry.
    One(u64),
    /// The head is delivered and waiting for the device's answer.
    AwaitResponse(u64),
    Nothing,
}

/// Gating and next-selection per strategy.
pub(crate) trait SubmitPolicy {
    /// May a freshly submitted request be pushed right away?
    fn may_submit_new(&self, pending: &PendingQueue) -> bool;

    fn select_next(&self, pending: &PendingQueue) -> Selection;
}

impl SubmitPolicy for RpcSubmitStrategy {
    fn may_submit_new(&self, pending: &PendingQueue) -> bool {
        match self {
            Self::Burst => true,
            Self::SequentialOnAckFromDevice => !pending.has_unacknowledged(),
            Self::SequentialOnResponseFromDevice => pending.is_empty(),
        }
    }

    fn select_next(&self, pending: &PendingQueue) -> Selection {
        match self {
            Self::Burst => {
                let ids = pending.undelivered();
                if ids.is_empty() {
                    Selection::Nothing
                } else {
                    Selection::All(ids)
                }
            }
            Self::SequentialOnAckFromDevice => pending
                .first_undelivered()
                .map_or(Selection::Nothing, Selection::One),
            Self::SequentialOnResponseFromDevice => match pending.head() {
                Some((id, rpc)) if rpc.delivered => Selection::AwaitResponse(id),
                Some((id, _)) => Selection::One(id),
                None => Selection::Nothing,
            },
        }
    }
}
