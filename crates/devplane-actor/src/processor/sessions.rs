//! Session lifecycle, subscriptions, activity and credential pushes.

use devplane_core::credentials::DeviceCredentials;
use devplane_core::ids::{NodeId, SessionId};
use devplane_core::messages::ToTransportPayload;
use devplane_core::session::{SessionCloseReason, SessionInfo};
use metrics::counter;
use tracing::{debug, info};

use super::DeviceProcessor;
use crate::session_table::SessionMd;
use crate::subscriptions::SubscriptionKind;

impl DeviceProcessor {
    pub(super) fn open_session(&mut self, session_id: SessionId, info: &SessionInfo) {
        if self.sessions.contains(&session_id) {
            debug!(device_id = %self.device_id, session_id = %session_id, "session already open");
            return;
        }
        let now = self.now();
        debug!(device_id = %self.device_id, session_id = %session_id, node_id = %info.node_id, "session opened");
        self.insert_session(
            session_id,
            SessionMd::new(SessionInfo::persistent(info.node_id.clone()), now),
        );
        self.services
            .device_state
            .on_activity(&self.tenant_id, &self.device_id, now);
        self.dump_sessions();
    }

    /// Track a new session, evicting the oldest one when the table is full.
    fn insert_session(&mut self, session_id: SessionId, md: SessionMd) {
        let was_empty = self.sessions.is_empty();
        if let Some((evicted_id, evicted)) = self.sessions.insert(session_id, md) {
            info!(device_id = %self.device_id, session_id = %evicted_id, "max sessions reached, closing oldest session");
            self.subscriptions.remove_session(&evicted_id);
            self.send(
                &evicted_id,
                &evicted.info.node_id,
                ToTransportPayload::close(SessionCloseReason::MaxSessionsLimitReached),
            );
            self.timers.cancel_await();
            counter!("device_sessions_evicted_total").increment(1);
        }
        if was_empty {
            self.services
                .device_state
                .on_connect(&self.tenant_id, &self.device_id);
        }
    }

    pub(super) fn close_session(&mut self, session_id: &SessionId) {
        let removed = self.sessions.remove(session_id);
        self.subscriptions.remove_session(session_id);
        self.timers.cancel_await();
        if removed.is_some() {
            debug!(device_id = %self.device_id, session_id = %session_id, "session closed");
            if self.sessions.is_empty() {
                self.services
                    .device_state
                    .on_disconnect(&self.tenant_id, &self.device_id);
            }
            self.dump_sessions();
        }
    }

    /// Subscribe or unsubscribe a session. Untracked sessions (one-shot ones
    /// in particular) are registered with the info they arrived with.
    pub(super) fn subscribe(
        &mut self,
        kind: SubscriptionKind,
        session_id: SessionId,
        info: SessionInfo,
        unsubscribe: bool,
    ) {
        let info = match self.sessions.get_mut(&session_id) {
            Some(md) => {
                match kind {
                    SubscriptionKind::Attributes => md.subscribed_to_attributes = !unsubscribe,
                    SubscriptionKind::Rpc => md.subscribed_to_rpc = !unsubscribe,
                }
                md.info.clone()
            }
            None => info,
        };
        debug!(device_id = %self.device_id, session_id = %session_id, ?kind, unsubscribe, "subscription changed");

        if unsubscribe {
            let _ = self.subscriptions.unsubscribe(kind, &session_id);
            if kind == SubscriptionKind::Rpc {
                self.timers.cancel_await();
            }
        } else {
            self.subscriptions
                .subscribe(kind, session_id.clone(), info.clone());
            if kind == SubscriptionKind::Rpc {
                self.flush_to(&session_id, &info);
            }
        }
        self.dump_sessions();
    }

    /// Heartbeat from a session: reconcile the table with what the
    /// transport believes.
    pub(super) fn on_activity(
        &mut self,
        session_id: SessionId,
        info: &SessionInfo,
        last_activity_time: i64,
        subscribed_to_attributes: bool,
        subscribed_to_rpc: bool,
    ) {
        if !self.sessions.contains(&session_id) {
            self.insert_session(
                session_id.clone(),
                SessionMd::new(SessionInfo::persistent(info.node_id.clone()), last_activity_time),
            );
        }
        if let Some(md) = self.sessions.get_mut(&session_id) {
            md.last_activity_time = last_activity_time;
            md.subscribed_to_attributes = subscribed_to_attributes;
            md.subscribed_to_rpc = subscribed_to_rpc;
            let info = md.info.clone();
            if subscribed_to_attributes {
                self.subscriptions.subscribe_if_absent(
                    SubscriptionKind::Attributes,
                    session_id.clone(),
                    info.clone(),
                );
            }
            if subscribed_to_rpc {
                self.subscriptions
                    .subscribe_if_absent(SubscriptionKind::Rpc, session_id, info);
            }
        }
        self.services
            .device_state
            .on_activity(&self.tenant_id, &self.device_id, last_activity_time);
        self.dump_sessions();
    }

    pub(super) fn sweep_sessions(&mut self) {
        let timeout = i64::try_from(self.services.settings.session_inactivity_timeout_ms)
            .unwrap_or(i64::MAX);
        let expired = self.sessions.sweep_expired(self.now(), timeout);
        if expired.is_empty() {
            return;
        }
        debug!(device_id = %self.device_id, count = expired.len(), "closing inactive sessions");
        for (session_id, md) in &expired {
            self.subscriptions.remove_session(session_id);
            self.send(
                session_id,
                &md.info.node_id,
                ToTransportPayload::close(SessionCloseReason::SessionTimeout),
            );
        }
        self.timers.cancel_await();
        if self.sessions.is_empty() {
            self.services
                .device_state
                .on_disconnect(&self.tenant_id, &self.device_id);
        }
        self.dump_sessions();
    }

    /// Close every tracked session and forget every subscriber.
    pub(super) fn close_all_sessions(&mut self, reason: SessionCloseReason) {
        let closed = self.sessions.drain();
        debug!(device_id = %self.device_id, count = closed.len(), ?reason, "closing all sessions");
        for (session_id, md) in &closed {
            self.send(session_id, &md.info.node_id, ToTransportPayload::close(reason));
        }
        self.subscriptions.clear();
        self.timers.cancel_await();
        if !closed.is_empty() {
            self.services
                .device_state
                .on_disconnect(&self.tenant_id, &self.device_id);
        }
        self.dump_sessions();
    }

    pub(super) fn on_credentials_updated(&mut self, credentials: DeviceCredentials) {
        if credentials.credentials_type.supports_live_push() {
            let targets: Vec<(SessionId, NodeId)> = self
                .sessions
                .iter()
                .map(|(id, md)| (id.clone(), md.info.node_id.clone()))
                .collect();
            for (session_id, node_id) in targets {
                self.send(
                    &session_id,
                    &node_id,
                    ToTransportPayload::CredentialsUpdate(credentials.clone()),
                );
            }
        } else {
            self.close_all_sessions(SessionCloseReason::CredentialsUpdated);
        }
    }

    /// Relay an uplink to the other subscribed sessions on the same node.
    pub(super) fn relay_uplink(&self, origin: &SessionId, node_id: &NodeId, uplink_ts: i64) {
        for (session_id, md) in self.sessions.iter() {
            let subscribed = md.subscribed_to_attributes || md.subscribed_to_rpc;
            if session_id != origin && &md.info.node_id == node_id && subscribed {
                self.send(
                    session_id,
                    node_id,
                    ToTransportPayload::UplinkNotification { uplink_ts },
                );
            }
        }
    }
}
