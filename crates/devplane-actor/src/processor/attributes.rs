//! Attribute reads, shared-attribute notifications and device claiming.

use std::sync::Arc;

use devplane_core::attributes::{AttributeKv, AttributeScope};
use devplane_core::ids::{DeviceId, NodeId, SessionId, TenantId};
use devplane_core::messages::ToTransportPayload;
use devplane_core::PortError;
use tracing::{debug, warn};

use super::DeviceProcessor;
use crate::messages::InternalMsg;
use crate::services::ActorServices;
use crate::subscriptions::SubscriptionKind;

/// An empty key list reads the whole scope.
fn normalize_keys(keys: Option<Vec<String>>) -> Option<Vec<String>> {
    keys.filter(|keys| !keys.is_empty())
}

async fn fetch_scope(
    services: &ActorServices,
    tenant_id: &TenantId,
    device_id: &DeviceId,
    scope: AttributeScope,
    keys: Option<Vec<String>>,
) -> Result<Vec<AttributeKv>, PortError> {
    services
        .attributes
        .find(tenant_id, device_id, scope, keys.as_deref())
        .await
}

impl DeviceProcessor {
    pub(super) fn get_attributes(
        &self,
        session_id: SessionId,
        node_id: NodeId,
        request_id: i32,
        client_keys: Option<Vec<String>>,
        shared_keys: Option<Vec<String>>,
    ) {
        let services = Arc::clone(&self.services);
        let tenant_id = self.tenant_id.clone();
        let device_id = self.device_id.clone();
        let mailbox = self.mailbox.clone();
        drop(tokio::spawn(async move {
            let client = fetch_scope(
                &services,
                &tenant_id,
                &device_id,
                AttributeScope::Client,
                normalize_keys(client_keys),
            )
            .await;
            let shared = fetch_scope(
                &services,
                &tenant_id,
                &device_id,
                AttributeScope::Shared,
                normalize_keys(shared_keys),
            )
            .await;
            let result = match (client, shared) {
                (Ok(client), Ok(shared)) => Ok((client, shared)),
                (Err(e), _) | (_, Err(e)) => Err(e.to_string()),
            };
            mailbox.post(InternalMsg::AttributesFetched {
                session_id,
                node_id,
                request_id,
                result,
            });
        }));
    }

    pub(super) fn on_attributes_fetched(
        &self,
        session_id: &SessionId,
        node_id: &NodeId,
        request_id: i32,
        result: Result<(Vec<AttributeKv>, Vec<AttributeKv>), String>,
    ) {
        let payload = match result {
            Ok((client_attributes, shared_attributes)) => ToTransportPayload::GetAttributesResponse {
                request_id,
                client_attributes,
                shared_attributes,
                error: None,
            },
            Err(error) => {
                warn!(device_id = %self.device_id, session_id = %session_id, request_id, error = %error, "failed to read attributes");
                ToTransportPayload::GetAttributesResponse {
                    request_id,
                    client_attributes: Vec::new(),
                    shared_attributes: Vec::new(),
                    error: Some(error),
                }
            }
        };
        self.send(session_id, node_id, payload);
    }

    pub(super) fn on_attributes_updated(&mut self, scope: AttributeScope, values: Vec<AttributeKv>) {
        if !scope.notifies_device() || values.is_empty() {
            return;
        }
        self.notify_attribute_subscribers(&ToTransportPayload::AttributeUpdate {
            shared_updated: values,
            shared_deleted: Vec::new(),
        });
    }

    pub(super) fn on_attributes_deleted(&mut self, scope: AttributeScope, keys: Vec<String>) {
        if !scope.notifies_device() || keys.is_empty() {
            return;
        }
        self.notify_attribute_subscribers(&ToTransportPayload::AttributeUpdate {
            shared_updated: Vec::new(),
            shared_deleted: keys,
        });
    }

    fn notify_attribute_subscribers(&mut self, payload: &ToTransportPayload) {
        if !self.subscriptions.has_subscribers(SubscriptionKind::Attributes) {
            debug!(device_id = %self.device_id, "no attribute subscribers to notify");
            return;
        }
        let subscribers = self.subscriptions.subscribers(SubscriptionKind::Attributes);
        debug!(device_id = %self.device_id, subscribers = subscribers.len(), "notifying attribute subscribers");
        for (session_id, info) in subscribers {
            self.send(&session_id, &info.node_id, payload.clone());
            if info.is_sync() {
                let _ = self
                    .subscriptions
                    .unsubscribe(SubscriptionKind::Attributes, &session_id);
            }
        }
    }

    pub(super) fn claim_device(&self, secret_key: String, duration_ms: i64) {
        let claims = Arc::clone(&self.services.claims);
        let tenant_id = self.tenant_id.clone();
        let device_id = self.device_id.clone();
        drop(tokio::spawn(async move {
            if let Err(e) = claims
                .register_claiming_info(&tenant_id, &device_id, &secret_key, duration_ms)
                .await
            {
                warn!(device_id = %device_id, error = %e, "failed to register claiming info");
            }
        }));
    }
}
