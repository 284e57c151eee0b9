use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialsType {
    AccessToken,
    X509Certificate,
    MqttBasic,
    Lwm2mCredentials,
}

impl CredentialsType {
    /// Whether open sessions can be handed the new credentials in place.
    /// Every other type forces re-authentication.
    pub fn supports_live_push(self) -> bool {
        matches!(self, Self::Lwm2mCredentials)
    }
}

/// Credentials a device authenticates with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredentials {
    pub credentials_type: CredentialsType,
    pub credentials_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_value: Option<String>,
}
