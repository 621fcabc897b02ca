use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::ProvisioningConfig;
use crate::errors::HuddleError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Media endpoints the engine connects to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaPlacement {
    pub audio_fallback_url: String,
    pub audio_host_url: String,
    pub signaling_url: String,
    pub turn_control_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeetingCredentials {
    pub meeting_id: String,
    pub external_meeting_id: String,
    pub media_region: String,
    pub media_placement: MediaPlacement,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttendeeCredentials {
    pub attendee_id: String,
    pub external_user_id: String,
    pub join_token: SecretString,
}

/// Everything needed to start one session.
#[derive(Debug)]
pub struct JoinCredentials {
    pub meeting: MeetingCredentials,
    pub attendee: AttendeeCredentials,
}

/// Source of session credentials for a named meeting.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn join_meeting(&self, title: &str) -> Result<JoinCredentials, HuddleError>;
}

/// HTTP client for the session provisioning service.
pub struct ProvisioningClient {
    client: Client,
    config: ProvisioningConfig,
}

impl ProvisioningClient {
    pub fn new(config: ProvisioningConfig) -> Result<Self, HuddleError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| HuddleError::Config(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Pull `JoinInfo.Meeting.Meeting` and `JoinInfo.Attendee.Attendee` out of
    /// the provisioning response.
    ///
    /// Absent, empty or incomplete inner objects are an invalid payload even
    /// though the service answered with a success status.
    pub fn parse_join_response(body: &serde_json::Value) -> Result<JoinCredentials, HuddleError> {
        let meeting = Self::unwrap_inner(body, "/JoinInfo/Meeting/Meeting")?;
        let attendee = Self::unwrap_inner(body, "/JoinInfo/Attendee/Attendee")?;
        Ok(JoinCredentials { meeting, attendee })
    }

    fn unwrap_inner<T: DeserializeOwned>(
        body: &serde_json::Value,
        pointer: &str,
    ) -> Result<T, HuddleError> {
        let inner = body
            .pointer(pointer)
            .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
            .ok_or_else(|| {
                tracing::error!("provisioning response missing {pointer}: {body}");
                HuddleError::invalid_payload()
            })?;
        serde_json::from_value(inner.clone()).map_err(|e| {
            tracing::error!("provisioning response has malformed {pointer}: {e}");
            HuddleError::invalid_payload()
        })
    }
}

#[async_trait]
impl Provisioner for ProvisioningClient {
    async fn join_meeting(&self, title: &str) -> Result<JoinCredentials, HuddleError> {
        let url = self.config.join_url();
        tracing::info!("requesting session credentials for '{title}' from {url}");

        let resp = self
            .client
            .post(url)
            .query(&[
                ("title", title),
                ("name", self.config.display_name.as_str()),
                ("region", self.config.region.as_str()),
            ])
            .send()
            .await
            .map_err(|e| HuddleError::provisioning(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                "failed to join meeting: status={} response={body}",
                status.as_u16()
            );
            return Err(HuddleError::Provisioning {
                message: format!("service returned status {status}"),
                status: Some(status.as_u16()),
                body: Some(body),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            tracing::error!("provisioning response is not JSON: {e}");
            HuddleError::invalid_payload()
        })?;

        let creds = Self::parse_join_response(&body)?;
        tracing::info!(
            "provisioned meeting {} for attendee {}",
            creds.meeting.meeting_id,
            creds.attendee.attendee_id
        );
        Ok(creds)
    }
}
