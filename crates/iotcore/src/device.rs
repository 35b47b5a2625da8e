//! Device identity and the MQTT names derived from it.
//!
//! A device is addressed by the hierarchy project / region / registry / device.
//! From that tuple this module renders the fully-qualified client identifier and
//! the four topics the bridge understands:
//!
//! | Topic                          | Direction | Purpose                         |
//! |--------------------------------|-----------|---------------------------------|
//! | `/devices/{id}/config`         | subscribe | configuration updates           |
//! | `/devices/{id}/commands/#`     | subscribe | commands (wildcard mandatory)   |
//! | `/devices/{id}/events`         | publish   | telemetry                       |
//! | `/devices/{id}/state`          | publish   | device state                    |
//!
//! No validation is performed on the identity fields: a field containing `/` or
//! MQTT wildcards produces a malformed identifier or topic.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::credentials::TokenCache;

/// A device registered with the IoT bridge.
///
/// Cloning a `Device` is cheap and the clone shares the credential cache of the
/// original, since both describe the same identity.
#[derive(Debug, Clone)]
pub struct Device {
    project_id: String,
    region: String,
    registry_id: String,
    device_id: String,
    private_key_path: PathBuf,
    pub(crate) cache: Arc<TokenCache>,
}

impl Device {
    /// Creates a device identity.
    ///
    /// # Examples
    /// ```ignore
    /// let device = Device::new(
    ///     "my-gcp-project",
    ///     "us-central1",
    ///     "my-registry",
    ///     "my-device",
    ///     "/etc/iotcore/my-device.pem",
    /// );
    /// ```
    pub fn new(
        project_id: impl Into<String>,
        region: impl Into<String>,
        registry_id: impl Into<String>,
        device_id: impl Into<String>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
            registry_id: registry_id.into(),
            device_id: device_id.into(),
            private_key_path: private_key_path.into(),
            cache: Arc::new(TokenCache::default()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Path of the PEM encoded EC private key used to sign tokens.
    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    /// Returns the fully-qualified client identifier presented to the broker.
    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.region, self.registry_id, self.device_id
        )
    }

    /// Topic to subscribe to for configuration updates.
    pub fn config_topic(&self) -> String {
        format!("/devices/{}/config", self.device_id)
    }

    /// Topic to subscribe to for commands.
    ///
    /// The trailing wildcard is required: the bridge does not support
    /// subscribing to a single command subfolder.
    pub fn command_topic(&self) -> String {
        format!("/devices/{}/commands/#", self.device_id)
    }

    /// Topic telemetry events are published to.
    pub fn telemetry_topic(&self) -> String {
        format!("/devices/{}/events", self.device_id)
    }

    /// Topic device state is published to.
    pub fn state_topic(&self) -> String {
        format!("/devices/{}/state", self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new("myproject", "us-central1", "myregistry", "foo", "key.pem")
    }

    #[test]
    fn test_client_id() {
        assert_eq!(
            device().client_id(),
            "projects/myproject/locations/us-central1/registries/myregistry/devices/foo"
        );
    }

    #[test]
    fn test_client_id_renders_empty_fields() {
        let device = Device::new("", "", "", "", "key.pem");
        assert_eq!(device.client_id(), "projects//locations//registries//devices/");
    }

    #[test]
    fn test_config_topic() {
        assert_eq!(device().config_topic(), "/devices/foo/config");
    }

    #[test]
    fn test_command_topic() {
        assert_eq!(device().command_topic(), "/devices/foo/commands/#");
    }

    #[test]
    fn test_command_topic_always_ends_with_wildcard() {
        for id in ["foo", "", "with/slash", "#", "sensor-01"] {
            let device = Device::new("p", "r", "reg", id, "key.pem");
            assert!(device.command_topic().ends_with("/#"), "device id {id:?}");
        }
    }

    #[test]
    fn test_telemetry_topic() {
        assert_eq!(device().telemetry_topic(), "/devices/foo/events");
    }

    #[test]
    fn test_state_topic() {
        assert_eq!(device().state_topic(), "/devices/foo/state");
    }

    #[test]
    fn test_names_are_idempotent() {
        let device = device();
        assert_eq!(device.client_id(), device.client_id());
        assert_eq!(device.config_topic(), device.config_topic());
        assert_eq!(device.command_topic(), device.command_topic());
        assert_eq!(device.telemetry_topic(), device.telemetry_topic());
        assert_eq!(device.state_topic(), device.state_topic());
    }

    #[test]
    fn test_clone_shares_cache() {
        let device = device();
        let clone = device.clone();
        assert!(Arc::ptr_eq(&device.cache, &clone.cache));
    }
}
