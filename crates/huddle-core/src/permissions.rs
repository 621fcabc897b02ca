//! Capability grants required before a session may start.
//!
//! The check/request protocol is platform independent. Only the mapping from
//! a [`Capability`] to the platform's permission identifier differs, and that
//! mapping is a static table resolved once when the gate is built.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::HuddleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Microphone,
    Camera,
}

impl Capability {
    pub const SESSION: [Capability; 2] = [Capability::Microphone, Capability::Camera];

    pub fn label(self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Camera => "camera",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else {
            Self::Desktop
        }
    }
}

/// Capability → platform permission identifier.
///
/// Desktop platforms have no runtime permission prompt for either capability.
const PERMISSION_TABLE: &[(Capability, Platform, &str)] = &[
    (Capability::Microphone, Platform::Android, "android.permission.RECORD_AUDIO"),
    (Capability::Camera, Platform::Android, "android.permission.CAMERA"),
    (Capability::Microphone, Platform::Ios, "ios.permission.MICROPHONE"),
    (Capability::Camera, Platform::Ios, "ios.permission.CAMERA"),
];

pub fn permission_id(capability: Capability, platform: Platform) -> Option<&'static str> {
    PERMISSION_TABLE
        .iter()
        .find(|(c, p, _)| *c == capability && *p == platform)
        .map(|(_, _, id)| *id)
}

/// Status of one platform permission as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    /// Not granted, but the user can still be prompted.
    Denied,
    /// Permanently refused; only the system settings can change it.
    Blocked,
    /// The device lacks the capability entirely.
    Unavailable,
}

/// Platform hook that talks to the OS permission APIs.
#[async_trait]
pub trait PermissionBackend: Send + Sync {
    async fn check(&self, permission: &str) -> Result<PermissionStatus, HuddleError>;
    async fn request(&self, permission: &str) -> Result<PermissionStatus, HuddleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied(Capability),
    /// The user must open the system settings to grant it.
    Blocked(Capability),
}

impl PermissionOutcome {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }

    pub fn into_result(self) -> Result<(), HuddleError> {
        match self {
            Self::Granted => Ok(()),
            Self::Denied(cap) => Err(HuddleError::Permission {
                message: format!("{} access is required for video meetings", cap.label()),
                open_settings: false,
            }),
            Self::Blocked(cap) => Err(HuddleError::Permission {
                message: format!(
                    "{} access is blocked; enable it in the device settings to join meetings",
                    cap.label()
                ),
                open_settings: true,
            }),
        }
    }
}

pub struct PermissionGate {
    backend: Arc<dyn PermissionBackend>,
    resolved: Vec<(Capability, &'static str)>,
}

impl PermissionGate {
    pub fn new(backend: Arc<dyn PermissionBackend>) -> Self {
        Self::for_platform(backend, Platform::current())
    }

    pub fn for_platform(backend: Arc<dyn PermissionBackend>, platform: Platform) -> Self {
        let resolved = Capability::SESSION
            .iter()
            .filter_map(|&cap| permission_id(cap, platform).map(|id| (cap, id)))
            .collect();
        Self { backend, resolved }
    }

    /// Make sure every capability in `capabilities` is granted.
    ///
    /// Blocked permissions fail immediately without prompting. Denied ones are
    /// requested once. Capabilities that need no permission on this platform
    /// count as granted.
    pub async fn ensure(&self, capabilities: &[Capability]) -> PermissionOutcome {
        let needed: Vec<(Capability, &'static str)> = self
            .resolved
            .iter()
            .copied()
            .filter(|(cap, _)| capabilities.contains(cap))
            .collect();

        let mut statuses = Vec::with_capacity(needed.len());
        for &(cap, id) in &needed {
            let status = self.backend.check(id).await.unwrap_or_else(|e| {
                tracing::warn!("checking {id} failed, treating as denied: {e}");
                PermissionStatus::Denied
            });
            tracing::debug!("permission {id}: {status:?}");
            statuses.push((cap, id, status));
        }

        // Nothing is prompted while any permission is blocked.
        if let Some(&(cap, id, _)) = statuses
            .iter()
            .find(|(_, _, s)| {
                matches!(s, PermissionStatus::Blocked | PermissionStatus::Unavailable)
            })
        {
            tracing::info!("permission {id} is blocked, user must open settings");
            return PermissionOutcome::Blocked(cap);
        }

        for (cap, id, status) in statuses {
            if status == PermissionStatus::Granted {
                continue;
            }
            let after = self.backend.request(id).await.unwrap_or_else(|e| {
                tracing::warn!("requesting {id} failed, treating as denied: {e}");
                PermissionStatus::Denied
            });
            match after {
                PermissionStatus::Granted => tracing::info!("permission {id} granted"),
                PermissionStatus::Blocked => return PermissionOutcome::Blocked(cap),
                _ => {
                    tracing::info!("permission {id} still not granted: {after:?}");
                    return PermissionOutcome::Denied(cap);
                }
            }
        }

        PermissionOutcome::Granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Backend with scripted check results; requests succeed for ids in `grant_on_request`.
    struct ScriptedBackend {
        checks: HashMap<&'static str, PermissionStatus>,
        grant_on_request: Vec<&'static str>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(
            checks: &[(&'static str, PermissionStatus)],
            grant_on_request: &[&'static str],
        ) -> Arc<Self> {
            Arc::new(Self {
                checks: checks.iter().copied().collect(),
                grant_on_request: grant_on_request.to_vec(),
                requested: Mutex::new(Vec::new()),
            })
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PermissionBackend for ScriptedBackend {
        async fn check(&self, permission: &str) -> Result<PermissionStatus, HuddleError> {
            self.checks
                .get(permission)
                .copied()
                .ok_or_else(|| HuddleError::Permission {
                    message: "unknown".into(),
                    open_settings: false,
                })
        }

        async fn request(&self, permission: &str) -> Result<PermissionStatus, HuddleError> {
            self.requested.lock().unwrap().push(permission.to_string());
            if self.grant_on_request.iter().any(|p| *p == permission) {
                Ok(PermissionStatus::Granted)
            } else {
                Ok(PermissionStatus::Denied)
            }
        }
    }

    const MIC: &str = "android.permission.RECORD_AUDIO";
    const CAM: &str = "android.permission.CAMERA";

    #[test]
    fn table_resolves_per_platform() {
        assert_eq!(permission_id(Capability::Microphone, Platform::Android), Some(MIC));
        assert_eq!(permission_id(Capability::Camera, Platform::Ios), Some("ios.permission.CAMERA"));
        assert_eq!(permission_id(Capability::Camera, Platform::Desktop), None);
    }

    #[tokio::test]
    async fn all_granted_needs_no_prompt() {
        let backend = ScriptedBackend::new(
            &[(MIC, PermissionStatus::Granted), (CAM, PermissionStatus::Granted)],
            &[],
        );
        let gate = PermissionGate::for_platform(backend.clone(), Platform::Android);
        assert!(gate.ensure(&Capability::SESSION).await.is_granted());
        assert!(backend.requested().is_empty());
    }

    #[tokio::test]
    async fn denied_is_requested_once() {
        let backend = ScriptedBackend::new(
            &[(MIC, PermissionStatus::Granted), (CAM, PermissionStatus::Denied)],
            &[CAM],
        );
        let gate = PermissionGate::for_platform(backend.clone(), Platform::Android);
        assert_eq!(gate.ensure(&Capability::SESSION).await, PermissionOutcome::Granted);
        assert_eq!(backend.requested(), vec![CAM.to_string()]);
    }

    #[tokio::test]
    async fn still_denied_after_request_fails() {
        let backend = ScriptedBackend::new(
            &[(MIC, PermissionStatus::Denied), (CAM, PermissionStatus::Granted)],
            &[],
        );
        let gate = PermissionGate::for_platform(backend, Platform::Android);
        let outcome = gate.ensure(&Capability::SESSION).await;
        assert_eq!(outcome, PermissionOutcome::Denied(Capability::Microphone));
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, HuddleError::Permission { open_settings: false, .. }));
    }

    #[tokio::test]
    async fn blocked_fails_without_prompting() {
        let backend = ScriptedBackend::new(
            &[(MIC, PermissionStatus::Denied), (CAM, PermissionStatus::Blocked)],
            &[MIC, CAM],
        );
        let gate = PermissionGate::for_platform(backend.clone(), Platform::Android);
        let outcome = gate.ensure(&Capability::SESSION).await;
        assert_eq!(outcome, PermissionOutcome::Blocked(Capability::Camera));
        assert!(backend.requested().is_empty());
        assert!(matches!(
            outcome.into_result(),
            Err(HuddleError::Permission { open_settings: true, .. })
        ));
    }

    #[tokio::test]
    async fn backend_failure_counts_as_denial() {
        let backend = ScriptedBackend::new(&[(MIC, PermissionStatus::Granted)], &[]);
        let gate = PermissionGate::for_platform(backend, Platform::Android);
        assert_eq!(
            gate.ensure(&Capability::SESSION).await,
            PermissionOutcome::Denied(Capability::Camera)
        );
    }

    #[tokio::test]
    async fn desktop_needs_nothing() {
        let backend = ScriptedBackend::new(&[], &[]);
        let gate = PermissionGate::for_platform(backend.clone(), Platform::Desktop);
        assert!(gate.ensure(&[Capability::Camera]).await.is_granted());
        assert!(backend.requested().is_empty());
    }

    #[tokio::test]
    async fn only_requested_capabilities_are_checked() {
        let backend = ScriptedBackend::new(&[(CAM, PermissionStatus::Granted)], &[]);
        let gate = PermissionGate::for_platform(backend, Platform::Android);
        assert!(gate.ensure(&[Capability::Camera]).await.is_granted());
    }
}
