//! Advisory warnings about a shoot. Warnings never block reconciliation.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::crd::{CredentialRotation, Shoot};

pub const POD_SECURITY_POLICY_PLUGIN: &str = "PodSecurityPolicy";

/// Credential kinds whose rotation is tracked in the shoot status
const ROTATED_CREDENTIALS: [&str; 5] = [
    "certificate authorities",
    "service account token signing key",
    "ETCD encryption key",
    "SSH keypair",
    "observability passwords",
];

/// Parse `major.minor` from a Kubernetes version
fn minor_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn version_at_least(version: &str, major: u32, minor: u32) -> bool {
    minor_version(version).is_some_and(|v| v >= (major, minor))
}

/// Warnings for `shoot` at time `now`
pub fn get_warnings(shoot: &Shoot, now: DateTime<Utc>, rotation_interval: Duration) -> Vec<String> {
    let mut warnings = Vec::new();
    let kubernetes = &shoot.spec.kubernetes;

    let rotation = shoot
        .status
        .as_ref()
        .and_then(|s| s.credentials.as_ref())
        .and_then(|c| c.rotation.as_ref());
    let rotations: [Option<&CredentialRotation>; 5] = [
        rotation.and_then(|r| r.certificate_authorities.as_ref()),
        rotation.and_then(|r| r.service_account_key.as_ref()),
        rotation.and_then(|r| r.etcd_encryption_key.as_ref()),
        rotation.and_then(|r| r.ssh_keypair.as_ref()),
        rotation.and_then(|r| r.observability.as_ref()),
    ];
    let created = shoot.metadata.creation_timestamp.as_ref().map(|t| t.0);
    let interval = chrono::Duration::from_std(rotation_interval).unwrap_or(chrono::Duration::MAX);

    for (credential, rotation) in ROTATED_CREDENTIALS.iter().zip(rotations) {
        let last = rotation
            .and_then(|r| r.last_initiation_time)
            .or(created);
        let due = match last {
            Some(last) => now.signed_duration_since(last) > interval,
            None => true,
        };
        if due {
            warnings.push(format!(
                "you should consider rotating the {}, see https://gardener.cloud/docs/gardener/shoot_credentials_rotation for details",
                credential
            ));
        }
    }

    if kubernetes.enable_static_token_kubeconfig == Some(true) {
        warnings.push(
            "you should consider disabling the static token kubeconfig, see https://gardener.cloud/docs/gardener/shoot_access for details"
                .to_string(),
        );
    }

    let psp_enabled = kubernetes
        .kube_api_server
        .as_ref()
        .map(|api| {
            api.admission_plugins
                .iter()
                .any(|p| p.name == POD_SECURITY_POLICY_PLUGIN && p.disabled != Some(true))
        })
        .unwrap_or(false);
    if psp_enabled {
        if version_at_least(&kubernetes.version, 1, 25) {
            warnings.push(format!(
                "admission plugin {} is removed in Kubernetes 1.25 and must be disabled before upgrading",
                POD_SECURITY_POLICY_PLUGIN
            ));
        } else if version_at_least(&kubernetes.version, 1, 23) {
            warnings.push(format!(
                "admission plugin {} is deprecated in Kubernetes 1.23 and will be removed in 1.25, consider migrating to PodSecurity",
                POD_SECURITY_POLICY_PLUGIN
            ));
        }
    }

    warnings
}
