//! CRDs owned by [cert-manager](https://cert-manager.io/), see [their API docs](https://cert-manager.io/docs/reference/api-docs/).
//!
//! Only the fields that this operator reads or writes are modelled. Status updates are sent as merge
//! patches, so anything else that cert-manager stores on the objects is left untouched.

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, ByteString},
    kube::{CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
    time::Duration,
};

use crate::crd::ConditionStatus;

/// Annotation that cert-manager sets on a `CertificateRequest` to name the Secret holding its private key.
pub const PRIVATE_KEY_SECRET_ANNOTATION: &str = "cert-manager.io/private-key-secret-name";

/// Lifetime of certificates whose request does not specify a `duration`, matching cert-manager's own default.
pub const DEFAULT_CERTIFICATE_DURATION: Duration = Duration::from_days_unchecked(90);

pub const CONDITION_READY: &str = "Ready";
pub const REASON_ISSUED: &str = "Issued";

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateRequest>.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "CertificateRequest",
    namespaced,
    derive = "PartialEq",
    status = "CertificateRequestStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// PEM-encoded PKCS#10 certificate signing request.
    pub request: ByteString,

    pub issuer_ref: ObjectReference,

    /// Requested lifetime of the certificate, such as `24h` or `2160h`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#meta.cert-manager.io/v1.ObjectReference>.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateRequestStatus>.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    /// PEM-encoded signed certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ByteString>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CertificateRequestCondition>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateRequestCondition>.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl CertificateRequest {
    /// Whether a certificate has already been issued for this request.
    pub fn is_issued(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|status| status.certificate.as_ref())
            .is_some_and(|ByteString(cert)| !cert.is_empty())
    }

    pub fn private_key_secret_name(&self) -> Option<&str> {
        self.annotations()
            .get(PRIVATE_KEY_SECRET_ANNOTATION)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

impl CertificateRequestStatus {
    /// Sets the condition of type `type_`, adding it if it is not present yet.
    ///
    /// `last_transition_time` is kept as long as `status` does not change.
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        observed_generation: Option<i64>,
        now: Time,
    ) {
        let new_condition = CertificateRequestCondition {
            type_: type_.to_string(),
            status,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: Some(now),
            observed_generation,
        };
        match self.conditions.iter_mut().find(|cond| cond.type_ == type_) {
            Some(cond) => {
                let last_transition_time = if cond.status == status {
                    cond.last_transition_time.take().or(new_condition.last_transition_time.clone())
                } else {
                    new_condition.last_transition_time.clone()
                };
                *cond = CertificateRequestCondition {
                    last_transition_time,
                    ..new_condition
                };
            }
            None => self.conditions.push(new_condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::{
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::{TimeZone, Utc},
    };

    use super::{CertificateRequest, CertificateRequestStatus, CONDITION_READY, REASON_ISSUED};
    use crate::crd::ConditionStatus;

    fn time(secs: i64) -> Time {
        Time(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn deserialize_certificate_request() {
        let cr: CertificateRequest = serde_yaml::from_str(
            "
            apiVersion: cert-manager.io/v1
            kind: CertificateRequest
            metadata:
              name: my-cert-1
              namespace: default
              annotations:
                cert-manager.io/private-key-secret-name: my-cert-key
            spec:
              request: aGVsbG8=
              duration: 2160h
              issuerRef:
                name: issuer
                group: cert-manager.k8s.sakamo.dev
                kind: CustomIssuer
              usages:
              - digital signature
            ",
        )
        .unwrap();
        assert_eq!(cr.spec.request.0, b"hello");
        assert_eq!(cr.spec.duration.as_deref(), Some("2160h"));
        assert_eq!(cr.spec.issuer_ref.group.as_deref(), Some("cert-manager.k8s.sakamo.dev"));
        assert_eq!(cr.private_key_secret_name(), Some("my-cert-key"));
        assert!(!cr.is_issued());
    }

    #[test]
    fn empty_certificate_is_not_issued() {
        let cr: CertificateRequest = serde_yaml::from_str(
            "
            apiVersion: cert-manager.io/v1
            kind: CertificateRequest
            metadata:
              name: my-cert-1
            spec:
              request: ''
              issuerRef:
                name: issuer
            status:
              certificate: ''
            ",
        )
        .unwrap();
        assert!(!cr.is_issued());
        assert_eq!(cr.private_key_secret_name(), None);
    }

    #[test]
    fn set_condition_replaces_by_type() {
        let mut status = CertificateRequestStatus::default();
        status.set_condition(
            "Approved",
            ConditionStatus::True,
            "Approved",
            "approved",
            None,
            time(1),
        );
        status.set_condition(
            CONDITION_READY,
            ConditionStatus::False,
            "Pending",
            "waiting",
            Some(1),
            time(2),
        );
        status.set_condition(
            CONDITION_READY,
            ConditionStatus::True,
            REASON_ISSUED,
            "Certificate issued",
            Some(1),
            time(3),
        );
        status.set_condition(
            CONDITION_READY,
            ConditionStatus::True,
            REASON_ISSUED,
            "Certificate issued",
            Some(2),
            time(4),
        );

        assert_eq!(status.conditions.len(), 2);
        let ready = &status.conditions[1];
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason.as_deref(), Some(REASON_ISSUED));
        assert_eq!(ready.observed_generation, Some(2));
        assert_eq!(ready.last_transition_time, Some(time(3)));
    }
}
