//! The `CustomIssuer` CRD, owned by this operator.

use std::fmt::{Debug, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::Time,
    kube::CustomResource,
    schemars::{self, JsonSchema},
};

use crate::{utils::Unloggable, validator::Credentials};

/// A [cert-manager](https://cert-manager.io/) external issuer that signs `CertificateRequest`s
/// once its credentials have been accepted by the authority.
#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.k8s.sakamo.dev",
    version = "v1",
    kind = "CustomIssuer",
    namespaced,
    derive = "PartialEq",
    status = "CustomIssuerStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct CustomIssuerSpec {
    /// User to authenticate against the authority as.
    #[serde(default)]
    pub user: String,

    /// Password of `user`.
    #[serde(default)]
    pub password: String,
}

impl Debug for CustomIssuerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomIssuerSpec")
            .field("user", &self.user)
            .field("password", &Unloggable(&self.password))
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomIssuerStatus {
    /// Whether the authority has accepted the issuer's credentials.
    ///
    /// Kept as a list on the wire to follow the usual condition convention, but only the
    /// first entry is ever read or written.
    #[serde(
        rename = "conditions",
        default,
        serialize_with = "serialize_condition_list",
        deserialize_with = "deserialize_condition_list"
    )]
    #[schemars(with = "Vec<IssuerCondition>")]
    pub ready: Option<IssuerCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerCondition {
    #[serde(rename = "type", default)]
    pub type_: IssuerConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time that `status` changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum IssuerConditionType {
    #[default]
    Ready,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        })
    }
}

impl CustomIssuer {
    pub fn credentials(&self) -> Credentials<'_> {
        Credentials {
            user: &self.spec.user,
            password: &self.spec.password,
        }
    }

    /// Whether the issuer's readiness condition is present and `True`.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|status| status.ready.as_ref())
            .is_some_and(|cond| cond.status == ConditionStatus::True)
    }
}

impl CustomIssuerStatus {
    /// Overwrites the readiness condition, initializing it if there is none yet.
    ///
    /// `last_transition_time` only moves when `status` actually changes, so that repeated
    /// reconciliations converge on an identical object.
    pub fn set_ready(&mut self, status: ConditionStatus, reason: &str, message: String, now: Time) {
        let last_transition_time = match &self.ready {
            Some(old) if old.status == status => old.last_transition_time.clone().or(Some(now)),
            _ => Some(now),
        };
        self.ready = Some(IssuerCondition {
            type_: IssuerConditionType::Ready,
            status,
            reason: Some(reason.to_string()),
            message: Some(message),
            last_transition_time,
        });
    }
}

fn serialize_condition_list<S: Serializer>(
    condition: &Option<IssuerCondition>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    condition.as_slice().serialize(serializer)
}

fn deserialize_condition_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<IssuerCondition>, D::Error> {
    Ok(Option::<Vec<IssuerCondition>>::deserialize(deserializer)?
        .and_then(|conditions| conditions.into_iter().next()))
}
