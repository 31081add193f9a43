//! Validates the credentials of [`CustomIssuer`]s and records whether they were accepted

use std::sync::Arc;

use const_format::concatcp;
use futures::StreamExt;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc},
    kube::runtime::{controller, reflector::ObjectRef, watcher, Controller},
    logging::controller::{report_controller_reconciled, ReconcilerError},
    namespace::WatchNamespace,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::{ConditionStatus, CustomIssuer},
    store::{self, KubeStore, Store},
    utils::error_requeue,
    validator::{CredentialValidator, Verdict},
    OPERATOR_NAME,
};

const CONTROLLER_NAME: &str = "customissuer";
const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", OPERATOR_NAME);

const REASON_VERIFIED: &str = "Verified";
const REASON_INVALID_CREDENTIALS: &str = "InvalidCredentials";

pub struct Ctx {
    pub store: KubeStore,
    pub validator: Arc<dyn CredentialValidator>,
}

pub async fn start(
    client: &stackable_operator::client::Client,
    watch_namespace: &WatchNamespace,
    ctx: Arc<Ctx>,
) {
    Controller::new(
        watch_namespace.get_api::<CustomIssuer>(client),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each_concurrent(16, |res| async move {
        report_controller_reconciled(client, FULL_CONTROLLER_NAME, &res)
    })
    .await;
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("{issuer} has no namespace"))]
    NoIssuerNamespace { issuer: ObjectRef<CustomIssuer> },

    #[snafu(display("failed to get {issuer}"))]
    GetIssuer {
        source: store::Error,
        issuer: ObjectRef<CustomIssuer>,
    },

    #[snafu(display("failed to update status of {issuer}"))]
    UpdateIssuerStatus {
        source: store::Error,
        issuer: ObjectRef<CustomIssuer>,
    },

    #[snafu(display("credentials of user {user:?} were rejected: {reason}"))]
    InvalidCredentials { user: String, reason: String },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::GetIssuer { source, .. } | Error::UpdateIssuerStatus { source, .. } => {
                source.is_retriable()
            }
            Error::NoIssuerNamespace { .. } | Error::InvalidCredentials { .. } => false,
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

async fn reconcile(issuer: Arc<CustomIssuer>, ctx: Arc<Ctx>) -> Result<controller::Action> {
    reconcile_issuer(
        &ctx.store,
        ctx.validator.as_ref(),
        &ObjectRef::from_obj(&*issuer),
    )
    .await
}

fn error_policy(_obj: Arc<CustomIssuer>, error: &Error, _ctx: Arc<Ctx>) -> controller::Action {
    error_requeue(error.is_retriable())
}

/// Validates the credentials of the issuer referred to by `issuer_ref` and stores the verdict
/// as its `Ready` condition.
///
/// The issuer is always re-read from `store`, so the object that triggered the reconciliation
/// may be stale. Rejected credentials are reported as an error after they have been recorded.
pub async fn reconcile_issuer(
    store: &impl Store,
    validator: &dyn CredentialValidator,
    issuer_ref: &ObjectRef<CustomIssuer>,
) -> Result<controller::Action> {
    let namespace = issuer_ref
        .namespace
        .as_deref()
        .with_context(|| NoIssuerNamespaceSnafu {
            issuer: issuer_ref.clone(),
        })?;
    let Some(mut issuer) = store
        .get::<CustomIssuer>(&issuer_ref.name, namespace)
        .await
        .with_context(|_| GetIssuerSnafu {
            issuer: issuer_ref.clone(),
        })?
    else {
        tracing::debug!(issuer = %issuer_ref, "issuer no longer exists, ignoring");
        return Ok(controller::Action::await_change());
    };

    let verdict = validator.validate(issuer.credentials()).await;
    let (reason, message) = match &verdict {
        Verdict::Valid => (REASON_VERIFIED, "Credentials were accepted".to_string()),
        Verdict::Invalid { reason } => (REASON_INVALID_CREDENTIALS, reason.clone()),
    };
    issuer.status.get_or_insert_with(Default::default).set_ready(
        ConditionStatus::from(verdict.is_valid()),
        reason,
        message,
        Time(Utc::now()),
    );
    store
        .update_status(&issuer)
        .await
        .with_context(|_| UpdateIssuerStatusSnafu {
            issuer: issuer_ref.clone(),
        })?;

    match verdict {
        Verdict::Valid => {
            tracing::info!(issuer = %issuer_ref, "issuer credentials accepted");
            Ok(controller::Action::await_change())
        }
        Verdict::Invalid { reason } => InvalidCredentialsSnafu {
            user: issuer.spec.user,
            reason,
        }
        .fail(),
    }
}
