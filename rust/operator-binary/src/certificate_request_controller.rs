//! Signs cert-manager [`CertificateRequest`]s that refer to a ready [`CustomIssuer`]

use std::{str::FromStr, sync::Arc};

use const_format::concatcp;
use futures::StreamExt;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::Secret,
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::Utc,
        ByteString,
    },
    kube::{
        api::DynamicObject,
        runtime::{controller, reflector::ObjectRef, watcher, Controller},
    },
    logging::controller::{report_controller_reconciled, ReconcilerError},
    namespace::WatchNamespace,
    time::Duration,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::{ConditionStatus, CustomIssuer},
    external_crd::cert_manager::{
        CertificateRequest, CONDITION_READY, DEFAULT_CERTIFICATE_DURATION, REASON_ISSUED,
    },
    signer,
    store::{self, KubeStore, Store},
    utils::error_requeue,
    API_GROUP, CERTIFICATE_ORGANIZATION, OPERATOR_NAME,
};

const CONTROLLER_NAME: &str = "certificaterequest";
const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", OPERATOR_NAME);

/// Key of the private key inside the Secret named by the request's annotation.
const PRIVATE_KEY_SECRET_KEY: &str = "tls.key";

pub struct Ctx {
    pub store: KubeStore,
}

pub async fn start(
    client: &stackable_operator::client::Client,
    watch_namespace: &WatchNamespace,
    ctx: Arc<Ctx>,
) {
    let controller = Controller::new(
        watch_namespace.get_api::<CertificateRequest>(client),
        watcher::Config::default(),
    );
    let requests = controller.store();
    controller
        // Requests that were waiting for their issuer to become ready should be retried immediately
        .watches(
            watch_namespace.get_api::<CustomIssuer>(client),
            watcher::Config::default(),
            move |issuer| requests_referring_to(&issuer, requests.state()),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each_concurrent(16, |res| async move {
            report_controller_reconciled(client, FULL_CONTROLLER_NAME, &res)
        })
        .await;
}

/// Resolves a [`CustomIssuer`] into the [`CertificateRequest`]s that refer to it.
fn requests_referring_to(
    issuer: &CustomIssuer,
    requests: impl IntoIterator<Item = Arc<CertificateRequest>>,
) -> Vec<ObjectRef<CertificateRequest>> {
    requests
        .into_iter()
        .filter(|req| {
            req.metadata.namespace == issuer.metadata.namespace
                && Some(&req.spec.issuer_ref.name) == issuer.metadata.name.as_ref()
                && req.refers_to_custom_issuer()
        })
        .map(|req| ObjectRef::from_obj(&*req))
        .collect()
}

impl CertificateRequest {
    /// Whether the request is meant for a [`CustomIssuer`] rather than some other issuer implementation.
    ///
    /// Requests that do not specify a group at all are claimed as well.
    fn refers_to_custom_issuer(&self) -> bool {
        self.spec
            .issuer_ref
            .group
            .as_deref()
            .map_or(true, |group| group == API_GROUP)
    }
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("{request} has no namespace"))]
    NoRequestNamespace {
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to get {request}"))]
    GetRequest {
        source: store::Error,
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to get {issuer}"))]
    GetIssuer {
        source: store::Error,
        issuer: ObjectRef<CustomIssuer>,
    },

    #[snafu(display("{issuer} does not exist"))]
    IssuerNotFound { issuer: ObjectRef<CustomIssuer> },

    #[snafu(display("{issuer} is not ready"))]
    IssuerNotReady { issuer: ObjectRef<CustomIssuer> },

    #[snafu(display(
        "{request} has no annotation {annotation:?} naming its private key Secret",
        annotation = crate::external_crd::cert_manager::PRIVATE_KEY_SECRET_ANNOTATION,
    ))]
    NoPrivateKeySecretAnnotation {
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to get private key {secret}"))]
    GetPrivateKeySecret {
        source: store::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("private key {secret} does not exist"))]
    PrivateKeySecretNotFound { secret: ObjectRef<Secret> },

    #[snafu(display("private key {secret} has no {PRIVATE_KEY_SECRET_KEY:?} entry"))]
    NoPrivateKeyInSecret { secret: ObjectRef<Secret> },

    #[snafu(display("failed to decode private key from {secret}"))]
    DecodePrivateKey {
        source: signer::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("requested duration {duration:?} is invalid"))]
    ParseDuration {
        source: <Duration as FromStr>::Err,
        duration: String,
    },

    #[snafu(display("failed to sign {request}"))]
    Sign {
        source: signer::Error,
        request: ObjectRef<CertificateRequest>,
    },

    #[snafu(display("failed to update status of {request}"))]
    UpdateRequestStatus {
        source: store::Error,
        request: ObjectRef<CertificateRequest>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the failure may resolve itself without the request being modified.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::GetRequest { source, .. }
            | Error::GetIssuer { source, .. }
            | Error::GetPrivateKeySecret { source, .. }
            | Error::UpdateRequestStatus { source, .. } => source.is_retriable(),
            // Issuers and private key Secrets are created independently of requests, and may trail them
            Error::IssuerNotFound { .. }
            | Error::IssuerNotReady { .. }
            | Error::PrivateKeySecretNotFound { .. }
            | Error::NoPrivateKeyInSecret { .. } => true,
            Error::NoRequestNamespace { .. }
            | Error::NoPrivateKeySecretAnnotation { .. }
            | Error::DecodePrivateKey { .. }
            | Error::ParseDuration { .. }
            | Error::Sign { .. } => false,
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::NoRequestNamespace { .. } => None,
            Error::GetRequest { .. } => None,
            Error::GetIssuer { issuer, .. } => Some(issuer.clone().erase()),
            Error::IssuerNotFound { issuer } => Some(issuer.clone().erase()),
            Error::IssuerNotReady { issuer } => Some(issuer.clone().erase()),
            Error::NoPrivateKeySecretAnnotation { .. } => None,
            Error::GetPrivateKeySecret { secret, .. } => Some(secret.clone().erase()),
            Error::PrivateKeySecretNotFound { secret } => Some(secret.clone().erase()),
            Error::NoPrivateKeyInSecret { secret } => Some(secret.clone().erase()),
            Error::DecodePrivateKey { secret, .. } => Some(secret.clone().erase()),
            Error::ParseDuration { .. } => None,
            Error::Sign { .. } => None,
            Error::UpdateRequestStatus { .. } => None,
        }
    }
}

async fn reconcile(
    request: Arc<CertificateRequest>,
    ctx: Arc<Ctx>,
) -> Result<controller::Action> {
    reconcile_certificate_request(&ctx.store, &ObjectRef::from_obj(&*request)).await
}

fn error_policy(
    _obj: Arc<CertificateRequest>,
    error: &Error,
    _ctx: Arc<Ctx>,
) -> controller::Action {
    error_requeue(error.is_retriable())
}

/// Issues a certificate for the request referred to by `request_ref`, unless one has already been issued.
///
/// The request is always re-read from `store`. Its status is only written once a certificate has been
/// signed, every other outcome leaves the request untouched.
pub async fn reconcile_certificate_request(
    store: &impl Store,
    request_ref: &ObjectRef<CertificateRequest>,
) -> Result<controller::Action> {
    let namespace = request_ref
        .namespace
        .as_deref()
        .with_context(|| NoRequestNamespaceSnafu {
            request: request_ref.clone(),
        })?;
    let Some(mut request) = store
        .get::<CertificateRequest>(&request_ref.name, namespace)
        .await
        .with_context(|_| GetRequestSnafu {
            request: request_ref.clone(),
        })?
    else {
        tracing::debug!(request = %request_ref, "request no longer exists, ignoring");
        return Ok(controller::Action::await_change());
    };

    if !request.refers_to_custom_issuer() {
        tracing::debug!(
            request = %request_ref,
            issuer.group = ?request.spec.issuer_ref.group,
            "request is for another issuer group, ignoring"
        );
        return Ok(controller::Action::await_change());
    }
    if request.is_issued() {
        tracing::debug!(request = %request_ref, "certificate has already been issued");
        return Ok(controller::Action::await_change());
    }

    let issuer_ref = ObjectRef::<CustomIssuer>::new(&request.spec.issuer_ref.name).within(namespace);
    let issuer = store
        .get::<CustomIssuer>(&issuer_ref.name, namespace)
        .await
        .with_context(|_| GetIssuerSnafu {
            issuer: issuer_ref.clone(),
        })?
        .with_context(|| IssuerNotFoundSnafu {
            issuer: issuer_ref.clone(),
        })?;
    if !issuer.is_ready() {
        return IssuerNotReadySnafu { issuer: issuer_ref }.fail();
    }

    let secret_name = request
        .private_key_secret_name()
        .with_context(|| NoPrivateKeySecretAnnotationSnafu {
            request: request_ref.clone(),
        })?;
    let secret_ref = ObjectRef::<Secret>::new(secret_name).within(namespace);
    let secret = store
        .get::<Secret>(secret_name, namespace)
        .await
        .with_context(|_| GetPrivateKeySecretSnafu {
            secret: secret_ref.clone(),
        })?
        .with_context(|| PrivateKeySecretNotFoundSnafu {
            secret: secret_ref.clone(),
        })?;
    let ByteString(key_pem) = secret
        .data
        .as_ref()
        .and_then(|data| data.get(PRIVATE_KEY_SECRET_KEY))
        .with_context(|| NoPrivateKeyInSecretSnafu {
            secret: secret_ref.clone(),
        })?;
    let key = signer::decode_private_key(key_pem).context(DecodePrivateKeySnafu {
        secret: secret_ref,
    })?;

    let lifetime = match &request.spec.duration {
        Some(duration) => Duration::from_str(duration).context(ParseDurationSnafu { duration })?,
        None => DEFAULT_CERTIFICATE_DURATION,
    };
    let issued = signer::sign(
        &request.spec.request.0,
        &key,
        CERTIFICATE_ORGANIZATION,
        lifetime,
    )
    .with_context(|_| SignSnafu {
        request: request_ref.clone(),
    })?;
    tracing::info!(
        request = %request_ref,
        issuer = %issuer_ref,
        dns_names = ?issued.dns_names,
        not_after = %issued.not_after,
        "issued certificate"
    );

    let generation = request.metadata.generation;
    let status = request.status.get_or_insert_with(Default::default);
    status.certificate = Some(ByteString(issued.pem));
    status.set_condition(
        CONDITION_READY,
        ConditionStatus::True,
        REASON_ISSUED,
        "Certificate issued",
        generation,
        Time(Utc::now()),
    );
    store
        .update_status(&request)
        .await
        .with_context(|_| UpdateRequestStatusSnafu {
            request: request_ref.clone(),
        })?;
    Ok(controller::Action::await_change())
}
