pub mod certificate_request_controller;
pub mod crd;
pub mod external_crd;
pub mod issuer_controller;
pub mod signer;
pub mod store;
pub mod utils;
pub mod validator;

pub const APP_NAME: &str = "custom-issuer";
pub const OPERATOR_NAME: &str = "custom-issuer.k8s.sakamo.dev";

/// API group of the resources owned by this operator.
///
/// `CertificateRequest`s whose `issuerRef.group` names any other group belong to a different issuer.
pub const API_GROUP: &str = "cert-manager.k8s.sakamo.dev";

/// Organization written into the subject of every issued certificate.
pub const CERTIFICATE_ORGANIZATION: &str = "k8s.sakamo.dev";
