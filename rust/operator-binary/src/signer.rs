//! Issues certificates for PKCS#10 certificate signing requests
//!
//! Certificates are self-signed by the key that belongs to the request, there is no CA chain.

use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    conf::{Conf, ConfMethod},
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private},
    x509::{
        extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName},
        X509Builder, X509NameBuilder,
    },
};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use stackable_operator::time::Duration;
use time::OffsetDateTime;
use x509_parser::{
    certification_request::X509CertificationRequest,
    error::{PEMError, X509Error},
    extensions::{GeneralName, ParsedExtension},
    nom,
    pem::parse_x509_pem,
    prelude::FromDer,
};

use crate::utils::{asn1time_to_offsetdatetime, Asn1TimeParseError};

const PEM_PRIVATE_KEY_PKCS8_LABEL: &str = "PRIVATE KEY";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode PEM envelope of certificate signing request"))]
    DecodeRequestPem { source: nom::Err<PEMError> },

    #[snafu(display("failed to parse certificate signing request"))]
    ParseRequest { source: nom::Err<X509Error> },

    #[snafu(display("failed to decode PEM envelope of private key"))]
    DecodeKeyPem { source: nom::Err<PEMError> },

    #[snafu(display("private key is stored as {label:?}, expected a PKCS#8 {PEM_PRIVATE_KEY_PKCS8_LABEL:?}"))]
    KeyNotPkcs8 { label: String },

    #[snafu(display("failed to parse PKCS#8 private key"))]
    ParseKey { source: openssl::error::ErrorStack },

    #[snafu(display("private key uses unsupported algorithm {algorithm:?}, only RSA keys are supported"))]
    UnsupportedKeyAlgorithm { algorithm: Id },

    #[snafu(display("certificate lifetime {lifetime} is out of range"))]
    LifetimeOutOfRange { lifetime: Duration },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: openssl::error::ErrorStack },

    #[snafu(display("failed to serialize certificate"))]
    SerializeCertificate { source: openssl::error::ErrorStack },

    #[snafu(display("failed to read validity period of issued certificate"))]
    ReadValidity { source: Asn1TimeParseError },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub struct IssuedCertificate {
    /// PEM-encoded certificate.
    pub pem: Vec<u8>,
    pub dns_names: Vec<String>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

/// Decodes a PEM-encoded PKCS#8 RSA private key.
///
/// Other PEM envelopes (such as PKCS#1 `RSA PRIVATE KEY`) and other key algorithms are rejected.
pub fn decode_private_key(pem: &[u8]) -> Result<PKey<Private>> {
    let (_, pem) = parse_x509_pem(pem).context(DecodeKeyPemSnafu)?;
    ensure!(
        pem.label == PEM_PRIVATE_KEY_PKCS8_LABEL,
        KeyNotPkcs8Snafu { label: &pem.label }
    );
    let key = PKey::private_key_from_pkcs8(&pem.contents).context(ParseKeySnafu)?;
    ensure!(
        key.id() == Id::RSA,
        UnsupportedKeyAlgorithmSnafu {
            algorithm: key.id()
        }
    );
    Ok(key)
}

/// Returns the DNS subject alternative names requested by a PEM or DER encoded PKCS#10 request.
pub fn requested_dns_names(request: &[u8]) -> Result<Vec<String>> {
    let der = if request.trim_ascii_start().starts_with(b"-----BEGIN") {
        parse_x509_pem(request).context(DecodeRequestPemSnafu)?.1.contents
    } else {
        request.to_vec()
    };
    let (_, csr) = X509CertificationRequest::from_der(&der).context(ParseRequestSnafu)?;
    Ok(csr
        .requested_extensions()
        .into_iter()
        .flatten()
        .filter_map(|ext| match ext {
            ParsedExtension::SubjectAlternativeName(san) => Some(san),
            _ => None,
        })
        .flat_map(|san| &san.general_names)
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            _ => None,
        })
        .collect())
}

/// Issues a certificate for the DNS names in `request`, valid from now until `lifetime` has passed.
///
/// The certificate is self-signed: `key` is both the subject key and the signing key, and the issuer
/// name is the same as the subject name (`O=<organization>`).
pub fn sign(
    request: &[u8],
    key: &PKey<Private>,
    organization: &str,
    lifetime: Duration,
) -> Result<IssuedCertificate> {
    let dns_names = requested_dns_names(request)?;

    let now = OffsetDateTime::now_utc();
    let not_after = time::Duration::try_from(*lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add(lifetime))
        .context(LifetimeOutOfRangeSnafu { lifetime })?;

    let conf = Conf::new(ConfMethod::default()).context(BuildCertificateSnafu)?;
    let cert = X509Builder::new()
        .and_then(|mut x509| {
            let name = X509NameBuilder::new()
                .and_then(|mut name| {
                    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
                    Ok(name)
                })?
                .build();
            x509.set_subject_name(&name)?;
            x509.set_issuer_name(&name)?;
            x509.set_not_before(Asn1Time::from_unix(now.unix_timestamp())?.as_ref())?;
            x509.set_not_after(Asn1Time::from_unix(not_after.unix_timestamp())?.as_ref())?;
            x509.set_pubkey(key)?;
            x509.set_version(
                3 - 1, // zero-indexed
            )?;
            let mut serial = BigNum::new()?;
            serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
            x509.set_serial_number(Asn1Integer::from_bn(&serial)?.as_ref())?;
            let ctx = x509.x509v3_context(None, Some(&conf));
            let mut exts = vec![
                BasicConstraints::new().critical().build()?,
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_encipherment()
                    .build()?,
                ExtendedKeyUsage::new().server_auth().build()?,
            ];
            if !dns_names.is_empty() {
                let mut san_ext = SubjectAlternativeName::new();
                for dns in &dns_names {
                    san_ext.dns(dns);
                }
                exts.push(san_ext.build(&ctx)?);
            }
            for ext in exts {
                x509.append_extension(ext)?;
            }
            x509.sign(key, MessageDigest::sha256())?;
            Ok(x509)
        })
        .context(BuildCertificateSnafu)?
        .build();

    Ok(IssuedCertificate {
        pem: cert.to_pem().context(SerializeCertificateSnafu)?,
        not_before: asn1time_to_offsetdatetime(cert.not_before()).context(ReadValiditySnafu)?,
        not_after: asn1time_to_offsetdatetime(cert.not_after()).context(ReadValiditySnafu)?,
        dns_names,
    })
}
