//! Signer identities and the archive scan that recovers them.
//!
//! A signed jar carries, under `META-INF/`, one signature file (`<X>.SF`) per
//! signer together with a detached CMS block (`<X>.RSA`, `<X>.DSA` or `<X>.EC`)
//! over it. The signature file lists a digest of the whole manifest and a
//! digest of each manifest section. [`JarSignatureScanner`] checks the CMS
//! signature, then those digests, and reports which entries each signer vouches
//! for. Certificate chains are not evaluated against any trust anchors.

use crate::config::JarConfig;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::verifier::DigestAlgorithm;
use base64::Engine;
use camino::Utf8Path;
use cms::cert::x509::Certificate;
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use der::oid::db::rfc5911::{ID_CONTENT_TYPE, ID_MESSAGE_DIGEST};
use der::oid::db::rfc5912::{
    ID_SHA_256, ID_SHA_384, ID_SHA_512, RSA_ENCRYPTION, SHA_256_WITH_RSA_ENCRYPTION,
    SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
};
use der::oid::ObjectIdentifier;
use der::{Decode, Encode};
use rustls_pki_types::{CertificateDer, Der, SignatureVerificationAlgorithm};
use sha2::Digest;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::Arc;
use thiserror::Error;
use webpki::ring;

const SIGNATURE_FILE_SUFFIX: &str = ".SF";
const BLOCK_SUFFIXES: [&str; 3] = [".RSA", ".DSA", ".EC"];
const DIGEST_MANIFEST_SUFFIX: &str = "-Digest-Manifest";
const DIGEST_SUFFIX: &str = "-Digest";
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Identity of one certificate that signed part of the jar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signer {
    /// RFC 4514 form of the certificate subject.
    pub subject: String,
    /// Hex-encoded certificate serial number.
    pub serial: String,
    /// Hex-encoded SHA-256 of the DER certificate.
    pub fingerprint: String,
}

/// The signers of one entry, in the order they were found.
///
/// Cloning is cheap. Trust checks compare sets by [`len`](Self::len) only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerSet(Arc<[Signer]>);

impl SignerSet {
    pub fn new(signers: Vec<Signer>) -> Self {
        Self(signers.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Signer> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Signer] {
        &self.0
    }

    fn extended(&self, more: &SignerSet) -> Self {
        self.iter().chain(more.iter()).cloned().collect()
    }
}

impl FromIterator<Signer> for SignerSet {
    fn from_iter<T: IntoIterator<Item = Signer>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a scan of one archive root found.
#[derive(Debug, Clone, Default)]
pub struct ArchiveScan {
    /// The archive's own manifest, if it has one.
    pub manifest: Option<Manifest>,
    /// At least one signature block verified.
    pub signatures_present: bool,
    /// Entries vouched for by a signature file, awaiting their own digest check.
    pub pending_signers: HashMap<String, SignerSet>,
    /// Signers whose signature file covers the whole manifest.
    pub manifest_signers: Option<SignerSet>,
}

/// Reads the manifest and signing metadata out of an archive root.
pub trait ArchiveScanner: Send + Sync {
    fn scan(&self, archive: &Utf8Path, config: &JarConfig) -> Result<ArchiveScan>;
}

/// Scans zip-format jars, checking CMS signature blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct JarSignatureScanner;

impl ArchiveScanner for JarSignatureScanner {
    fn scan(&self, archive: &Utf8Path, config: &JarConfig) -> Result<ArchiveScan> {
        let file = File::open(archive)?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))?;

        let names: Vec<String> = zip.file_names().map(str::to_string).collect();
        let Some(manifest_name) = names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(&config.manifest_name))
        else {
            return Ok(ArchiveScan::default());
        };

        let manifest_bytes = read_entry(&mut zip, manifest_name)?;
        let manifest = Manifest::parse(&manifest_bytes)?;
        let mut scan = ArchiveScan::default();

        let meta_dir = config
            .manifest_name
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/"))
            .unwrap_or_default();

        for sf_name in names.iter().filter(|n| is_signature_file(n, &meta_dir)) {
            let Some(base) = sf_name.get(..sf_name.len() - SIGNATURE_FILE_SUFFIX.len()) else {
                continue;
            };
            let Some(block_name) = names.iter().find(|n| {
                BLOCK_SUFFIXES
                    .iter()
                    .any(|suffix| n.eq_ignore_ascii_case(&format!("{base}{suffix}")))
            }) else {
                tracing::warn!("{}: signature file {} has no signature block", archive, sf_name);
                continue;
            };

            let sf_bytes = read_entry(&mut zip, sf_name)?;
            let block_bytes = read_entry(&mut zip, block_name)?;

            match check_block(&sf_bytes, &block_bytes, &manifest_bytes, &manifest) {
                Ok(block) => {
                    tracing::debug!(
                        "{}: {} verified, {} signer(s), {} entries",
                        archive,
                        block_name,
                        block.signers.len(),
                        block.entries.len()
                    );
                    scan.signatures_present = true;
                    if block.covers_manifest {
                        scan.manifest_signers = Some(match &scan.manifest_signers {
                            Some(existing) => existing.extended(&block.signers),
                            None => block.signers.clone(),
                        });
                    }
                    for entry in block.entries {
                        scan.pending_signers
                            .entry(entry)
                            .and_modify(|s| *s = s.extended(&block.signers))
                            .or_insert_with(|| block.signers.clone());
                    }
                }
                Err(err) => {
                    tracing::warn!("{}: skipping signature block {}: {}", archive, block_name, err);
                }
            }
        }

        scan.manifest = Some(manifest);
        Ok(scan)
    }
}

fn is_signature_file(name: &str, meta_dir: &str) -> bool {
    name.len() > meta_dir.len()
        && name
            .as_bytes()
            .get(..meta_dir.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(meta_dir.as_bytes()))
        && name
            .get(meta_dir.len()..)
            .is_some_and(|rest| !rest.contains('/'))
        && name
            .as_bytes()
            .get(name.len().saturating_sub(SIGNATURE_FILE_SUFFIX.len())..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SIGNATURE_FILE_SUFFIX.as_bytes()))
}

fn read_entry<R: Read + std::io::Seek>(zip: &mut zip::ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = zip.by_name(name)?;
    // Declared sizes come from the archive and are not trusted.
    let mut bytes = Vec::with_capacity(file.size().min(MAX_PREALLOCATION) as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Parsing ContentInfo: {0}")]
    ContentInfo(der::Error),

    #[error("Parsing SignedData: {0}")]
    SignedData(der::Error),

    #[error("Parsing signature file: {0}")]
    SignatureFile(String),

    #[error("Dumping der: {0}")]
    Encode(der::Error),

    #[error("No signer certificate matched any signer info")]
    NoSigners,

    #[error("Signed attributes digest missing")]
    SignedAttributesDigestMissing,

    #[error("Signed attributes digest duplicated")]
    SignedAttributesDigestDuplicated,

    #[error("Signed attributes digest has no value")]
    SignedAttributesDigestValueNone,

    #[error("Signed attributes digest has more than one value")]
    SignedAttributesDigestValueMulti,

    #[error("Signed attributes digest mismatch")]
    SignedAttributesDigestMismatch,

    #[error("Signed attribute content-type missing")]
    SignedAttributesContentTypeMissing,

    #[error("Signed attribute content-type duplicated")]
    SignedAttributesContentTypeDuplicated,

    #[error("Signed attribute content-type decode: {0}")]
    SignedAttributesContentTypeDecode(der::Error),

    #[error("Signed attribute content-type mismatch wanted({wanted}) in_attr({in_attr})")]
    SignedAttributesContentTypeMismatch {
        wanted: ObjectIdentifier,
        in_attr: ObjectIdentifier,
    },

    #[error("Unsupported algorithm digest {digest_alg} signature: {signature_algorithm}")]
    UnsupportedAlgorithm {
        digest_alg: ObjectIdentifier,
        signature_algorithm: ObjectIdentifier,
    },

    #[error("Certificate rejected: {0}")]
    Certificate(webpki::Error),

    #[error("Verify data failed because: {0}")]
    Failed(webpki::Error),
}

struct VerifiedBlock {
    signers: SignerSet,
    covers_manifest: bool,
    entries: Vec<String>,
}

fn check_block(
    sf_bytes: &[u8],
    block: &[u8],
    manifest_bytes: &[u8],
    manifest: &Manifest,
) -> std::result::Result<VerifiedBlock, SignatureError> {
    let content_info = ContentInfo::from_der(block).map_err(SignatureError::ContentInfo)?;
    let signed_data = content_info
        .content
        .decode_as::<SignedData>()
        .map_err(SignatureError::SignedData)?;

    let signers = verify_signed_data(&signed_data, sf_bytes)?;

    let sf = Manifest::parse(sf_bytes).map_err(|e| SignatureError::SignatureFile(e.to_string()))?;
    let covers_manifest = digest_matches(sf.main_attributes().iter(), DIGEST_MANIFEST_SUFFIX, manifest_bytes);

    let entries = sf
        .entries()
        .iter()
        .filter(|(name, attrs)| {
            let Some(section) = manifest.raw_section(name) else {
                return false;
            };
            covers_manifest || digest_matches(attrs.iter(), DIGEST_SUFFIX, section)
        })
        .map(|(name, _)| name.clone())
        .collect();

    Ok(VerifiedBlock {
        signers,
        covers_manifest,
        entries,
    })
}

/// Whether any `<ALGO><suffix>` header with a supported algorithm matches `data`.
fn digest_matches<'a>(
    headers: impl Iterator<Item = (&'a str, &'a str)>,
    suffix: &str,
    data: &[u8],
) -> bool {
    let mut matched = false;
    for (key, value) in headers {
        let Some(algo) = key
            .len()
            .checked_sub(suffix.len())
            .filter(|&at| {
                key.as_bytes()[at..].eq_ignore_ascii_case(suffix.as_bytes())
            })
            .and_then(|at| key.get(..at))
        else {
            continue;
        };
        let Ok(algorithm) = algo.parse::<DigestAlgorithm>() else {
            tracing::debug!("Ignoring {} with unsupported algorithm", key);
            continue;
        };
        let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(value.trim()) else {
            return false;
        };
        if algorithm.digest(data) != expected {
            return false;
        }
        matched = true;
    }
    matched
}

fn verify_signed_data(
    signed_data: &SignedData,
    content: &[u8],
) -> std::result::Result<SignerSet, SignatureError> {
    let certs: Vec<&Certificate> = signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert),
            _ => None,
        })
        .collect();

    let econtent_oid = signed_data.encap_content_info.econtent_type;
    let mut signers = Vec::new();
    let mut first_error = None;

    for signer_info in signed_data.signer_infos.0.iter() {
        for cert in certs.iter().filter(|c| signer_matches(c, &signer_info.sid)) {
            match verify_with_cert(cert, &econtent_oid, content, signer_info) {
                Ok(signer) => {
                    signers.push(signer);
                    break;
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
    }

    if signers.is_empty() {
        return Err(first_error.unwrap_or(SignatureError::NoSigners));
    }
    Ok(SignerSet::new(signers))
}

fn signer_matches(cert: &Certificate, sid: &SignerIdentifier) -> bool {
    match sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => {
            cert.tbs_certificate.issuer == isn.issuer
                && cert.tbs_certificate.serial_number == isn.serial_number
        }
        SignerIdentifier::SubjectKeyIdentifier(skid) => cert_skid(cert).as_ref() == Some(skid),
    }
}

fn cert_skid(cert: &Certificate) -> Option<cms::cert::x509::ext::pkix::SubjectKeyIdentifier> {
    cert.tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|x| x.extn_id == <cms::cert::x509::ext::pkix::SubjectKeyIdentifier as der::oid::AssociatedOid>::OID)
        .and_then(|x| cms::cert::x509::ext::pkix::SubjectKeyIdentifier::from_der(x.extn_value.as_bytes()).ok())
}

fn verify_with_cert(
    cert: &Certificate,
    econtent_oid: &ObjectIdentifier,
    data: &[u8],
    signer_info: &SignerInfo,
) -> std::result::Result<Signer, SignatureError> {
    let der = cert.to_der().map_err(SignatureError::Encode)?;
    let cert_der = CertificateDer::from(der.as_slice());
    let end_entity =
        webpki::EndEntityCert::try_from(&cert_der).map_err(SignatureError::Certificate)?;

    let signature_alg = find_signer_algo(signer_info)?;
    let msg = match &signer_info.signed_attrs {
        None => Der::from_slice(data),
        Some(attributes) => {
            compare_message_digest(econtent_oid, data, signer_info)?;
            Der::from(attributes.to_der().map_err(SignatureError::Encode)?)
        }
    };
    end_entity
        .verify_signature(signature_alg, &msg[..], signer_info.signature.as_bytes())
        .map_err(SignatureError::Failed)?;

    Ok(Signer {
        subject: cert.tbs_certificate.subject.to_string(),
        serial: hex::encode(cert.tbs_certificate.serial_number.as_bytes()),
        fingerprint: hex::encode(sha2::Sha256::digest(&der)),
    })
}

fn find_signer_algo(
    signer_info: &SignerInfo,
) -> std::result::Result<&'static dyn SignatureVerificationAlgorithm, SignatureError> {
    match (
        signer_info.digest_alg.oid,
        signer_info.signature_algorithm.oid,
    ) {
        (ID_SHA_256, RSA_ENCRYPTION) | (ID_SHA_256, SHA_256_WITH_RSA_ENCRYPTION) => {
            Ok(ring::RSA_PKCS1_2048_8192_SHA256)
        }
        (ID_SHA_384, RSA_ENCRYPTION) | (ID_SHA_384, SHA_384_WITH_RSA_ENCRYPTION) => {
            Ok(ring::RSA_PKCS1_2048_8192_SHA384)
        }
        (ID_SHA_512, RSA_ENCRYPTION) | (ID_SHA_512, SHA_512_WITH_RSA_ENCRYPTION) => {
            Ok(ring::RSA_PKCS1_2048_8192_SHA512)
        }
        (digest_alg, signature_algorithm) => Err(SignatureError::UnsupportedAlgorithm {
            digest_alg,
            signature_algorithm,
        }),
    }
}

fn compare_message_digest(
    econtent_oid: &ObjectIdentifier,
    data: &[u8],
    signer_info: &SignerInfo,
) -> std::result::Result<(), SignatureError> {
    let Some(attributes) = &signer_info.signed_attrs else {
        return Ok(());
    };

    let mut digests = attributes
        .iter()
        .filter(|attr| attr.oid == ID_MESSAGE_DIGEST);
    let Some(digest) = digests.next() else {
        return Err(SignatureError::SignedAttributesDigestMissing);
    };
    if digests.next().is_some() {
        return Err(SignatureError::SignedAttributesDigestDuplicated);
    }
    let Some(digest_value) = digest.values.get(0) else {
        return Err(SignatureError::SignedAttributesDigestValueNone);
    };
    if digest.values.len() > 1 {
        return Err(SignatureError::SignedAttributesDigestValueMulti);
    }
    let matches = match signer_info.digest_alg.oid {
        ID_SHA_256 => sha2::Sha256::digest(data)[..].eq(digest_value.value()),
        ID_SHA_384 => sha2::Sha384::digest(data)[..].eq(digest_value.value()),
        ID_SHA_512 => sha2::Sha512::digest(data)[..].eq(digest_value.value()),
        digest_alg => {
            return Err(SignatureError::UnsupportedAlgorithm {
                digest_alg,
                signature_algorithm: signer_info.signature_algorithm.oid,
            })
        }
    };
    if !matches {
        return Err(SignatureError::SignedAttributesDigestMismatch);
    }

    let mut content_types = attributes
        .iter()
        .filter(|attr| attr.oid == ID_CONTENT_TYPE);
    let Some(content_type) = content_types.next() else {
        return Err(SignatureError::SignedAttributesContentTypeMissing);
    };
    if content_types.next().is_some() || content_type.values.len() > 1 {
        return Err(SignatureError::SignedAttributesContentTypeDuplicated);
    }
    let Some(value) = content_type.values.get(0) else {
        return Err(SignatureError::SignedAttributesContentTypeMissing);
    };
    let in_attr = value
        .decode_as::<ObjectIdentifier>()
        .map_err(SignatureError::SignedAttributesContentTypeDecode)?;
    if in_attr != *econtent_oid {
        return Err(SignatureError::SignedAttributesContentTypeMismatch {
            wanted: *econtent_oid,
            in_attr,
        });
    }
    Ok(())
}
