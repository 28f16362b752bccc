//! Deliverable manifests: canonical form, hashing, and HMAC signing.
//!
//! Every submission carries a commitment derived from a manifest describing
//! the deliverable. The commitment must be reproducible by anyone holding the
//! signing key, so the canonical form has to be byte-stable:
//!
//! ```text
//! DeliverableManifest
//!     │  canonicalize (sorted keys, no whitespace)
//!     ▼
//! manifest_hash  = hex(SHA-256(canonical))
//!     │
//!     ▼
//! signature_hex  = hex(HMAC-SHA256(key, manifest_hash))
//!     │
//!     ▼
//! commitment     = hex(SHA-256(manifest_hash ":" signature_hex ":" signer_id))
//! ```

use std::cmp::Ordering;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{AutopilotError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";
pub const DEFAULT_SIGNER_ID: &str = "autopilot";

// ---------------------------------------------------------------------------
// Manifest types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverableManifest {
    pub job_id: String,
    pub assignment_id: String,
    pub bid_id: String,
    pub agent_id: String,
    pub deliverable_url: String,
    pub artifact_hash: String,
    pub created_at: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DeliverableManifest {
    /// JSON view with the wire field names. Infallible, unlike `to_value`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "jobId": self.job_id,
            "assignmentId": self.assignment_id,
            "bidId": self.bid_id,
            "agentId": self.agent_id,
            "deliverableUrl": self.deliverable_url,
            "artifactHash": self.artifact_hash,
            "createdAt": self.created_at,
            "metadata": Value::Object(self.metadata.clone()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSignature {
    pub algorithm: String,
    pub signer_id: String,
    pub signature_hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDeliverableManifest {
    pub manifest: DeliverableManifest,
    pub manifest_hash: String,
    pub signature: ManifestSignature,
}

// ---------------------------------------------------------------------------
// Key ordering
// ---------------------------------------------------------------------------

/// How object keys are ordered in the canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Host-independent emulation of root-locale collation: whitespace, then
    /// punctuation and symbols in root rank order (`_` `-` `,` `;` `:` ...),
    /// then digits, then letters compared case-insensitively; lowercase
    /// before uppercase on ties, then raw bytes.
    #[default]
    Collated,
    /// Plain byte order of the UTF-8 key.
    Bytewise,
}

impl KeyOrder {
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            KeyOrder::Collated => collated_cmp(a, b),
            KeyOrder::Bytewise => a.cmp(b),
        }
    }
}

/// Root-collation rank of ASCII punctuation and symbols. Characters not
/// listed sort after these, by code point.
const PUNCTUATION_ORDER: &str = "_-,;:!?.'\"()[]{}@*/\\&#%`^+<=>|~$";

fn primary_weight(c: char) -> (u8, u32) {
    if c.is_whitespace() {
        (0, c as u32)
    } else if c.is_alphabetic() {
        (3, c.to_lowercase().next().unwrap_or(c) as u32)
    } else if c.is_numeric() {
        (2, c as u32)
    } else {
        let rank = PUNCTUATION_ORDER
            .chars()
            .position(|p| p == c)
            .map_or(0x100 + c as u32, |i| i as u32);
        (1, rank)
    }
}

fn collated_cmp(a: &str, b: &str) -> Ordering {
    let primary = a.chars().map(primary_weight).cmp(b.chars().map(primary_weight));
    if primary != Ordering::Equal {
        return primary;
    }
    for (x, y) in a.chars().zip(b.chars()) {
        if x == y {
            continue;
        }
        if x.is_lowercase() && y.is_uppercase() {
            return Ordering::Less;
        }
        if x.is_uppercase() && y.is_lowercase() {
            return Ordering::Greater;
        }
    }
    a.cmp(b)
}

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Serialize `value` with every object's keys sorted by `order`, arrays in
/// their original order, and no insignificant whitespace.
pub fn canonical_json(value: &Value, order: KeyOrder) -> String {
    let mut out = String::new();
    write_canonical(value, order, &mut out);
    out
}

fn write_canonical(value: &Value, order: KeyOrder, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&render_number(n)),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, order, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| order.compare(a, b));
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], order, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Shortest JSON rendering: integral floats drop the fraction and very small
/// or very large magnitudes use exponent form with an explicit sign.
fn render_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    let Some(f) = n.as_f64() else {
        return n.to_string();
    };
    let abs = f.abs();
    if abs != 0.0 && !(1e-6..1e21).contains(&abs) {
        let s = format!("{f:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    if f.fract() == 0.0 {
        return format!("{f:.0}");
    }
    format!("{f}")
}

// ---------------------------------------------------------------------------
// Hashing and signing
// ---------------------------------------------------------------------------

pub fn canonicalize(manifest: &DeliverableManifest, order: KeyOrder) -> String {
    canonical_json(&manifest.to_value(), order)
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub fn manifest_hash(manifest: &DeliverableManifest, order: KeyOrder) -> String {
    sha256_hex(canonicalize(manifest, order).as_bytes())
}

fn hmac_hex(signing_key: &[u8], message: &str) -> Result<String> {
    if signing_key.is_empty() {
        return Err(AutopilotError::Signing("signing key must not be empty".into()));
    }
    let mut mac = HmacSha256::new_from_slice(signing_key)
        .map_err(|e| AutopilotError::Signing(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(format!("{:x}", mac.finalize().into_bytes()))
}

pub fn sign(
    manifest: &DeliverableManifest,
    signing_key: &[u8],
    signer_id: Option<&str>,
    order: KeyOrder,
) -> Result<SignedDeliverableManifest> {
    let hash = manifest_hash(manifest, order);
    let signature_hex = hmac_hex(signing_key, &hash)?;
    Ok(SignedDeliverableManifest {
        manifest: manifest.clone(),
        manifest_hash: hash,
        signature: ManifestSignature {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            signer_id: signer_id.unwrap_or(DEFAULT_SIGNER_ID).to_string(),
            signature_hex,
        },
    })
}

/// `false` when the manifest no longer matches its recorded hash or the
/// signature does not match `signing_key`. Mismatch is never an error.
pub fn verify(signed: &SignedDeliverableManifest, signing_key: &[u8], order: KeyOrder) -> bool {
    if signed.signature.algorithm != SIGNATURE_ALGORITHM {
        return false;
    }
    let recomputed = manifest_hash(&signed.manifest, order);
    if recomputed != signed.manifest_hash {
        return false;
    }
    match hmac_hex(signing_key, &recomputed) {
        Ok(expected) => expected == signed.signature.signature_hex,
        Err(_) => false,
    }
}

/// Opaque commitment over the signed manifest. Depends on the manifest, the
/// key, and the signer id; does not expose the artifact hash.
pub fn deterministic_deliverable_hash(
    manifest: &DeliverableManifest,
    signing_key: &[u8],
    signer_id: Option<&str>,
    order: KeyOrder,
) -> Result<String> {
    let signed = sign(manifest, signing_key, signer_id, order)?;
    Ok(commitment_of(&signed))
}

pub fn commitment_of(signed: &SignedDeliverableManifest) -> String {
    let preimage = format!(
        "{}:{}:{}",
        signed.manifest_hash, signed.signature.signature_hex, signed.signature.signer_id
    );
    sha256_hex(preimage.as_bytes())
}

// ---------------------------------------------------------------------------
// ManifestSigner
// ---------------------------------------------------------------------------

/// Signing key, signer identity, and key order bundled for the orchestrator.
#[derive(Clone)]
pub struct ManifestSigner {
    key: Vec<u8>,
    signer_id: Option<String>,
    order: KeyOrder,
}

impl std::fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("key", &"<redacted>")
            .field("signer_id", &self.signer_id)
            .field("order", &self.order)
            .finish()
    }
}

impl ManifestSigner {
    pub fn new(key: impl Into<Vec<u8>>, signer_id: Option<String>, order: KeyOrder) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(AutopilotError::Signing("signing key must not be empty".into()));
        }
        Ok(Self {
            key,
            signer_id,
            order,
        })
    }

    pub fn sign(&self, manifest: &DeliverableManifest) -> Result<SignedDeliverableManifest> {
        sign(manifest, &self.key, self.signer_id.as_deref(), self.order)
    }

    pub fn verify(&self, signed: &SignedDeliverableManifest) -> bool {
        verify(signed, &self.key, self.order)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
