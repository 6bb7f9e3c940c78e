// ── Gateway results ──
//
// Byte material from the device is hex-encoded at this boundary so the
// results can cross an IPC channel as plain strings.

use serde::{Deserialize, Serialize};

/// Public key and address at the configured derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub public_key: String,
    pub address: String,
    pub chain_code: String,
}

/// Signature material for one signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    #[serde(rename = "signatureVRS")]
    pub signature_vrs: String,
    #[serde(rename = "signatureDER")]
    pub signature_der: String,
    pub signature_compact: String,
    pub post_sign_hash: String,
}
