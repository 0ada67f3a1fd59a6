use alloy::primitives::FixedBytes;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Length of a serialized `r || s || v` ECDSA signature
pub const SIGNATURE_LENGTH: usize = 65;

/// Canonical `(v, r, s)` components of a seller-provided signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSignature {
    pub v: u8,
    pub r: FixedBytes<32>,
    pub s: FixedBytes<32>,
}

/// Split a hex encoded 65 byte signature into its components.
///
/// Accepts an optional `0x` prefix. Recovery ids of 0/1 are normalized to 27/28
/// since the market contract passes `v` straight to `ecrecover`.
pub fn split_signature(signature: &str) -> Result<SplitSignature> {
    let trimmed = signature.trim();
    let sig_hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let bytes = hex::decode(sig_hex).map_err(|e| anyhow!("Invalid hex signature: {}", e))?;

    if bytes.len() != SIGNATURE_LENGTH {
        return Err(anyhow!(
            "Signature must be {} bytes, got {}",
            SIGNATURE_LENGTH,
            bytes.len()
        ));
    }

    let r = FixedBytes::<32>::from_slice(&bytes[0..32]);
    let s = FixedBytes::<32>::from_slice(&bytes[32..64]);
    let v = match bytes[64] {
        0 | 1 => bytes[64] + 27,
        27 | 28 => bytes[64],
        other => return Err(anyhow!("Invalid signature recovery id: {}", other)),
    };

    Ok(SplitSignature { v, r, s })
}
