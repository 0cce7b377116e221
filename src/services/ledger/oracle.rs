use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Price data the settlement contract checks against the oracle key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleParams {
    pub timestamp: i64,
    pub price: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OraclePayload {
    pub data: OracleParams,
    /// Base64 ed25519 signature over `sha256(json(data))`
    pub signature: String,
    /// Hex-encoded public key
    pub oracle_id: String,
}

pub struct OracleSigner {
    key: SigningKey,
}

impl OracleSigner {
    /// `seed_hex` is a 32-byte hex seed. `None` generates an ephemeral key.
    pub fn from_seed_hex(seed_hex: Option<&str>) -> anyhow::Result<Self> {
        let seed: [u8; 32] = match seed_hex {
            Some(raw) => hex::decode(raw.trim())?
                .try_into()
                .map_err(|_| anyhow::anyhow!("LEDGER_ORACLE_SEED must be 32 bytes of hex"))?,
            None => {
                let mut seed = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut seed);
                seed
            }
        };
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn oracle_id(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    pub fn sign(&self, params: OracleParams) -> anyhow::Result<OraclePayload> {
        let digest = digest(&params)?;
        let signature = self.key.sign(&digest);
        Ok(OraclePayload {
            data: params,
            signature: STANDARD.encode(signature.to_bytes()),
            oracle_id: self.oracle_id(),
        })
    }
}

fn digest(params: &OracleParams) -> anyhow::Result<[u8; 32]> {
    let bytes = serde_json::to_vec(params)?;
    Ok(Sha256::digest(&bytes).into())
}

/// Checks a payload against the public key it names.
pub fn verify_payload(payload: &OraclePayload) -> bool {
    let Ok(key_bytes) = hex::decode(&payload.oracle_id) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = STANDARD.decode(&payload.signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(digest) = digest(&payload.data) else {
        return false;
    };
    key.verify(&digest, &signature).is_ok()
}
