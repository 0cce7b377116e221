//! Proof-of-reserve for sell orders: "my battery holds at least `threshold`".
//!
//! Two provers share one interface. `TrustedSimulationProver` issues a plain
//! attestation. `CommitmentProver` hides the level behind a blinded SHA-256
//! commitment and signs the (commitment, threshold) claim. Neither proves the
//! range cryptographically.

use std::sync::Arc;

use anyhow::bail;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::env_or;

const ATTESTATION_MARKER: &str = "RESERVE_ATTESTATION_SIMULATED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveProofMode {
    Disabled,
    Simulated,
    Commitment,
}

#[derive(Debug, Clone)]
pub struct ReserveProofConfig {
    pub mode: ReserveProofMode,
    /// Minimum battery level a seller must prove, in [0, 1]
    pub min_soc: f64,
}

impl Default for ReserveProofConfig {
    fn default() -> Self {
        Self {
            mode: ReserveProofMode::Disabled,
            min_soc: 0.2,
        }
    }
}

impl ReserveProofConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mode = match std::env::var("RESERVE_PROOF_MODE")
            .unwrap_or_else(|_| "disabled".to_string())
            .to_lowercase()
            .as_str()
        {
            "disabled" | "off" => ReserveProofMode::Disabled,
            "simulated" => ReserveProofMode::Simulated,
            "commitment" => ReserveProofMode::Commitment,
            other => bail!("Unsupported RESERVE_PROOF_MODE: {}", other),
        };

        let min_soc: f64 = env_or("RESERVE_PROOF_MIN_SOC", 0.2);
        if !(0.0..=1.0).contains(&min_soc) {
            bail!("RESERVE_PROOF_MIN_SOC must be within [0, 1], got {}", min_soc);
        }

        Ok(Self { mode, min_soc })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReserveProof {
    pub scheme: String,
    /// Base64 commitment to the battery level
    pub commitment: String,
    /// Base64 signature, or the attestation marker
    pub proof_data: String,
    /// Claimed floor in basis points of full charge
    pub public_min_bp: u32,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReserveProofError {
    #[error("battery level {level:.2} is below the required {threshold:.2}")]
    BelowThreshold { level: f64, threshold: f64 },
    #[error("battery level must be within [0, 1], got {0}")]
    InvalidLevel(f64),
}

pub trait ReserveProver: Send + Sync {
    fn scheme(&self) -> &'static str;

    fn prove(&self, battery_level: f64, threshold: f64) -> Result<ReserveProof, ReserveProofError>;

    fn verify(&self, proof: &ReserveProof) -> bool;
}

pub fn build_reserve_prover(config: &ReserveProofConfig) -> Option<Arc<dyn ReserveProver>> {
    match config.mode {
        ReserveProofMode::Disabled => None,
        ReserveProofMode::Simulated => {
            info!("Reserve proofs: trusted simulation (min SoC {})", config.min_soc);
            Some(Arc::new(TrustedSimulationProver))
        }
        ReserveProofMode::Commitment => {
            info!("Reserve proofs: signed commitments (min SoC {})", config.min_soc);
            Some(Arc::new(CommitmentProver::new()))
        }
    }
}

fn to_basis_points(level: f64) -> u32 {
    (level.clamp(0.0, 1.0) * 10_000.0).round() as u32
}

fn check_level(battery_level: f64, threshold: f64) -> Result<(), ReserveProofError> {
    if !battery_level.is_finite() || !(0.0..=1.0).contains(&battery_level) {
        return Err(ReserveProofError::InvalidLevel(battery_level));
    }
    if to_basis_points(battery_level) < to_basis_points(threshold) {
        return Err(ReserveProofError::BelowThreshold {
            level: battery_level,
            threshold,
        });
    }
    Ok(())
}

pub struct TrustedSimulationProver;

impl ReserveProver for TrustedSimulationProver {
    fn scheme(&self) -> &'static str {
        "simulated"
    }

    fn prove(&self, battery_level: f64, threshold: f64) -> Result<ReserveProof, ReserveProofError> {
        check_level(battery_level, threshold)?;
        let digest = Sha256::digest(to_basis_points(battery_level).to_le_bytes());
        Ok(ReserveProof {
            scheme: self.scheme().to_string(),
            commitment: STANDARD.encode(digest),
            proof_data: ATTESTATION_MARKER.to_string(),
            public_min_bp: to_basis_points(threshold),
        })
    }

    fn verify(&self, proof: &ReserveProof) -> bool {
        proof.scheme == self.scheme()
            && proof.proof_data == ATTESTATION_MARKER
            && proof.public_min_bp <= 10_000
    }
}

pub struct CommitmentProver {
    key: SigningKey,
}

impl CommitmentProver {
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    fn claim(commitment: &[u8], public_min_bp: u32) -> Vec<u8> {
        let mut msg = Vec::with_capacity(commitment.len() + 4);
        msg.extend_from_slice(commitment);
        msg.extend_from_slice(&public_min_bp.to_le_bytes());
        msg
    }
}

impl Default for CommitmentProver {
    fn default() -> Self {
        Self::new()
    }
}

impl ReserveProver for CommitmentProver {
    fn scheme(&self) -> &'static str {
        "commitment"
    }

    fn prove(&self, battery_level: f64, threshold: f64) -> Result<ReserveProof, ReserveProofError> {
        check_level(battery_level, threshold)?;

        let mut blinding = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut blinding);

        let mut hasher = Sha256::new();
        hasher.update(to_basis_points(battery_level).to_le_bytes());
        hasher.update(blinding);
        let commitment = hasher.finalize();

        let public_min_bp = to_basis_points(threshold);
        let signature = self.key.sign(&Self::claim(&commitment, public_min_bp));

        Ok(ReserveProof {
            scheme: self.scheme().to_string(),
            commitment: STANDARD.encode(commitment),
            proof_data: STANDARD.encode(signature.to_bytes()),
            public_min_bp,
        })
    }

    fn verify(&self, proof: &ReserveProof) -> bool {
        if proof.scheme != self.scheme() {
            return false;
        }
        let (Ok(commitment), Ok(sig_bytes)) = (
            STANDARD.decode(&proof.commitment),
            STANDARD.decode(&proof.proof_data),
        ) else {
            return false;
        };
        if commitment.len() != 32 {
            return false;
        }
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        self.key
            .verifying_key()
            .verify(&Self::claim(&commitment, proof.public_min_bp), &signature)
            .is_ok()
    }
}
