//! Deterministic key provider for simulation.

use paycentral_env::{EnvError, MandateId, SigningSecret};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use uuid::Builder;

const MANDATE_ID_TAG: &[u8] = b"paycentral/mandate-id/v1";

/// Provides the signing secret and mandate identifiers of a run.
///
/// In simulation, every sealed mandate must be reproducible, so both the
/// HMAC key and the mandate ids are derived from the master seed:
/// - Deterministic: same seed, same secret, same ids
/// - Unique: each (scenario, trial) gets its own id
/// - Isolated: running more trials never changes earlier ids
pub struct DeterministicKeyProvider {
    /// Master seed
    master_seed: u64,

    /// HMAC key for the run's mandate service
    secret: SigningSecret,
}

impl DeterministicKeyProvider {
    /// Creates a new key provider with the given master seed.
    pub fn new(master_seed: u64) -> Result<Self, EnvError> {
        let key_seed = master_seed.wrapping_mul(0x9e3779b97f4a7c15); // Golden ratio prime
        let mut rng = ChaCha8Rng::seed_from_u64(key_seed);
        let mut bytes = vec![0u8; SigningSecret::MIN_LEN];
        rng.fill_bytes(&mut bytes);

        Ok(Self {
            master_seed,
            secret: SigningSecret::from_bytes(bytes)?,
        })
    }

    /// Returns the run's signing secret.
    pub fn signing_secret(&self) -> SigningSecret {
        self.secret.clone()
    }

    /// Derives the mandate id for one trial of a scenario.
    pub fn mandate_id(&self, scenario_id: &str, trial_index: u64) -> MandateId {
        let mut hasher = Sha256::new();
        hasher.update(MANDATE_ID_TAG);
        hasher.update(self.master_seed.to_le_bytes());
        hasher.update((scenario_id.len() as u64).to_le_bytes());
        hasher.update(scenario_id.as_bytes());
        hasher.update(trial_index.to_le_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        MandateId::from_uuid(Builder::from_random_bytes(bytes).into_uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_secret() {
        let provider1 = DeterministicKeyProvider::new(42).unwrap();
        let provider2 = DeterministicKeyProvider::new(42).unwrap();

        assert_eq!(provider1.signing_secret(), provider2.signing_secret());
        assert_eq!(provider1.signing_secret().as_bytes().len(), SigningSecret::MIN_LEN);
    }

    #[test]
    fn test_different_seeds_different_secrets() {
        let provider1 = DeterministicKeyProvider::new(42).unwrap();
        let provider2 = DeterministicKeyProvider::new(43).unwrap();

        assert_ne!(provider1.signing_secret(), provider2.signing_secret());
    }

    #[test]
    fn test_deterministic_mandate_ids() {
        let provider1 = DeterministicKeyProvider::new(42).unwrap();
        let provider2 = DeterministicKeyProvider::new(42).unwrap();

        assert_eq!(
            provider1.mandate_id("race_condition", 5),
            provider2.mandate_id("race_condition", 5)
        );
    }

    #[test]
    fn test_different_trials_different_ids() {
        let provider = DeterministicKeyProvider::new(42).unwrap();

        let id0 = provider.mandate_id("race_condition", 0);
        let id1 = provider.mandate_id("race_condition", 1);
        let other = provider.mandate_id("frequency_error", 0);

        assert_ne!(id0, id1);
        assert_ne!(id0, other);
        assert_eq!(id0.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_id_isolation() {
        // Deriving more ids shouldn't change existing ones
        let provider = DeterministicKeyProvider::new(42).unwrap();
        let first: Vec<_> = (0..3).map(|i| provider.mandate_id("calculation_error", i)).collect();
        let _extra: Vec<_> = (0..100).map(|i| provider.mandate_id("calculation_error", i)).collect();

        for (i, id) in first.iter().enumerate() {
            assert_eq!(*id, provider.mandate_id("calculation_error", i as u64));
        }
    }
}
