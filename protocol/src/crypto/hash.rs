//! # Hashing Utilities
//!
//! Two hash families, two jobs:
//!
//! - **Poseidon over BN254 Fr** computes the commitment itself. It is cheap
//!   inside an arithmetic circuit, which is where the withdrawal proof has to
//!   recompute it, so the exact parameters are part of the protocol.
//!
//! - **BLAKE3** handles everything that never enters a circuit: note ids and
//!   storage domain tags. Fast, and its `derive_key` mode gives us proper
//!   domain separation for free.
//!
//! ## Limb encoding
//!
//! The commitment hash does not absorb `secret` and `nullifier` as two
//! packed field elements. Every input byte becomes its own field element
//! (`Fr::from(byte as u64)`), secret first, then nullifier: 64 absorbed
//! limbs in total. Every byte value is trivially below the field modulus, so
//! no reduction ever happens and both sides of the protocol get the same
//! result without agreeing on an endianness.

use std::sync::OnceLock;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{
    find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge,
};
use ark_crypto_primitives::sponge::CryptographicSponge;

use crate::config::{
    DERIVED_LENGTH, POSEIDON_ALPHA, POSEIDON_CAPACITY, POSEIDON_FULL_ROUNDS,
    POSEIDON_PARTIAL_ROUNDS, POSEIDON_PRIME_BITS, POSEIDON_RATE,
};

/// BLAKE3 in `derive_key` mode, keyed by a context string.
///
/// `domain_separated_hash("a", x)` and `domain_separated_hash("b", x)` never
/// collide, because the context selects a different internal IV.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Poseidon parameters for the commitment hash.
///
/// Round constants and the MDS matrix are generated once per process from
/// the Grain LFSR and cached. Generation is deterministic, so every process
/// everywhere ends up with the same table.
pub fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    static CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            POSEIDON_PRIME_BITS,
            POSEIDON_RATE,
            POSEIDON_FULL_ROUNDS as u64,
            POSEIDON_PARTIAL_ROUNDS as u64,
            0,
        );
        PoseidonConfig::new(
            POSEIDON_FULL_ROUNDS,
            POSEIDON_PARTIAL_ROUNDS,
            POSEIDON_ALPHA,
            mds,
            ark,
            POSEIDON_RATE,
            POSEIDON_CAPACITY,
        )
    })
}

/// Map every byte to one field-element limb, in order.
pub fn bytes_to_limbs(bytes: &[u8]) -> Vec<Fr> {
    bytes.iter().map(|b| Fr::from(*b as u64)).collect()
}

/// `Poseidon(limbs(secret) || limbs(nullifier))`.
pub fn algebraic_hash(secret: &[u8; DERIVED_LENGTH], nullifier: &[u8; DERIVED_LENGTH]) -> Fr {
    let mut sponge = PoseidonSponge::new(poseidon_config());
    for limb in bytes_to_limbs(secret)
        .into_iter()
        .chain(bytes_to_limbs(nullifier))
    {
        sponge.absorb(&limb);
    }
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_separation() {
        let data = b"same bytes";
        assert_ne!(
            domain_separated_hash("shroud v1 note id", data),
            domain_separated_hash("shroud v1 other", data)
        );
        assert_ne!(domain_separated_hash("shroud v1 note id", data), *blake3::hash(data).as_bytes());
    }

    #[test]
    fn test_limbs_one_per_byte() {
        let limbs = bytes_to_limbs(&[0, 1, 255]);
        assert_eq!(limbs, vec![Fr::from(0u64), Fr::from(1u64), Fr::from(255u64)]);
    }

    #[test]
    fn test_algebraic_hash_deterministic() {
        let s = [3u8; 32];
        let n = [9u8; 32];
        assert_eq!(algebraic_hash(&s, &n), algebraic_hash(&s, &n));
    }

    #[test]
    fn test_algebraic_hash_order_matters() {
        let s = [3u8; 32];
        let n = [9u8; 32];
        assert_ne!(algebraic_hash(&s, &n), algebraic_hash(&n, &s));
    }

    #[test]
    fn test_algebraic_hash_single_byte_sensitivity() {
        let s = [0u8; 32];
        let mut s2 = s;
        s2[31] = 1;
        let n = [0u8; 32];
        assert_ne!(algebraic_hash(&s, &n), algebraic_hash(&s2, &n));
    }

    #[test]
    fn test_poseidon_config_is_cached() {
        let a = poseidon_config() as *const _;
        let b = poseidon_config() as *const _;
        assert_eq!(a, b);
    }
}
