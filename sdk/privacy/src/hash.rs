//! Poseidon hashing over BLS12-381 `Fr`.
//!
//! One parameter set is shared by commitments, nullifiers, key derivation and
//! the Merkle combinator. Each use absorbs its own domain tag first.

use std::sync::LazyLock;

use ark_bls12_381::Fr;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};
use ark_ff::{BigInteger, PrimeField};

/// 32-byte hash / field encoding used throughout the crate
pub type Hash = [u8; 32];

/// Field: BLS12-381 Fr (255 bits), rate 2, capacity 1
static POSEIDON: LazyLock<PoseidonConfig<Fr>> = LazyLock::new(|| {
    let prime_bits: u64 = 255;
    let rate: usize = 2;
    let capacity: usize = 1;
    let full_rounds: u64 = 8;
    let partial_rounds: u64 = 57;
    let alpha: u64 = 5;
    let skip_matrices: u64 = 0;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        rate,
        full_rounds,
        partial_rounds,
        skip_matrices,
    );

    PoseidonConfig::new(
        full_rounds as usize,
        partial_rounds as usize,
        alpha,
        mds,
        ark,
        rate,
        capacity,
    )
});

pub fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    &POSEIDON
}

/// Hash a sequence of field elements into one
pub fn hash_fields(inputs: &[Fr]) -> Fr {
    let mut sponge = PoseidonSponge::new(poseidon_config());
    for input in inputs {
        sponge.absorb(input);
    }
    sponge.squeeze_field_elements(1)[0]
}

/// Domain tag from a short ASCII label (zero padded, little-endian)
pub fn domain(label: &[u8]) -> Fr {
    let mut bytes = [0u8; 32];
    let len = label.len().min(31);
    bytes[..len].copy_from_slice(&label[..len]);
    Fr::from_le_bytes_mod_order(&bytes)
}

pub fn field_to_bytes(f: Fr) -> Hash {
    let bytes = f.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

pub fn bytes_to_field(bytes: &[u8]) -> Fr {
    Fr::from_le_bytes_mod_order(bytes)
}

/// Map an opaque recipient identifier into the field
pub fn recipient_field(recipient: &str) -> Fr {
    let digest = blake3::derive_key("shroud-recipient-v1", recipient.as_bytes());
    Fr::from_le_bytes_mod_order(&digest)
}
