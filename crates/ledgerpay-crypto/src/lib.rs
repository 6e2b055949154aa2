//! Key storage, canonical transaction encoding and signing.

pub mod hashing;
pub mod keystore;
pub mod signer;

pub use hashing::{
    build_signing_preimage, compute_tx_hash, decode_signed_blob, derive_address,
    encode_signed_blob, encode_unsigned, DecodedBlob,
};
pub use keystore::{KeyAlgorithm, KeyError, KeyStore, Keypair, SEED_LEN};
pub use signer::{decode_and_verify, sign_transaction, verify_signed, SigningError, SIGNATURE_LEN};
