//! Signer: turns an unsigned transaction into an immutable signed blob.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use ledgerpay_types::{Address, SignedTransaction, UnsignedTransaction};
use thiserror::Error;

use crate::{
    hashing::{build_signing_preimage, compute_tx_hash, decode_signed_blob, encode_signed_blob},
    keystore::Keypair,
    derive_address,
};

pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("keypair does not control account {account}: derived {derived}")]
    KeyMismatch { account: Address, derived: Address },
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed blob: {0}")]
    MalformedBlob(String),
}

/// Ed25519 signatures are deterministic, so signing the same transaction with
/// the same keypair always yields the same blob and hash.
pub fn sign_transaction(
    tx: UnsignedTransaction,
    keypair: &Keypair,
) -> Result<SignedTransaction, SigningError> {
    let public_key = keypair.public_key();
    let derived = derive_address(&public_key);
    if derived != tx.account {
        return Err(SigningError::KeyMismatch {
            account: tx.account,
            derived,
        });
    }
    let preimage = build_signing_preimage(&tx, &public_key);
    let signature = keypair.sign_message(&preimage).to_bytes().to_vec();
    let blob = encode_signed_blob(&tx, &public_key, &signature);
    let hash = compute_tx_hash(&blob);
    Ok(SignedTransaction::new(tx, public_key, signature, blob, hash))
}

/// Checks that the signing key controls the account and that the signature
/// covers the transaction body.
pub fn verify_signed(tx: &SignedTransaction) -> Result<(), SigningError> {
    let derived = derive_address(tx.signing_public_key());
    if derived != tx.unsigned().account {
        return Err(SigningError::KeyMismatch {
            account: tx.unsigned().account,
            derived,
        });
    }
    let verify_key = VerifyingKey::from_bytes(tx.signing_public_key().as_bytes())
        .map_err(|err| SigningError::InvalidPublicKey(err.to_string()))?;
    let signature: [u8; SIGNATURE_LEN] = tx
        .signature()
        .try_into()
        .map_err(|_| SigningError::InvalidSignature)?;
    let preimage = build_signing_preimage(tx.unsigned(), tx.signing_public_key());
    verify_key
        .verify(&preimage, &Signature::from_bytes(&signature))
        .map_err(|_| SigningError::InvalidSignature)
}

/// Rebuilds a signed transaction from its wire blob and verifies it.
pub fn decode_and_verify(blob: &[u8]) -> Result<SignedTransaction, SigningError> {
    let decoded =
        decode_signed_blob(blob).map_err(|err| SigningError::MalformedBlob(err.to_string()))?;
    let signed = SignedTransaction::new(
        decoded.unsigned,
        decoded.signing_public_key,
        decoded.signature,
        blob.to_vec(),
        compute_tx_hash(blob),
    );
    verify_signed(&signed)?;
    Ok(signed)
}
