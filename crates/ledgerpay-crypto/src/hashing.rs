use ledgerpay_types::{
    Address, LedgerTime, Operation, OperationKind, PublicKey, TxHash, UnsignedTransaction,
    ValidationError,
};
use sha2::{Digest, Sha256};

const ADDRESS_TAG: &[u8] = b"ledgerpay.address.v1";
const TX_SIGN_TAG: &[u8] = b"ledgerpay.tx.sign.v1";
const TX_ID_TAG: &[u8] = b"ledgerpay.tx.id.v1";

/// Key-type marker prepended to ed25519 public keys before address hashing.
const ED25519_KEY_PREFIX: u8 = 0xed;

/// Canonical encoding rules used by every function in this module:
/// 1. Big-endian fixed-width integers: u16/u32/u64.
/// 2. Variable-length bytes are length-prefixed with u32.
/// 3. Optional fields are encoded with a one-byte presence tag (0 or 1).
/// 4. The operation is encoded as its u16 type code followed by its fields
///    in declaration order.
/// 5. Hashes are SHA-256 over tagged canonical payloads.
pub fn encode_unsigned(tx: &UnsignedTransaction) -> Vec<u8> {
    let mut enc = Vec::with_capacity(128);
    put_u32(&mut enc, tx.network_id);
    put_u16(&mut enc, tx.kind().type_code());
    enc.extend_from_slice(tx.account.as_bytes());
    put_u32(&mut enc, tx.sequence);
    put_u64(&mut enc, tx.fee);
    match tx.operation {
        Operation::Payment {
            destination,
            amount,
        } => {
            enc.extend_from_slice(destination.as_bytes());
            put_u64(&mut enc, amount);
        }
        Operation::EscrowCreate {
            destination,
            amount,
            finish_after,
            cancel_after,
        } => {
            enc.extend_from_slice(destination.as_bytes());
            put_u64(&mut enc, amount);
            put_time(&mut enc, finish_after);
            put_time(&mut enc, cancel_after);
        }
        Operation::EscrowFinish {
            owner,
            offer_sequence,
        }
        | Operation::EscrowCancel {
            owner,
            offer_sequence,
        } => {
            enc.extend_from_slice(owner.as_bytes());
            put_u32(&mut enc, offer_sequence);
        }
    }
    enc
}

pub fn build_signing_preimage(tx: &UnsignedTransaction, signing_public_key: &PublicKey) -> Vec<u8> {
    let mut enc = Vec::new();
    enc.extend_from_slice(TX_SIGN_TAG);
    enc.extend_from_slice(&encode_unsigned(tx));
    enc.extend_from_slice(signing_public_key.as_bytes());
    enc
}

pub fn encode_signed_blob(
    tx: &UnsignedTransaction,
    signing_public_key: &PublicKey,
    signature: &[u8],
) -> Vec<u8> {
    let mut enc = encode_unsigned(tx);
    enc.extend_from_slice(signing_public_key.as_bytes());
    put_bytes(&mut enc, signature);
    enc
}

pub fn compute_tx_hash(blob: &[u8]) -> TxHash {
    let mut enc = Vec::with_capacity(TX_ID_TAG.len() + blob.len());
    enc.extend_from_slice(TX_ID_TAG);
    enc.extend_from_slice(blob);
    TxHash::new(sha256_32(&enc))
}

pub fn derive_address(public_key: &PublicKey) -> Address {
    let mut enc = Vec::new();
    enc.extend_from_slice(ADDRESS_TAG);
    put_u8(&mut enc, ED25519_KEY_PREFIX);
    enc.extend_from_slice(public_key.as_bytes());
    let digest = sha256_32(&enc);
    let mut out = [0u8; Address::LEN];
    out.copy_from_slice(&digest[..Address::LEN]);
    Address::new(out)
}

/// Parsed form of a signed blob: the unsigned body, signing key and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlob {
    pub unsigned: UnsignedTransaction,
    pub signing_public_key: PublicKey,
    pub signature: Vec<u8>,
}

pub fn decode_signed_blob(blob: &[u8]) -> Result<DecodedBlob, ValidationError> {
    let mut reader = Reader { buf: blob };
    let network_id = reader.u32("network_id")?;
    let type_code = reader.u16("transaction_type")?;
    let account = Address::from_slice(reader.take(Address::LEN, "account")?)?;
    let sequence = reader.u32("sequence")?;
    let fee = reader.u64("fee")?;
    let operation = match type_code {
        code if code == OperationKind::Payment.type_code() => Operation::Payment {
            destination: Address::from_slice(reader.take(Address::LEN, "destination")?)?,
            amount: reader.u64("amount")?,
        },
        code if code == OperationKind::EscrowCreate.type_code() => Operation::EscrowCreate {
            destination: Address::from_slice(reader.take(Address::LEN, "destination")?)?,
            amount: reader.u64("amount")?,
            finish_after: reader.time("finish_after")?,
            cancel_after: reader.time("cancel_after")?,
        },
        code if code == OperationKind::EscrowFinish.type_code() => Operation::EscrowFinish {
            owner: Address::from_slice(reader.take(Address::LEN, "owner")?)?,
            offer_sequence: reader.u32("offer_sequence")?,
        },
        code if code == OperationKind::EscrowCancel.type_code() => Operation::EscrowCancel {
            owner: Address::from_slice(reader.take(Address::LEN, "owner")?)?,
            offer_sequence: reader.u32("offer_sequence")?,
        },
        _ => return Err(ValidationError::InvalidField("transaction_type")),
    };
    let signing_public_key =
        PublicKey::from_slice(reader.take(PublicKey::LEN, "signing_public_key")?)?;
    let signature_len = reader.u32("signature")? as usize;
    let signature = reader.take(signature_len, "signature")?.to_vec();
    if !reader.buf.is_empty() {
        return Err(ValidationError::Message(format!(
            "{} trailing bytes after signature",
            reader.buf.len()
        )));
    }
    Ok(DecodedBlob {
        unsigned: UnsignedTransaction {
            account,
            operation,
            sequence,
            fee,
            network_id,
        },
        signing_public_key,
        signature,
    })
}

pub(crate) fn sha256_32(input: &[u8]) -> [u8; 32] {
    let digest: [u8; 32] = Sha256::digest(input).into();
    digest
}

fn put_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_bytes(out: &mut Vec<u8>, value: &[u8]) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value);
}

fn put_time(out: &mut Vec<u8>, value: Option<LedgerTime>) {
    match value {
        Some(time) => {
            put_u8(out, 1);
            put_u32(out, time.seconds());
        }
        None => put_u8(out, 0),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, kind: &'static str) -> Result<&'a [u8], ValidationError> {
        if self.buf.len() < len {
            return Err(ValidationError::InvalidLength {
                kind,
                expected: len,
                actual: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, kind: &'static str) -> Result<[u8; N], ValidationError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, kind)?);
        Ok(out)
    }

    fn u16(&mut self, kind: &'static str) -> Result<u16, ValidationError> {
        Ok(u16::from_be_bytes(self.array(kind)?))
    }

    fn u32(&mut self, kind: &'static str) -> Result<u32, ValidationError> {
        Ok(u32::from_be_bytes(self.array(kind)?))
    }

    fn u64(&mut self, kind: &'static str) -> Result<u64, ValidationError> {
        Ok(u64::from_be_bytes(self.array(kind)?))
    }

    fn time(&mut self, kind: &'static str) -> Result<Option<LedgerTime>, ValidationError> {
        match self.take(1, kind)?[0] {
            0 => Ok(None),
            1 => Ok(Some(LedgerTime::from_seconds(self.u32(kind)?))),
            _ => Err(ValidationError::InvalidField(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use ledgerpay_types::{
        Address, LedgerTime, Operation, PublicKey, UnsignedTransaction, ValidationError,
    };

    use super::{
        compute_tx_hash, decode_signed_blob, derive_address, encode_signed_blob, encode_unsigned,
    };

    fn escrow_create() -> UnsignedTransaction {
        UnsignedTransaction {
            account: Address::new([0x01; 20]),
            operation: Operation::EscrowCreate {
                destination: Address::new([0x02; 20]),
                amount: 1000,
                finish_after: Some(LedgerTime::from_seconds(60)),
                cancel_after: None,
            },
            sequence: 10,
            fee: 12,
            network_id: 1,
        }
    }

    #[test]
    fn golden_vectors() {
        let tx = escrow_create();
        assert_eq!(
            hex::encode(encode_unsigned(&tx)),
            concat!(
                "00000001",
                "0001",
                "0101010101010101010101010101010101010101",
                "0000000a",
                "000000000000000c",
                "0202020202020202020202020202020202020202",
                "00000000000003e8",
                "010000003c",
                "00",
            )
        );
    }

    #[test]
    fn decodes_what_it_encodes() {
        let tx = escrow_create();
        let key = PublicKey::new([0x33; 32]);
        let blob = encode_signed_blob(&tx, &key, &[0x44; 64]);
        let decoded = decode_signed_blob(&blob).expect("decodes");
        assert_eq!(decoded.unsigned, tx);
        assert_eq!(decoded.signing_public_key, key);
        assert_eq!(decoded.signature, vec![0x44; 64]);
    }

    #[test]
    fn rejects_truncated_and_trailing_bytes() {
        let tx = escrow_create();
        let key = PublicKey::new([0x33; 32]);
        let blob = encode_signed_blob(&tx, &key, &[0x44; 64]);

        let err = decode_signed_blob(&blob[..blob.len() - 1]).expect_err("truncated");
        assert!(matches!(err, ValidationError::InvalidLength { .. }));

        let mut padded = blob.clone();
        padded.push(0);
        assert!(decode_signed_blob(&padded).is_err());
    }

    #[test]
    fn hash_and_address_depend_on_every_byte() {
        let tx = escrow_create();
        let key = PublicKey::new([0x33; 32]);
        let a = compute_tx_hash(&encode_signed_blob(&tx, &key, &[0x44; 64]));
        let b = compute_tx_hash(&encode_signed_blob(&tx, &key, &[0x45; 64]));
        assert_ne!(a, b);
        assert_ne!(
            derive_address(&PublicKey::new([0x01; 32])),
            derive_address(&PublicKey::new([0x02; 32]))
        );
    }
}
