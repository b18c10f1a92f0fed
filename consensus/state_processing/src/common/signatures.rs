//! BLS verification over the byte-level key and signature types.
//!
//! Point decompression happens here and nowhere else; consensus containers
//! never hold decompressed points.

use blst::min_pk::{AggregatePublicKey, PublicKey, Signature};
use blst::BLST_ERROR;
use ethereum_hashing::hash;
use types::{Hash256, PublicKeyBytes, SignatureBytes};

const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, PartialEq, Clone)]
pub enum SignatureError {
    InvalidPublicKey,
    InvalidSignature,
    EmptyAggregate,
}

/// The message actually signed: the object root bound to its 8-byte domain.
fn message_with_domain(message: Hash256, domain: u64) -> Vec<u8> {
    let mut preimage = Vec::with_capacity(40);
    preimage.extend_from_slice(message.as_bytes());
    preimage.extend_from_slice(&domain.to_le_bytes());
    hash(&preimage)
}

fn decompress_pubkey(bytes: &PublicKeyBytes) -> Result<PublicKey, SignatureError> {
    PublicKey::key_validate(bytes.as_bytes()).map_err(|_| SignatureError::InvalidPublicKey)
}

fn decompress_signature(bytes: &SignatureBytes) -> Result<Signature, SignatureError> {
    Signature::sig_validate(bytes.as_bytes(), true).map_err(|_| SignatureError::InvalidSignature)
}

/// Verify `signature` over `message` for a single public key.
pub fn verify_signature(
    pubkey: &PublicKeyBytes,
    message: Hash256,
    signature: &SignatureBytes,
    domain: u64,
) -> Result<bool, SignatureError> {
    let pk = decompress_pubkey(pubkey)?;
    let sig = decompress_signature(signature)?;
    let msg = message_with_domain(message, domain);
    Ok(sig.verify(true, &msg, DST, &[], &pk, false) == BLST_ERROR::BLST_SUCCESS)
}

/// Verify an aggregate `signature` over one `message` signed by all
/// `pubkeys`.
pub fn verify_aggregate_signature(
    pubkeys: &[&PublicKeyBytes],
    message: Hash256,
    signature: &SignatureBytes,
    domain: u64,
) -> Result<bool, SignatureError> {
    if pubkeys.is_empty() {
        return Err(SignatureError::EmptyAggregate);
    }

    let decompressed: Vec<PublicKey> = pubkeys
        .iter()
        .map(|pk| decompress_pubkey(pk))
        .collect::<Result<_, _>>()?;
    let refs: Vec<&PublicKey> = decompressed.iter().collect();
    let aggregate =
        AggregatePublicKey::aggregate(&refs, false).map_err(|_| SignatureError::InvalidPublicKey)?;

    let sig = decompress_signature(signature)?;
    let msg = message_with_domain(message, domain);
    Ok(
        sig.verify(true, &msg, DST, &[], &aggregate.to_public_key(), false)
            == BLST_ERROR::BLST_SUCCESS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use blst::min_pk::SecretKey;

    fn keypair(ikm: u8) -> (SecretKey, PublicKeyBytes) {
        let sk = SecretKey::key_gen(&[ikm; 32], &[]).unwrap();
        let pk = PublicKeyBytes::from_bytes(&sk.sk_to_pk().to_bytes()).unwrap();
        (sk, pk)
    }

    #[test]
    fn single_signature_round_trip() {
        let (sk, pk) = keypair(1);
        let message = Hash256::repeat_byte(0xab);
        let domain = 7;
        let msg = message_with_domain(message, domain);
        let sig = SignatureBytes::from_bytes(&sk.sign(&msg, DST, &[]).to_bytes()).unwrap();

        assert_eq!(verify_signature(&pk, message, &sig, domain), Ok(true));
        assert_eq!(verify_signature(&pk, message, &sig, domain + 1), Ok(false));
    }

    #[test]
    fn junk_pubkey_is_rejected() {
        let message = Hash256::zero();
        let sig = SignatureBytes::empty();
        let junk = PublicKeyBytes::from_bytes(&[0x11; 48]).unwrap();
        assert!(verify_signature(&junk, message, &sig, 0).is_err());
    }
}
