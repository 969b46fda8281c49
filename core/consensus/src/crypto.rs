// meridian/core/consensus/src/crypto.rs

use crate::types::{Action, ActionSignature, Hash, PublicKey, Signature};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Action declares no payer to sign for")]
    NoPayer,
}

/// Public key of a signing key
pub fn public_key(signing_key: &SigningKey) -> PublicKey {
    PublicKey::new(signing_key.verifying_key().to_bytes())
}

/// Sign a hash
pub fn sign_hash(signing_key: &SigningKey, hash: &Hash) -> ActionSignature {
    let signature: DalekSignature = signing_key.sign(hash.as_bytes());
    ActionSignature {
        signer: public_key(signing_key),
        signature: Signature::new(signature.to_bytes()),
    }
}

/// Verify one signature against a hash
pub fn verify_signature(sig: &ActionSignature, hash: &Hash) -> Result<(), CryptoError> {
    let public_key =
        VerifyingKey::from_bytes(sig.signer.as_bytes()).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = DalekSignature::from_bytes(sig.signature.as_bytes());

    public_key
        .verify(hash.as_bytes(), &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Add a sender signature to an action (for testing and dev tools)
pub fn sign_action(action: &mut Action, signing_key: &SigningKey, chain_id: u64) {
    let hash = action.signing_hash(chain_id);
    action.signatures.push(sign_hash(signing_key, &hash));
}

/// Add a fee-payer signature to an action
pub fn sign_payer(
    action: &mut Action,
    signing_key: &SigningKey,
    chain_id: u64,
) -> Result<(), CryptoError> {
    let hash = action.signing_hash(chain_id);
    let payer = action.payer.as_mut().ok_or(CryptoError::NoPayer)?;
    payer.signatures.push(sign_hash(signing_key, &hash));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionKind, Name};
    use primitive_types::U256;

    fn transfer() -> Action {
        Action::new(
            ActionKind::Transfer,
            Name::new("alice").unwrap(),
            Name::new("bob").unwrap(),
            0,
            0,
            50_000,
            U256::from(10),
            vec![],
        )
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let mut action = transfer();
        sign_action(&mut action, &key, 7);

        let hash = action.signing_hash(7);
        assert_eq!(action.signatures.len(), 1);
        assert!(verify_signature(&action.signatures[0], &hash).is_ok());

        // Wrong chain id changes the signed hash
        let other = action.signing_hash(8);
        assert_eq!(
            verify_signature(&action.signatures[0], &other),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_sign_payer_requires_payer() {
        let key = SigningKey::from_bytes(&[4u8; 32]);
        let mut action = transfer();
        assert_eq!(sign_payer(&mut action, &key, 1), Err(CryptoError::NoPayer));

        let mut action = transfer().with_payer(Name::new("carol").unwrap(), U256::from(3));
        sign_payer(&mut action, &key, 1).unwrap();
        let payer = action.payer.as_ref().unwrap();
        assert_eq!(payer.signatures[0].signer, public_key(&key));
    }
}
