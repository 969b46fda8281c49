use ed25519_dalek::SigningKey;
use meridian_consensus::crypto::sign_action;
use meridian_consensus::types::{Action, ActionKind, Name, Transaction};
use primitive_types::U256;

use crate::chain::{Chain, ChainError};
use crate::config::{dev_signing_key, DEV_ACCOUNTS};

/// Gas limit attached to generated transfers
pub const TRANSFER_GAS_LIMIT: u64 = 200_000;

/// Signing key of a development account, if `name` is one
pub fn dev_key(name: &Name) -> Option<SigningKey> {
    DEV_ACCOUNTS
        .iter()
        .find(|(account, _)| *account == name.as_str())
        .map(|&(_, seed)| dev_signing_key(seed))
}

/// Signed single-action transfer of the system token at the sender's next nonce
pub fn transfer(
    chain: &Chain,
    from: &Name,
    key: &SigningKey,
    to: &Name,
    value: U256,
) -> Result<Transaction, ChainError> {
    let config = chain.processor().config();
    let mut action = Action::new(
        ActionKind::Transfer,
        from.clone(),
        to.clone(),
        chain.nonce(from)?,
        config.sys_token_id,
        TRANSFER_GAS_LIMIT,
        value,
        Vec::new(),
    );
    sign_action(&mut action, key, config.chain_id);
    Ok(Transaction::new(vec![action], config.sys_token_id, U256::one()))
}
