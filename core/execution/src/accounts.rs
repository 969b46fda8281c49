// meridian/core/execution/src/accounts.rs

// Account and asset model. The only component that mutates account records.
use crate::types::{
    decode_payload, Account, AccountError, AssetInfo, AuthorChangeOp, AuthorOwner,
    CreateAccountPayload, IncreaseAssetPayload, IssueAssetPayload, SetAssetOwnerPayload,
    UpdateAccountPayload, UpdateAssetContractPayload, UpdateAssetPayload, UpdateAuthorPayload,
};
use meridian_consensus::crypto::verify_signature;
use meridian_consensus::ledger::{Ledger, LedgerExt};
use meridian_consensus::params::ChainConfig;
use meridian_consensus::types::{
    AccountOp, Action, ActionKind, ActionSignature, AssetOp, Hash, InternalAction, Name, PublicKey,
};
use primitive_types::U256;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Ledger key of an account record, stored under the account name
pub const ACCOUNT_KEY: &str = "account";

/// Ledger owner of the asset registry records
pub const ASSET_REGISTRY: &str = "asset.registry";

const ASSET_COUNT_KEY: &str = "count";

/// Delegate accounts are followed at most this deep
pub const MAX_AUTHOR_DEPTH: u8 = 3;

fn asset_key(asset_id: u64) -> String {
    format!("asset/{asset_id}")
}

fn asset_name_key(name: &Name) -> String {
    format!("name/{name}")
}

fn describe_owner(owner: &AuthorOwner) -> String {
    match owner {
        AuthorOwner::PubKey(key) => hex::encode(key.as_bytes()),
        AuthorOwner::Account(name) => name.to_string(),
    }
}

/// Inputs of [`AccountManager::process`]
#[derive(Debug, Clone)]
pub struct AccountContext<'a> {
    pub action: &'a Action,
    pub number: u64,
    pub fork_id: u64,
    pub config: &'a ChainConfig,
    /// Contracts that approved moving their bound assets in this action
    pub from_extra: Vec<Name>,
}

/// Account model over a ledger
pub struct AccountManager<'l> {
    ledger: &'l mut dyn Ledger,
}

impl<'l> AccountManager<'l> {
    pub fn new(ledger: &'l mut dyn Ledger) -> Self {
        Self { ledger }
    }

    /// Underlying ledger, for collaborators that keep their own records
    pub fn ledger(&mut self) -> &mut dyn Ledger {
        &mut *self.ledger
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    pub fn get_account(&self, name: &Name) -> Result<Option<Account>, AccountError> {
        Ok(self.ledger.get_record(name.as_str(), ACCOUNT_KEY)?)
    }

    pub fn account_exists(&self, name: &Name) -> Result<bool, AccountError> {
        Ok(self.get_account(name)?.is_some())
    }

    fn load(&self, name: &Name) -> Result<Account, AccountError> {
        self.get_account(name)?
            .ok_or_else(|| AccountError::AccountNotFound(name.clone()))
    }

    fn load_active(&self, name: &Name) -> Result<Account, AccountError> {
        let account = self.load(name)?;
        if account.destroyed {
            return Err(AccountError::AccountDestroyed(name.clone()));
        }
        Ok(account)
    }

    fn store(&mut self, account: &Account) -> Result<(), AccountError> {
        self.ledger
            .put_record(account.name.as_str(), ACCOUNT_KEY, account)?;
        Ok(())
    }

    pub fn create_account(
        &mut self,
        name: Name,
        founder: Name,
        key: PublicKey,
        number: u64,
    ) -> Result<(), AccountError> {
        if self.account_exists(&name)? {
            return Err(AccountError::AccountExists(name));
        }
        let account = Account::new(name, founder, key, number);
        self.store(&account)?;
        debug!(account = %account.name, "Created account");
        Ok(())
    }

    pub fn get_nonce(&self, name: &Name) -> Result<u64, AccountError> {
        Ok(self.load(name)?.nonce)
    }

    pub fn set_nonce(&mut self, name: &Name, nonce: u64) -> Result<(), AccountError> {
        let mut account = self.load(name)?;
        account.nonce = nonce;
        self.store(&account)
    }

    pub fn get_author_version(&self, name: &Name) -> Result<u64, AccountError> {
        Ok(self.load(name)?.author_version)
    }

    /// Replace the code of an account
    pub fn set_code(&mut self, name: &Name, code: Vec<u8>) -> Result<Hash, AccountError> {
        let mut account = self.load_active(name)?;
        account.set_code(code);
        let hash = account.code_hash;
        self.store(&account)?;
        Ok(hash)
    }

    // ------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------

    pub fn get_balance(&self, name: &Name, asset_id: u64) -> Result<U256, AccountError> {
        Ok(self.load(name)?.balance(asset_id))
    }

    pub fn add_balance(
        &mut self,
        name: &Name,
        asset_id: u64,
        value: U256,
    ) -> Result<(), AccountError> {
        let mut account = self.load_active(name)?;
        let balance = account
            .balance(asset_id)
            .checked_add(value)
            .ok_or(AccountError::Overflow)?;
        account.balances.insert(asset_id, balance);
        self.store(&account)
    }

    pub fn sub_balance(
        &mut self,
        name: &Name,
        asset_id: u64,
        value: U256,
    ) -> Result<(), AccountError> {
        let mut account = self.load(name)?;
        let have = account.balance(asset_id);
        if have < value {
            return Err(AccountError::InsufficientBalance {
                name: name.clone(),
                asset_id,
                need: value,
                have,
            });
        }
        account.balances.insert(asset_id, have - value);
        self.store(&account)
    }

    /// Move `value` of an asset between two existing accounts
    pub fn transfer_asset(
        &mut self,
        from: &Name,
        to: &Name,
        asset_id: u64,
        value: U256,
    ) -> Result<(), AccountError> {
        if value.is_zero() {
            self.load(from)?;
            self.load_active(to)?;
            return Ok(());
        }
        // Validate the destination first so a failed credit never follows a debit
        self.load_active(to)?;
        self.sub_balance(from, asset_id, value)?;
        self.add_balance(to, asset_id, value)
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    pub fn get_asset_info(&self, asset_id: u64) -> Result<Option<AssetInfo>, AccountError> {
        Ok(self.ledger.get_record(ASSET_REGISTRY, &asset_key(asset_id))?)
    }

    pub fn get_asset_by_name(&self, name: &Name) -> Result<Option<AssetInfo>, AccountError> {
        let id: Option<u64> = self
            .ledger
            .get_record(ASSET_REGISTRY, &asset_name_key(name))?;
        match id {
            Some(id) => self.get_asset_info(id),
            None => Ok(None),
        }
    }

    fn load_asset(&self, asset_id: u64) -> Result<AssetInfo, AccountError> {
        self.get_asset_info(asset_id)?
            .ok_or(AccountError::AssetNotFound(asset_id))
    }

    fn store_asset(&mut self, asset: &AssetInfo) -> Result<(), AccountError> {
        self.ledger
            .put_record(ASSET_REGISTRY, &asset_key(asset.asset_id), asset)?;
        Ok(())
    }

    /// Register a new asset and credit its owner with the initial amount
    pub fn issue_asset(
        &mut self,
        issuer: &Name,
        payload: IssueAssetPayload,
        number: u64,
    ) -> Result<AssetInfo, AccountError> {
        if self.get_asset_by_name(&payload.asset_name)?.is_some() {
            return Err(AccountError::AssetNameExists(payload.asset_name));
        }
        self.load_active(&payload.owner)?;
        if let Some(contract) = &payload.contract {
            self.load_active(contract)?;
        }
        if !payload.upper_limit.is_zero() && payload.amount > payload.upper_limit {
            return Err(AccountError::UpperLimitExceeded {
                asset_id: 0,
                limit: payload.upper_limit,
            });
        }

        let asset_id: u64 = self
            .ledger
            .get_record(ASSET_REGISTRY, ASSET_COUNT_KEY)?
            .unwrap_or(0);
        let asset = AssetInfo {
            asset_id,
            asset_name: payload.asset_name,
            symbol: payload.symbol,
            amount: payload.amount,
            decimals: payload.decimals,
            founder: payload.founder.unwrap_or_else(|| issuer.clone()),
            owner: payload.owner,
            upper_limit: payload.upper_limit,
            added_amount: payload.amount,
            contract: payload.contract,
            description: payload.description,
            created_at: number,
        };

        self.store_asset(&asset)?;
        self.ledger.put_record(
            ASSET_REGISTRY,
            &asset_name_key(&asset.asset_name),
            &asset_id,
        )?;
        self.ledger
            .put_record(ASSET_REGISTRY, ASSET_COUNT_KEY, &(asset_id + 1))?;
        if !asset.amount.is_zero() {
            self.add_balance(&asset.owner, asset_id, asset.amount)?;
        }

        info!(asset_id, name = %asset.asset_name, owner = %asset.owner, "Issued asset");
        Ok(asset)
    }

    fn load_owned_asset(&self, sender: &Name, asset_id: u64) -> Result<AssetInfo, AccountError> {
        let asset = self.load_asset(asset_id)?;
        if &asset.owner != sender {
            return Err(AccountError::NotAssetOwner(sender.clone(), asset_id));
        }
        Ok(asset)
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// Weight `signers` carry for `name`, recording every author version
    /// consulted along the way.
    fn signing_weight(
        &self,
        name: &Name,
        signers: &BTreeSet<PublicKey>,
        depth: u8,
        versions: &mut BTreeMap<Name, u64>,
    ) -> Result<(u64, u64), AccountError> {
        let account = self.load_active(name)?;
        versions.insert(name.clone(), account.author_version);

        let mut weight = 0u64;
        for author in &account.authors {
            let satisfied = match &author.owner {
                AuthorOwner::PubKey(key) => signers.contains(key),
                AuthorOwner::Account(delegate) => {
                    if depth + 1 >= MAX_AUTHOR_DEPTH {
                        false
                    } else {
                        let (have, need) =
                            self.signing_weight(delegate, signers, depth + 1, versions)?;
                        have >= need
                    }
                }
            };
            if satisfied {
                weight = weight.saturating_add(author.weight);
            }
        }
        Ok((weight, account.threshold))
    }

    fn verify_signer(
        &self,
        name: &Name,
        signatures: &[ActionSignature],
        hash: &Hash,
        update_author: bool,
        versions: &mut BTreeMap<Name, u64>,
    ) -> Result<(), AccountError> {
        let mut signers = BTreeSet::new();
        for sig in signatures {
            verify_signature(sig, hash).map_err(|_| AccountError::InvalidSignature(name.clone()))?;
            signers.insert(sig.signer);
        }

        let (have, threshold) = self.signing_weight(name, &signers, 0, versions)?;
        let need = if update_author {
            self.load_active(name)?.update_author_threshold
        } else {
            threshold
        };
        if have < need {
            return Err(AccountError::InsufficientSignatureWeight {
                name: name.clone(),
                have,
                need,
            });
        }
        Ok(())
    }

    /// Verify the sender's (and payer's) signatures against their weighted
    /// author policies. Returns the author version of every account
    /// consulted.
    pub fn verify_action_signatures(
        &self,
        action: &Action,
        chain_id: u64,
    ) -> Result<BTreeMap<Name, u64>, AccountError> {
        let hash = action.signing_hash(chain_id);
        let update_author = action.kind == ActionKind::Account(AccountOp::UpdateAuthor);
        let mut versions = BTreeMap::new();

        self.verify_signer(
            &action.sender,
            &action.signatures,
            &hash,
            update_author,
            &mut versions,
        )?;
        if let Some(payer) = &action.payer {
            self.verify_signer(&payer.payer, &payer.signatures, &hash, false, &mut versions)?;
        }
        Ok(versions)
    }

    /// Verify an action and cache the consulted author versions on it
    pub fn recover_action(&self, action: &mut Action, chain_id: u64) -> Result<(), AccountError> {
        action.author_versions = self.verify_action_signatures(action, chain_id)?;
        Ok(())
    }

    fn update_author(
        &mut self,
        name: &Name,
        payload: UpdateAuthorPayload,
    ) -> Result<(), AccountError> {
        let mut account = self.load_active(name)?;

        for change in payload.changes {
            let position = account
                .authors
                .iter()
                .position(|a| a.owner == change.author.owner);
            match (change.op, position) {
                (AuthorChangeOp::Add, None) => account.authors.push(change.author),
                (AuthorChangeOp::Add, Some(_)) => {
                    return Err(AccountError::AuthorExists(describe_owner(
                        &change.author.owner,
                    )))
                }
                (AuthorChangeOp::Update, Some(i)) => account.authors[i].weight = change.author.weight,
                (AuthorChangeOp::Delete, Some(i)) => {
                    account.authors.remove(i);
                }
                (_, None) => {
                    return Err(AccountError::AuthorNotFound(describe_owner(
                        &change.author.owner,
                    )))
                }
            }
        }

        if payload.threshold != 0 {
            account.threshold = payload.threshold;
        }
        if payload.update_author_threshold != 0 {
            account.update_author_threshold = payload.update_author_threshold;
        }

        let total = account.total_author_weight();
        if account.authors.is_empty()
            || total < account.threshold
            || total < account.update_author_threshold
        {
            return Err(AccountError::UnreachableThreshold(name.clone()));
        }

        account.author_version += 1;
        debug!(
            account = %name,
            version = account.author_version,
            authors = account.authors.len(),
            "Updated author policy"
        );
        self.store(&account)
    }

    // ------------------------------------------------------------------
    // Action processing
    // ------------------------------------------------------------------

    fn expect_recipient(action: &Action, expected: &Name) -> Result<(), AccountError> {
        if &action.recipient != expected {
            return Err(AccountError::InvalidRecipient {
                expected: expected.clone(),
                got: action.recipient.clone(),
            });
        }
        Ok(())
    }

    fn transfer(&mut self, ctx: &AccountContext<'_>) -> Result<(), AccountError> {
        let action = ctx.action;
        if ctx.fork_id >= ctx.config.contract_asset_fork_id {
            if let Some(asset) = self.get_asset_info(action.asset_id)? {
                if let Some(contract) = asset.contract {
                    let third_party = contract != action.sender && contract != action.recipient;
                    if third_party && !ctx.from_extra.contains(&contract) {
                        return Err(AccountError::ContractAssetTransferDenied {
                            asset_id: action.asset_id,
                            contract,
                        });
                    }
                }
            }
        }
        self.transfer_asset(&action.sender, &action.recipient, action.asset_id, action.value)
    }

    fn process_account_op(
        &mut self,
        op: AccountOp,
        ctx: &AccountContext<'_>,
    ) -> Result<Vec<InternalAction>, AccountError> {
        let action = ctx.action;
        Self::expect_recipient(action, &ctx.config.account_name)?;
        let mut internal = Vec::new();

        match op {
            AccountOp::Create => {
                let payload: CreateAccountPayload = decode_payload(&action.payload)?;
                let founder = payload.founder.unwrap_or_else(|| payload.account_name.clone());
                if !self.account_exists(&founder)? && founder != payload.account_name {
                    return Err(AccountError::AccountNotFound(founder));
                }
                self.create_account(
                    payload.account_name.clone(),
                    founder,
                    payload.public_key,
                    ctx.number,
                )?;
                if !payload.description.is_empty() {
                    let mut account = self.load(&payload.account_name)?;
                    account.description = payload.description;
                    self.store(&account)?;
                }
                if !action.value.is_zero() {
                    self.transfer_asset(
                        &action.sender,
                        &payload.account_name,
                        action.asset_id,
                        action.value,
                    )?;
                    internal.push(InternalAction::transfer(
                        action.sender.clone(),
                        payload.account_name,
                        action.asset_id,
                        action.value,
                    ));
                }
                return Ok(internal);
            }
            AccountOp::Update => {
                let payload: UpdateAccountPayload = decode_payload(&action.payload)?;
                self.load_active(&payload.founder)?;
                let mut account = self.load_active(&action.sender)?;
                account.founder = payload.founder;
                self.store(&account)?;
            }
            AccountOp::Delete => {
                let mut account = self.load_active(&action.sender)?;
                account.destroyed = true;
                self.store(&account)?;
                info!(account = %action.sender, "Account destroyed");
            }
            AccountOp::UpdateAuthor => {
                let payload: UpdateAuthorPayload = decode_payload(&action.payload)?;
                self.update_author(&action.sender, payload)?;
            }
        }

        self.transfer_asset(
            &action.sender,
            &action.recipient,
            action.asset_id,
            action.value,
        )?;
        Ok(internal)
    }

    fn process_asset_op(
        &mut self,
        op: AssetOp,
        ctx: &AccountContext<'_>,
    ) -> Result<Vec<InternalAction>, AccountError> {
        let action = ctx.action;
        let registry = &ctx.config.asset_name;
        Self::expect_recipient(action, registry)?;
        let mut internal = Vec::new();

        match op {
            AssetOp::Issue => {
                let payload: IssueAssetPayload = decode_payload(&action.payload)?;
                let asset = self.issue_asset(&action.sender, payload, ctx.number)?;
                internal.push(InternalAction::new(
                    "issueasset",
                    registry.clone(),
                    asset.owner,
                    asset.asset_id,
                    asset.amount,
                ));
            }
            AssetOp::Increase => {
                let payload: IncreaseAssetPayload = decode_payload(&action.payload)?;
                let mut asset = self.load_owned_asset(&action.sender, payload.asset_id)?;
                let added = asset
                    .added_amount
                    .checked_add(payload.amount)
                    .ok_or(AccountError::Overflow)?;
                if !asset.upper_limit.is_zero() && added > asset.upper_limit {
                    return Err(AccountError::UpperLimitExceeded {
                        asset_id: asset.asset_id,
                        limit: asset.upper_limit,
                    });
                }
                asset.added_amount = added;
                asset.amount = asset
                    .amount
                    .checked_add(payload.amount)
                    .ok_or(AccountError::Overflow)?;
                self.add_balance(&payload.to, asset.asset_id, payload.amount)?;
                self.store_asset(&asset)?;
                internal.push(InternalAction::new(
                    "increaseasset",
                    registry.clone(),
                    payload.to,
                    asset.asset_id,
                    payload.amount,
                ));
            }
            AssetOp::Destroy => {
                let mut asset = self.load_asset(action.asset_id)?;
                self.sub_balance(&action.sender, action.asset_id, action.value)?;
                asset.amount = asset.amount.saturating_sub(action.value);
                self.store_asset(&asset)?;
                internal.push(InternalAction::new(
                    "destroyasset",
                    action.sender.clone(),
                    registry.clone(),
                    action.asset_id,
                    action.value,
                ));
                return Ok(internal);
            }
            AssetOp::SetOwner => {
                let payload: SetAssetOwnerPayload = decode_payload(&action.payload)?;
                let mut asset = self.load_owned_asset(&action.sender, payload.asset_id)?;
                self.load_active(&payload.owner)?;
                asset.owner = payload.owner;
                self.store_asset(&asset)?;
            }
            AssetOp::Update => {
                let payload: UpdateAssetPayload = decode_payload(&action.payload)?;
                let mut asset = self.load_owned_asset(&action.sender, payload.asset_id)?;
                self.load_active(&payload.founder)?;
                asset.founder = payload.founder;
                self.store_asset(&asset)?;
            }
            AssetOp::UpdateContract => {
                let payload: UpdateAssetContractPayload = decode_payload(&action.payload)?;
                let mut asset = self.load_owned_asset(&action.sender, payload.asset_id)?;
                if let Some(contract) = &payload.contract {
                    self.load_active(contract)?;
                }
                asset.contract = payload.contract;
                self.store_asset(&asset)?;
            }
        }

        self.transfer_asset(
            &action.sender,
            &action.recipient,
            action.asset_id,
            action.value,
        )?;
        Ok(internal)
    }

    /// Apply a transfer or an account/asset lifecycle action
    pub fn process(&mut self, ctx: &AccountContext<'_>) -> Result<Vec<InternalAction>, AccountError> {
        match ctx.action.kind {
            ActionKind::Transfer => {
                self.transfer(ctx)?;
                Ok(Vec::new())
            }
            ActionKind::Account(op) => self.process_account_op(op, ctx),
            ActionKind::Asset(op) => self.process_asset_op(op, ctx),
            other @ (ActionKind::CreateContract
            | ActionKind::CallContract
            | ActionKind::Candidate(_)) => Err(AccountError::NotAccountAction(other.label())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateDB;
    use crate::types::{encode_payload, Author, AuthorChange};
    use ed25519_dalek::SigningKey;
    use meridian_consensus::crypto::{public_key, sign_action};
    use meridian_consensus::params::FORK_ID_3;

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn issue_payload(asset: &str, amount: u64, owner: &str, upper: u64) -> IssueAssetPayload {
        IssueAssetPayload {
            asset_name: name(asset),
            symbol: asset.to_uppercase(),
            amount: U256::from(amount),
            decimals: 18,
            founder: None,
            owner: name(owner),
            upper_limit: U256::from(upper),
            contract: None,
            description: String::new(),
        }
    }

    /// System accounts, alice and bob, and a system token (id 0) held by alice
    fn setup(config: &ChainConfig) -> StateDB {
        let mut state = StateDB::new();
        let mut accounts = AccountManager::new(&mut state);
        for (seed, account) in [(100, &config.account_name), (101, &config.asset_name)] {
            accounts
                .create_account(account.clone(), config.chain_name.clone(), public_key(&key(seed)), 0)
                .unwrap();
        }
        accounts
            .create_account(name("alice"), name("alice"), public_key(&key(1)), 0)
            .unwrap();
        accounts
            .create_account(name("bob"), name("bob"), public_key(&key(2)), 0)
            .unwrap();
        accounts
            .issue_asset(&config.asset_name, issue_payload("coin", 1_000, "alice", 0), 0)
            .unwrap();
        state
    }

    fn action(kind: ActionKind, sender: &str, recipient: &Name, asset_id: u64, value: u64, payload: Vec<u8>) -> Action {
        Action::new(
            kind,
            name(sender),
            recipient.clone(),
            0,
            asset_id,
            1_000_000,
            U256::from(value),
            payload,
        )
    }

    fn run(
        state: &mut StateDB,
        config: &ChainConfig,
        action: &Action,
        fork_id: u64,
        from_extra: Vec<Name>,
    ) -> Result<Vec<InternalAction>, AccountError> {
        let ctx = AccountContext {
            action,
            number: 1,
            fork_id,
            config,
            from_extra,
        };
        AccountManager::new(state).process(&ctx)
    }

    #[test]
    fn test_create_account_moves_value_to_new_account() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        let payload = encode_payload(&CreateAccountPayload {
            account_name: name("carol"),
            founder: None,
            public_key: public_key(&key(3)),
            description: "third".to_string(),
        })
        .unwrap();
        let create = action(
            ActionKind::Account(AccountOp::Create),
            "alice",
            &config.account_name,
            0,
            40,
            payload,
        );

        let internal = run(&mut state, &config, &create, 4, Vec::new()).unwrap();
        assert_eq!(internal.len(), 1);
        assert_eq!(internal[0].to, name("carol"));

        let accounts = AccountManager::new(&mut state);
        assert_eq!(accounts.get_balance(&name("carol"), 0).unwrap(), U256::from(40));
        assert_eq!(accounts.get_balance(&name("alice"), 0).unwrap(), U256::from(960));
        let carol = accounts.get_account(&name("carol")).unwrap().unwrap();
        assert_eq!(carol.founder, name("carol"));
        assert_eq!(carol.description, "third");
        assert_eq!(carol.created_at, 1);

        assert!(matches!(
            run(&mut state, &config, &create, 4, Vec::new()),
            Err(AccountError::AccountExists(_))
        ));
    }

    #[test]
    fn test_account_ops_require_registry_recipient() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        let delete = action(
            ActionKind::Account(AccountOp::Delete),
            "bob",
            &name("alice"),
            0,
            0,
            Vec::new(),
        );
        assert!(matches!(
            run(&mut state, &config, &delete, 4, Vec::new()),
            Err(AccountError::InvalidRecipient { .. })
        ));
    }

    #[test]
    fn test_deleted_account_rejects_credit() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        let delete = action(
            ActionKind::Account(AccountOp::Delete),
            "bob",
            &config.account_name,
            0,
            0,
            Vec::new(),
        );
        run(&mut state, &config, &delete, 4, Vec::new()).unwrap();

        let mut accounts = AccountManager::new(&mut state);
        assert!(matches!(
            accounts.transfer_asset(&name("alice"), &name("bob"), 0, U256::from(1)),
            Err(AccountError::AccountDestroyed(_))
        ));
        assert_eq!(accounts.get_balance(&name("alice"), 0).unwrap(), U256::from(1_000));
    }

    #[test]
    fn test_asset_lifecycle() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        let registry = config.asset_name.clone();

        let issue = action(
            ActionKind::Asset(AssetOp::Issue),
            "alice",
            &registry,
            0,
            0,
            encode_payload(&issue_payload("gold", 1_000, "alice", 1_500)).unwrap(),
        );
        let internal = run(&mut state, &config, &issue, 4, Vec::new()).unwrap();
        assert_eq!(internal[0].kind, "issueasset");
        let gold = AccountManager::new(&mut state)
            .get_asset_by_name(&name("gold"))
            .unwrap()
            .unwrap();
        assert_eq!(gold.asset_id, 1);
        assert_eq!(gold.founder, name("alice"));

        assert!(matches!(
            run(&mut state, &config, &issue, 4, Vec::new()),
            Err(AccountError::AssetNameExists(_))
        ));

        let increase = |amount: u64, sender: &str| {
            action(
                ActionKind::Asset(AssetOp::Increase),
                sender,
                &registry,
                0,
                0,
                encode_payload(&IncreaseAssetPayload {
                    asset_id: 1,
                    amount: U256::from(amount),
                    to: name("bob"),
                })
                .unwrap(),
            )
        };
        run(&mut state, &config, &increase(400, "alice"), 4, Vec::new()).unwrap();
        assert!(matches!(
            run(&mut state, &config, &increase(200, "alice"), 4, Vec::new()),
            Err(AccountError::UpperLimitExceeded { asset_id: 1, .. })
        ));
        assert!(matches!(
            run(&mut state, &config, &increase(1, "bob"), 4, Vec::new()),
            Err(AccountError::NotAssetOwner(_, 1))
        ));

        let destroy = action(ActionKind::Asset(AssetOp::Destroy), "alice", &registry, 1, 100, Vec::new());
        let internal = run(&mut state, &config, &destroy, 4, Vec::new()).unwrap();
        assert_eq!(internal[0].kind, "destroyasset");

        let accounts = AccountManager::new(&mut state);
        let gold = accounts.get_asset_info(1).unwrap().unwrap();
        assert_eq!(gold.amount, U256::from(1_300));
        assert_eq!(gold.added_amount, U256::from(1_400));
        assert_eq!(accounts.get_balance(&name("alice"), 1).unwrap(), U256::from(900));
        assert_eq!(accounts.get_balance(&name("bob"), 1).unwrap(), U256::from(400));
        // Burned value never reaches the registry
        assert_eq!(accounts.get_balance(&registry, 1).unwrap(), U256::zero());
    }

    #[test]
    fn test_set_owner_hands_over_control() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        let registry = config.asset_name.clone();
        let set_owner = action(
            ActionKind::Asset(AssetOp::SetOwner),
            "alice",
            &registry,
            0,
            0,
            encode_payload(&SetAssetOwnerPayload {
                asset_id: 0,
                owner: name("bob"),
            })
            .unwrap(),
        );
        run(&mut state, &config, &set_owner, 4, Vec::new()).unwrap();
        assert!(matches!(
            run(&mut state, &config, &set_owner, 4, Vec::new()),
            Err(AccountError::NotAssetOwner(_, 0))
        ));
        let coin = AccountManager::new(&mut state).get_asset_info(0).unwrap().unwrap();
        assert_eq!(coin.owner, name("bob"));
    }

    #[test]
    fn test_contract_bound_asset_needs_contract_approval() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        {
            let mut accounts = AccountManager::new(&mut state);
            accounts
                .create_account(name("token"), name("alice"), public_key(&key(9)), 0)
                .unwrap();
            let mut payload = issue_payload("bound", 100, "alice", 0);
            payload.contract = Some(name("token"));
            accounts.issue_asset(&name("alice"), payload, 0).unwrap();
        }

        let transfer = action(ActionKind::Transfer, "alice", &name("bob"), 1, 10, Vec::new());
        assert!(matches!(
            run(&mut state, &config, &transfer, 4, Vec::new()),
            Err(AccountError::ContractAssetTransferDenied { asset_id: 1, .. })
        ));
        run(&mut state, &config, &transfer, 4, vec![name("token")]).unwrap();
        // Not enforced before the fork
        run(&mut state, &config, &transfer, FORK_ID_3, Vec::new()).unwrap();

        let accounts = AccountManager::new(&mut state);
        assert_eq!(accounts.get_balance(&name("bob"), 1).unwrap(), U256::from(20));
    }

    fn update_author(sender: &str, config: &ChainConfig, payload: UpdateAuthorPayload) -> Action {
        action(
            ActionKind::Account(AccountOp::UpdateAuthor),
            sender,
            &config.account_name,
            0,
            0,
            encode_payload(&payload).unwrap(),
        )
    }

    #[test]
    fn test_update_author_bumps_version_and_raises_threshold() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        let second = key(11);

        let add = update_author(
            "alice",
            &config,
            UpdateAuthorPayload {
                threshold: 2,
                update_author_threshold: 0,
                changes: vec![AuthorChange {
                    op: AuthorChangeOp::Add,
                    author: Author::pub_key(public_key(&second), 1),
                }],
            },
        );
        run(&mut state, &config, &add, 4, Vec::new()).unwrap();

        let accounts = AccountManager::new(&mut state);
        assert_eq!(accounts.get_author_version(&name("alice")).unwrap(), 1);

        let mut transfer = action(ActionKind::Transfer, "alice", &name("bob"), 0, 1, Vec::new());
        sign_action(&mut transfer, &key(1), config.chain_id);
        assert!(matches!(
            accounts.verify_action_signatures(&transfer, config.chain_id),
            Err(AccountError::InsufficientSignatureWeight { have: 1, need: 2, .. })
        ));

        sign_action(&mut transfer, &second, config.chain_id);
        let versions = accounts
            .verify_action_signatures(&transfer, config.chain_id)
            .unwrap();
        assert_eq!(versions.get(&name("alice")), Some(&1));
    }

    #[test]
    fn test_unreachable_threshold_leaves_policy_untouched() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        let raise = update_author(
            "alice",
            &config,
            UpdateAuthorPayload {
                threshold: 5,
                update_author_threshold: 0,
                changes: Vec::new(),
            },
        );
        assert!(matches!(
            run(&mut state, &config, &raise, 4, Vec::new()),
            Err(AccountError::UnreachableThreshold(_))
        ));

        let missing = update_author(
            "alice",
            &config,
            UpdateAuthorPayload {
                threshold: 0,
                update_author_threshold: 0,
                changes: vec![AuthorChange {
                    op: AuthorChangeOp::Delete,
                    author: Author::pub_key(public_key(&key(42)), 1),
                }],
            },
        );
        assert!(matches!(
            run(&mut state, &config, &missing, 4, Vec::new()),
            Err(AccountError::AuthorNotFound(_))
        ));

        let accounts = AccountManager::new(&mut state);
        let alice = accounts.get_account(&name("alice")).unwrap().unwrap();
        assert_eq!(alice.author_version, 0);
        assert_eq!(alice.threshold, 1);
    }

    #[test]
    fn test_delegate_account_signs_for_owner() {
        let config = ChainConfig::devnet();
        let mut state = setup(&config);
        AccountManager::new(&mut state)
            .create_account(name("corp"), name("alice"), public_key(&key(20)), 0)
            .unwrap();

        let delegate = update_author(
            "corp",
            &config,
            UpdateAuthorPayload {
                threshold: 0,
                update_author_threshold: 0,
                changes: vec![
                    AuthorChange {
                        op: AuthorChangeOp::Add,
                        author: Author::account(name("alice"), 1),
                    },
                    AuthorChange {
                        op: AuthorChangeOp::Delete,
                        author: Author::pub_key(public_key(&key(20)), 1),
                    },
                ],
            },
        );
        run(&mut state, &config, &delegate, 4, Vec::new()).unwrap();

        let accounts = AccountManager::new(&mut state);
        let mut transfer = action(ActionKind::Transfer, "corp", &name("bob"), 0, 0, Vec::new());
        sign_action(&mut transfer, &key(1), config.chain_id);
        accounts.recover_action(&mut transfer, config.chain_id).unwrap();
        assert_eq!(transfer.author_versions.get(&name("corp")), Some(&1));
        assert_eq!(transfer.author_versions.get(&name("alice")), Some(&0));

        let mut forged = action(ActionKind::Transfer, "corp", &name("bob"), 0, 0, Vec::new());
        sign_action(&mut forged, &key(20), config.chain_id);
        assert!(matches!(
            accounts.verify_action_signatures(&forged, config.chain_id),
            Err(AccountError::InsufficientSignatureWeight { have: 0, .. })
        ));
    }

    #[test]
    fn test_tampered_signature_is_rejected() {
        let config = ChainConfig::devnet();
        let state = &mut setup(&config);
        let accounts = AccountManager::new(state);
        let mut transfer = action(ActionKind::Transfer, "alice", &name("bob"), 0, 5, Vec::new());
        sign_action(&mut transfer, &key(1), config.chain_id);
        transfer.value = U256::from(500);
        assert!(matches!(
            accounts.verify_action_signatures(&transfer, config.chain_id),
            Err(AccountError::InvalidSignature(_))
        ));
    }
}
