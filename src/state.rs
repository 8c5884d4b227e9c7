use std::collections::HashMap;

use crate::common::{Word, account::Account, address::Address, hash::keccak256};

/// Read/write access to account and storage state.
///
/// Missing accounts read as `Account::default()`, missing code as empty and
/// missing slots as zero. Errors are collaborator failures (I/O, decoding)
/// and abort the whole execution.
#[allow(async_fn_in_trait)]
pub trait StateManager {
    async fn account(&mut self, address: &Address) -> eyre::Result<Account>;

    async fn put_account(&mut self, address: &Address, account: Account) -> eyre::Result<()>;

    async fn code(&mut self, address: &Address) -> eyre::Result<Vec<u8>>;

    /// Stores code only; the account's `code_hash` is written separately.
    async fn put_code(&mut self, address: &Address, code: Vec<u8>) -> eyre::Result<()>;

    async fn storage(&mut self, address: &Address, key: &Word) -> eyre::Result<Word>;

    async fn put_storage(&mut self, address: &Address, key: Word, val: Word) -> eyre::Result<()>;
}

impl<S: StateManager> StateManager for &mut S {
    async fn account(&mut self, address: &Address) -> eyre::Result<Account> {
        (**self).account(address).await
    }

    async fn put_account(&mut self, address: &Address, account: Account) -> eyre::Result<()> {
        (**self).put_account(address, account).await
    }

    async fn code(&mut self, address: &Address) -> eyre::Result<Vec<u8>> {
        (**self).code(address).await
    }

    async fn put_code(&mut self, address: &Address, code: Vec<u8>) -> eyre::Result<()> {
        (**self).put_code(address, code).await
    }

    async fn storage(&mut self, address: &Address, key: &Word) -> eyre::Result<Word> {
        (**self).storage(address, key).await
    }

    async fn put_storage(&mut self, address: &Address, key: Word, val: Word) -> eyre::Result<()> {
        (**self).put_storage(address, key, val).await
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccountState {
    pub account: Account,
    pub data: HashMap<Word, Word>,
    pub code: Vec<u8>,
}

/// Hash-map backed state, for tests and the runner binary.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    pub(crate) state: HashMap<Address, AccountState>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, address: Address, account: Account) -> Self {
        self.state.entry(address).or_default().account = account;
        self
    }

    pub fn with_balance(mut self, address: Address, balance: Word) -> Self {
        self.state.entry(address).or_default().account.balance = balance;
        self
    }

    /// Installs code and sets the matching code hash.
    pub fn with_code(mut self, address: Address, code: Vec<u8>) -> Self {
        let state = self.state.entry(address).or_default();
        state.account.code_hash = Word::from_bytes(&keccak256(&code));
        state.code = code;
        self
    }

    pub fn with_storage(mut self, address: Address, key: Word, val: Word) -> Self {
        self.state.entry(address).or_default().data.insert(key, val);
        self
    }

    pub fn get(&self, address: &Address) -> Option<&AccountState> {
        self.state.get(address)
    }

    pub fn slot(&self, address: &Address, key: &Word) -> Word {
        self.state
            .get(address)
            .and_then(|state| state.data.get(key))
            .copied()
            .unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> Word {
        self.state
            .get(address)
            .map(|state| state.account.balance)
            .unwrap_or_default()
    }
}

impl StateManager for MemoryState {
    async fn account(&mut self, address: &Address) -> eyre::Result<Account> {
        Ok(self
            .state
            .get(address)
            .map(|state| state.account.clone())
            .unwrap_or_default())
    }

    async fn put_account(&mut self, address: &Address, account: Account) -> eyre::Result<()> {
        self.state.entry(*address).or_default().account = account;
        Ok(())
    }

    async fn code(&mut self, address: &Address) -> eyre::Result<Vec<u8>> {
        Ok(self
            .state
            .get(address)
            .map(|state| state.code.clone())
            .unwrap_or_default())
    }

    async fn put_code(&mut self, address: &Address, code: Vec<u8>) -> eyre::Result<()> {
        self.state.entry(*address).or_default().code = code;
        Ok(())
    }

    async fn storage(&mut self, address: &Address, key: &Word) -> eyre::Result<Word> {
        Ok(self.slot(address, key))
    }

    async fn put_storage(&mut self, address: &Address, key: Word, val: Word) -> eyre::Result<()> {
        let state = self.state.entry(*address).or_default();
        if val.is_zero() {
            state.data.remove(&key);
        } else {
            state.data.insert(key, val);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_entries_read_as_defaults() -> eyre::Result<()> {
        let mut state = MemoryState::new();
        let address = Address::low(0x42);
        assert_eq!(state.account(&address).await?, Account::default());
        assert!(state.code(&address).await?.is_empty());
        assert_eq!(state.storage(&address, &Word::one()).await?, Word::zero());
        Ok(())
    }

    #[tokio::test]
    async fn test_builders_and_writes() -> eyre::Result<()> {
        let address = Address::low(0x42);
        let mut state = MemoryState::new()
            .with_balance(address, Word::from(10u64))
            .with_code(address, vec![0x00])
            .with_storage(address, Word::one(), Word::from(7u64));

        let account = state.account(&address).await?;
        assert_eq!(account.balance, Word::from(10u64));
        assert!(account.has_code());

        clear(&mut state, &address).await?;
        assert_eq!(state.slot(&address, &Word::one()), Word::zero());
        Ok(())
    }

    async fn clear<S: StateManager>(mut state: S, address: &Address) -> eyre::Result<()> {
        state.put_storage(address, Word::one(), Word::zero()).await
    }
}
