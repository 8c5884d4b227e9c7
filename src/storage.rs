use std::collections::HashMap;

use crate::{
    common::{Word, account::Account, address::Address},
    state::StateManager,
};

/// Read-through cache in front of the state manager for one top-level
/// execution.
///
/// Remembers the first value observed for every slot, which is the
/// "original" value net gas metering compares against. A reader is built
/// fresh for every top-level run and is never shared between two of them.
#[derive(Debug)]
pub struct StorageReader<S> {
    state: S,
    original: HashMap<(Address, Word), Word>,
}

impl<S: StateManager> StorageReader<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            original: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.state
    }

    pub fn inner(&self) -> &S {
        &self.state
    }

    /// Value of the slot as first observed in this execution.
    pub async fn original(&mut self, address: &Address, key: &Word) -> eyre::Result<Word> {
        if let Some(val) = self.original.get(&(*address, *key)) {
            return Ok(*val);
        }
        let val = self.state.storage(address, key).await?;
        self.original.insert((*address, *key), val);
        Ok(val)
    }

    pub async fn get(&mut self, address: &Address, key: &Word) -> eyre::Result<Word> {
        let val = self.state.storage(address, key).await?;
        self.original.entry((*address, *key)).or_insert(val);
        Ok(val)
    }

    pub async fn put(&mut self, address: &Address, key: Word, val: Word) -> eyre::Result<()> {
        self.original(address, &key).await?;
        self.state.put_storage(address, key, val).await
    }

    pub async fn account(&mut self, address: &Address) -> eyre::Result<Account> {
        self.state.account(address).await
    }

    pub async fn put_account(&mut self, address: &Address, account: Account) -> eyre::Result<()> {
        self.state.put_account(address, account).await
    }

    pub async fn code(&mut self, address: &Address) -> eyre::Result<Vec<u8>> {
        self.state.code(address).await
    }

    pub async fn put_code(&mut self, address: &Address, code: Vec<u8>) -> eyre::Result<()> {
        self.state.put_code(address, code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryState;

    #[tokio::test]
    async fn test_original_survives_writes() -> eyre::Result<()> {
        let address = Address::low(0x01);
        let key = Word::from(5u64);
        let state = MemoryState::new().with_storage(address, key, Word::from(1u64));
        let mut reader = StorageReader::new(state);

        reader.put(&address, key, Word::from(2u64)).await?;
        reader.put(&address, key, Word::from(3u64)).await?;

        assert_eq!(reader.get(&address, &key).await?, Word::from(3u64));
        assert_eq!(reader.original(&address, &key).await?, Word::from(1u64));
        assert_eq!(reader.inner().slot(&address, &key), Word::from(3u64));
        Ok(())
    }

    #[tokio::test]
    async fn test_fresh_reader_sees_current_state() -> eyre::Result<()> {
        let address = Address::low(0x01);
        let key = Word::one();
        let mut state = MemoryState::new();

        {
            let mut reader = StorageReader::new(&mut state);
            reader.put(&address, key, Word::from(9u64)).await?;
            assert_eq!(reader.original(&address, &key).await?, Word::zero());
        }

        let mut reader = StorageReader::new(&mut state);
        assert_eq!(reader.original(&address, &key).await?, Word::from(9u64));
        Ok(())
    }
}
