//! In-memory ledger
//!
//! Committed account rows live in a `DashMap`; each account key has its own
//! `tokio::sync::Mutex<()>` standing in for the row lock. A unit holds the
//! owned guards of every account it locked and stages balance writes and
//! journal rows locally, publishing them only on commit.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::types::{
    Account, AccountProduct, JournalEntry, NewAccount, NewJournalEntry, PageRequest,
};
use super::{LedgerError, LedgerStore, LedgerUnit};

struct MemoryState {
    products: DashMap<i64, AccountProduct>,
    accounts: DashMap<String, Account>,
    row_locks: DashMap<String, Arc<Mutex<()>>>,
    journal: RwLock<Vec<JournalEntry>>,
    next_product_id: AtomicI64,
    next_account_id: AtomicI64,
    next_transaction_id: AtomicI64,
}

impl MemoryState {
    fn row_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.row_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn read_journal(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<JournalEntry>>, LedgerError> {
        self.journal
            .read()
            .map_err(|_| LedgerError::Database("journal lock poisoned".to_string()))
    }
}

/// In-memory [`LedgerStore`]
#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<MemoryState>,
    lock_timeout: Duration,
}

impl MemoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(MemoryState {
                products: DashMap::new(),
                accounts: DashMap::new(),
                row_locks: DashMap::new(),
                journal: RwLock::new(Vec::new()),
                next_product_id: AtomicI64::new(1),
                next_account_id: AtomicI64::new(1),
                next_transaction_id: AtomicI64::new(1),
            }),
            lock_timeout,
        }
    }

    /// Number of committed journal rows
    pub fn journal_len(&self) -> usize {
        self.state.read_journal().map(|j| j.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, LedgerError> {
        Ok(Box::new(MemoryUnit {
            state: self.state.clone(),
            lock_timeout: self.lock_timeout,
            guards: HashMap::new(),
            staged_balances: HashMap::new(),
            staged_journal: Vec::new(),
        }))
    }

    async fn find_read_only(&self, key: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.state.accounts.get(key).map(|a| a.value().clone()))
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<JournalEntry>, LedgerError> {
        let journal = self.state.read_journal()?;
        Ok(journal.iter().find(|e| e.id == id).cloned())
    }

    async fn history(&self, key: &str, page: PageRequest) -> Result<Vec<JournalEntry>, LedgerError> {
        let journal = self.state.read_journal()?;
        Ok(journal
            .iter()
            .rev()
            .filter(|e| e.account_key == key)
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect())
    }

    async fn create_product(
        &self,
        name: &str,
        fee_percentage: Decimal,
    ) -> Result<AccountProduct, LedgerError> {
        if fee_percentage.is_sign_negative() {
            return Err(LedgerError::Invalid("fee_percentage must not be negative".to_string()));
        }
        let product = AccountProduct {
            id: self.state.next_product_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            fee_percentage,
        };
        self.state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, LedgerError> {
        let product = match new.product_id {
            Some(id) => Some(
                self.state
                    .products
                    .get(&id)
                    .map(|p| p.value().clone())
                    .ok_or_else(|| LedgerError::NotFound(format!("product {}", id)))?,
            ),
            None => None,
        };

        match self.state.accounts.entry(new.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LedgerError::Duplicate(format!("account key {}", new.key)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let account = Account {
                    id: self.state.next_account_id.fetch_add(1, Ordering::SeqCst),
                    key: new.key,
                    balance: new.balance,
                    currency: new.currency,
                    product,
                    customer_id: new.customer_id,
                };
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }
}

/// Unit of work over [`MemoryLedger`]
struct MemoryUnit {
    state: Arc<MemoryState>,
    lock_timeout: Duration,
    guards: HashMap<String, OwnedMutexGuard<()>>,
    staged_balances: HashMap<String, Decimal>,
    staged_journal: Vec<JournalEntry>,
}

impl MemoryUnit {
    fn current_row(&self, key: &str) -> Option<Account> {
        let mut account = self.state.accounts.get(key).map(|a| a.value().clone())?;
        if let Some(balance) = self.staged_balances.get(key) {
            account.balance = *balance;
        }
        Some(account)
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn find_for_update(&mut self, key: &str) -> Result<Option<Account>, LedgerError> {
        if self.guards.contains_key(key) {
            return Ok(self.current_row(key));
        }
        if !self.state.accounts.contains_key(key) {
            return Ok(None);
        }

        let lock = self.state.row_lock(key);
        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| LedgerError::LockTimeout(format!("account {}", key)))?;
        debug!(account = %key, "[ledger] row locked");
        self.guards.insert(key.to_string(), guard);

        // Read after locking so the previous holder's commit is visible
        Ok(self.current_row(key))
    }

    async fn set_balance(&mut self, account: &Account, balance: Decimal) -> Result<(), LedgerError> {
        if !self.guards.contains_key(&account.key) {
            return Err(LedgerError::Invalid(format!(
                "account {} is not locked by this unit",
                account.key
            )));
        }
        self.staged_balances.insert(account.key.clone(), balance);
        Ok(())
    }

    async fn append(&mut self, entry: NewJournalEntry) -> Result<JournalEntry, LedgerError> {
        let id = self.state.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        let row = JournalEntry::from_new(id, Utc::now(), entry);
        self.staged_journal.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let MemoryUnit {
            state,
            guards,
            staged_balances,
            staged_journal,
            ..
        } = *self;

        for (key, balance) in staged_balances {
            match state.accounts.get_mut(&key) {
                Some(mut account) => account.balance = balance,
                None => return Err(LedgerError::NotFound(format!("account {}", key))),
            }
        }
        state
            .journal
            .write()
            .map_err(|_| LedgerError::Database("journal lock poisoned".to_string()))?
            .extend(staged_journal);

        // Row locks are released only after the writes are visible
        drop(guards);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MovementType, TxStatus};
    use crate::money::Currency;

    async fn seeded(lock_timeout: Duration) -> MemoryLedger {
        let ledger = MemoryLedger::new(lock_timeout);
        let product = ledger.create_product("Basic", Decimal::new(1, 2)).await.unwrap();
        ledger
            .create_account(NewAccount {
                key: "AR01".into(),
                balance: Decimal::from(10_000),
                currency: Currency::parse("ARS").unwrap(),
                product_id: Some(product.id),
                customer_id: None,
            })
            .await
            .unwrap();
        ledger
    }

    fn entry(account: &Account, amount: i64) -> NewJournalEntry {
        NewJournalEntry {
            account_id: account.id,
            account_key: account.key.clone(),
            amount: Decimal::from(amount),
            fee: Decimal::ZERO,
            total: Decimal::from(amount),
            currency: account.currency.clone(),
            status: TxStatus::Completed,
            movement_type: MovementType::Deposit,
            reference: "test".into(),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let ledger = seeded(Duration::from_secs(1)).await;

        let mut unit = ledger.begin().await.unwrap();
        let account = unit.find_for_update("AR01").await.unwrap().unwrap();
        unit.set_balance(&account, Decimal::from(10_500)).await.unwrap();
        unit.append(entry(&account, 500)).await.unwrap();

        // Not visible before commit
        assert_eq!(ledger.journal_len(), 0);
        assert_eq!(
            ledger.find_read_only("AR01").await.unwrap().unwrap().balance,
            Decimal::from(10_000)
        );

        unit.commit().await.unwrap();
        assert_eq!(ledger.journal_len(), 1);
        assert_eq!(
            ledger.find_read_only("AR01").await.unwrap().unwrap().balance,
            Decimal::from(10_500)
        );
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let ledger = seeded(Duration::from_secs(1)).await;
        {
            let mut unit = ledger.begin().await.unwrap();
            let account = unit.find_for_update("AR01").await.unwrap().unwrap();
            unit.set_balance(&account, Decimal::ZERO).await.unwrap();
            unit.append(entry(&account, -10_000)).await.unwrap();
        }
        assert_eq!(ledger.journal_len(), 0);
        assert_eq!(
            ledger.find_read_only("AR01").await.unwrap().unwrap().balance,
            Decimal::from(10_000)
        );

        // Lock was released by the drop
        let mut unit = ledger.begin().await.unwrap();
        assert!(unit.find_for_update("AR01").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_wait_times_out() {
        let ledger = seeded(Duration::from_millis(50)).await;

        let mut holder = ledger.begin().await.unwrap();
        holder.find_for_update("AR01").await.unwrap();

        let mut waiter = ledger.begin().await.unwrap();
        let err = waiter.find_for_update("AR01").await.unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout(_)));
        drop(holder);
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_balance() {
        let ledger = seeded(Duration::from_secs(2)).await;

        let mut holder = ledger.begin().await.unwrap();
        let account = holder.find_for_update("AR01").await.unwrap().unwrap();

        let waiter_ledger = ledger.clone();
        let waiter = tokio::spawn(async move {
            let mut unit = waiter_ledger.begin().await.unwrap();
            unit.find_for_update("AR01").await.unwrap().unwrap().balance
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.set_balance(&account, Decimal::from(1)).await.unwrap();
        holder.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), Decimal::from(1));
    }

    #[tokio::test]
    async fn test_relock_in_same_unit_sees_staged_balance() {
        let ledger = seeded(Duration::from_millis(50)).await;
        let mut unit = ledger.begin().await.unwrap();
        let account = unit.find_for_update("AR01").await.unwrap().unwrap();
        unit.set_balance(&account, Decimal::from(7)).await.unwrap();
        let again = unit.find_for_update("AR01").await.unwrap().unwrap();
        assert_eq!(again.balance, Decimal::from(7));
    }

    #[tokio::test]
    async fn test_set_balance_requires_lock() {
        let ledger = seeded(Duration::from_millis(50)).await;
        let account = ledger.find_read_only("AR01").await.unwrap().unwrap();
        let mut unit = ledger.begin().await.unwrap();
        assert!(matches!(
            unit.set_balance(&account, Decimal::ZERO).await,
            Err(LedgerError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_account_and_duplicates() {
        let ledger = seeded(Duration::from_millis(50)).await;
        let mut unit = ledger.begin().await.unwrap();
        assert!(unit.find_for_update("NOPE").await.unwrap().is_none());

        let dup = ledger
            .create_account(NewAccount {
                key: "AR01".into(),
                balance: Decimal::ZERO,
                currency: Currency::parse("ARS").unwrap(),
                product_id: None,
                customer_id: None,
            })
            .await;
        assert!(matches!(dup, Err(LedgerError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_history_newest_first_and_paged() {
        let ledger = seeded(Duration::from_secs(1)).await;
        for amount in 1..=5 {
            let mut unit = ledger.begin().await.unwrap();
            let account = unit.find_for_update("AR01").await.unwrap().unwrap();
            unit.append(entry(&account, amount)).await.unwrap();
            unit.commit().await.unwrap();
        }

        let first = ledger.history("AR01", PageRequest::new(0, 2)).await.unwrap();
        assert_eq!(
            first.iter().map(|e| e.amount).collect::<Vec<_>>(),
            vec![Decimal::from(5), Decimal::from(4)]
        );
        let last = ledger.history("AR01", PageRequest::new(2, 2)).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].amount, Decimal::from(1));

        let found = ledger.find_transaction(first[0].id).await.unwrap().unwrap();
        assert_eq!(found, first[0]);
    }
}
