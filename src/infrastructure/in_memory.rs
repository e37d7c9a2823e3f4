use tokio::sync::{Mutex, MutexGuard};

use crate::domain::account::{Account, PaymentUri};
use crate::domain::negotiation::NegotiationRecord;
use crate::domain::transaction::Transaction;
use crate::error::{Result, WalletError};

/// A record type the store can hold.
pub trait Resource: Clone {
    /// Name used in generated error messages.
    const NAME: &'static str;

    fn id(&self) -> &str;
}

impl Resource for Account {
    const NAME: &'static str = "account";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Resource for Transaction {
    const NAME: &'static str = "transaction";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Resource for PaymentUri {
    const NAME: &'static str = "payment_uri";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Resource for NegotiationRecord {
    const NAME: &'static str = "negotiation_record";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Typed access to the table holding one resource type.
pub trait ResourceTable<R: Resource> {
    fn table(&self) -> &Vec<R>;
    fn table_mut(&mut self) -> &mut Vec<R>;
}

/// All wallet state, one append-ordered table per resource type.
///
/// Tables keep creation order, so "first created" and "latest turn" queries
/// are plain scans from either end.
#[derive(Debug, Default)]
pub struct Resources {
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
    payment_uris: Vec<PaymentUri>,
    negotiation_records: Vec<NegotiationRecord>,
}

impl ResourceTable<Account> for Resources {
    fn table(&self) -> &Vec<Account> {
        &self.accounts
    }

    fn table_mut(&mut self) -> &mut Vec<Account> {
        &mut self.accounts
    }
}

impl ResourceTable<Transaction> for Resources {
    fn table(&self) -> &Vec<Transaction> {
        &self.transactions
    }

    fn table_mut(&mut self) -> &mut Vec<Transaction> {
        &mut self.transactions
    }
}

impl ResourceTable<PaymentUri> for Resources {
    fn table(&self) -> &Vec<PaymentUri> {
        &self.payment_uris
    }

    fn table_mut(&mut self) -> &mut Vec<PaymentUri> {
        &mut self.payment_uris
    }
}

impl ResourceTable<NegotiationRecord> for Resources {
    fn table(&self) -> &Vec<NegotiationRecord> {
        &self.negotiation_records
    }

    fn table_mut(&mut self) -> &mut Vec<NegotiationRecord> {
        &mut self.negotiation_records
    }
}

impl Resources {
    /// Next id: count of every entity across all tables, plus one.
    fn next_id(&self) -> String {
        (self.accounts.len()
            + self.transactions.len()
            + self.payment_uris.len()
            + self.negotiation_records.len()
            + 1)
        .to_string()
    }

    /// Creates an entity, letting the builder close over the assigned id.
    pub fn create<R, B>(&mut self, build: B) -> R
    where
        R: Resource,
        B: FnOnce(String) -> R,
        Self: ResourceTable<R>,
    {
        let entity = build(self.next_id());
        self.table_mut().push(entity.clone());
        entity
    }

    /// Creates an entity only if the precondition holds against the current
    /// state. Nothing is stored when the precondition fails, and the caller
    /// holds the store lock, so check plus insert is one atomic step.
    pub fn create_checked<R, B, P>(&mut self, build: B, precondition: P) -> Result<R>
    where
        R: Resource,
        B: FnOnce(String) -> R,
        P: FnOnce(&Self, &R) -> Result<()>,
        Self: ResourceTable<R>,
    {
        let entity = build(self.next_id());
        precondition(self, &entity)?;
        self.table_mut().push(entity.clone());
        Ok(entity)
    }

    /// All entities of one type in creation order.
    pub fn all<R>(&self) -> &[R]
    where
        R: Resource,
        Self: ResourceTable<R>,
    {
        self.table()
    }

    pub fn find_all<R, P>(&self, predicate: P) -> Vec<R>
    where
        R: Resource,
        P: Fn(&R) -> bool,
        Self: ResourceTable<R>,
    {
        self.table()
            .iter()
            .filter(|entity| predicate(entity))
            .cloned()
            .collect()
    }

    /// The single entity matching the predicate; zero or several matches are
    /// both errors.
    pub fn find<R, P>(&self, predicate: P) -> Result<R>
    where
        R: Resource,
        P: Fn(&R) -> bool,
        Self: ResourceTable<R>,
    {
        let mut matches = self.table().iter().filter(|entity| predicate(entity));
        let found = matches
            .next()
            .ok_or_else(|| WalletError::not_found(R::NAME))?;
        if matches.next().is_some() {
            return Err(WalletError::not_found(format!("single {}", R::NAME)));
        }
        Ok(found.clone())
    }

    /// The most recently created entity matching the predicate.
    pub fn find_last<R, P>(&self, predicate: P) -> Result<R>
    where
        R: Resource,
        P: Fn(&R) -> bool,
        Self: ResourceTable<R>,
    {
        self.table()
            .iter()
            .rev()
            .find(|entity| predicate(entity))
            .cloned()
            .ok_or_else(|| WalletError::not_found(R::NAME))
    }

    /// Mutable access to the single entity matching the predicate.
    pub fn find_mut<R, P>(&mut self, predicate: P) -> Result<&mut R>
    where
        R: Resource,
        P: Fn(&R) -> bool,
        Self: ResourceTable<R>,
    {
        let count = self
            .table()
            .iter()
            .filter(|entity| predicate(entity))
            .count();
        if count == 0 {
            return Err(WalletError::not_found(R::NAME));
        }
        if count > 1 {
            return Err(WalletError::not_found(format!("single {}", R::NAME)));
        }
        self.table_mut()
            .iter_mut()
            .find(|entity| predicate(entity))
            .ok_or_else(|| WalletError::Internal("store changed between scans".to_string()))
    }
}

/// The wallet's in-memory store behind one process-wide async lock.
///
/// Every read-modify-write, a whole sync pass included, runs under a single
/// guard, so partially applied steps are never observable.
#[derive(Debug, Default)]
pub struct Store {
    resources: Mutex<Resources>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transaction(&self) -> MutexGuard<'_, Resources> {
        self.resources.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionStatus;

    fn account(id: String) -> Account {
        Account {
            id,
            kyc_data: "{}".to_string(),
        }
    }

    fn transaction(id: String, amount: i64) -> Transaction {
        Transaction {
            id,
            account_id: "1".to_string(),
            currency: "XUS".to_string(),
            amount,
            payee: None,
            status: TransactionStatus::Completed,
            cancel_reason: None,
            subaddress_hex: None,
            reference_id: None,
            signed_transaction: None,
            ledger_version: None,
        }
    }

    #[test]
    fn test_ids_count_all_entity_types() {
        let mut resources = Resources::default();
        let a = resources.create(account);
        let t = resources.create(|id| transaction(id, 10));
        let u = resources.create(|id| PaymentUri {
            id,
            account_id: a.id.clone(),
            subaddress_hex: "00".to_string(),
            account_identifier: "tmw1".to_string(),
        });
        let b = resources.create(account);

        assert_eq!(a.id, "1");
        assert_eq!(t.id, "2");
        assert_eq!(u.id, "3");
        assert_eq!(b.id, "4");
    }

    #[test]
    fn test_find_requires_single_match() {
        let mut resources = Resources::default();
        resources.create(|id| transaction(id, 10));
        resources.create(|id| transaction(id, 10));

        let err = resources
            .find(|t: &Transaction| t.amount == 10)
            .unwrap_err();
        assert!(err.to_string().contains("single transaction"));
        assert!(resources.find(|t: &Transaction| t.amount == 99).is_err());
        assert!(resources.find(|t: &Transaction| t.id == "1").is_ok());
    }

    #[test]
    fn test_find_last_returns_newest() {
        let mut resources = Resources::default();
        resources.create(|id| transaction(id, 10));
        resources.create(|id| transaction(id, 20));

        let last = resources.find_last(|_: &Transaction| true).unwrap();
        assert_eq!(last.amount, 20);
    }

    #[test]
    fn test_find_all_keeps_creation_order() {
        let mut resources = Resources::default();
        for amount in [1, 2, 3] {
            resources.create(|id| transaction(id, amount));
        }
        let amounts: Vec<i64> = resources
            .find_all(|_: &Transaction| true)
            .iter()
            .map(|t| t.amount)
            .collect();
        assert_eq!(amounts, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_precondition_stores_nothing() {
        let mut resources = Resources::default();
        let result = resources.create_checked(
            |id| transaction(id, 10),
            |_, _| Err(WalletError::validation("rejected")),
        );
        assert!(result.is_err());
        assert!(resources.all::<Transaction>().is_empty());
        // The rejected entity's id is reused by the next create.
        assert_eq!(resources.create(|id| transaction(id, 5)).id, "1");
    }

    #[test]
    fn test_find_mut_updates_in_place() {
        let mut resources = Resources::default();
        resources.create(|id| transaction(id, 10));
        resources
            .find_mut(|t: &Transaction| t.id == "1")
            .unwrap()
            .amount = 42;
        assert_eq!(
            resources.find(|t: &Transaction| t.id == "1").unwrap().amount,
            42
        );
    }

    #[tokio::test]
    async fn test_store_guard_serializes_access() {
        let store = Store::new();
        {
            let mut guard = store.transaction().await;
            guard.create(account);
        }
        let guard = store.transaction().await;
        assert_eq!(guard.all::<Account>().len(), 1);
    }
}
