use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Canceled,
}

/// A single balance movement of one account.
///
/// Deposits (no payee) complete at creation. Payments (with a payee) start
/// pending and are driven to a terminal status by sync passes. The ledger
/// bookkeeping fields are write-once; mutation goes through the guarded
/// methods below so a terminal transaction can never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub currency: String,
    pub amount: i64,
    /// Bech32 account identifier of the receiver; absent for deposits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee: Option<String>,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Sender sub-address assigned when an outgoing payment starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subaddress_hex: Option<String>,
    /// Compliance negotiation key; present once a negotiation was opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Handle of the ledger submission awaiting finality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_version: Option<u64>,
}

impl Transaction {
    /// Effect of this transaction on the owning account's balance.
    pub fn balance_amount(&self) -> i64 {
        if self.payee.is_some() {
            -self.amount
        } else {
            self.amount
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn record_subaddress(&mut self, subaddress_hex: String) -> Result<()> {
        if self.subaddress_hex.is_some() {
            return Err(self.corrupt("sub-address assigned twice"));
        }
        self.subaddress_hex = Some(subaddress_hex);
        Ok(())
    }

    pub fn open_negotiation(&mut self, reference_id: String) -> Result<()> {
        if self.reference_id.is_some() {
            return Err(self.corrupt("negotiation opened twice"));
        }
        self.reference_id = Some(reference_id);
        Ok(())
    }

    pub fn record_submission(&mut self, handle: String) -> Result<()> {
        if self.signed_transaction.is_some() {
            return Err(self.corrupt("ledger submission recorded twice"));
        }
        self.signed_transaction = Some(handle);
        Ok(())
    }

    /// Swaps in a fresh submission handle after the previous one was reported
    /// as a hash mismatch. The only sanctioned overwrite of a bookkeeping
    /// field.
    pub fn replace_submission(&mut self, handle: String) -> Result<()> {
        if self.signed_transaction.is_none() {
            return Err(self.corrupt("no ledger submission to replace"));
        }
        self.signed_transaction = Some(handle);
        Ok(())
    }

    pub fn complete(&mut self, ledger_version: Option<u64>) -> Result<()> {
        if self.status != TransactionStatus::Pending {
            return Err(self.corrupt("completed while not pending"));
        }
        self.status = TransactionStatus::Completed;
        self.ledger_version = ledger_version;
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status != TransactionStatus::Pending {
            return Err(self.corrupt("canceled while not pending"));
        }
        self.status = TransactionStatus::Canceled;
        self.cancel_reason = Some(reason.into());
        Ok(())
    }

    fn corrupt(&self, detail: &str) -> WalletError {
        WalletError::Internal(format!("transaction {}: {detail}", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Transaction {
        Transaction {
            id: "1".to_string(),
            account_id: "2".to_string(),
            currency: "XUS".to_string(),
            amount: 100,
            payee: Some("tmw1...".to_string()),
            status: TransactionStatus::Pending,
            cancel_reason: None,
            subaddress_hex: None,
            reference_id: None,
            signed_transaction: None,
            ledger_version: None,
        }
    }

    #[test]
    fn test_balance_amount_sign() {
        let outgoing = payment();
        assert_eq!(outgoing.balance_amount(), -100);

        let deposit = Transaction {
            payee: None,
            ..payment()
        };
        assert_eq!(deposit.balance_amount(), 100);
    }

    #[test]
    fn test_bookkeeping_fields_are_write_once() {
        let mut txn = payment();
        txn.record_subaddress("aa".to_string()).unwrap();
        assert!(txn.record_subaddress("bb".to_string()).is_err());
        assert_eq!(txn.subaddress_hex.as_deref(), Some("aa"));

        txn.open_negotiation("ref-1".to_string()).unwrap();
        assert!(txn.open_negotiation("ref-2".to_string()).is_err());

        assert!(txn.replace_submission("h2".to_string()).is_err());
        txn.record_submission("h1".to_string()).unwrap();
        assert!(txn.record_submission("h2".to_string()).is_err());
        txn.replace_submission("h2".to_string()).unwrap();
        assert_eq!(txn.signed_transaction.as_deref(), Some("h2"));
    }

    #[test]
    fn test_status_never_leaves_terminal() {
        let mut txn = payment();
        txn.complete(Some(5)).unwrap();
        assert!(txn.cancel("late").is_err());
        assert!(txn.complete(Some(6)).is_err());
        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.ledger_version, Some(5));

        let mut txn = payment();
        txn.cancel("failed").unwrap();
        assert!(txn.complete(None).is_err());
        assert_eq!(txn.cancel_reason.as_deref(), Some("failed"));
    }
}
