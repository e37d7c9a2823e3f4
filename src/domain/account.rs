use serde::{Deserialize, Serialize};

use crate::domain::kyc::KycData;
use crate::error::{Result, WalletError};

/// A customer account held by the wallet.
///
/// Accounts own no balance field; balances are derived from the transaction
/// history on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// JSON-encoded KYC document, validated at creation time.
    pub kyc_data: String,
}

impl Account {
    /// Decodes the stored KYC document.
    ///
    /// The raw string was validated when the account was created, so a decode
    /// failure here means the store was corrupted.
    pub fn kyc_data_object(&self) -> Result<KycData> {
        serde_json::from_str(&self.kyc_data).map_err(|err| {
            WalletError::Internal(format!(
                "stored kyc_data of account {} is not valid JSON: {err}",
                self.id
            ))
        })
    }
}

/// A receive address handed out by an account.
///
/// Carries the full bech32 account identifier a payer uses as payee, plus the
/// sub-address that routes incoming payments back to the owning account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentUri {
    pub id: String,
    pub account_id: String,
    pub subaddress_hex: String,
    pub account_identifier: String,
}
