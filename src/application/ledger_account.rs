use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::domain::identifier::{self, AccountAddress, SubAddress};
use crate::domain::negotiation::PaymentObject;
use crate::domain::ports::{GeneralMetadata, LedgerClient, SubmitRequest, TravelRuleMetadata};
use crate::domain::transaction::Transaction;
use crate::error::{Result, WalletError};

/// The wallet's on-chain identity.
///
/// Owns the signing key, the address derived from it and the identifier
/// codec. Everything that touches chain-level addressing or signing funnels
/// through here.
pub struct LedgerAccount {
    hrp: String,
    signing_key: SigningKey,
    address: AccountAddress,
}

impl LedgerAccount {
    pub fn generate(hrp: &str) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = derive_address(&signing_key.verifying_key());
        Self {
            hrp: hrp.to_string(),
            signing_key,
            address,
        }
    }

    pub fn hrp(&self) -> &str {
        &self.hrp
    }

    pub fn address(&self) -> &AccountAddress {
        &self.address
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs arbitrary bytes, returning the hex signature.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }

    pub fn account_identifier(&self, subaddress: Option<&SubAddress>) -> Result<String> {
        identifier::encode_account(&self.hrp, &self.address, subaddress)
    }

    /// Whether a payee identifier points back at this wallet.
    pub fn owns(&self, account_identifier: &str) -> bool {
        identifier::decode_account(&self.hrp, account_identifier)
            .map(|(address, _)| address == self.address)
            .unwrap_or(false)
    }

    /// Metadata for a payment below the dual attestation threshold.
    pub fn general_metadata(
        &self,
        from_subaddress: &SubAddress,
        payee: &str,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let (_, to_subaddress) = identifier::decode_account(&self.hrp, payee)?;
        let metadata = GeneralMetadata {
            from_subaddress: from_subaddress.to_hex(),
            to_subaddress: to_subaddress.map(|sub| sub.to_hex()),
        };
        Ok((serde_json::to_vec(&metadata)?, Vec::new()))
    }

    /// Metadata for a dual-attested payment, carrying the receiver's travel
    /// rule signature out of the finished negotiation.
    pub fn travel_metadata(&self, object: &PaymentObject) -> Result<(Vec<u8>, Vec<u8>)> {
        let signature = object.recipient_signature.as_deref().ok_or_else(|| {
            WalletError::Protocol(format!(
                "exchange {} is ready but carries no recipient signature",
                object.reference_id
            ))
        })?;
        let signature = hex::decode(signature).map_err(|_| {
            WalletError::Protocol(format!(
                "exchange {}: recipient signature is not valid hex",
                object.reference_id
            ))
        })?;
        let metadata = TravelRuleMetadata {
            reference_id: object.reference_id.clone(),
        };
        Ok((serde_json::to_vec(&metadata)?, signature))
    }

    pub async fn submit_payment(
        &self,
        ledger: &dyn LedgerClient,
        transaction: &Transaction,
        metadata: (Vec<u8>, Vec<u8>),
    ) -> Result<String> {
        let payee = transaction.payee.as_deref().ok_or_else(|| {
            WalletError::Internal(format!(
                "transaction {} has no payee to submit to",
                transaction.id
            ))
        })?;
        let (payee_address, _) = identifier::decode_account(&self.hrp, payee)?;
        ledger
            .submit(SubmitRequest {
                currency: transaction.currency.clone(),
                amount: transaction.amount,
                payee_address,
                metadata: metadata.0,
                metadata_signature: metadata.1,
            })
            .await
    }
}

fn derive_address(key: &VerifyingKey) -> AccountAddress {
    let bytes = key.to_bytes();
    let mut address = [0u8; 16];
    address.copy_from_slice(&bytes[..16]);
    AccountAddress::new(address)
}
