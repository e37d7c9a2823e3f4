use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::identifier::AccountAddress;
use crate::domain::negotiation::{PaymentObject, SignedTurn};
use crate::error::Result;

/// Outcome of waiting for a submitted ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalityStatus {
    Committed { version: u64 },
    /// The wait ran out before the transaction landed; retry later.
    Timeout,
    /// The submission was superseded on chain and must be re-signed.
    HashMismatch,
    Expired { reason: String },
    ExecutionFailure { reason: String },
}

/// A payment handed to the ledger for settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub currency: String,
    pub amount: i64,
    pub payee_address: AccountAddress,
    pub metadata: Vec<u8>,
    pub metadata_signature: Vec<u8>,
}

/// An incoming on-chain payment observed on the wallet's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub version: u64,
    pub currency: String,
    pub amount: i64,
    pub to_address: AccountAddress,
    pub to_subaddress: Option<String>,
    pub reference_id: Option<String>,
}

/// Metadata attached to payments below the dual attestation threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralMetadata {
    pub from_subaddress: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_subaddress: Option<String>,
}

/// Metadata attached to dual-attested payments; the receiving side resolves
/// the target account through the negotiation this reference id names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelRuleMetadata {
    pub reference_id: String,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submits a payment and returns a handle to poll for finality.
    async fn submit(&self, request: SubmitRequest) -> Result<String>;
    async fn wait_for_finality(&self, handle: &str) -> Result<FinalityStatus>;
    async fn dual_attestation_threshold(&self, currency: &str) -> Result<i64>;
    /// Payments received on `address` after `after_version`, oldest first.
    async fn payment_events(
        &self,
        address: &AccountAddress,
        after_version: u64,
    ) -> Result<Vec<PaymentEvent>>;
}

#[async_trait]
pub trait NegotiationTransport: Send + Sync {
    async fn send(
        &self,
        sender: &AccountAddress,
        recipient: &AccountAddress,
        turn: &SignedTurn,
    ) -> Result<()>;
}

/// A turn accepted from the wire, waiting for the next sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundTurn {
    /// Hex on-chain address of the wallet that sent the turn.
    pub sender_address: String,
    pub object: PaymentObject,
}

/// Inbound side of the negotiation boundary.
///
/// Turns are decoded and queued here as they arrive; applying them against
/// the store happens in the next sync pass, never on the delivery path.
#[derive(Debug, Default)]
pub struct Inbox {
    queue: Mutex<VecDeque<InboundTurn>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and queues one wire envelope. Undecodable envelopes are
    /// rejected here so the queue only ever holds well-formed turns.
    pub async fn deliver(&self, sender_address: &str, body: &[u8]) -> Result<()> {
        let turn = SignedTurn::decode(body)?;
        let object = turn.object()?;
        self.queue.lock().await.push_back(InboundTurn {
            sender_address: sender_address.to_string(),
            object,
        });
        Ok(())
    }

    pub async fn drain(&self) -> Vec<InboundTurn> {
        self.queue.lock().await.drain(..).collect()
    }
}
