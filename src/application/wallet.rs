use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::application::ledger_account::LedgerAccount;
use crate::domain::account::{Account, PaymentUri};
use crate::domain::identifier::{self, SubAddress};
use crate::domain::kyc::{KycData, KycSamples, SampleKind};
use crate::domain::negotiation::{
    ExchangeState, FollowUpAction, NegotiationRecord, PaymentObject, Role, SignedTurn,
};
use crate::domain::ports::{
    FinalityStatus, Inbox, InboundTurn, LedgerClient, NegotiationTransport, PaymentEvent,
};
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::{Result, WalletError};
use crate::infrastructure::in_memory::{Resource, ResourceTable, Resources, Store};

/// Creation payload for an account. All fields arrive optional and are
/// validated here, not by the HTTP layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub kyc_data: Option<String>,
}

/// Creation payload for a transaction. Without a payee this is a deposit;
/// with one it is an outgoing payment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTransaction {
    pub account_id: Option<String>,
    pub currency: Option<String>,
    pub amount: Option<i64>,
    pub payee: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPaymentUri {
    pub account_id: Option<String>,
}

/// One customer wallet: accounts, transactions and the machinery driving
/// payments to settlement.
///
/// All operations snapshot-or-mutate under the store's single lock. The sync
/// pass is the only place outbound turns, ledger submissions and status
/// changes happen; request handlers only append work for it.
pub struct Wallet {
    name: String,
    account: LedgerAccount,
    store: Store,
    ledger: Arc<dyn LedgerClient>,
    transport: Arc<dyn NegotiationTransport>,
    kyc_samples: KycSamples,
    inbox: Arc<Inbox>,
    subaddress_seq: AtomicU64,
    event_cursor: AtomicU64,
}

impl Wallet {
    pub fn new(
        name: &str,
        account: LedgerAccount,
        ledger: Arc<dyn LedgerClient>,
        transport: Arc<dyn NegotiationTransport>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kyc_samples: KycSamples::generate(name),
            account,
            store: Store::new(),
            ledger,
            transport,
            inbox: Arc::new(Inbox::new()),
            subaddress_seq: AtomicU64::new(0),
            event_cursor: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ledger_account(&self) -> &LedgerAccount {
        &self.account
    }

    pub fn kyc_samples(&self) -> &KycSamples {
        &self.kyc_samples
    }

    pub fn inbox(&self) -> Arc<Inbox> {
        self.inbox.clone()
    }

    pub async fn create_account(&self, input: NewAccount) -> Result<Account> {
        let kyc_data = required(input.kyc_data, "kyc_data")?;
        KycData::parse(&kyc_data)?;

        let mut resources = self.store.transaction().await;
        let account = resources.create(|id| Account { id, kyc_data });
        info!(wallet = %self.name, account_id = %account.id, "account created");
        Ok(account)
    }

    pub async fn create_transaction(&self, input: NewTransaction) -> Result<Transaction> {
        let account_id = required(input.account_id, "account_id")?;
        let currency = required(input.currency, "currency")?;
        let amount = required(input.amount, "amount")?;
        validate_currency(&currency)?;
        if amount < 0 {
            return Err(WalletError::validation(
                "'amount' value must be greater than or equal to zero",
            ));
        }
        if let Some(payee) = input.payee.as_deref() {
            identifier::decode_account(self.account.hrp(), payee).map_err(|err| {
                WalletError::validation(format!("'payee' is invalid account identifier: {err}"))
            })?;
        }

        let mut resources = self.store.transaction().await;
        resources
            .find(|a: &Account| a.id == account_id)
            .map_err(|_| WalletError::not_found(format!("account {account_id}")))?;

        let status = if input.payee.is_some() {
            TransactionStatus::Pending
        } else {
            TransactionStatus::Completed
        };
        let payee = input.payee;
        let build = |id: String| Transaction {
            id,
            account_id: account_id.clone(),
            currency: currency.clone(),
            amount,
            payee: payee.clone(),
            status,
            cancel_reason: None,
            subaddress_hex: None,
            reference_id: None,
            signed_transaction: None,
            ledger_version: None,
        };
        let transaction = if status == TransactionStatus::Pending {
            // Balance check and insert are one step under the store lock, so
            // two concurrent spends cannot both pass against the same funds.
            resources.create_checked(build, |resources, txn: &Transaction| {
                let balance = account_balance(resources, &txn.account_id, &txn.currency);
                if txn.amount > balance {
                    return Err(WalletError::validation(format!(
                        "account balance not enough: {balance} < {}",
                        txn.amount
                    )));
                }
                Ok(())
            })?
        } else {
            resources.create(build)
        };
        info!(
            wallet = %self.name,
            transaction_id = %transaction.id,
            status = ?transaction.status,
            "transaction created"
        );
        Ok(transaction)
    }

    pub async fn create_payment_uri(&self, input: NewPaymentUri) -> Result<PaymentUri> {
        let account_id = required(input.account_id, "account_id")?;

        let mut resources = self.store.transaction().await;
        resources
            .find(|a: &Account| a.id == account_id)
            .map_err(|_| WalletError::not_found(format!("account {account_id}")))?;

        let subaddress = self.next_subaddress();
        let account_identifier = self.account.account_identifier(Some(&subaddress))?;
        let uri = resources.create(|id| PaymentUri {
            id,
            account_id,
            subaddress_hex: subaddress.to_hex(),
            account_identifier,
        });
        Ok(uri)
    }

    /// Balance per currency, derived from the full transaction history.
    /// Canceled transactions never count; pending outgoing ones already do.
    pub async fn balances(&self, account_id: &str) -> Result<HashMap<String, i64>> {
        let resources = self.store.transaction().await;
        resources
            .find(|a: &Account| a.id == account_id)
            .map_err(|_| WalletError::not_found(format!("account {account_id}")))?;

        let mut balances = HashMap::new();
        for txn in resources.all::<Transaction>() {
            if txn.account_id == account_id && txn.status != TransactionStatus::Canceled {
                *balances.entry(txn.currency.clone()).or_insert(0) += txn.balance_amount();
            }
        }
        Ok(balances)
    }

    pub async fn balance(&self, account_id: &str, currency: &str) -> Result<i64> {
        Ok(self
            .balances(account_id)
            .await?
            .get(currency)
            .copied()
            .unwrap_or(0))
    }

    pub async fn list<R>(&self) -> Vec<R>
    where
        R: Resource,
        Resources: ResourceTable<R>,
    {
        self.store.transaction().await.find_all(|_: &R| true)
    }

    /// Accepts one wire turn from a counterparty. It is only queued here;
    /// the next sync pass applies it.
    pub async fn receive_turn(&self, sender_address: &str, body: &[u8]) -> Result<()> {
        self.inbox.deliver(sender_address, body).await
    }

    /// One idempotent reconciliation pass.
    ///
    /// Order matters: queued inbound turns land first, then negotiations are
    /// advanced, then on-chain receipts are credited, and finally pending
    /// outgoing payments are driven. An error aborts the pass but keeps the
    /// progress made before it; the next pass picks up from there.
    pub async fn sync(&self) -> Result<()> {
        let mut resources = self.store.transaction().await;
        self.apply_inbound_turns(&mut resources).await?;
        self.process_negotiations(&mut resources).await?;
        self.apply_payment_events(&mut resources).await?;
        self.execute_pending_transactions(&mut resources).await?;
        Ok(())
    }

    fn next_subaddress(&self) -> SubAddress {
        SubAddress::from_index(self.subaddress_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    // ---- sync step one: inbound turns ----

    /// Drains the inbox and applies each turn. A turn that fails validation
    /// is logged and dropped; it must not wedge the queue behind it.
    async fn apply_inbound_turns(&self, resources: &mut Resources) -> Result<()> {
        for inbound in self.inbox.drain().await {
            if let Err(err) = self.apply_turn(resources, &inbound) {
                warn!(
                    wallet = %self.name,
                    sender = %inbound.sender_address,
                    error = %err,
                    "dropping invalid inbound turn"
                );
            }
        }
        Ok(())
    }

    fn apply_turn(&self, resources: &mut Resources, inbound: &InboundTurn) -> Result<()> {
        let object = &inbound.object;
        let role = object.role_of(self.account.hrp(), self.account.address())?;

        match resources.find_last(|r: &NegotiationRecord| r.reference_id == object.reference_id) {
            Ok(record) => {
                let stored = record.payment_object()?;
                if stored == *object {
                    debug!(reference_id = %object.reference_id, "replayed turn, ignoring");
                    return Ok(());
                }
                object.validate_transition(&stored, role)?;
                self.record_turn(resources, record.account_id, object, role)?;
            }
            Err(_) => {
                // First turn of a counterparty-opened exchange; route it to an
                // account through the sub-address we handed out earlier.
                if role != Role::Receiver || object.state()? != ExchangeState::SenderInit {
                    return Err(WalletError::Protocol(format!(
                        "unknown reference id {} for an in-progress exchange",
                        object.reference_id
                    )));
                }
                let (_, subaddress) =
                    identifier::decode_account(self.account.hrp(), &object.receiver.address)
                        .map_err(|err| WalletError::Protocol(err.to_string()))?;
                let subaddress = subaddress.ok_or_else(|| {
                    WalletError::Protocol("receiver identifier carries no sub-address".to_string())
                })?;
                let subaddress_hex = subaddress.to_hex();
                let uri = resources.find(|u: &PaymentUri| u.subaddress_hex == subaddress_hex)?;
                self.record_turn(resources, uri.account_id, object, role)?;
            }
        }
        Ok(())
    }

    /// Appends a turn to the audit trail and, when it aborts the exchange on
    /// the paying side, cancels the local transaction.
    fn record_turn(
        &self,
        resources: &mut Resources,
        account_id: String,
        object: &PaymentObject,
        role: Role,
    ) -> Result<()> {
        let request_json = serde_json::to_string(object)?;
        let reference_id = object.reference_id.clone();
        let record_account_id = account_id.clone();
        resources.create(|id| NegotiationRecord {
            id,
            account_id: record_account_id,
            reference_id,
            request_json,
        });
        debug!(
            wallet = %self.name,
            reference_id = %object.reference_id,
            state = ?object.state(),
            "turn recorded"
        );

        if object.is_aborted() && role == Role::Sender {
            let reason = match object.abort_message() {
                Some(message) => format!("compliance data exchange aborted: {message}"),
                None => "compliance data exchange aborted".to_string(),
            };
            let reference_id = object.reference_id.as_str();
            let transaction = resources
                .find_mut(|t: &Transaction| t.reference_id.as_deref() == Some(reference_id))?;
            let transaction_id = transaction.id().to_string();
            transaction.cancel(reason)?;
            info!(
                wallet = %self.name,
                transaction_id = %transaction_id,
                "payment canceled by aborted exchange"
            );
        }
        Ok(())
    }

    // ---- sync step two: advance negotiations ----

    /// Runs the follow-up action, if any, for the newest turn of every
    /// exchange. One action per exchange per pass.
    async fn process_negotiations(&self, resources: &mut Resources) -> Result<()> {
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, NegotiationRecord> = HashMap::new();
        for record in resources.all::<NegotiationRecord>() {
            if !latest.contains_key(&record.reference_id) {
                order.push(record.reference_id.clone());
            }
            latest.insert(record.reference_id.clone(), record.clone());
        }

        for reference_id in order {
            let Some(record) = latest.get(&reference_id) else {
                continue;
            };
            self.process_negotiation(resources, record).await?;
        }
        Ok(())
    }

    async fn process_negotiation(
        &self,
        resources: &mut Resources,
        record: &NegotiationRecord,
    ) -> Result<()> {
        let object = record.payment_object()?;
        let role = object.role_of(self.account.hrp(), self.account.address())?;
        let Some(action) = object.follow_up(role)? else {
            return Ok(());
        };
        debug!(
            wallet = %self.name,
            reference_id = %object.reference_id,
            action = ?action,
            "running follow-up action"
        );

        let reply = match action {
            FollowUpAction::EvaluateKycData => {
                Some(self.evaluate_kyc_data(resources, record, &object, role)?)
            }
            FollowUpAction::ClearSoftMatch => Some(self.clear_soft_match(record, &object, role)),
            FollowUpAction::ReviewKycData => {
                Some(self.review_kyc_data(resources, record, &object, role)?)
            }
            FollowUpAction::SubmitTransaction => {
                self.submit_negotiated_transaction(resources, &object)
                    .await?;
                None
            }
        };
        if let Some(reply) = reply {
            // Send first; only a delivered turn is recorded. A failed send
            // leaves the exchange where it was for a clean retry.
            self.send_turn(&reply, role).await?;
            self.record_turn(resources, record.account_id.clone(), &reply, role)?;
        }
        Ok(())
    }

    /// First look at the counterparty's KYC data: reject, soft-match or
    /// accept it.
    fn evaluate_kyc_data(
        &self,
        resources: &Resources,
        record: &NegotiationRecord,
        object: &PaymentObject,
        role: Role,
    ) -> Result<PaymentObject> {
        let turn = match object.counterparty(role).kyc_data.as_ref() {
            None => object.abort_turn(role, "KYC data is rejected"),
            Some(data) if self.kyc_samples.matches(SampleKind::Reject, data) => {
                object.abort_turn(role, "KYC data is rejected")
            }
            Some(data)
                if self.kyc_samples.matches(SampleKind::SoftMatch, data)
                    || self.kyc_samples.matches(SampleKind::SoftReject, data) =>
            {
                object.soft_match_turn(role)
            }
            Some(_) => self.ready_for_settlement(resources, record, object, role)?,
        };
        Ok(turn)
    }

    /// Second look after the counterparty cleared a soft match.
    fn review_kyc_data(
        &self,
        resources: &Resources,
        record: &NegotiationRecord,
        object: &PaymentObject,
        role: Role,
    ) -> Result<PaymentObject> {
        let turn = match object.counterparty(role).kyc_data.as_ref() {
            None => object.abort_turn(role, "KYC data review rejected"),
            Some(data) if self.kyc_samples.matches(SampleKind::SoftReject, data) => {
                object.abort_turn(role, "KYC data review rejected")
            }
            Some(_) => self.ready_for_settlement(resources, record, object, role)?,
        };
        Ok(turn)
    }

    fn clear_soft_match(
        &self,
        record: &NegotiationRecord,
        object: &PaymentObject,
        role: Role,
    ) -> PaymentObject {
        let additional = serde_json::json!({ "account_id": record.account_id }).to_string();
        object.clear_soft_match_turn(role, additional)
    }

    /// Marks this side ready. The receiver also publishes its KYC data and
    /// the travel rule signature the sender needs for submission.
    fn ready_for_settlement(
        &self,
        resources: &Resources,
        record: &NegotiationRecord,
        object: &PaymentObject,
        role: Role,
    ) -> Result<PaymentObject> {
        match role {
            Role::Sender => Ok(object.sender_ready_turn()),
            Role::Receiver => {
                let account = resources.find(|a: &Account| a.id == record.account_id)?;
                let kyc_data = account.kyc_data_object()?;
                let signature = self.account.sign(&object.travel_rule_signature_message());
                Ok(object.receiver_ready_turn(kyc_data, signature))
            }
        }
    }

    async fn submit_negotiated_transaction(
        &self,
        resources: &mut Resources,
        object: &PaymentObject,
    ) -> Result<()> {
        let reference_id = object.reference_id.as_str();
        let transaction =
            resources.find(|t: &Transaction| t.reference_id.as_deref() == Some(reference_id))?;
        if !transaction.is_pending() || transaction.signed_transaction.is_some() {
            return Ok(());
        }

        let metadata = self.account.travel_metadata(object)?;
        let handle = self
            .account
            .submit_payment(self.ledger.as_ref(), &transaction, metadata)
            .await?;
        info!(
            wallet = %self.name,
            transaction_id = %transaction.id,
            reference_id,
            "dual-attested payment submitted"
        );
        resources
            .find_mut(|t: &Transaction| t.id == transaction.id)?
            .record_submission(handle)?;
        Ok(())
    }

    async fn send_turn(&self, object: &PaymentObject, role: Role) -> Result<()> {
        let payload = serde_json::to_string(object)?;
        let signature = self.account.sign(payload.as_bytes());
        let turn = SignedTurn { payload, signature };

        let recipient_identifier = &object.counterparty(role).address;
        let (recipient, _) =
            identifier::decode_account(self.account.hrp(), recipient_identifier)
                .map_err(|err| WalletError::Protocol(err.to_string()))?;
        self.transport
            .send(self.account.address(), &recipient, &turn)
            .await
    }

    // ---- sync step three: on-chain receipts ----

    async fn apply_payment_events(&self, resources: &mut Resources) -> Result<()> {
        let cursor = self.event_cursor.load(Ordering::Relaxed);
        let events = self
            .ledger
            .payment_events(self.account.address(), cursor)
            .await?;

        let mut new_cursor = cursor;
        for event in events {
            // Unmatched events are reported and skipped; the cursor still
            // advances past them.
            if let Err(err) = self.apply_payment_event(resources, &event) {
                warn!(
                    wallet = %self.name,
                    version = event.version,
                    error = %err,
                    "skipping unmatched payment event"
                );
            }
            new_cursor = new_cursor.max(event.version);
        }
        self.event_cursor.store(new_cursor, Ordering::Relaxed);
        Ok(())
    }

    fn apply_payment_event(&self, resources: &mut Resources, event: &PaymentEvent) -> Result<()> {
        let (account_id, subaddress_hex) = if let Some(sub) = &event.to_subaddress {
            let uri = resources.find(|u: &PaymentUri| u.subaddress_hex == *sub)?;
            (uri.account_id, Some(sub.clone()))
        } else if let Some(reference_id) = &event.reference_id {
            let record =
                resources.find_last(|r: &NegotiationRecord| r.reference_id == *reference_id)?;
            let object = record.payment_object()?;
            let (_, sub) =
                identifier::decode_account(self.account.hrp(), &object.receiver.address)
                    .map_err(|err| WalletError::Protocol(err.to_string()))?;
            (record.account_id, sub.map(|s| s.to_hex()))
        } else {
            return Err(WalletError::not_found("payment routing information"));
        };

        let currency = event.currency.clone();
        let amount = event.amount;
        let version = event.version;
        let transaction = resources.create(|id| Transaction {
            id,
            account_id,
            currency,
            amount,
            payee: None,
            status: TransactionStatus::Completed,
            cancel_reason: None,
            subaddress_hex,
            reference_id: None,
            signed_transaction: None,
            ledger_version: Some(version),
        });
        info!(
            wallet = %self.name,
            transaction_id = %transaction.id,
            version = event.version,
            "incoming payment credited"
        );
        Ok(())
    }

    // ---- sync step four: drive pending outgoing payments ----

    async fn execute_pending_transactions(&self, resources: &mut Resources) -> Result<()> {
        let pending: Vec<String> = resources
            .all::<Transaction>()
            .iter()
            .filter(|t| t.is_pending() && t.payee.is_some())
            .map(|t| t.id.clone())
            .collect();
        for transaction_id in pending {
            self.execute_transaction(resources, &transaction_id).await?;
        }
        Ok(())
    }

    async fn execute_transaction(
        &self,
        resources: &mut Resources,
        transaction_id: &str,
    ) -> Result<()> {
        let transaction = resources.find(|t: &Transaction| t.id == transaction_id)?;
        let Some(payee) = transaction.payee.clone() else {
            return Ok(());
        };

        if self.account.owns(&payee) {
            return self.execute_internal_transfer(resources, &transaction, &payee);
        }
        if transaction.signed_transaction.is_some() {
            return self.check_finality(resources, &transaction).await;
        }
        self.start_external_payment(resources, &transaction).await
    }

    /// Payee lives in this wallet: move the funds locally, no ledger, no
    /// negotiation, settled within the pass.
    fn execute_internal_transfer(
        &self,
        resources: &mut Resources,
        transaction: &Transaction,
        payee: &str,
    ) -> Result<()> {
        let (_, subaddress) = identifier::decode_account(self.account.hrp(), payee)?;
        let subaddress = subaddress.ok_or_else(|| WalletError::not_found("payee sub-address"))?;
        let subaddress_hex = subaddress.to_hex();
        let uri = resources.find(|u: &PaymentUri| u.subaddress_hex == subaddress_hex)?;

        let currency = transaction.currency.clone();
        let amount = transaction.amount;
        resources.create(|id| Transaction {
            id,
            account_id: uri.account_id,
            currency,
            amount,
            payee: None,
            status: TransactionStatus::Completed,
            cancel_reason: None,
            subaddress_hex: None,
            reference_id: None,
            signed_transaction: None,
            ledger_version: None,
        });
        resources
            .find_mut(|t: &Transaction| t.id == transaction.id)?
            .complete(None)?;
        info!(
            wallet = %self.name,
            transaction_id = %transaction.id,
            "internal transfer completed"
        );
        Ok(())
    }

    async fn check_finality(
        &self,
        resources: &mut Resources,
        transaction: &Transaction,
    ) -> Result<()> {
        let Some(handle) = transaction.signed_transaction.clone() else {
            return Ok(());
        };
        match self.ledger.wait_for_finality(&handle).await? {
            FinalityStatus::Committed { version } => {
                resources
                    .find_mut(|t: &Transaction| t.id == transaction.id)?
                    .complete(Some(version))?;
                info!(
                    wallet = %self.name,
                    transaction_id = %transaction.id,
                    version,
                    "payment settled"
                );
            }
            FinalityStatus::Timeout => {
                debug!(
                    wallet = %self.name,
                    transaction_id = %transaction.id,
                    "finality wait timed out, retrying next pass"
                );
            }
            FinalityStatus::HashMismatch => {
                let metadata = self.transaction_metadata(resources, transaction)?;
                let handle = self
                    .account
                    .submit_payment(self.ledger.as_ref(), transaction, metadata)
                    .await?;
                warn!(
                    wallet = %self.name,
                    transaction_id = %transaction.id,
                    "submission superseded on chain, resubmitted"
                );
                resources
                    .find_mut(|t: &Transaction| t.id == transaction.id)?
                    .replace_submission(handle)?;
            }
            FinalityStatus::Expired { reason } | FinalityStatus::ExecutionFailure { reason } => {
                resources
                    .find_mut(|t: &Transaction| t.id == transaction.id)?
                    .cancel(format!("ledger execution failed: {reason}"))?;
                warn!(
                    wallet = %self.name,
                    transaction_id = %transaction.id,
                    reason,
                    "payment canceled by the ledger"
                );
            }
        }
        Ok(())
    }

    /// Rebuilds the metadata of an already started payment for resubmission.
    fn transaction_metadata(
        &self,
        resources: &Resources,
        transaction: &Transaction,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        if let Some(reference_id) = transaction.reference_id.as_deref() {
            let record =
                resources.find_last(|r: &NegotiationRecord| r.reference_id == reference_id)?;
            return self.account.travel_metadata(&record.payment_object()?);
        }
        let subaddress_hex = transaction.subaddress_hex.as_deref().ok_or_else(|| {
            WalletError::Internal(format!(
                "submitted transaction {} has no sub-address",
                transaction.id
            ))
        })?;
        let subaddress = SubAddress::from_hex(subaddress_hex)?;
        let payee = transaction.payee.as_deref().ok_or_else(|| {
            WalletError::Internal(format!("transaction {} has no payee", transaction.id))
        })?;
        self.account.general_metadata(&subaddress, payee)
    }

    /// First pass over a fresh external payment: assign the sender
    /// sub-address, then either submit directly or open a negotiation.
    async fn start_external_payment(
        &self,
        resources: &mut Resources,
        transaction: &Transaction,
    ) -> Result<()> {
        // A present reference id means the negotiation is already open and
        // this payment is waiting for it, not for the driver.
        if transaction.reference_id.is_some() {
            return Ok(());
        }

        let subaddress = match transaction.subaddress_hex.as_deref() {
            Some(hex) => SubAddress::from_hex(hex)?,
            None => {
                let subaddress = self.next_subaddress();
                resources
                    .find_mut(|t: &Transaction| t.id == transaction.id)?
                    .record_subaddress(subaddress.to_hex())?;
                subaddress
            }
        };

        let threshold = self
            .ledger
            .dual_attestation_threshold(&transaction.currency)
            .await?;
        if transaction.amount < threshold {
            let payee = transaction.payee.as_deref().ok_or_else(|| {
                WalletError::Internal(format!("transaction {} has no payee", transaction.id))
            })?;
            let metadata = self.account.general_metadata(&subaddress, payee)?;
            let handle = self
                .account
                .submit_payment(self.ledger.as_ref(), transaction, metadata)
                .await?;
            info!(
                wallet = %self.name,
                transaction_id = %transaction.id,
                "payment below dual attestation threshold submitted"
            );
            resources
                .find_mut(|t: &Transaction| t.id == transaction.id)?
                .record_submission(handle)?;
            return Ok(());
        }

        // At or above the threshold nothing may reach the chain before the
        // compliance data exchange finishes.
        let account = resources.find(|a: &Account| a.id == transaction.account_id)?;
        let sender_identifier = self.account.account_identifier(Some(&subaddress))?;
        let payee = transaction.payee.clone().ok_or_else(|| {
            WalletError::Internal(format!("transaction {} has no payee", transaction.id))
        })?;
        let object = PaymentObject::new_payment(
            sender_identifier,
            account.kyc_data_object()?,
            payee,
            transaction.amount,
            &transaction.currency,
        );

        // Send first. If delivery fails the transaction still has no
        // reference id and the next pass opens a fresh exchange.
        self.send_turn(&object, Role::Sender).await?;
        resources
            .find_mut(|t: &Transaction| t.id == transaction.id)?
            .open_negotiation(object.reference_id.clone())?;
        self.record_turn(
            resources,
            transaction.account_id.clone(),
            &object,
            Role::Sender,
        )?;
        info!(
            wallet = %self.name,
            transaction_id = %transaction.id,
            reference_id = %object.reference_id,
            "compliance negotiation opened"
        );
        Ok(())
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| WalletError::validation(format!("'{field}' is required")))
}

fn validate_currency(code: &str) -> Result<()> {
    let well_formed = !code.is_empty()
        && code.len() <= 8
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if well_formed {
        Ok(())
    } else {
        Err(WalletError::validation(format!(
            "'currency' is not a valid currency code: {code}"
        )))
    }
}

fn account_balance(resources: &Resources, account_id: &str, currency: &str) -> i64 {
    // Individually valid amounts can sum past i64; saturate at the bounds.
    let total: i128 = resources
        .all::<Transaction>()
        .iter()
        .filter(|t| {
            t.account_id == account_id
                && t.currency == currency
                && t.status != TransactionStatus::Canceled
        })
        .map(|t| i128::from(t.balance_amount()))
        .sum();
    total.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}
