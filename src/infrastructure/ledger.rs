use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::identifier::AccountAddress;
use crate::domain::ports::{
    FinalityStatus, GeneralMetadata, LedgerClient, PaymentEvent, SubmitRequest, TravelRuleMetadata,
};
use crate::error::{Result, WalletError};

pub const DEFAULT_DUAL_ATTESTATION_THRESHOLD: i64 = 1_000_000_000;

/// Sandbox chain shared by every wallet of one process.
///
/// Submissions are parked as pending and commit the first time their finality
/// is polled, which gives the driver a real submit-then-wait round trip
/// without a network. Tests can script the next finality outcome to exercise
/// the failure paths.
pub struct InMemoryLedger {
    threshold: i64,
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    next_handle: u64,
    next_version: u64,
    pending: HashMap<String, SubmitRequest>,
    /// Versions of already committed handles, so re-polling stays idempotent.
    committed: HashMap<String, u64>,
    events: Vec<PaymentEvent>,
    scripted: VecDeque<FinalityStatus>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_DUAL_ATTESTATION_THRESHOLD)
    }

    pub fn with_threshold(threshold: i64) -> Self {
        Self {
            threshold,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Queues the outcome returned by the next `wait_for_finality` call,
    /// instead of committing the submission.
    pub async fn script_finality(&self, status: FinalityStatus) {
        self.state.lock().await.scripted.push_back(status);
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit(&self, request: SubmitRequest) -> Result<String> {
        let mut state = self.state.lock().await;
        state.next_handle += 1;
        let handle = format!("{:016x}", state.next_handle);
        debug!(%handle, amount = request.amount, "submission accepted");
        state.pending.insert(handle.clone(), request);
        Ok(handle)
    }

    async fn wait_for_finality(&self, handle: &str) -> Result<FinalityStatus> {
        let mut state = self.state.lock().await;
        if let Some(status) = state.scripted.pop_front() {
            // A dead or superseded submission leaves the pending map with it;
            // only a timeout stays in flight.
            match status {
                FinalityStatus::HashMismatch
                | FinalityStatus::Expired { .. }
                | FinalityStatus::ExecutionFailure { .. } => {
                    state.pending.remove(handle);
                }
                FinalityStatus::Committed { .. } | FinalityStatus::Timeout => {}
            }
            return Ok(status);
        }
        if let Some(version) = state.committed.get(handle) {
            return Ok(FinalityStatus::Committed { version: *version });
        }
        let Some(request) = state.pending.remove(handle) else {
            return Err(WalletError::Ledger(format!(
                "unknown submission handle {handle}"
            )));
        };

        state.next_version += 1;
        let version = state.next_version;
        state.committed.insert(handle.to_string(), version);
        let (to_subaddress, reference_id) = decode_metadata(&request.metadata);
        state.events.push(PaymentEvent {
            version,
            currency: request.currency,
            amount: request.amount,
            to_address: request.payee_address,
            to_subaddress,
            reference_id,
        });
        debug!(%handle, version, "submission committed");
        Ok(FinalityStatus::Committed { version })
    }

    async fn dual_attestation_threshold(&self, _currency: &str) -> Result<i64> {
        Ok(self.threshold)
    }

    async fn payment_events(
        &self,
        address: &AccountAddress,
        after_version: u64,
    ) -> Result<Vec<PaymentEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.to_address == *address && event.version > after_version)
            .cloned()
            .collect())
    }
}

/// Routing hints carried in the payment metadata. Unknown shapes yield no
/// hints, which the receiving wallet reports as an unmatched event.
fn decode_metadata(metadata: &[u8]) -> (Option<String>, Option<String>) {
    if let Ok(general) = serde_json::from_slice::<GeneralMetadata>(metadata) {
        return (general.to_subaddress, None);
    }
    if let Ok(travel) = serde_json::from_slice::<TravelRuleMetadata>(metadata) {
        return (None, Some(travel.reference_id));
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: i64, payee: AccountAddress) -> SubmitRequest {
        let metadata = GeneralMetadata {
            from_subaddress: "0000000000000001".to_string(),
            to_subaddress: Some("0000000000000002".to_string()),
        };
        SubmitRequest {
            currency: "XUS".to_string(),
            amount,
            payee_address: payee,
            metadata: serde_json::to_vec(&metadata).unwrap(),
            metadata_signature: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_submission_commits_on_first_wait() {
        let ledger = InMemoryLedger::new();
        let payee = AccountAddress::new([1; 16]);
        let handle = ledger.submit(request(50, payee)).await.unwrap();

        let status = ledger.wait_for_finality(&handle).await.unwrap();
        assert_eq!(status, FinalityStatus::Committed { version: 1 });
        // Re-polling the same handle reports the same version.
        let again = ledger.wait_for_finality(&handle).await.unwrap();
        assert_eq!(again, FinalityStatus::Committed { version: 1 });

        let events = ledger.payment_events(&payee, 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, 50);
        assert_eq!(
            events[0].to_subaddress.as_deref(),
            Some("0000000000000002")
        );
        assert_eq!(events[0].reference_id, None);
    }

    #[tokio::test]
    async fn test_travel_rule_metadata_yields_reference_id() {
        let ledger = InMemoryLedger::new();
        let payee = AccountAddress::new([2; 16]);
        let mut request = request(2_000_000_000, payee);
        request.metadata = serde_json::to_vec(&TravelRuleMetadata {
            reference_id: "ref-1".to_string(),
        })
        .unwrap();

        let handle = ledger.submit(request).await.unwrap();
        ledger.wait_for_finality(&handle).await.unwrap();

        let events = ledger.payment_events(&payee, 0).await.unwrap();
        assert_eq!(events[0].reference_id.as_deref(), Some("ref-1"));
        assert_eq!(events[0].to_subaddress, None);
    }

    #[tokio::test]
    async fn test_scripted_outcome_consumed_once() {
        let ledger = InMemoryLedger::new();
        let payee = AccountAddress::new([3; 16]);
        let handle = ledger.submit(request(50, payee)).await.unwrap();

        ledger.script_finality(FinalityStatus::Timeout).await;
        assert_eq!(
            ledger.wait_for_finality(&handle).await.unwrap(),
            FinalityStatus::Timeout
        );
        // Script exhausted, the pending submission now commits.
        assert_eq!(
            ledger.wait_for_finality(&handle).await.unwrap(),
            FinalityStatus::Committed { version: 1 }
        );
    }

    #[tokio::test]
    async fn test_events_filtered_by_address_and_cursor() {
        let ledger = InMemoryLedger::new();
        let first = AccountAddress::new([4; 16]);
        let second = AccountAddress::new([5; 16]);
        for payee in [first, second, first] {
            let handle = ledger.submit(request(10, payee)).await.unwrap();
            ledger.wait_for_finality(&handle).await.unwrap();
        }

        let events = ledger.payment_events(&first, 0).await.unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 3]);

        let later = ledger.payment_events(&first, 1).await.unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].version, 3);
    }

    #[tokio::test]
    async fn test_failed_submission_is_retired() {
        let ledger = InMemoryLedger::new();
        let payee = AccountAddress::new([6; 16]);
        let handle = ledger.submit(request(50, payee)).await.unwrap();

        ledger
            .script_finality(FinalityStatus::ExecutionFailure {
                reason: "out of gas".to_string(),
            })
            .await;
        let status = ledger.wait_for_finality(&handle).await.unwrap();
        assert!(matches!(status, FinalityStatus::ExecutionFailure { .. }));

        // The failed submission must not commit on a later poll.
        assert!(ledger.wait_for_finality(&handle).await.is_err());
        assert!(ledger.payment_events(&payee, 0).await.unwrap().is_empty());
        assert!(ledger.state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_hash_mismatch_retires_the_superseded_handle() {
        let ledger = InMemoryLedger::new();
        let payee = AccountAddress::new([7; 16]);
        let first = ledger.submit(request(50, payee)).await.unwrap();

        ledger.script_finality(FinalityStatus::HashMismatch).await;
        assert_eq!(
            ledger.wait_for_finality(&first).await.unwrap(),
            FinalityStatus::HashMismatch
        );

        // Only the resubmission can commit; the old handle is unknown.
        let second = ledger.submit(request(50, payee)).await.unwrap();
        assert_ne!(first, second);
        assert!(ledger.wait_for_finality(&first).await.is_err());
        assert_eq!(
            ledger.wait_for_finality(&second).await.unwrap(),
            FinalityStatus::Committed { version: 1 }
        );
        assert_eq!(ledger.payment_events(&payee, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_an_error() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.wait_for_finality("ffff").await.is_err());
    }

    #[tokio::test]
    async fn test_threshold_is_configurable() {
        let ledger = InMemoryLedger::with_threshold(1_000);
        assert_eq!(
            ledger.dual_attestation_threshold("XUS").await.unwrap(),
            1_000
        );
    }
}
