use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::kyc::KycData;
use crate::error::{Result, WalletError};

pub const ABORT_CODE_REJECTED: &str = "rejected";

/// One stored turn of a compliance data exchange.
///
/// Every turn is appended as a fresh record; the newest record per reference
/// id is the current view of the exchange and older ones stay as an audit
/// trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRecord {
    pub id: String,
    pub account_id: String,
    pub reference_id: String,
    /// JSON-encoded `PaymentObject` as seen at this turn.
    pub request_json: String,
}

impl NegotiationRecord {
    pub fn payment_object(&self) -> Result<PaymentObject> {
        serde_json::from_str(&self.request_json).map_err(|err| {
            WalletError::Protocol(format!(
                "stored negotiation turn {} is not decodable: {err}",
                self.id
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    #[default]
    None,
    NeedsKycData,
    ReadyForSettlement,
    SoftMatch,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusObject {
    pub status: ActorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_message: Option<String>,
}

/// One side of the exchange: the payer (sender) or the payee (receiver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentActor {
    /// Bech32 account identifier, sub-address included.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kyc_data: Option<KycData>,
    pub status: StatusObject,
    /// Extra evidence supplied to clear a soft match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_kyc_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAction {
    pub amount: i64,
    pub currency: String,
}

/// The full negotiated payment, re-sent in whole on every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentObject {
    pub reference_id: String,
    pub sender: PaymentActor,
    pub receiver: PaymentActor,
    pub action: PaymentAction,
    /// Travel rule signature produced by the receiver when it becomes ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn opposite(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

/// Exchange state derived from the two actor statuses.
///
/// There is no stored state machine; whatever the latest turn says the actors
/// are, that is the state. Undecodable combinations are protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Sender opened the exchange with its KYC data.
    SenderInit,
    /// Receiver accepted the sender's data and went ready.
    ReceiverReady,
    /// Receiver soft-matched the sender's data.
    ReceiverSoftMatch,
    /// Sender supplied additional evidence for its soft match.
    SenderSoftCleared,
    /// Sender soft-matched the receiver's data.
    SenderSoftMatch,
    /// Receiver supplied additional evidence for its soft match.
    ReceiverSoftCleared,
    /// Both sides ready; the payment can be settled on chain.
    Ready,
    SenderAborted,
    ReceiverAborted,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeState::SenderAborted | ExchangeState::ReceiverAborted
        )
    }
}

/// What a wallet has to do next for an exchange, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpAction {
    EvaluateKycData,
    ClearSoftMatch,
    ReviewKycData,
    SubmitTransaction,
}

impl PaymentObject {
    /// Opens a new exchange with a fresh reference id. The sender shares its
    /// KYC data immediately; the receiver starts blank.
    pub fn new_payment(
        sender_identifier: String,
        sender_kyc: KycData,
        receiver_identifier: String,
        amount: i64,
        currency: &str,
    ) -> Self {
        Self {
            reference_id: Uuid::new_v4().to_string(),
            sender: PaymentActor {
                address: sender_identifier,
                kyc_data: Some(sender_kyc),
                status: StatusObject {
                    status: ActorStatus::NeedsKycData,
                    ..StatusObject::default()
                },
                additional_kyc_data: None,
            },
            receiver: PaymentActor {
                address: receiver_identifier,
                kyc_data: None,
                status: StatusObject::default(),
                additional_kyc_data: None,
            },
            action: PaymentAction {
                amount,
                currency: currency.to_string(),
            },
            recipient_signature: None,
        }
    }

    pub fn actor(&self, role: Role) -> &PaymentActor {
        match role {
            Role::Sender => &self.sender,
            Role::Receiver => &self.receiver,
        }
    }

    pub fn counterparty(&self, role: Role) -> &PaymentActor {
        self.actor(role.opposite())
    }

    fn actor_mut(&mut self, role: Role) -> &mut PaymentActor {
        match role {
            Role::Sender => &mut self.sender,
            Role::Receiver => &mut self.receiver,
        }
    }

    /// Which side of this exchange the wallet at `owner` plays.
    pub fn role_of(
        &self,
        hrp: &str,
        owner: &crate::domain::identifier::AccountAddress,
    ) -> Result<Role> {
        use crate::domain::identifier::decode_account;

        let (sender_address, _) = decode_account(hrp, &self.sender.address)
            .map_err(|err| WalletError::Protocol(err.to_string()))?;
        if sender_address == *owner {
            return Ok(Role::Sender);
        }
        let (receiver_address, _) = decode_account(hrp, &self.receiver.address)
            .map_err(|err| WalletError::Protocol(err.to_string()))?;
        if receiver_address == *owner {
            return Ok(Role::Receiver);
        }
        Err(WalletError::Protocol(format!(
            "neither actor of exchange {} belongs to this wallet",
            self.reference_id
        )))
    }

    pub fn state(&self) -> Result<ExchangeState> {
        use ActorStatus as S;

        let state = match (self.sender.status.status, self.receiver.status.status) {
            (S::Abort, _) => ExchangeState::SenderAborted,
            (_, S::Abort) => ExchangeState::ReceiverAborted,
            (S::NeedsKycData, S::None) => ExchangeState::SenderInit,
            (S::NeedsKycData, S::ReadyForSettlement) => ExchangeState::ReceiverReady,
            (S::NeedsKycData, S::SoftMatch) => {
                if self.sender.additional_kyc_data.is_some() {
                    ExchangeState::SenderSoftCleared
                } else {
                    ExchangeState::ReceiverSoftMatch
                }
            }
            (S::SoftMatch, S::ReadyForSettlement) => {
                if self.receiver.additional_kyc_data.is_some() {
                    ExchangeState::ReceiverSoftCleared
                } else {
                    ExchangeState::SenderSoftMatch
                }
            }
            (S::ReadyForSettlement, S::ReadyForSettlement) => ExchangeState::Ready,
            (sender, receiver) => {
                return Err(WalletError::Protocol(format!(
                    "exchange {}: invalid actor status combination {sender:?}/{receiver:?}",
                    self.reference_id
                )));
            }
        };
        Ok(state)
    }

    /// The action owed by `role`, or `None` when it is the counterparty's turn
    /// or the exchange is over.
    pub fn follow_up(&self, role: Role) -> Result<Option<FollowUpAction>> {
        let (owner, action) = match self.state()? {
            ExchangeState::SenderInit => (Role::Receiver, FollowUpAction::EvaluateKycData),
            ExchangeState::ReceiverReady => (Role::Sender, FollowUpAction::EvaluateKycData),
            ExchangeState::ReceiverSoftMatch => (Role::Sender, FollowUpAction::ClearSoftMatch),
            ExchangeState::SenderSoftMatch => (Role::Receiver, FollowUpAction::ClearSoftMatch),
            ExchangeState::SenderSoftCleared => (Role::Receiver, FollowUpAction::ReviewKycData),
            ExchangeState::ReceiverSoftCleared => (Role::Sender, FollowUpAction::ReviewKycData),
            ExchangeState::Ready => (Role::Sender, FollowUpAction::SubmitTransaction),
            ExchangeState::SenderAborted | ExchangeState::ReceiverAborted => return Ok(None),
        };
        Ok((owner == role).then_some(action))
    }

    pub fn is_aborted(&self) -> bool {
        self.sender.status.status == ActorStatus::Abort
            || self.receiver.status.status == ActorStatus::Abort
    }

    pub fn abort_message(&self) -> Option<&str> {
        for actor in [&self.sender, &self.receiver] {
            if actor.status.status == ActorStatus::Abort {
                return actor.status.abort_message.as_deref();
            }
        }
        None
    }

    // Turn builders. Each clones the object and rewrites only this wallet's
    // actor, which is all `validate_transition` lets a turn change.

    pub fn abort_turn(&self, role: Role, message: &str) -> Self {
        let mut next = self.clone();
        next.actor_mut(role).status = StatusObject {
            status: ActorStatus::Abort,
            abort_code: Some(ABORT_CODE_REJECTED.to_string()),
            abort_message: Some(message.to_string()),
        };
        next
    }

    pub fn soft_match_turn(&self, role: Role) -> Self {
        let mut next = self.clone();
        next.actor_mut(role).status = StatusObject {
            status: ActorStatus::SoftMatch,
            ..StatusObject::default()
        };
        next
    }

    pub fn clear_soft_match_turn(&self, role: Role, additional_kyc_data: String) -> Self {
        let mut next = self.clone();
        next.actor_mut(role).additional_kyc_data = Some(additional_kyc_data);
        next
    }

    pub fn sender_ready_turn(&self) -> Self {
        let mut next = self.clone();
        next.sender.status = StatusObject {
            status: ActorStatus::ReadyForSettlement,
            ..StatusObject::default()
        };
        next
    }

    pub fn receiver_ready_turn(&self, kyc_data: KycData, recipient_signature: String) -> Self {
        let mut next = self.clone();
        next.receiver.kyc_data = Some(kyc_data);
        next.receiver.status = StatusObject {
            status: ActorStatus::ReadyForSettlement,
            ..StatusObject::default()
        };
        next.recipient_signature = Some(recipient_signature);
        next
    }

    /// Bytes covered by the receiver's travel rule signature.
    pub fn travel_rule_signature_message(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}",
            self.reference_id, self.sender.address, self.action.amount
        )
        .into_bytes()
    }

    /// Checks that an inbound turn is a legal successor of the stored one.
    ///
    /// Immutable parts must be untouched and the counterparty may only rewrite
    /// its own actor. A terminal exchange accepts no successor at all.
    pub fn validate_transition(&self, previous: &PaymentObject, my_role: Role) -> Result<()> {
        if self.reference_id != previous.reference_id {
            return Err(self.violation("reference id changed"));
        }
        if self.action != previous.action {
            return Err(self.violation("payment action is immutable"));
        }
        if self.sender.address != previous.sender.address
            || self.receiver.address != previous.receiver.address
        {
            return Err(self.violation("actor addresses are immutable"));
        }
        if self.actor(my_role) != previous.actor(my_role) {
            return Err(self.violation("counterparty modified this wallet's actor"));
        }
        if my_role == Role::Receiver && self.recipient_signature != previous.recipient_signature {
            return Err(self.violation("counterparty modified the recipient signature"));
        }
        if previous.state()?.is_terminal() {
            return Err(self.violation("exchange is already terminal"));
        }
        self.state()?;
        Ok(())
    }

    fn violation(&self, detail: &str) -> WalletError {
        WalletError::Protocol(format!("exchange {}: {detail}", self.reference_id))
    }
}

/// Wire envelope of one turn: the serialized payment object plus the sending
/// wallet's signature over those exact bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTurn {
    pub payload: String,
    /// Hex-encoded ed25519 signature over `payload`.
    pub signature: String,
}

impl SignedTurn {
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|err| WalletError::Protocol(format!("invalid turn envelope: {err}")))
    }

    pub fn object(&self) -> Result<PaymentObject> {
        serde_json::from_str(&self.payload)
            .map_err(|err| WalletError::Protocol(format!("invalid turn payload: {err}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        let raw = hex::decode(&self.signature)
            .map_err(|_| WalletError::Transport("turn signature is not valid hex".to_string()))?;
        let signature = Signature::from_slice(&raw)
            .map_err(|_| WalletError::Transport("turn signature is malformed".to_string()))?;
        key.verify_strict(self.payload.as_bytes(), &signature)
            .map_err(|_| WalletError::Transport("turn signature verification failed".to_string()))
    }
}
