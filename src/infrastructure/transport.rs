use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::identifier::AccountAddress;
use crate::domain::negotiation::SignedTurn;
use crate::domain::ports::{Inbox, NegotiationTransport};
use crate::error::{Result, WalletError};

struct Peer {
    key: VerifyingKey,
    inbox: Arc<Inbox>,
}

/// In-process counterparty channel connecting the wallets of one sandbox.
///
/// Each wallet registers its on-chain address, verifying key and inbox; a
/// send authenticates the turn against the claimed sender's key before
/// dropping it into the recipient's inbox.
#[derive(Default)]
pub struct LoopbackTransport {
    peers: Mutex<HashMap<AccountAddress, Peer>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, address: AccountAddress, key: VerifyingKey, inbox: Arc<Inbox>) {
        self.peers.lock().await.insert(address, Peer { key, inbox });
    }
}

#[async_trait]
impl NegotiationTransport for LoopbackTransport {
    async fn send(
        &self,
        sender: &AccountAddress,
        recipient: &AccountAddress,
        turn: &SignedTurn,
    ) -> Result<()> {
        let peers = self.peers.lock().await;
        let sender_peer = peers
            .get(sender)
            .ok_or_else(|| WalletError::Transport(format!("unknown sender wallet {sender}")))?;
        turn.verify(&sender_peer.key)?;
        let recipient_peer = peers.get(recipient).ok_or_else(|| {
            WalletError::Transport(format!("no route to counterparty {recipient}"))
        })?;
        debug!(%sender, %recipient, "delivering negotiation turn");
        recipient_peer
            .inbox
            .deliver(&sender.to_hex(), &turn.to_bytes()?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::kyc::KycData;
    use crate::domain::negotiation::PaymentObject;
    use ed25519_dalek::{Signer, SigningKey};

    fn signed_turn(key: &SigningKey) -> SignedTurn {
        let object = PaymentObject::new_payment(
            "tmw1sender".to_string(),
            KycData::individual("Micro", "w"),
            "tmw1receiver".to_string(),
            10,
            "XUS",
        );
        let payload = serde_json::to_string(&object).unwrap();
        let signature = hex::encode(key.sign(payload.as_bytes()).to_bytes());
        SignedTurn { payload, signature }
    }

    #[tokio::test]
    async fn test_delivers_authenticated_turns() {
        let transport = LoopbackTransport::new();
        let sender_key = SigningKey::from_bytes(&[1u8; 32]);
        let sender = AccountAddress::new([1; 16]);
        let recipient = AccountAddress::new([2; 16]);
        let recipient_inbox = Arc::new(Inbox::new());

        transport
            .register(sender, sender_key.verifying_key(), Arc::new(Inbox::new()))
            .await;
        transport
            .register(
                recipient,
                SigningKey::from_bytes(&[2u8; 32]).verifying_key(),
                recipient_inbox.clone(),
            )
            .await;

        let turn = signed_turn(&sender_key);
        transport.send(&sender, &recipient, &turn).await.unwrap();

        let inbound = recipient_inbox.drain().await;
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].sender_address, sender.to_hex());
    }

    #[tokio::test]
    async fn test_rejects_forged_sender() {
        let transport = LoopbackTransport::new();
        let honest_key = SigningKey::from_bytes(&[1u8; 32]);
        let forger_key = SigningKey::from_bytes(&[9u8; 32]);
        let sender = AccountAddress::new([1; 16]);
        let recipient = AccountAddress::new([2; 16]);
        let recipient_inbox = Arc::new(Inbox::new());

        transport
            .register(sender, honest_key.verifying_key(), Arc::new(Inbox::new()))
            .await;
        transport
            .register(
                recipient,
                SigningKey::from_bytes(&[2u8; 32]).verifying_key(),
                recipient_inbox.clone(),
            )
            .await;

        // Turn signed with the wrong key must not reach the recipient.
        let turn = signed_turn(&forger_key);
        let err = transport.send(&sender, &recipient, &turn).await.unwrap_err();
        assert!(err.to_string().contains("signature"));
        assert!(recipient_inbox.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_an_error() {
        let transport = LoopbackTransport::new();
        let sender_key = SigningKey::from_bytes(&[1u8; 32]);
        let sender = AccountAddress::new([1; 16]);
        transport
            .register(sender, sender_key.verifying_key(), Arc::new(Inbox::new()))
            .await;

        let turn = signed_turn(&sender_key);
        let err = transport
            .send(&sender, &AccountAddress::new([7; 16]), &turn)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no route"));
    }
}
