#![allow(dead_code)]

use std::sync::Arc;

use minipay::application::ledger_account::LedgerAccount;
use minipay::application::wallet::{NewAccount, NewPaymentUri, NewTransaction, Wallet};
use minipay::domain::account::Account;
use minipay::domain::identifier::DEFAULT_HRP;
use minipay::domain::kyc::SampleKind;
use minipay::domain::negotiation::{ExchangeState, NegotiationRecord};
use minipay::domain::transaction::Transaction;
use minipay::infrastructure::ledger::InMemoryLedger;
use minipay::infrastructure::transport::LoopbackTransport;

pub const CURRENCY: &str = "XUS";
pub const THRESHOLD: i64 = 1_000_000;

/// Two wallets wired to one sandbox ledger and loopback transport, mirroring
/// the app-plus-counterparty setup the server runs.
pub struct Sandbox {
    pub ledger: Arc<InMemoryLedger>,
    pub app: Arc<Wallet>,
    pub stub: Arc<Wallet>,
}

impl Sandbox {
    pub async fn start() -> Self {
        let ledger = Arc::new(InMemoryLedger::with_threshold(THRESHOLD));
        let transport = Arc::new(LoopbackTransport::new());
        let app = register(&transport, "app", ledger.clone()).await;
        let stub = register(&transport, "stub", ledger.clone()).await;
        Self { ledger, app, stub }
    }

    /// Alternates sync passes on both wallets.
    pub async fn settle(&self, rounds: usize) {
        for _ in 0..rounds {
            self.app.sync().await.unwrap();
            self.stub.sync().await.unwrap();
        }
    }
}

async fn register(
    transport: &Arc<LoopbackTransport>,
    name: &str,
    ledger: Arc<InMemoryLedger>,
) -> Arc<Wallet> {
    let wallet = Arc::new(Wallet::new(
        name,
        LedgerAccount::generate(DEFAULT_HRP),
        ledger,
        transport.clone(),
    ));
    transport
        .register(
            *wallet.ledger_account().address(),
            wallet.ledger_account().verifying_key(),
            wallet.inbox(),
        )
        .await;
    wallet
}

/// KYC data that will earn the given verdict from `judge`, made unique so it
/// can never collide with the judge's other samples.
pub fn kyc_judged_as(judge: &Wallet, kind: SampleKind) -> String {
    let mut data = judge.kyc_samples().sample(kind).clone();
    data.legal_entity_name = Some(format!("entity-{}", rand::random::<u64>()));
    data.to_json().unwrap()
}

pub async fn funded_account(wallet: &Wallet, kyc_data: String, amount: i64) -> Account {
    let account = wallet
        .create_account(NewAccount {
            kyc_data: Some(kyc_data),
        })
        .await
        .unwrap();
    wallet
        .create_transaction(NewTransaction {
            account_id: Some(account.id.clone()),
            currency: Some(CURRENCY.to_string()),
            amount: Some(amount),
            payee: None,
        })
        .await
        .unwrap();
    account
}

pub async fn receive_identifier(wallet: &Wallet, account_id: &str) -> String {
    wallet
        .create_payment_uri(NewPaymentUri {
            account_id: Some(account_id.to_string()),
        })
        .await
        .unwrap()
        .account_identifier
}

pub async fn send_payment(
    wallet: &Wallet,
    account_id: &str,
    amount: i64,
    payee: String,
) -> Transaction {
    wallet
        .create_transaction(NewTransaction {
            account_id: Some(account_id.to_string()),
            currency: Some(CURRENCY.to_string()),
            amount: Some(amount),
            payee: Some(payee),
        })
        .await
        .unwrap()
}

pub async fn transaction(wallet: &Wallet, transaction_id: &str) -> Transaction {
    wallet
        .list::<Transaction>()
        .await
        .into_iter()
        .find(|t| t.id == transaction_id)
        .unwrap()
}

pub async fn balance(wallet: &Wallet, account_id: &str) -> i64 {
    wallet.balance(account_id, CURRENCY).await.unwrap()
}

/// Exchange states in turn order, as one wallet recorded them.
pub async fn negotiation_states(wallet: &Wallet) -> Vec<ExchangeState> {
    wallet
        .list::<NegotiationRecord>()
        .await
        .iter()
        .map(|record| record.payment_object().unwrap().state().unwrap())
        .collect()
}
