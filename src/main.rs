use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use minipay::application::ledger_account::LedgerAccount;
use minipay::application::wallet::{NewAccount, NewPaymentUri, NewTransaction, Wallet};
use minipay::domain::identifier::DEFAULT_HRP;
use minipay::domain::kyc::SampleKind;
use minipay::domain::transaction::{Transaction, TransactionStatus};
use minipay::infrastructure::ledger::{DEFAULT_DUAL_ATTESTATION_THRESHOLD, InMemoryLedger};
use minipay::infrastructure::transport::LoopbackTransport;
use minipay::interfaces::http;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(author, version, about = "Sandbox payment wallet with compliance negotiation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the wallet HTTP API, optionally with an in-process counterparty.
    Serve {
        #[arg(long, default_value_t = 8888)]
        port: u16,

        /// Wallet name; KYC samples are derived from it.
        #[arg(long, default_value = "minipay")]
        name: String,

        /// Also run a counterparty wallet on this port, sharing the sandbox
        /// ledger and transport.
        #[arg(long)]
        stub_port: Option<u16>,

        #[arg(long, default_value = "minipay-stub")]
        stub_name: String,

        /// Dual attestation threshold of the sandbox ledger.
        #[arg(long, default_value_t = DEFAULT_DUAL_ATTESTATION_THRESHOLD)]
        threshold: i64,

        /// Background sync interval in milliseconds; 0 disables the loop.
        #[arg(long, default_value_t = 100)]
        sync_interval_ms: u64,
    },
    /// Run a scripted two-wallet payment scenario and exit.
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minipay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match Cli::parse().command {
        Command::Serve {
            port,
            name,
            stub_port,
            stub_name,
            threshold,
            sync_interval_ms,
        } => {
            serve(port, name, stub_port, stub_name, threshold, sync_interval_ms).await
        }
        Command::Demo => demo().await,
    }
}

async fn serve(
    port: u16,
    name: String,
    stub_port: Option<u16>,
    stub_name: String,
    threshold: i64,
    sync_interval_ms: u64,
) -> Result<()> {
    let ledger = Arc::new(InMemoryLedger::with_threshold(threshold));
    let transport = Arc::new(LoopbackTransport::new());

    let wallet = new_wallet(&name, ledger.clone(), transport.clone()).await;
    spawn_sync_loop(wallet.clone(), sync_interval_ms);

    if let Some(stub_port) = stub_port {
        let stub = new_wallet(&stub_name, ledger, transport).await;
        spawn_sync_loop(stub.clone(), sync_interval_ms);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", stub_port))
            .await
            .into_diagnostic()?;
        info!(port = stub_port, name = %stub.name(), "counterparty wallet listening");
        let app = http::router(stub);
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(error = %err, "counterparty wallet server failed");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .into_diagnostic()?;
    info!(port, name = %wallet.name(), "wallet listening");
    axum::serve(listener, http::router(wallet))
        .await
        .into_diagnostic()?;
    Ok(())
}

fn spawn_sync_loop(wallet: Arc<Wallet>, interval_ms: u64) {
    if interval_ms == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            if let Err(err) = wallet.sync().await {
                error!(wallet = %wallet.name(), error = %err, "sync pass failed");
            }
        }
    });
}

async fn new_wallet(
    name: &str,
    ledger: Arc<InMemoryLedger>,
    transport: Arc<LoopbackTransport>,
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

/// Scripted walkthrough: deposit, internal transfer, below-threshold send and
/// a dual-attested send between two wallets.
async fn demo() -> Result<()> {
    const CURRENCY: &str = "XUS";
    const THRESHOLD: i64 = 1_000_000;

    let ledger = Arc::new(InMemoryLedger::with_threshold(THRESHOLD));
    let transport = Arc::new(LoopbackTransport::new());
    let ours = new_wallet("demo", ledger.clone(), transport.clone()).await;
    let theirs = new_wallet("demo-stub", ledger, transport).await;

    // Sender KYC must pass the receiving wallet's checks and vice versa.
    let alice = ours
        .create_account(NewAccount {
            kyc_data: Some(theirs.kyc_samples().minimum.to_json().into_diagnostic()?),
        })
        .await
        .into_diagnostic()?;
    let bob = ours
        .create_account(NewAccount {
            kyc_data: Some(ours.kyc_samples().minimum.to_json().into_diagnostic()?),
        })
        .await
        .into_diagnostic()?;
    let carol = theirs
        .create_account(NewAccount {
            kyc_data: Some(ours.kyc_samples().sample(SampleKind::Minimum).to_json().into_diagnostic()?),
        })
        .await
        .into_diagnostic()?;

    ours.create_transaction(NewTransaction {
        account_id: Some(alice.id.clone()),
        currency: Some(CURRENCY.to_string()),
        amount: Some(5_000_000),
        payee: None,
    })
    .await
    .into_diagnostic()?;
    println!("deposited 5000000 {CURRENCY} to alice");

    // Internal transfer: payee lives in the same wallet.
    let bob_uri = ours
        .create_payment_uri(NewPaymentUri {
            account_id: Some(bob.id.clone()),
        })
        .await
        .into_diagnostic()?;
    let internal = ours
        .create_transaction(NewTransaction {
            account_id: Some(alice.id.clone()),
            currency: Some(CURRENCY.to_string()),
            amount: Some(1_000),
            payee: Some(bob_uri.account_identifier),
        })
        .await
        .into_diagnostic()?;
    ours.sync().await.into_diagnostic()?;
    report(&ours, &internal.id, "internal transfer").await?;

    // External payment below the dual attestation threshold.
    let carol_uri = theirs
        .create_payment_uri(NewPaymentUri {
            account_id: Some(carol.id.clone()),
        })
        .await
        .into_diagnostic()?;
    let small = ours
        .create_transaction(NewTransaction {
            account_id: Some(alice.id.clone()),
            currency: Some(CURRENCY.to_string()),
            amount: Some(500),
            payee: Some(carol_uri.account_identifier.clone()),
        })
        .await
        .into_diagnostic()?;
    settle(&ours, &theirs, 4).await?;
    report(&ours, &small.id, "below-threshold payment").await?;

    // External payment at the threshold runs the compliance negotiation.
    let large = ours
        .create_transaction(NewTransaction {
            account_id: Some(alice.id.clone()),
            currency: Some(CURRENCY.to_string()),
            amount: Some(2_000_000),
            payee: Some(carol_uri.account_identifier),
        })
        .await
        .into_diagnostic()?;
    settle(&ours, &theirs, 8).await?;
    report(&ours, &large.id, "negotiated payment").await?;

    let alice_balance = ours.balance(&alice.id, CURRENCY).await.into_diagnostic()?;
    let carol_balance = theirs
        .balance(&carol.id, CURRENCY)
        .await
        .into_diagnostic()?;
    println!("alice balance: {alice_balance} {CURRENCY}");
    println!("carol balance: {carol_balance} {CURRENCY}");
    println!("demo complete");
    Ok(())
}

async fn settle(ours: &Arc<Wallet>, theirs: &Arc<Wallet>, rounds: usize) -> Result<()> {
    for _ in 0..rounds {
        ours.sync().await.into_diagnostic()?;
        theirs.sync().await.into_diagnostic()?;
    }
    Ok(())
}

async fn report(wallet: &Arc<Wallet>, transaction_id: &str, label: &str) -> Result<()> {
    let transaction = wallet
        .list::<Transaction>()
        .await
        .into_iter()
        .find(|t| t.id == transaction_id);
    match transaction {
        Some(Transaction {
            status: TransactionStatus::Completed,
            ..
        }) => println!("{label} completed"),
        Some(transaction) => println!("{label} is {:?}", transaction.status),
        None => println!("{label} is missing"),
    }
    Ok(())
}
