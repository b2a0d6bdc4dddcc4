//! Shared wiring for the integration tests: the real application stack on
//! top of the in-memory mocks.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use wallet_jobs::api::create_router;
use wallet_jobs::app::{
    AppState, ChainClients, JobProcessor, JobService, MultiSigCoordinator, Notifiers,
    ProcessorConfig, RetryPolicy, TaskConfig, TaskRunner, TransactionSender,
};
use wallet_jobs::domain::{Address, Network, TransactionSigner, UserWallet, WalletModules};
use wallet_jobs::infra::LocalSigner;
use wallet_jobs::infra::observability::detached_metrics_handle;
use wallet_jobs::test_utils::{
    MockBlockchainClient, MockJobRepository, MockNotifier, MockWalletRepository,
};

pub const API_KEY: &str = "integration-key";
pub const FACTORY: Address = Address([0xfa; 20]);
pub const MULTISIG: Address = Address([0x5e; 20]);
pub const OWNERSHIP_MODULE: Address = Address([0x0e; 20]);
pub const OWNER: Address = Address([0x11; 20]);

pub struct Harness {
    pub router: Router,
    pub processor: JobProcessor,
    pub home: Arc<MockBlockchainClient>,
    pub foreign: Arc<MockBlockchainClient>,
    pub jobs: Arc<MockJobRepository>,
    pub wallets: Arc<MockWalletRepository>,
    pub notifier: Arc<MockNotifier>,
}

pub fn harness() -> Harness {
    let home = Arc::new(MockBlockchainClient::new(Network::Home));
    let foreign = Arc::new(MockBlockchainClient::new(Network::Foreign));
    let jobs = Arc::new(MockJobRepository::new());
    let wallets = Arc::new(MockWalletRepository::new());
    let notifier = Arc::new(MockNotifier::new());
    let chains = ChainClients::new(home.clone(), foreign.clone());

    let cosigners: Vec<Arc<dyn TransactionSigner>> = vec![
        Arc::new(LocalSigner::random()),
        Arc::new(LocalSigner::random()),
        Arc::new(LocalSigner::random()),
    ];
    let tasks = Arc::new(TaskRunner::new(
        TransactionSender::new(chains.clone(), Duration::from_secs(1)),
        MultiSigCoordinator::new(cosigners, 2).expect("valid threshold"),
        jobs.clone(),
        wallets.clone(),
        Notifiers {
            deep_links: notifier.clone(),
            sms: notifier.clone(),
            subscriber: notifier.clone(),
        },
        TaskConfig {
            wallet_factory: FACTORY,
            multisig_wallet: MULTISIG,
            wallet_modules: WalletModules::new()
                .with_module("WalletOwnershipManager", OWNERSHIP_MODULE),
            ..TaskConfig::default()
        },
    ));
    let processor = JobProcessor::new(
        tasks,
        jobs.clone(),
        ProcessorConfig {
            concurrency: 2,
            lease: Duration::from_secs(60),
            retry: RetryPolicy {
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(60),
            },
        },
    );

    let service = Arc::new(JobService::new(jobs.clone(), chains, 3));
    let state = Arc::new(AppState::new(
        service,
        SecretString::from(API_KEY),
        detached_metrics_handle(),
    ));

    Harness {
        router: create_router(state),
        processor,
        home,
        foreign,
        jobs,
        wallets,
        notifier,
    }
}

pub fn user_wallet(phone: Option<&str>) -> UserWallet {
    UserWallet {
        id: "uw-1".to_string(),
        account_address: OWNER,
        wallet_address: None,
        phone_number: phone.map(str::to_string),
        salt: None,
        networks: vec!["fuse".to_string()],
        wallet_modules: WalletModules::new(),
        is_contract_deployed: false,
        wallet_owner_original_address: None,
        wallet_factory_original_address: None,
        wallet_modules_original: None,
    }
}

impl Harness {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).expect("valid request"))
            .await
    }

    pub async fn post(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-api-key", API_KEY)
                .body(Body::from(body.to_string()))
                .expect("valid request"),
        )
        .await
    }
}

pub async fn json_body<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("readable body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}
