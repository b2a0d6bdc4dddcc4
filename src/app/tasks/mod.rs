//! Job handlers.
//!
//! Every handler is resumable: settled steps are recorded in the job's data
//! blob and skipped when the job runs again after a failure.

mod create_foreign_wallet;
mod create_wallet;
mod fund_token;
mod set_wallet_owner;

use std::sync::Arc;

use tracing::instrument;

use super::context::JobContext;
use super::multisig::MultiSigCoordinator;
use super::sender::TransactionSender;
use crate::domain::{
    Address, AppError, DeepLinkProvider, JobError, JobName, JobRepository, SmsProvider,
    TransactionReceipt, U256, WalletModules, WalletRepository, WalletSubscriber,
};

/// Contract addresses and settings the handlers need.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Home-chain `WalletFactory`
    pub wallet_factory: Address,
    /// Home-chain relayer `MultiSigWallet`
    pub multisig_wallet: Address,
    /// Modules installed on new wallets unless the job names its own
    pub wallet_modules: WalletModules,
    /// Appended to a wallet's networks once it exists on the foreign chain
    pub foreign_network_name: String,
    pub gas_limit_create_foreign_wallet: u64,
    /// Invite SMS text used when the job carries no personal message
    pub invite_text: String,
    /// Attempts granted to spawned sub-jobs
    pub sub_job_max_attempts: i32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            wallet_factory: Address::ZERO,
            multisig_wallet: Address::ZERO,
            wallet_modules: WalletModules::new(),
            foreign_network_name: "ropsten".to_string(),
            gas_limit_create_foreign_wallet: 700_000,
            invite_text: "You were invited to join a community wallet.".to_string(),
            sub_job_max_attempts: 5,
        }
    }
}

/// HTTP collaborators told about new wallets.
#[derive(Clone)]
pub struct Notifiers {
    pub deep_links: Arc<dyn DeepLinkProvider>,
    pub sms: Arc<dyn SmsProvider>,
    pub subscriber: Arc<dyn WalletSubscriber>,
}

/// Runs a claimed job to completion or to its first error.
pub struct TaskRunner {
    sender: TransactionSender,
    multisig: MultiSigCoordinator,
    jobs: Arc<dyn JobRepository>,
    wallets: Arc<dyn WalletRepository>,
    notifiers: Notifiers,
    config: TaskConfig,
}

impl TaskRunner {
    pub fn new(
        sender: TransactionSender,
        multisig: MultiSigCoordinator,
        jobs: Arc<dyn JobRepository>,
        wallets: Arc<dyn WalletRepository>,
        notifiers: Notifiers,
        config: TaskConfig,
    ) -> Self {
        Self {
            sender,
            multisig,
            jobs,
            wallets,
            notifiers,
            config,
        }
    }

    #[must_use]
    pub fn sender(&self) -> &TransactionSender {
        &self.sender
    }

    /// Dispatch on the job name. Returns the receipt of the job's main
    /// transaction, or `None` when the job settled without one.
    #[instrument(skip(self, ctx), fields(job_id = %ctx.id(), job = %ctx.name()))]
    pub async fn run(&self, ctx: &mut JobContext) -> Result<Option<TransactionReceipt>, AppError> {
        match ctx.name() {
            JobName::CreateWallet => self.create_wallet(ctx).await,
            JobName::SetWalletOwner => self.set_wallet_owner(ctx).await.map(Some),
            JobName::CreateForeignWallet => self.create_foreign_wallet(ctx).await.map(Some),
            JobName::FundToken => self.fund_token(ctx).await,
        }
    }
}

pub(crate) fn parse_salt(job: JobName, salt: &str) -> Result<U256, AppError> {
    salt.parse().map_err(|e| {
        AppError::Job(JobError::InvalidParams {
            job: job.to_string(),
            message: format!("salt '{salt}': {e}"),
        })
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixture wiring a `TaskRunner` to in-memory collaborators.

    use std::time::Duration;

    use super::*;
    use crate::app::sender::ChainClients;
    use crate::domain::{Network, NewJob, TransactionSigner};
    use crate::infra::blockchain::LocalSigner;
    use crate::test_utils::{
        MockBlockchainClient, MockJobRepository, MockNotifier, MockWalletRepository,
    };

    pub const FACTORY: Address = Address([0xfa; 20]);
    pub const MULTISIG: Address = Address([0x5e; 20]);
    pub const OWNERSHIP_MODULE: Address = Address([0x0e; 20]);
    pub const TRANSFER_MODULE: Address = Address([0x0f; 20]);

    pub struct Fixture {
        pub runner: Arc<TaskRunner>,
        pub home: Arc<MockBlockchainClient>,
        pub foreign: Arc<MockBlockchainClient>,
        pub jobs: Arc<MockJobRepository>,
        pub wallets: Arc<MockWalletRepository>,
        pub notifier: Arc<MockNotifier>,
    }

    impl Fixture {
        pub async fn context(&self, name: JobName, data: serde_json::Value) -> JobContext {
            let job = self.jobs.enqueue(&NewJob::new(name, data, 3)).await.unwrap();
            JobContext::new(job, self.jobs.clone())
        }
    }

    pub fn fixture() -> Fixture {
        fixture_with_jobs(Arc::new(MockJobRepository::new()))
    }

    pub fn fixture_with_jobs(jobs: Arc<MockJobRepository>) -> Fixture {
        let home = Arc::new(MockBlockchainClient::new(Network::Home));
        let foreign = Arc::new(MockBlockchainClient::new(Network::Foreign));
        let wallets = Arc::new(MockWalletRepository::new());
        let notifier = Arc::new(MockNotifier::new());

        let signers: Vec<Arc<dyn TransactionSigner>> = vec![
            Arc::new(LocalSigner::random()),
            Arc::new(LocalSigner::random()),
        ];
        let runner = Arc::new(TaskRunner::new(
            TransactionSender::new(
                ChainClients::new(home.clone(), foreign.clone()),
                Duration::from_secs(1),
            ),
            MultiSigCoordinator::new(signers, 2).unwrap(),
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
                    .with_module("WalletOwnershipManager", OWNERSHIP_MODULE)
                    .with_module("TransferManager", TRANSFER_MODULE),
                invite_text: "Join us".to_string(),
                ..TaskConfig::default()
            },
        ));

        Fixture {
            runner,
            home,
            foreign,
            jobs,
            wallets,
            notifier,
        }
    }
}
