use tracing::{debug, info};

use super::{TaskRunner, parse_salt};
use crate::app::context::JobContext;
use crate::domain::contracts::wallet_factory;
use crate::domain::{
    Address, AppError, CreateForeignWalletParams, JobError, JobName, Network, TransactionReceipt,
    TransactionRequest,
};

const STEP: &str = "createForeignWallet";

fn missing(field: &str) -> AppError {
    AppError::Job(JobError::InvalidParams {
        job: JobName::CreateForeignWallet.to_string(),
        message: format!("userWallet.{field} is required"),
    })
}

impl TaskRunner {
    /// Replicate a home wallet on the foreign chain at the same
    /// counterfactual address.
    pub(super) async fn create_foreign_wallet(
        &self,
        ctx: &mut JobContext,
    ) -> Result<TransactionReceipt, AppError> {
        let params: CreateForeignWalletParams = ctx.params()?;
        let user_wallet = &params.user_wallet;
        let factory = user_wallet
            .wallet_factory_original_address
            .ok_or_else(|| missing("walletFactoryOriginalAddress"))?;

        let receipt = match self.sender.checkpointed_receipt(ctx, STEP).await? {
            Some(receipt) => {
                debug!("Resuming foreign wallet deployment");
                receipt
            }
            None => {
                let wallet_address = user_wallet
                    .wallet_address
                    .ok_or_else(|| missing("walletAddress"))?;
                let owner = user_wallet
                    .wallet_owner_original_address
                    .ok_or_else(|| missing("walletOwnerOriginalAddress"))?;
                let modules = user_wallet
                    .wallet_modules_original
                    .as_ref()
                    .ok_or_else(|| missing("walletModulesOriginal"))?
                    .addresses();
                let salt = parse_salt(
                    JobName::CreateForeignWallet,
                    user_wallet.salt.as_deref().ok_or_else(|| missing("salt"))?,
                )?;

                let foreign = &self.sender.chains().foreign;
                if !foreign.get_code(&wallet_address).await?.is_empty() {
                    return Err(AppError::Job(JobError::PreconditionFailed(format!(
                        "Contract already exists for wallet {wallet_address} on foreign"
                    ))));
                }

                let data = wallet_factory::create_counterfactual_wallet(
                    owner,
                    &modules,
                    &params.ens,
                    salt,
                );
                let request = TransactionRequest::call(factory, data)
                    .with_gas_limit(self.config.gas_limit_create_foreign_wallet);
                self.sender
                    .send(ctx, STEP, Network::Foreign, &request)
                    .await?
            }
        };

        let wallet = wallet_factory::created_wallet(&receipt, factory)?;
        info!(wallet = %wallet, "Created wallet contract on foreign");

        let mut networks = user_wallet.networks.clone();
        if !networks.contains(&self.config.foreign_network_name) {
            networks.push(self.config.foreign_network_name.clone());
        }
        self.wallets.mark_contract_deployed(&wallet, &networks).await?;

        self.notifiers
            .subscriber
            .subscribe_wallet(&wallet, Network::Foreign, None)
            .await?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FACTORY, OWNERSHIP_MODULE, fixture};
    use super::*;
    use crate::domain::{BlockchainClient, JobRepository, U256, UserWallet, WalletModules};
    use serde_json::json;

    const OWNER: Address = Address([0x11; 20]);

    /// The mock factory derives wallet addresses from the call data, so the
    /// home address is computed the same way the foreign deployment will be.
    fn home_wallet_address() -> Address {
        let data = wallet_factory::create_counterfactual_wallet(
            OWNER,
            &[OWNERSHIP_MODULE],
            "",
            U256::from_u64(9),
        );
        crate::test_utils::MockBlockchainClient::counterfactual_address(&data)
    }

    fn params() -> serde_json::Value {
        let user_wallet = UserWallet {
            id: "uw-1".to_string(),
            account_address: OWNER,
            wallet_address: Some(home_wallet_address()),
            phone_number: None,
            salt: Some("9".to_string()),
            networks: vec!["fuse".to_string()],
            wallet_modules: WalletModules::new(),
            is_contract_deployed: false,
            wallet_owner_original_address: Some(OWNER),
            wallet_factory_original_address: Some(FACTORY),
            wallet_modules_original: Some(
                WalletModules::new().with_module("WalletOwnershipManager", OWNERSHIP_MODULE),
            ),
        };
        json!({ "userWallet": user_wallet })
    }

    #[tokio::test]
    async fn test_create_foreign_wallet() {
        let f = fixture();
        let user_wallet: UserWallet =
            serde_json::from_value(params()["userWallet"].clone()).unwrap();
        f.wallets.insert_wallet(user_wallet);
        let mut ctx = f.context(JobName::CreateForeignWallet, params()).await;

        f.runner.run(&mut ctx).await.unwrap().unwrap();

        let sent = f.foreign.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].gas_limit, Some(700_000));
        assert!(f.home.sent_transactions().is_empty());

        let user_wallet = f.wallets.wallets().remove(0);
        assert!(user_wallet.is_contract_deployed);
        assert_eq!(user_wallet.networks, vec!["fuse".to_string(), "ropsten".to_string()]);
        assert_eq!(
            f.notifier.subscriptions(),
            vec![(home_wallet_address(), Network::Foreign, None)]
        );
    }

    #[tokio::test]
    async fn test_existing_code_without_checkpoint_fails() {
        let f = fixture();
        f.foreign.set_code(home_wallet_address(), vec![0x60, 0x80]);
        let mut ctx = f.context(JobName::CreateForeignWallet, params()).await;

        let result = f.runner.run(&mut ctx).await;
        match result {
            Err(AppError::Job(JobError::PreconditionFailed(message))) => {
                assert!(message.contains("Contract already exists for wallet"));
                assert!(message.ends_with("on foreign"));
            }
            other => panic!("expected precondition failure, got {other:?}"),
        }
        assert!(f.foreign.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_own_checkpoint_resumes_despite_code() {
        let f = fixture();
        let mut ctx = f.context(JobName::CreateForeignWallet, params()).await;

        // Re-running after the deployment landed finds code on chain
        f.runner.run(&mut ctx).await.unwrap();
        assert!(!f.foreign.get_code(&home_wallet_address()).await.unwrap().is_empty());

        let stored = f.jobs.get_job(ctx.id()).await.unwrap().unwrap();
        let mut retried = JobContext::new(stored, f.jobs.clone());
        assert!(f.runner.run(&mut retried).await.is_ok());
        assert_eq!(f.foreign.sent_transactions().len(), 1);
    }
}
