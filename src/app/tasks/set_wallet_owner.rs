use tracing::info;

use super::TaskRunner;
use crate::app::context::JobContext;
use crate::domain::contracts::{multisig, ownership_manager};
use crate::domain::{
    AppError, JobError, Network, SetWalletOwnerParams, TransactionReceipt, TransactionRequest,
    U256,
};

const STEP: &str = "setWalletOwner";

impl TaskRunner {
    /// Hand a wallet to a new owner through its ownership module, executed
    /// by the relayer multi-sig.
    pub(super) async fn set_wallet_owner(
        &self,
        ctx: &mut JobContext,
    ) -> Result<TransactionReceipt, AppError> {
        let params: SetWalletOwnerParams = ctx.params()?;

        let receipt = match self.sender.checkpointed_receipt(ctx, STEP).await? {
            Some(receipt) => receipt,
            None => {
                let user_wallet = self
                    .wallets
                    .find_by_wallet_address(&params.wallet_address)
                    .await?
                    .ok_or_else(|| {
                        AppError::Job(JobError::PreconditionFailed(format!(
                            "no user wallet with address {}",
                            params.wallet_address
                        )))
                    })?;
                let module = user_wallet
                    .wallet_modules
                    .get(ownership_manager::MODULE_NAME)
                    .ok_or_else(|| {
                        AppError::Job(JobError::PreconditionFailed(format!(
                            "wallet {} has no {} module",
                            params.wallet_address,
                            ownership_manager::MODULE_NAME
                        )))
                    })?;

                let data = ownership_manager::set_owner(params.wallet_address, params.new_owner);
                let signatures = self
                    .multisig
                    .sign(
                        self.sender.chains().home.as_ref(),
                        self.config.multisig_wallet,
                        module,
                        U256::ZERO,
                        &data,
                    )
                    .await?;
                let request = TransactionRequest::call(
                    self.config.multisig_wallet,
                    multisig::execute(module, U256::ZERO, &data, &signatures),
                );
                self.sender.send(ctx, STEP, Network::Home, &request).await?
            }
        };

        self.wallets
            .set_account_address(&params.wallet_address, &params.new_owner)
            .await?;
        info!(
            wallet = %params.wallet_address,
            new_owner = %params.new_owner,
            "Wallet owner changed"
        );
        Ok(receipt)
    }
}
