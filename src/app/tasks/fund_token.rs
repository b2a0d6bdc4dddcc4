use tracing::{info, warn};

use super::TaskRunner;
use crate::app::context::JobContext;
use crate::domain::contracts::erc20;
use crate::domain::{
    AppError, BONUS_RESERVED, FundTokenParams, FundTransactionBody, JobError, JobName, Network,
    TransactionReceipt, TransactionRequest,
};

const STEP: &str = "fundToken";

impl TaskRunner {
    /// Pay a community bonus from the relayer account, unless the
    /// identifier already received it `bonusMaxTimesLimit` times.
    pub(super) async fn fund_token(
        &self,
        ctx: &mut JobContext,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        let params: FundTokenParams = ctx.params()?;

        if let Some(receipt) = self.sender.checkpointed_receipt(ctx, STEP).await? {
            return Ok(Some(receipt));
        }

        let granted = self
            .jobs
            .reserve_bonus(
                ctx.id(),
                &params.identifier,
                &params.bonus_type,
                &params.community_address,
                i64::from(params.bonus_max_times_limit),
            )
            .await?;
        if !granted {
            ctx.remove(BONUS_RESERVED);
            warn!(
                identifier = %params.identifier,
                bonus_type = %params.bonus_type,
                limit = params.bonus_max_times_limit,
                "Bonus limit reached, nothing transferred"
            );
            return Ok(None);
        }
        ctx.set(BONUS_RESERVED, true)?;

        let body = match params.transaction_body.clone() {
            Some(body) => body,
            None => FundTransactionBody {
                token_address: params.token_address,
                to: params.receiver_address,
                value: params.bonus_amount.parse().map_err(|e| {
                    AppError::Job(JobError::InvalidParams {
                        job: JobName::FundToken.to_string(),
                        message: format!("bonusAmount '{}': {e}", params.bonus_amount),
                    })
                })?,
                bonus_type: params.bonus_type.clone(),
            },
        };

        let request =
            TransactionRequest::call(body.token_address, erc20::transfer(body.to, body.value));
        let receipt = self
            .sender
            .send(ctx, STEP, Network::Home, &request)
            .await?;
        info!(
            to = %body.to,
            value = %body.value,
            bonus_type = %body.bonus_type,
            "Bonus transferred"
        );
        Ok(Some(receipt))
    }
}
