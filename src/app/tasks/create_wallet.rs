use tracing::{debug, info, warn};

use super::{TaskRunner, parse_salt};
use crate::app::context::JobContext;
use crate::domain::contracts::wallet_factory;
use crate::domain::{
    Address, AppError, CreateWalletParams, FundTokenParams, FundTransactionBody, JobError,
    JobName, Network, NewJob, TransactionReceipt, TransactionRequest, U256, UserWalletFilter,
};

const STEP: &str = "createWallet";
const INVITE_BONUS: &str = "invite";
const DEFAULT_APP_NAME: &str = "fuseWallet";
const BRANCH_APP_NAME: &str = "fusecash";

impl TaskRunner {
    /// Deploy a counterfactual wallet on the home chain, pay the invite
    /// bonus and tell the invitee and the subscription service about it.
    pub(super) async fn create_wallet(
        &self,
        ctx: &mut JobContext,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        let params: CreateWalletParams = ctx.params()?;

        let (wallet, receipt) = match ctx.get_as::<Address>("walletAddress")? {
            Some(wallet) => {
                debug!(wallet = %wallet, "Wallet already created");
                (wallet, self.sender.checkpointed_receipt(ctx, STEP).await?)
            }
            None => {
                let (wallet, receipt) = self.deploy_home_wallet(ctx, &params).await?;
                (wallet, Some(receipt))
            }
        };
        let block_number = ctx.get_as::<u64>("blockNumber")?;

        if let (Some(_), Some(community)) = (&params.bonus_info, params.community_address) {
            ctx.set("bonusInfo.bonusId", wallet)?;
            if ctx.get("bonusJob").is_none() {
                self.spawn_invite_bonus(ctx, &params, wallet, community)
                    .await?;
            }
        }
        ctx.save().await?;

        let filter = UserWalletFilter::resolve(
            params.id.as_deref(),
            params.owner,
            params.phone_number.as_deref(),
        );
        let user_wallet = self
            .wallets
            .set_wallet_address(&filter, &wallet, &params.salt)
            .await?
            .ok_or_else(|| {
                AppError::Job(JobError::PreconditionFailed(format!(
                    "no user wallet matches {filter:?}"
                )))
            })?;
        let phone_number = user_wallet.phone_number;

        if let Some(phone) = phone_number.as_deref() {
            let updated = self.wallets.update_contacts_wallet(phone, &wallet).await?;
            debug!(contacts = updated, "Linked contacts to wallet");
        }

        if let (Some(bonus_info), Some(community)) = (&params.bonus_info, params.community_address)
        {
            match phone_number.as_deref() {
                Some(phone) => {
                    if ctx.get("inviteSms").is_none() {
                        self.send_invite(&params, community, phone).await?;
                        ctx.checkpoint("inviteSms", true).await?;
                    }
                    self.wallets
                        .set_invitee_wallet(&bonus_info.receiver, phone, &wallet)
                        .await?;
                }
                None => warn!(wallet = %wallet, "Invited wallet has no phone number"),
            }
        }

        self.notifiers
            .subscriber
            .subscribe_wallet(&wallet, Network::Home, block_number)
            .await?;

        info!(wallet = %wallet, owner = %params.owner, "Wallet created");
        Ok(receipt)
    }

    async fn deploy_home_wallet(
        &self,
        ctx: &mut JobContext,
        params: &CreateWalletParams,
    ) -> Result<(Address, TransactionReceipt), AppError> {
        let salt = parse_salt(JobName::CreateWallet, &params.salt)?;
        let modules = params
            .wallet_modules
            .as_ref()
            .unwrap_or(&self.config.wallet_modules)
            .addresses();
        let data = wallet_factory::create_counterfactual_wallet(
            params.owner,
            &modules,
            &params.ens,
            salt,
        );

        let request = TransactionRequest::call(self.config.wallet_factory, data);
        let receipt = self
            .sender
            .send(ctx, STEP, Network::Home, &request)
            .await?;
        let wallet = wallet_factory::created_wallet(&receipt, self.config.wallet_factory)?;
        info!(
            wallet = %wallet,
            block = receipt.block_number,
            owner = %params.owner,
            "Created wallet contract"
        );

        ctx.set("walletAddress", wallet)?;
        ctx.set("blockNumber", receipt.block_number)?;
        ctx.save().await?;
        Ok((wallet, receipt))
    }

    async fn spawn_invite_bonus(
        &self,
        ctx: &mut JobContext,
        params: &CreateWalletParams,
        wallet: Address,
        community_address: Address,
    ) -> Result<(), AppError> {
        let community = self
            .wallets
            .find_community(&community_address)
            .await?
            .ok_or_else(|| {
                AppError::Job(JobError::PreconditionFailed(format!(
                    "community {community_address} not found"
                )))
            })?;
        let Some(bonus_amount) = community.bonus_amount(INVITE_BONUS) else {
            debug!(community = %community_address, "Invite bonus inactive");
            return Ok(());
        };
        let Some(phone_number) = params.phone_number.clone() else {
            warn!(community = %community_address, "Invite bonus needs a phone number");
            return Ok(());
        };

        let transaction_body = bonus_amount
            .parse::<U256>()
            .ok()
            .map(|value| FundTransactionBody {
                token_address: community.home_token_address,
                to: wallet,
                value,
                bonus_type: INVITE_BONUS.to_string(),
            });
        let bonus = FundTokenParams {
            phone_number: Some(phone_number.clone()),
            receiver_address: wallet,
            identifier: phone_number,
            token_address: community.home_token_address,
            community_address,
            bonus_type: INVITE_BONUS.to_string(),
            bonus_amount,
            bonus_max_times_limit: community.bonus_max_times(),
            transaction_body,
        };

        let job = self
            .jobs
            .enqueue(
                &NewJob::new(
                    JobName::FundToken,
                    serde_json::to_value(&bonus)?,
                    self.config.sub_job_max_attempts,
                )
                .with_idempotency_key(format!("{}:bonus", ctx.id()))
                .with_parent(ctx.id()),
            )
            .await?;
        info!(bonus_job = %job.id, "Spawned invite bonus");

        ctx.set("bonusJob.name", job.name)?;
        ctx.set("bonusJob._id", &job.id)?;
        Ok(())
    }

    async fn send_invite(
        &self,
        params: &CreateWalletParams,
        community: Address,
        phone_number: &str,
    ) -> Result<(), AppError> {
        let link = match params.app_name.as_deref() {
            None | Some(BRANCH_APP_NAME) => {
                let app_name = params.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME);
                self.notifiers
                    .deep_links
                    .create_deep_link(&community, app_name)
                    .await?
            }
            Some(app_name) => {
                self.wallets
                    .find_fork(app_name)
                    .await?
                    .ok_or_else(|| {
                        AppError::Job(JobError::PreconditionFailed(format!(
                            "no fork registered for app {app_name}"
                        )))
                    })?
                    .deep_link_url
            }
        };
        debug!(link = %link, "Resolved invite deep link");

        let body = match (&params.name, &params.amount, &params.symbol) {
            (Some(name), Some(amount), Some(symbol)) => {
                format!("{name} sent you {amount} {symbol}! Click here to redeem:\n{link}")
            }
            _ => format!("{}\n{link}", self.config.invite_text),
        };
        self.notifiers.sms.send_sms(phone_number, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FACTORY, OWNERSHIP_MODULE, TRANSFER_MODULE, fixture};
    use super::*;
    use crate::domain::{
        Community, Contact, Fork, Invite, JobRepository, UserWallet, WalletModules,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    const OWNER: Address = Address([0x11; 20]);
    const INVITER: Address = Address([0x22; 20]);
    const COMMUNITY: Address = Address([0xcc; 20]);
    const TOKEN: Address = Address([0x70; 20]);

    fn user_wallet(phone: Option<&str>) -> UserWallet {
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

    fn community(active: bool) -> Community {
        Community {
            community_address: COMMUNITY,
            home_token_address: TOKEN,
            plugins: json!({
                "inviteBonus": { "isActive": active, "inviteInfo": { "amount": "10" } }
            }),
            invite_max_times: Some(3),
        }
    }

    fn invited_params() -> serde_json::Value {
        json!({
            "owner": OWNER,
            "communityAddress": COMMUNITY,
            "phoneNumber": "+15550001",
            "bonusInfo": { "receiver": INVITER },
            "salt": "42",
        })
    }

    #[tokio::test]
    async fn test_create_wallet_plain() {
        let f = fixture();
        f.wallets.insert_wallet(user_wallet(None));
        let mut ctx = f
            .context(JobName::CreateWallet, json!({ "owner": OWNER, "salt": "7" }))
            .await;

        let receipt = f.runner.run(&mut ctx).await.unwrap().unwrap();

        let sent = f.home.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, FACTORY);
        assert_eq!(
            sent[0].data,
            wallet_factory::create_counterfactual_wallet(
                OWNER,
                &[OWNERSHIP_MODULE, TRANSFER_MODULE],
                "",
                U256::from_u64(7)
            )
        );

        let wallet = wallet_factory::created_wallet(&receipt, FACTORY).unwrap();
        let stored = f.jobs.get_job(ctx.id()).await.unwrap().unwrap();
        assert_eq!(stored.data["walletAddress"], json!(wallet));
        assert_eq!(stored.data["blockNumber"], json!(receipt.block_number));

        let updated = f.wallets.wallets();
        assert_eq!(updated[0].wallet_address, Some(wallet));
        assert_eq!(updated[0].salt.as_deref(), Some("7"));

        let subscriptions = f.notifier.subscriptions();
        assert_eq!(
            subscriptions,
            vec![(wallet, Network::Home, Some(receipt.block_number))]
        );
        assert!(f.notifier.sms().is_empty());
    }

    #[tokio::test]
    async fn test_job_modules_override_configured_modules() {
        let f = fixture();
        f.wallets.insert_wallet(user_wallet(None));
        let custom = Address([0x99; 20]);
        let mut ctx = f
            .context(
                JobName::CreateWallet,
                json!({ "owner": OWNER, "salt": "1", "walletModules": { "Custom": custom } }),
            )
            .await;

        f.runner.run(&mut ctx).await.unwrap();

        let data = &f.home.sent_transactions()[0].data;
        assert_eq!(
            data,
            &wallet_factory::create_counterfactual_wallet(OWNER, &[custom], "", U256::from_u64(1))
        );
    }

    #[tokio::test]
    async fn test_invited_wallet_spawns_bonus_and_sends_invite() {
        let f = fixture();
        f.wallets.insert_wallet(user_wallet(Some("+15550001")));
        f.wallets.insert_community(community(true));
        f.wallets.insert_contact(Contact {
            id: "c-1".to_string(),
            phone_number: "+15550001".to_string(),
            wallet_address: None,
            state: "EMPTY".to_string(),
        });
        f.wallets.insert_invite(Invite {
            id: "old".to_string(),
            inviter_wallet_address: INVITER,
            invitee_phone_number: "+15550001".to_string(),
            invitee_wallet_address: None,
            created_at: Utc::now() - ChronoDuration::hours(1),
        });
        f.wallets.insert_invite(Invite {
            id: "new".to_string(),
            inviter_wallet_address: INVITER,
            invitee_phone_number: "+15550001".to_string(),
            invitee_wallet_address: None,
            created_at: Utc::now(),
        });
        let mut ctx = f.context(JobName::CreateWallet, invited_params()).await;

        let receipt = f.runner.run(&mut ctx).await.unwrap().unwrap();
        let wallet = wallet_factory::created_wallet(&receipt, FACTORY).unwrap();

        let stored = f.jobs.get_job(ctx.id()).await.unwrap().unwrap();
        assert_eq!(stored.data["bonusJob"]["name"], "fundToken");
        assert_eq!(stored.data["bonusInfo"]["bonusId"], json!(wallet));

        let bonus_id = stored.data["bonusJob"]["_id"].as_str().unwrap();
        let bonus = f.jobs.get_job(bonus_id).await.unwrap().unwrap();
        assert_eq!(bonus.name, JobName::FundToken);
        assert_eq!(bonus.parent_id.as_deref(), Some(ctx.id()));
        assert_eq!(bonus.data["receiverAddress"], json!(wallet));
        assert_eq!(bonus.data["identifier"], "+15550001");
        assert_eq!(bonus.data["tokenAddress"], json!(TOKEN));
        assert_eq!(bonus.data["bonusType"], "invite");
        assert_eq!(bonus.data["bonusAmount"], "10");
        assert_eq!(bonus.data["bonusMaxTimesLimit"], 3);

        assert_eq!(f.wallets.contacts()[0].wallet_address, Some(wallet));
        assert_eq!(f.wallets.contacts()[0].state, "NEW");

        let invites = f.wallets.invites();
        let latest = invites.iter().find(|i| i.id == "new").unwrap();
        let older = invites.iter().find(|i| i.id == "old").unwrap();
        assert_eq!(latest.invitee_wallet_address, Some(wallet));
        assert_eq!(older.invitee_wallet_address, None);

        assert_eq!(f.notifier.deep_links(), vec![(COMMUNITY, "fuseWallet".to_string())]);
        let sms = f.notifier.sms();
        assert_eq!(sms.len(), 1);
        assert_eq!(sms[0].0, "+15550001");
        assert!(sms[0].1.starts_with("Join us\n"));
    }

    #[tokio::test]
    async fn test_personal_invite_text_and_fork_link() {
        let f = fixture();
        f.wallets.insert_wallet(user_wallet(Some("+15550001")));
        f.wallets.insert_community(community(false));
        f.wallets.insert_fork(Fork {
            app_name: "otherApp".to_string(),
            deep_link_url: "https://other.app/join".to_string(),
        });
        let mut params = invited_params();
        params["appName"] = json!("otherApp");
        params["name"] = json!("Alice");
        params["amount"] = json!("5");
        params["symbol"] = json!("FUSE");
        let mut ctx = f.context(JobName::CreateWallet, params).await;

        f.runner.run(&mut ctx).await.unwrap();

        assert!(f.notifier.deep_links().is_empty());
        assert_eq!(
            f.notifier.sms()[0].1,
            "Alice sent you 5 FUSE! Click here to redeem:\nhttps://other.app/join"
        );
        // Inactive bonus plugin
        let stored = f.jobs.get_job(ctx.id()).await.unwrap().unwrap();
        assert!(stored.data.get("bonusJob").is_none());
    }

    #[tokio::test]
    async fn test_retry_after_checkpoint_does_not_redeploy_or_respawn() {
        let f = fixture();
        f.wallets.insert_community(community(true));
        let mut ctx = f.context(JobName::CreateWallet, invited_params()).await;

        // No user wallet yet: the run fails after the deployment settled
        let first = f.runner.run(&mut ctx).await;
        assert!(matches!(
            first,
            Err(AppError::Job(JobError::PreconditionFailed(_)))
        ));
        assert_eq!(f.home.sent_transactions().len(), 1);

        f.wallets.insert_wallet(user_wallet(Some("+15550001")));
        let stored = f.jobs.get_job(ctx.id()).await.unwrap().unwrap();
        let mut retried = JobContext::new(stored, f.jobs.clone());
        let receipt = f.runner.run(&mut retried).await.unwrap();

        assert!(receipt.is_some());
        assert_eq!(f.home.sent_transactions().len(), 1);
        let bonus_jobs = f
            .jobs
            .all_jobs()
            .into_iter()
            .filter(|job| job.name == JobName::FundToken)
            .count();
        assert_eq!(bonus_jobs, 1);
    }

    #[tokio::test]
    async fn test_missing_wallet_created_event_fails() {
        let f = fixture();
        f.wallets.insert_wallet(user_wallet(None));
        f.home.set_emit_events(false);
        let mut ctx = f
            .context(JobName::CreateWallet, json!({ "owner": OWNER, "salt": "1" }))
            .await;

        let result = f.runner.run(&mut ctx).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        // The broadcast stays checkpointed for the next attempt
        assert!(ctx.get("transactions.createWallet.hash").is_some());
        assert!(ctx.get("walletAddress").is_none());
    }

    #[tokio::test]
    async fn test_invalid_salt() {
        let f = fixture();
        let mut ctx = f
            .context(JobName::CreateWallet, json!({ "owner": OWNER, "salt": "not-a-number" }))
            .await;
        let result = f.runner.run(&mut ctx).await;
        assert!(matches!(
            result,
            Err(AppError::Job(JobError::InvalidParams { .. }))
        ));
        assert!(f.home.sent_transactions().is_empty());
    }
}
