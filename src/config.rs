//! Typed configuration read from environment variables.
//!
//! Values are optionally loaded from a `.env` file by the binary before
//! [`AppConfig::from_env`] runs. Secrets stay wrapped in [`SecretString`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::api::RateLimitConfig;
use crate::app::{ProcessorConfig, RetryPolicy, TaskConfig, WorkerConfig};
use crate::domain::{Address, ConfigError, WalletModules};
use crate::infra::{NotifierConfig, RpcClientConfig};

/// Home-chain contracts, supplied as JSON in `HOME_ADDRESSES`.
#[derive(Debug, Clone, Deserialize)]
pub struct HomeAddresses {
    #[serde(rename = "WalletFactory")]
    pub wallet_factory: Address,
    #[serde(rename = "MultiSigWallet")]
    pub multisig_wallet: Address,
    #[serde(rename = "walletModules", default)]
    pub wallet_modules: WalletModules,
}

/// Node endpoints of one chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    pub chain_id: Option<u64>,
}

impl ChainConfig {
    #[must_use]
    pub fn rpc_config(&self, timeout: Duration) -> RpcClientConfig {
        RpcClientConfig {
            timeout,
            chain_id: self.chain_id,
            ..RpcClientConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Emit logs as JSON lines (`LOG_FORMAT=json`)
    pub log_json: bool,
    pub database_url: SecretString,
    pub api_auth_key: SecretString,
    /// Key of the account that sends relayer transactions on both chains
    pub signer_private_key: SecretString,
    pub home: ChainConfig,
    pub foreign: ChainConfig,
    pub rpc_timeout: Duration,
    pub addresses: HomeAddresses,
    /// Co-signers of the home MultiSigWallet
    pub multisig_signer_keys: Vec<SecretString>,
    pub multisig_threshold: usize,
    pub receipt_timeout: Duration,
    pub max_attempts: i32,
    pub tasks: TaskConfig,
    pub notifier: NotifierConfig,
    pub worker: WorkerConfig,
    pub processor: ProcessorConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first missing or malformed variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let addresses: HomeAddresses = serde_json::from_str(&env.required("HOME_ADDRESSES")?)
            .map_err(|e| invalid("HOME_ADDRESSES", e))?;

        let multisig_signer_keys: Vec<SecretString> = env
            .list("MULTISIG_SIGNER_KEYS")
            .into_iter()
            .map(SecretString::from)
            .collect();
        let multisig_threshold = env.parse_or("MULTISIG_THRESHOLD", multisig_signer_keys.len())?;

        let max_attempts = env.parse_or("JOB_MAX_ATTEMPTS", 5)?;
        if !(1..=50).contains(&max_attempts) {
            return Err(invalid("JOB_MAX_ATTEMPTS", "must be between 1 and 50"));
        }

        let task_defaults = TaskConfig::default();
        let tasks = TaskConfig {
            wallet_factory: addresses.wallet_factory,
            multisig_wallet: addresses.multisig_wallet,
            wallet_modules: addresses.wallet_modules.clone(),
            foreign_network_name: env
                .optional("FOREIGN_NETWORK_NAME")
                .unwrap_or(task_defaults.foreign_network_name),
            gas_limit_create_foreign_wallet: env.parse_or(
                "GAS_LIMIT_CREATE_FOREIGN_WALLET",
                task_defaults.gas_limit_create_foreign_wallet,
            )?,
            invite_text: env
                .optional("INVITE_TEXT")
                .unwrap_or(task_defaults.invite_text),
            sub_job_max_attempts: max_attempts,
        };

        let notifier = NotifierConfig {
            deep_link_url: env.optional("DEEP_LINK_URL"),
            sms_url: env.optional("SMS_URL"),
            subscription_url: env.optional("SUBSCRIPTION_URL"),
            foreign_watcher_url: env.optional("FOREIGN_WATCHER_URL"),
            api_key: env.optional("NOTIFICATION_API_KEY").map(SecretString::from),
            ..NotifierConfig::default()
        };

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            poll_interval: Duration::from_millis(env.parse_or(
                "WORKER_POLL_INTERVAL_MS",
                u64::try_from(worker_defaults.poll_interval.as_millis()).unwrap_or(10_000),
            )?),
            batch_size: env.parse_or("WORKER_BATCH_SIZE", worker_defaults.batch_size)?,
            enabled: env.parse_or("WORKER_ENABLED", worker_defaults.enabled)?,
        };
        if worker.batch_size < 1 {
            return Err(invalid("WORKER_BATCH_SIZE", "must be at least 1"));
        }

        let processor_defaults = ProcessorConfig::default();
        let retry_defaults = RetryPolicy::default();
        let processor = ProcessorConfig {
            concurrency: env.parse_or("WORKER_CONCURRENCY", processor_defaults.concurrency)?,
            lease: Duration::from_secs(
                env.parse_or("JOB_LEASE_SECS", processor_defaults.lease.as_secs())?,
            ),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(env.parse_or(
                    "RETRY_BASE_DELAY_MS",
                    u64::try_from(retry_defaults.base_delay.as_millis()).unwrap_or(5_000),
                )?),
                max_delay: Duration::from_secs(
                    env.parse_or("RETRY_MAX_DELAY_SECS", retry_defaults.max_delay.as_secs())?,
                ),
            },
        };
        if processor.concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "must be at least 1"));
        }

        let rate_limit_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            general_rps: env.parse_or("RATE_LIMIT_RPS", rate_limit_defaults.general_rps)?,
            general_burst: env.parse_or("RATE_LIMIT_BURST", rate_limit_defaults.general_burst)?,
            ..rate_limit_defaults
        };

        Ok(Self {
            bind_addr: env.parse_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            log_json: env
                .optional("LOG_FORMAT")
                .is_some_and(|format| format.eq_ignore_ascii_case("json")),
            database_url: SecretString::from(env.required("DATABASE_URL")?),
            api_auth_key: SecretString::from(env.required("API_AUTH_KEY")?),
            signer_private_key: SecretString::from(env.required("SIGNER_PRIVATE_KEY")?),
            home: ChainConfig {
                rpc_urls: env.required_list("HOME_RPC_URLS")?,
                chain_id: env.parse("HOME_CHAIN_ID")?,
            },
            foreign: ChainConfig {
                rpc_urls: env.required_list("FOREIGN_RPC_URLS")?,
                chain_id: env.parse("FOREIGN_CHAIN_ID")?,
            },
            rpc_timeout: Duration::from_secs(env.parse_or("RPC_TIMEOUT_SECS", 30)?),
            addresses,
            multisig_signer_keys,
            multisig_threshold,
            receipt_timeout: Duration::from_secs(env.parse_or("RECEIPT_TIMEOUT_SECS", 120)?),
            max_attempts,
            tasks,
            notifier,
            worker,
            processor,
            rate_limit,
        })
    }
}

fn invalid(key: &str, message: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Comma-separated values, blanks dropped.
    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn required_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        let values = self.list(key);
        if values.is_empty() {
            return Err(ConfigError::MissingEnvVar(key.to_string()));
        }
        Ok(values)
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key)
            .map(|value| value.parse::<T>().map_err(|e| invalid(key, e)))
            .transpose()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }
}
