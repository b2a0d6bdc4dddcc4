use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::Validate;

use super::error::ValidationError;

/// Represents a unique identifier for domain entities.
pub type EntityId = String;

/// Default cap on how many times a community pays the same bonus to one identifier.
pub const DEFAULT_BONUS_MAX_TIMES: u32 = 100;

/// Data key marking a `fundToken` job that holds one of its bonus payout slots.
pub const BONUS_RESERVED: &str = "bonusReserved";

/// Decode a hex string with or without a `0x` prefix. Odd lengths are left-padded.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, ValidationError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let result = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    };
    result.map_err(|e| ValidationError::InvalidFormat(format!("invalid hex '{s}': {e}")))
}

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const ZERO: Self = Self([0u8; $len]);

            #[must_use]
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(bytes).ok().map(Self)
            }

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            #[must_use]
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = decode_hex(s)?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    ValidationError::InvalidFormat(format!(
                        "expected {} bytes, got {}",
                        $len,
                        bytes.len()
                    ))
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// A 20-byte EVM account or contract address.
    Address,
    20
);

fixed_bytes!(
    /// A 32-byte hash (transaction hash, log topic, block hash).
    H256,
    32
);

/// Transaction hash as returned by `eth_sendRawTransaction`.
pub type TxHash = H256;

/// 256-bit unsigned integer stored big-endian, as the EVM sees it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct U256(pub [u8; 32]);

impl U256 {
    pub const ZERO: Self = Self([0u8; 32]);

    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self::from_u128(u128::from(value))
    }

    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    #[must_use]
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Big-endian bytes with leading zeros stripped (empty for zero).
    #[must_use]
    pub fn to_minimal_bytes(&self) -> &[u8] {
        let first = self.0.iter().position(|b| *b != 0).unwrap_or(32);
        &self.0[first..]
    }

    /// Parse a big-endian byte string of at most 32 bytes.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let significant = match bytes.iter().position(|b| *b != 0) {
            Some(first) => &bytes[first..],
            None => &[][..],
        };
        if significant.len() > 32 {
            return Err(ValidationError::InvalidFormat(
                "integer does not fit in 256 bits".to_string(),
            ));
        }
        let mut out = [0u8; 32];
        out[32 - significant.len()..].copy_from_slice(significant);
        Ok(Self(out))
    }

    /// Parse a decimal string.
    pub fn from_dec_str(s: &str) -> Result<Self, ValidationError> {
        if s.is_empty() {
            return Err(ValidationError::InvalidFormat(
                "empty integer string".to_string(),
            ));
        }
        let mut value = Self::ZERO;
        for c in s.chars() {
            let digit = c.to_digit(10).ok_or_else(|| {
                ValidationError::InvalidFormat(format!("invalid decimal integer '{s}'"))
            })?;
            if value.mul_small_add(10, digit) {
                return Err(ValidationError::InvalidFormat(format!(
                    "integer '{s}' does not fit in 256 bits"
                )));
            }
        }
        Ok(value)
    }

    /// Truncating conversion to the lowest 64 bits.
    #[must_use]
    pub fn low_u64(&self) -> u64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[24..]);
        u64::from_be_bytes(low)
    }

    /// `self = self * mul + add`, returning true on overflow.
    fn mul_small_add(&mut self, mul: u32, add: u32) -> bool {
        let mut carry = u64::from(add);
        for byte in self.0.iter_mut().rev() {
            let v = u64::from(*byte) * u64::from(mul) + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        carry != 0
    }

    fn div_small(&self, divisor: u32) -> (Self, u32) {
        let mut out = [0u8; 32];
        let mut rem = 0u64;
        for (i, byte) in self.0.iter().enumerate() {
            let acc = (rem << 8) | u64::from(*byte);
            out[i] = (acc / u64::from(divisor)) as u8;
            rem = acc % u64::from(divisor);
        }
        (Self(out), rem as u32)
    }
}

impl FromStr for U256 {
    type Err = ValidationError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("0x") || s.starts_with("0X") {
            Self::from_be_slice(&decode_hex(s)?)
        } else {
            Self::from_dec_str(s)
        }
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let mut digits = Vec::new();
        let mut value = *self;
        while !value.is_zero() {
            let (quotient, rem) = value.div_small(10);
            digits.push(char::from(b'0' + rem as u8));
            value = quotient;
        }
        let s: String = digits.iter().rev().collect();
        f.write_str(&s)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256({self})")
    }
}

impl Serialize for U256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(de::Error::custom),
            Repr::Number(n) => Ok(Self::from_u64(n)),
        }
    }
}

/// Serde adapter for `Vec<u8>` fields carried as `0x`-prefixed hex strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_hex(&s).map_err(de::Error::custom)
    }
}

/// Recoverable secp256k1 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id in `0..=3`.
    pub recovery_id: u8,
}

impl Signature {
    /// 65-byte `r || s || v` with `v = 27 + recovery_id`, the layout contracts expect.
    #[must_use]
    pub fn to_rsv_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = 27 + self.recovery_id;
        out
    }
}

/// The two chains a wallet lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Home,
    Foreign,
}

impl Network {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Home => "home",
            Network::Foreign => "foreign",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contract call to be signed and submitted by a chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub to: Address,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub value: U256,
    /// Explicit gas limit; estimated by the node when absent.
    pub gas_limit: Option<u64>,
}

impl TransactionRequest {
    #[must_use]
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    #[must_use]
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// An event log emitted during transaction execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// A mined transaction's receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    /// `true` when execution succeeded, `false` when it reverted.
    pub status: bool,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Ordered mapping from wallet module name to module address.
///
/// Order is significant: the factory receives the module addresses in the
/// order they were declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletModules(Vec<(String, Address)>);

impl WalletModules {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>, address: Address) -> Self {
        self.insert(name, address);
        self
    }

    /// Insert or replace a module, keeping its original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, address: Address) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = address,
            None => self.0.push((name, address)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Address> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, a)| *a)
    }

    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.0.iter().map(|(_, a)| *a).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Serialize for WalletModules {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, address) in &self.0 {
            map.serialize_entry(name, address)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WalletModules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModulesVisitor;

        impl<'de> Visitor<'de> for ModulesVisitor {
            type Value = WalletModules;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of module names to addresses")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut modules = WalletModules::new();
                while let Some((name, address)) = access.next_entry::<String, Address>()? {
                    modules.insert(name, address);
                }
                Ok(modules)
            }
        }

        deserializer.deserialize_map(ModulesVisitor)
    }
}

/// A user's smart-contract wallet record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWallet {
    #[serde(rename = "_id")]
    pub id: EntityId,
    /// The externally owned account that controls the wallet.
    pub account_address: Address,
    pub wallet_address: Option<Address>,
    pub phone_number: Option<String>,
    pub salt: Option<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub wallet_modules: WalletModules,
    #[serde(default)]
    pub is_contract_deployed: bool,
    pub wallet_owner_original_address: Option<Address>,
    pub wallet_factory_original_address: Option<Address>,
    pub wallet_modules_original: Option<WalletModules>,
}

/// How a job locates the user wallet it updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserWalletFilter {
    ById(EntityId),
    ByPhoneAndOwner { phone_number: String, owner: Address },
    ByOwner(Address),
}

impl UserWalletFilter {
    /// Most specific filter available: record id, then phone + owner, then owner.
    #[must_use]
    pub fn resolve(id: Option<&str>, owner: Address, phone_number: Option<&str>) -> Self {
        match (id, phone_number) {
            (Some(id), _) => Self::ById(id.to_string()),
            (None, Some(phone)) => Self::ByPhoneAndOwner {
                phone_number: phone.to_string(),
                owner,
            },
            (None, None) => Self::ByOwner(owner),
        }
    }
}

/// A community with optional bonus plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub community_address: Address,
    pub home_token_address: Address,
    /// Free-form plugin settings, e.g. `{"inviteBonus": {"isActive": true, "inviteInfo": {"amount": "10"}}}`.
    #[serde(default)]
    pub plugins: serde_json::Value,
    pub invite_max_times: Option<i32>,
}

impl Community {
    /// Amount paid by the `{bonus_type}Bonus` plugin, if active and non-zero.
    #[must_use]
    pub fn bonus_amount(&self, bonus_type: &str) -> Option<String> {
        let plugin = self.plugins.get(format!("{bonus_type}Bonus").as_str())?;
        let active = plugin
            .get("isActive")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if !active {
            return None;
        }
        match plugin
            .get(format!("{bonus_type}Info").as_str())?
            .get("amount")?
        {
            serde_json::Value::String(s) if !s.is_empty() && s != "0" => Some(s.clone()),
            serde_json::Value::Number(n) if n.as_f64().is_some_and(|v| v != 0.0) => {
                Some(n.to_string())
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn bonus_max_times(&self) -> u32 {
        self.invite_max_times
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_BONUS_MAX_TIMES)
    }
}

/// An invitation sent from a wallet to a phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: EntityId,
    pub inviter_wallet_address: Address,
    pub invitee_phone_number: String,
    pub invitee_wallet_address: Option<Address>,
    pub created_at: DateTime<Utc>,
}

/// A phone-book contact that may resolve to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: EntityId,
    pub phone_number: String,
    pub wallet_address: Option<Address>,
    pub state: String,
}

/// A white-labelled wallet app with its own deep link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fork {
    pub app_name: String,
    pub deep_link_url: String,
}

/// Job kinds understood by the task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobName {
    CreateWallet,
    SetWalletOwner,
    CreateForeignWallet,
    FundToken,
}

impl JobName {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::CreateWallet => "createWallet",
            JobName::SetWalletOwner => "setWalletOwner",
            JobName::CreateForeignWallet => "createForeignWallet",
            JobName::FundToken => "fundToken",
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createWallet" => Ok(JobName::CreateWallet),
            "setWalletOwner" => Ok(JobName::SetWalletOwner),
            "createForeignWallet" => Ok(JobName::CreateForeignWallet),
            "fundToken" => Ok(JobName::FundToken),
            other => Err(ValidationError::InvalidField {
                field: "name".to_string(),
                message: format!("unknown job '{other}'"),
            }),
        }
    }
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ValidationError::InvalidFormat(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// A queued unit of work and its mutable, checkpointed data blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: EntityId,
    pub name: JobName,
    pub data: serde_json::Value,
    pub status: JobStatus,
    pub idempotency_key: Option<String>,
    pub parent_id: Option<EntityId>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub next_run_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to enqueue a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: JobName,
    pub data: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub parent_id: Option<EntityId>,
    pub max_attempts: i32,
}

impl NewJob {
    #[must_use]
    pub fn new(name: JobName, data: serde_json::Value, max_attempts: i32) -> Self {
        Self {
            name,
            data,
            idempotency_key: None,
            parent_id: None,
            max_attempts,
        }
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Bonus bookkeeping attached to an invite-driven wallet creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusInfo {
    /// Wallet of the inviter.
    pub receiver: Address,
    pub bonus_id: Option<String>,
}

/// Parameters of a `createWallet` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletParams {
    pub owner: Address,
    pub community_address: Option<Address>,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub ens: String,
    pub name: Option<String>,
    pub amount: Option<String>,
    pub symbol: Option<String>,
    pub bonus_info: Option<BonusInfo>,
    #[serde(rename = "_id")]
    pub id: Option<EntityId>,
    pub app_name: Option<String>,
    pub wallet_modules: Option<WalletModules>,
    pub salt: String,
}

/// Parameters of a `setWalletOwner` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetWalletOwnerParams {
    pub wallet_address: Address,
    pub community_address: Option<Address>,
    pub new_owner: Address,
}

/// Parameters of a `createForeignWallet` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateForeignWalletParams {
    pub community_address: Option<Address>,
    pub user_wallet: UserWallet,
    #[serde(default)]
    pub ens: String,
}

/// The transfer a `fundToken` job performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundTransactionBody {
    pub token_address: Address,
    pub to: Address,
    pub value: U256,
    pub bonus_type: String,
}

/// Parameters of a `fundToken` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundTokenParams {
    pub phone_number: Option<String>,
    pub receiver_address: Address,
    pub identifier: String,
    pub token_address: Address,
    pub community_address: Address,
    pub bonus_type: String,
    pub bonus_amount: String,
    pub bonus_max_times_limit: u32,
    pub transaction_body: Option<FundTransactionBody>,
}

/// API request to enqueue a job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueJobRequest {
    pub name: JobName,
    #[serde(default)]
    pub data: serde_json::Value,
    #[validate(length(min = 1, max = 200))]
    pub idempotency_key: Option<String>,
    #[validate(range(min = 1, max = 50))]
    pub max_attempts: Option<i32>,
}

impl EnqueueJobRequest {
    #[must_use]
    pub fn new(name: JobName, data: serde_json::Value) -> Self {
        Self {
            name,
            data,
            idempotency_key: None,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Query parameters for listing jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
    pub status: Option<JobStatus>,
}

fn default_limit() -> i64 {
    20
}

impl Default for JobListParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
            status: None,
        }
    }
}

/// Cursor-paginated response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None, false)
    }
}

/// Health check status for services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub home_chain: HealthStatus,
    pub foreign_chain: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// The database and home chain are required; the foreign chain only degrades.
    pub fn new(database: HealthStatus, home_chain: HealthStatus, foreign_chain: HealthStatus) -> Self {
        let status = match (&database, &home_chain, &foreign_chain) {
            (HealthStatus::Healthy, HealthStatus::Healthy, HealthStatus::Healthy) => {
                HealthStatus::Healthy
            }
            (HealthStatus::Unhealthy, _, _) | (_, HealthStatus::Unhealthy, _) => {
                HealthStatus::Unhealthy
            }
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            database,
            home_chain,
            foreign_chain,
            timestamp: Utc::now(),
        }
    }
}

/// Error body returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
}

/// Body returned when a client exceeds its rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    pub retry_after: u64,
}
