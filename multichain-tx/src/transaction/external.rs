//! Contracts for the services a build depends on
//!
//! Every call here is an I/O boundary where the build pipeline suspends.
//! Implementations are handed in by the caller; none are cached globally.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::Protocol;
use super::types::{FeeQuote, SpendableOutput, TransactionKind};

/// Transaction shape sent to the fee oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRequest {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_inputs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_outputs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl FeeRequest {
    pub fn new(kind: TransactionKind, protocol: Protocol) -> Self {
        Self {
            kind,
            protocol,
            num_inputs: None,
            num_outputs: None,
            from: None,
            destination: None,
            amount: None,
            contract_address: None,
            method: None,
            params: Vec::new(),
        }
    }

    /// Same request re-parameterized for a UTXO shape
    pub fn for_shape(&self, num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs: Some(num_inputs),
            num_outputs: Some(num_outputs),
            ..self.clone()
        }
    }
}

/// Replay-protection counters for an account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub ledger_current_index: Option<u32>,
}

/// State of a proof-of-work job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Mining,
    Done,
    Failed,
    Timeout,
    Cancelled,
}

/// Fields the mining service fills in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinedFields {
    /// Hex-encoded nonce
    pub nonce: String,
    pub parents: Vec<String>,
    pub timestamp: u32,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub tx: Option<MinedFields>,
}

/// Lists spendable outputs of an address
#[async_trait]
pub trait UtxoIndex: Send + Sync {
    async fn get_utxos(&self, address: &str, protocol: Protocol) -> Result<Vec<SpendableOutput>>;
}

/// Estimates fees for a transaction shape
#[async_trait]
pub trait FeeOracle: Send + Sync {
    async fn estimate_fee(&self, request: &FeeRequest) -> Result<FeeQuote>;
}

/// Reads nonce or sequence counters
#[async_trait]
pub trait AccountInfoSource: Send + Sync {
    async fn get_account_info(&self, address: &str, protocol: Protocol) -> Result<AccountInfo>;
}

/// Submit-then-poll proof-of-work service
#[async_trait]
pub trait MiningService: Send + Sync {
    /// Returns the job id
    async fn submit_job(&self, tx_hex: &str) -> Result<String>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatus>;
}

/// Clock used between mining polls
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
