//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use multichain_tx::protocol::Network;
use multichain_tx::transaction::{
    AccountInfo, AccountInfoSource, BuilderConfig, Collaborators, FeeOracle, FeeQuote, FeeRequest, JobState,
    JobStatus, MinedFields, MiningPolicy, MiningService, Sleeper, SpendableOutput, TransactionBuilder, UtxoIndex,
};
use multichain_tx::{Error, Protocol, Result};

pub struct MockServices {
    pub utxos: Vec<SpendableOutput>,
    pub fee: FeeQuote,
    pub fee_unavailable: bool,
    pub account: AccountInfo,
    pub mining_states: Mutex<VecDeque<JobState>>,
    pub mined: MinedFields,
    pub fee_requests: Mutex<Vec<FeeRequest>>,
    pub utxo_queries: Mutex<Vec<(String, Protocol)>>,
    pub submitted_jobs: Mutex<Vec<String>>,
    pub polls: Mutex<u32>,
}

impl Default for MockServices {
    fn default() -> Self {
        Self {
            utxos: Vec::new(),
            fee: FeeQuote::flat(0, "unit"),
            fee_unavailable: false,
            account: AccountInfo::default(),
            mining_states: Mutex::new(VecDeque::new()),
            mined: MinedFields {
                nonce: "0000002a".to_string(),
                parents: vec!["11".repeat(32), "22".repeat(32)],
                timestamp: 1_700_000_000,
                weight: 21.5,
            },
            fee_requests: Mutex::new(Vec::new()),
            utxo_queries: Mutex::new(Vec::new()),
            submitted_jobs: Mutex::new(Vec::new()),
            polls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl UtxoIndex for MockServices {
    async fn get_utxos(&self, address: &str, protocol: Protocol) -> Result<Vec<SpendableOutput>> {
        self.utxo_queries.lock().unwrap().push((address.to_string(), protocol));
        Ok(self.utxos.clone())
    }
}

#[async_trait]
impl FeeOracle for MockServices {
    async fn estimate_fee(&self, request: &FeeRequest) -> Result<FeeQuote> {
        self.fee_requests.lock().unwrap().push(request.clone());
        if self.fee_unavailable {
            return Err(Error::ExternalService {
                service: "fee-oracle".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.fee.clone())
    }
}

#[async_trait]
impl AccountInfoSource for MockServices {
    async fn get_account_info(&self, _address: &str, _protocol: Protocol) -> Result<AccountInfo> {
        Ok(self.account.clone())
    }
}

#[async_trait]
impl MiningService for MockServices {
    async fn submit_job(&self, tx_hex: &str) -> Result<String> {
        self.submitted_jobs.lock().unwrap().push(tx_hex.to_string());
        Ok("job-1".to_string())
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatus> {
        *self.polls.lock().unwrap() += 1;
        let status = self.mining_states.lock().unwrap().pop_front().unwrap_or(JobState::Mining);
        let tx = (status == JobState::Done).then(|| self.mined.clone());
        Ok(JobStatus { status, tx })
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub struct Harness {
    pub services: Arc<MockServices>,
    pub sleeper: Arc<RecordingSleeper>,
    pub builder: TransactionBuilder,
}

/// Route build logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness(network: Network, services: MockServices) -> Harness {
    init_tracing();
    let config = BuilderConfig {
        network,
        mining: MiningPolicy {
            max_attempts: 3,
            poll_interval_ms: 500,
        },
        ..BuilderConfig::default()
    };
    let services = Arc::new(services);
    let sleeper = Arc::new(RecordingSleeper::default());
    let collaborators = Collaborators {
        utxo_index: services.clone(),
        fee_oracle: services.clone(),
        account_info: services.clone(),
        mining: services.clone(),
        sleeper: sleeper.clone(),
    };
    Harness {
        services,
        sleeper,
        builder: TransactionBuilder::new(config, collaborators),
    }
}
