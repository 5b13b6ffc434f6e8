//! Build entry point
//!
//! [`TransactionBuilder::build`] parses the protocol once and hands the
//! request to exactly one protocol builder. Every builder walks the same
//! stages: collect inputs, compute the fee, assemble outputs, serialize,
//! sign and serialize again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::protocol::{Network, Protocol};
use super::external::{AccountInfoSource, FeeOracle, FeeRequest, MiningService, Sleeper, TokioSleeper, UtxoIndex};
use super::mining::MiningPolicy;
use super::provider::{HttpProvider, ProviderConfig};
use super::types::{BuildRequest, BuildStage, FeeQuote, SignedTransaction};
use super::{bitcoin, ethereum, hathor, ripple, stellar};

/// Builder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuilderConfig {
    pub network: Network,
    pub mining: MiningPolicy,
    /// Ceiling for attached data payloads, in bytes
    pub data_payload_limit: usize,
    /// Longest memo sent as text; longer memos are hashed
    pub memo_text_limit: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            mining: MiningPolicy::default(),
            data_payload_limit: 80,
            memo_text_limit: 28,
        }
    }
}

/// Services a build talks to
#[derive(Clone)]
pub struct Collaborators {
    pub utxo_index: Arc<dyn UtxoIndex>,
    pub fee_oracle: Arc<dyn FeeOracle>,
    pub account_info: Arc<dyn AccountInfoSource>,
    pub mining: Arc<dyn MiningService>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Collaborators {
    /// All services behind one HTTP gateway, with real-time polling
    pub fn http(config: ProviderConfig) -> Result<Self> {
        let provider = Arc::new(HttpProvider::new(config)?);
        Ok(Self {
            utxo_index: provider.clone(),
            fee_oracle: provider.clone(),
            account_info: provider.clone(),
            mining: provider,
            sleeper: Arc::new(TokioSleeper),
        })
    }
}

/// Per-build view handed to the protocol builders
pub(crate) struct BuildContext<'a> {
    pub config: &'a BuilderConfig,
    pub services: &'a Collaborators,
    pub protocol: Protocol,
}

impl BuildContext<'_> {
    pub fn stage(&self, stage: BuildStage) {
        debug!(protocol = %self.protocol, %stage, "build stage");
    }

    pub fn fee_template(&self, request: &BuildRequest) -> FeeRequest {
        FeeRequest::new(request.kind, self.protocol)
    }

    /// The caller's fee if supplied, otherwise the oracle's estimate
    pub async fn quote(&self, request: &BuildRequest, fee_request: FeeRequest) -> Result<FeeQuote> {
        match &request.fee {
            Some(quote) => Ok(quote.clone()),
            None => self.services.fee_oracle.estimate_fee(&fee_request).await,
        }
    }
}

/// Builds and signs transactions for every supported protocol
pub struct TransactionBuilder {
    config: BuilderConfig,
    services: Collaborators,
}

impl TransactionBuilder {
    pub fn new(config: BuilderConfig, services: Collaborators) -> Self {
        Self { config, services }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Build, sign and serialize one transaction
    #[instrument(skip_all, fields(protocol = %request.protocol))]
    pub async fn build(&self, request: &BuildRequest) -> Result<SignedTransaction> {
        if request.wallet.is_some() && request.inputs.is_some() {
            return Err(Error::InvalidParameterCombination(
                "wallet and inputs are mutually exclusive".to_string(),
            ));
        }
        let protocol: Protocol = request.protocol.parse()?;
        let ctx = BuildContext {
            config: &self.config,
            services: &self.services,
            protocol,
        };

        let signed = match protocol {
            Protocol::Bitcoin => bitcoin::build(&ctx, request).await,
            Protocol::Hathor => hathor::build(&ctx, request).await,
            Protocol::Ethereum | Protocol::Celo => ethereum::build(&ctx, request).await,
            Protocol::Stellar => stellar::build(&ctx, request).await,
            Protocol::Ripple => ripple::build(&ctx, request).await,
        }?;

        info!(%protocol, hash = signed.derived_hash.as_deref().unwrap_or("-"), "transaction signed");
        Ok(signed)
    }
}
