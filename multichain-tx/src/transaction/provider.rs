//! HTTP implementations of the external service contracts

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::Protocol;
use super::external::{AccountInfo, AccountInfoSource, FeeOracle, FeeRequest, JobStatus, MiningService, UtxoIndex};
use super::types::{FeeQuote, SpendableOutput};

const UTXO_INDEX: &str = "utxo-index";
const FEE_ORACLE: &str = "fee-oracle";
const ACCOUNT_INFO: &str = "account-info";
const MINING: &str = "mining";

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Base URL of the service gateway
    pub url: String,
    /// API key (if required), sent as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ProviderConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            api_key: None,
            timeout: None,
        }
    }
}

#[derive(Serialize)]
struct SubmitJob<'a> {
    tx: &'a str,
    propagate: bool,
    add_parents: bool,
}

#[derive(Deserialize)]
struct SubmittedJob {
    job_id: String,
}

/// One HTTP client shared by every collaborator call of a builder
#[derive(Debug, Clone)]
pub struct HttpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| Error::invalid_parameter("apiKey", "not a valid header value"))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout.unwrap_or(30)))
            .build()
            .map_err(|e| Error::external("http", e))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }
}

async fn read<T: DeserializeOwned>(service: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::external(service, format!("HTTP {}: {}", status, body)));
    }
    response.json::<T>().await.map_err(|e| Error::external(service, e))
}

#[async_trait]
impl UtxoIndex for HttpProvider {
    async fn get_utxos(&self, address: &str, protocol: Protocol) -> Result<Vec<SpendableOutput>> {
        debug!(%protocol, address, "fetching utxos");
        let response = self
            .client
            .get(self.url("/utxos"))
            .query(&[("address", address), ("protocol", protocol.as_str())])
            .send()
            .await
            .map_err(|e| Error::external(UTXO_INDEX, e))?;
        read(UTXO_INDEX, response).await
    }
}

#[async_trait]
impl FeeOracle for HttpProvider {
    async fn estimate_fee(&self, request: &FeeRequest) -> Result<FeeQuote> {
        debug!(protocol = %request.protocol, inputs = ?request.num_inputs, outputs = ?request.num_outputs, "estimating fee");
        let response = self
            .client
            .post(self.url("/fees/estimate"))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::external(FEE_ORACLE, e))?;
        read(FEE_ORACLE, response).await
    }
}

#[async_trait]
impl AccountInfoSource for HttpProvider {
    async fn get_account_info(&self, address: &str, protocol: Protocol) -> Result<AccountInfo> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{}", address)))
            .query(&[("protocol", protocol.as_str())])
            .send()
            .await
            .map_err(|e| Error::external(ACCOUNT_INFO, e))?;
        read(ACCOUNT_INFO, response).await
    }
}

#[async_trait]
impl MiningService for HttpProvider {
    async fn submit_job(&self, tx_hex: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/mining/submit-job"))
            .json(&SubmitJob {
                tx: tx_hex,
                propagate: false,
                add_parents: true,
            })
            .send()
            .await
            .map_err(|e| Error::external(MINING, e))?;
        let job: SubmittedJob = read(MINING, response).await?;
        Ok(job.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let response = self
            .client
            .get(self.url("/mining/job-status"))
            .query(&[("job-id", job_id)])
            .send()
            .await
            .map_err(|e| Error::external(MINING, e))?;
        read(MINING, response).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::transaction::external::JobState;
    use crate::transaction::types::TransactionKind;

    fn provider(server: &MockServer) -> HttpProvider {
        let mut config = ProviderConfig::new(&server.uri());
        config.api_key = Some("test-key".to_string());
        HttpProvider::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_get_utxos() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/utxos"))
            .and(query_param("address", "mnPLowner"))
            .and(query_param("protocol", "bitcoin"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "transactionId": "03fc", "outputIndex": 0, "value": 2022623, "ownerAddress": "mnPLowner" }
            ])))
            .mount(&server)
            .await;

        let utxos = provider(&server).get_utxos("mnPLowner", Protocol::Bitcoin).await.unwrap();
        assert_eq!(utxos, vec![SpendableOutput::new("03fc", 0, 2_022_623, "mnPLowner")]);
    }

    #[tokio::test]
    async fn test_estimate_fee_posts_the_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fees/estimate"))
            .and(body_json(serde_json::json!({
                "type": "transfer", "protocol": "bitcoin", "numInputs": 1, "numOutputs": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "flat", "value": "400", "unit": "satoshi"
            })))
            .mount(&server)
            .await;

        let request = FeeRequest::new(TransactionKind::Transfer, Protocol::Bitcoin).for_shape(1, 2);
        let quote = provider(&server).estimate_fee(&request).await.unwrap();
        assert_eq!(quote, FeeQuote::flat(400, "satoshi"));
    }

    #[tokio::test]
    async fn test_error_status_is_an_external_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/GABC"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = provider(&server).get_account_info("GABC", Protocol::Stellar).await.unwrap_err();
        assert!(matches!(err, Error::ExternalService { ref service, .. } if service == ACCOUNT_INFO));
        assert!(err.to_string().contains("maintenance"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_mining_submit_and_poll() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mining/submit-job"))
            .and(body_json(serde_json::json!({ "tx": "0001", "propagate": false, "add_parents": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "job_id": "job-9" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mining/job-status"))
            .and(query_param("job-id", "job-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "done",
                "tx": { "nonce": "2a", "parents": [], "timestamp": 1700000000, "weight": 18.5 }
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let job_id = provider.submit_job("0001").await.unwrap();
        let status = provider.job_status(&job_id).await.unwrap();
        assert_eq!(status.status, JobState::Done);
        assert_eq!(status.tx.unwrap().nonce, "2a");
    }
}
