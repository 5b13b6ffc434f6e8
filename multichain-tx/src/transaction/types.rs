//! Common transaction types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// Base-unit amounts travel as decimal strings on the wire but are read
/// from either strings or JSON numbers.
pub(crate) mod base_units {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct BaseUnits;

        impl<'de> Visitor<'de> for BaseUnits {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or integer string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom("negative base-unit amount"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.trim().parse::<u128>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(BaseUnits)
    }
}

/// Mint or melt rights over a custom token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    Mint,
    Melt,
}

/// An unspent output reported by the indexing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendableOutput {
    /// Id of the transaction that created the output
    pub transaction_id: String,
    /// Index of the output within that transaction
    pub output_index: u32,
    /// Value in base units
    #[serde(with = "base_units")]
    pub value: u128,
    /// Address that controls the output
    pub owner_address: String,
    /// Asset identifier on multi-asset ledgers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Set when the output carries authority rather than value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<Authority>,
}

impl SpendableOutput {
    pub fn new(transaction_id: &str, output_index: u32, value: u128, owner_address: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            output_index,
            value,
            owner_address: owner_address.to_string(),
            token_id: None,
            authority: None,
        }
    }

    pub fn with_token(mut self, token_id: &str) -> Self {
        self.token_id = Some(token_id.to_string());
        self
    }

    pub fn with_authority(mut self, authority: Authority) -> Self {
        self.authority = Some(authority);
        self
    }
}

/// A requested destination and amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRequest {
    pub destination_address: String,
    /// Decimal amount in the display unit
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl OutputRequest {
    pub fn new(destination_address: &str, amount: &str) -> Self {
        Self {
            destination_address: destination_address.to_string(),
            amount: amount.to_string(),
            token_id: None,
        }
    }

    pub fn with_token(mut self, token_id: &str) -> Self {
        self.token_id = Some(token_id.to_string());
        self
    }
}

/// A fee quote for one specific transaction shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    #[serde(with = "base_units")]
    pub value: u128,
    pub unit: String,
}

/// Fee oracle answer, shaped by protocol family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum FeeQuote {
    /// UTXO and ledger-native chains
    Flat(FeeEstimate),
    /// Account chains
    #[serde(rename_all = "camelCase")]
    Gas {
        gas: u64,
        #[serde(with = "base_units")]
        gas_price: u128,
        chain_id: u64,
    },
}

impl FeeQuote {
    pub fn flat(value: u128, unit: &str) -> Self {
        FeeQuote::Flat(FeeEstimate { value, unit: unit.to_string() })
    }

    pub(crate) fn into_flat(self, protocol: Protocol) -> Result<FeeEstimate> {
        match self {
            FeeQuote::Flat(estimate) => Ok(estimate),
            FeeQuote::Gas { .. } => Err(Error::external(
                "fee-oracle",
                format!("expected a flat fee estimate for {}, got gas parameters", protocol),
            )),
        }
    }
}

/// Outcome of UTXO selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    /// Inputs in selection order (largest value first)
    pub selected_inputs: Vec<SpendableOutput>,
    /// Value returned to the sender, zero when no change output is needed
    pub change_amount: u128,
    /// Fee the selection was funded against
    pub fee: u128,
}

impl SelectionResult {
    pub fn input_total(&self) -> u128 {
        self.selected_inputs.iter().map(|u| u.value).sum()
    }
}

/// How the signed blob is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobEncoding {
    Hex,
    Base64,
}

/// A fully signed transaction ready for the broadcast service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub protocol: Protocol,
    pub serialized_blob: String,
    pub encoding: BlobEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_hash: Option<String>,
}

/// Key material supplied by the wallet collaborator.
///
/// Scoped to a single build call. `Debug` never prints the private key.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletKeys {
    pub address: String,
    #[serde(default)]
    pub public_key: Option<String>,
    pub private_key: String,
}

impl WalletKeys {
    pub fn new(address: &str, private_key: &str) -> Self {
        Self {
            address: address.to_string(),
            public_key: None,
            private_key: private_key.to_string(),
        }
    }
}

impl fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKeys")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A caller-curated input together with the key that spends it
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedInput {
    #[serde(flatten)]
    pub output: SpendableOutput,
    pub private_key: String,
}

impl KeyedInput {
    pub fn new(output: SpendableOutput, private_key: &str) -> Self {
        Self {
            output,
            private_key: private_key.to_string(),
        }
    }
}

impl fmt::Debug for KeyedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedInput")
            .field("output", &self.output)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Where the inputs of a UTXO transaction come from
#[derive(Debug, Clone)]
pub enum Funding {
    /// Inputs are selected from the wallet's indexed UTXOs
    Wallet(WalletKeys),
    /// Every supplied input is spent as-is
    Inputs(Vec<KeyedInput>),
}

/// Transaction intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    #[default]
    Transfer,
    Trustline,
    ContractCall,
}

/// Contract interaction on account chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ContractCall {
    /// ERC-20 style `transfer(recipient, amount)` against a token contract
    #[serde(rename_all = "camelCase")]
    TokenTransfer {
        contract_address: String,
        #[serde(default)]
        decimals: Option<u32>,
    },
    /// Pre-encoded call data (hex)
    #[serde(rename_all = "camelCase")]
    Raw { contract_address: String, data: String },
}

impl ContractCall {
    pub fn contract_address(&self) -> &str {
        match self {
            ContractCall::TokenTransfer { contract_address, .. } => contract_address,
            ContractCall::Raw { contract_address, .. } => contract_address,
        }
    }
}

/// Trustline to a counterparty-issued asset. A zero limit revokes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustlineRequest {
    pub asset_code: String,
    pub issuer: String,
    /// Decimal limit; `None` means the ledger maximum
    #[serde(default)]
    pub limit: Option<String>,
}

/// Explicit request to spend an authority output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityRequest {
    pub token_id: String,
    pub authority: Authority,
    /// Re-create the authority at this address; `None` destroys it
    #[serde(default)]
    pub destination: Option<String>,
}

/// Everything a caller supplies for one build
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    /// Protocol identifier, parsed at dispatch
    pub protocol: String,
    #[serde(default)]
    pub kind: TransactionKind,
    #[serde(default)]
    pub wallet: Option<WalletKeys>,
    #[serde(default)]
    pub inputs: Option<Vec<KeyedInput>>,
    #[serde(default)]
    pub outputs: Vec<OutputRequest>,
    /// Change destination for explicit-input builds
    #[serde(default)]
    pub change_address: Option<String>,
    /// Arbitrary attached data; must be a string
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Caller-supplied fee, used instead of querying the oracle
    #[serde(default)]
    pub fee: Option<FeeQuote>,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub contract: Option<ContractCall>,
    /// Alternate fee-payment token (account chains that support it)
    #[serde(default)]
    pub fee_currency: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub destination_tag: Option<u32>,
    /// Create the destination account with this balance instead of paying it
    #[serde(default)]
    pub starting_balance: Option<String>,
    #[serde(default)]
    pub trustline: Option<TrustlineRequest>,
    #[serde(default)]
    pub authorities: Vec<AuthorityRequest>,
}

impl BuildRequest {
    pub fn new(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            ..Default::default()
        }
    }

    pub fn with_wallet(mut self, wallet: WalletKeys) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<KeyedInput>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_output(mut self, output: OutputRequest) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_fee(mut self, fee: FeeQuote) -> Self {
        self.fee = Some(fee);
        self
    }

    /// Resolve the two mutually exclusive funding modes
    pub fn funding(&self) -> Result<Funding> {
        match (&self.wallet, &self.inputs) {
            (Some(_), Some(_)) => Err(Error::InvalidParameterCombination(
                "wallet and inputs are mutually exclusive".to_string(),
            )),
            (Some(wallet), None) => Ok(Funding::Wallet(wallet.clone())),
            (None, Some(inputs)) if !inputs.is_empty() => Ok(Funding::Inputs(inputs.clone())),
            (None, Some(_)) => Err(Error::invalid_parameter("inputs", "must not be empty")),
            (None, None) => Err(Error::invalid_parameter("wallet", "a wallet or explicit inputs are required")),
        }
    }

    /// The wallet, for builders that only support wallet funding
    pub fn require_wallet(&self) -> Result<&WalletKeys> {
        let wallet = match (&self.wallet, &self.inputs) {
            (Some(wallet), None) => wallet,
            (None, Some(_)) => {
                return Err(Error::InvalidParameterCombination(format!(
                    "explicit inputs are not supported on {}",
                    self.protocol
                )))
            }
            _ => {
                self.funding()?;
                return Err(Error::invalid_parameter("wallet", "required"));
            }
        };
        if wallet.address.trim().is_empty() {
            return Err(Error::invalid_parameter("wallet.address", "must not be empty"));
        }
        if wallet.private_key.trim().is_empty() {
            return Err(Error::invalid_parameter("wallet.privateKey", "must not be empty"));
        }
        Ok(wallet)
    }

    /// Builders that move value to exactly one destination
    pub fn single_output(&self) -> Result<&OutputRequest> {
        match self.outputs.as_slice() {
            [output] => {
                if output.destination_address.trim().is_empty() {
                    return Err(Error::invalid_parameter("destination", "must not be empty"));
                }
                Ok(output)
            }
            [] => Err(Error::invalid_parameter("outputs", "a destination is required")),
            _ => Err(Error::invalid_parameter("outputs", format!(
                "{} accepts exactly one output",
                self.protocol
            ))),
        }
    }

    /// Validate the attached data payload and return its bytes
    pub fn data_payload(&self, limit: usize) -> Result<Option<Vec<u8>>> {
        match &self.data {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(text)) => {
                if text.len() > limit {
                    return Err(Error::DataPayload(format!(
                        "data is {} bytes, limit is {}",
                        text.len(),
                        limit
                    )));
                }
                Ok(Some(text.as_bytes().to_vec()))
            }
            Some(other) => Err(Error::DataPayload(format!(
                "data must be a string, got {}",
                json_type_name(other)
            ))),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Stages every build passes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    CollectInputs,
    ComputeFee,
    AssembleOutputs,
    SerializeUnsigned,
    Sign,
    SerializeSigned,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::CollectInputs => "collect_inputs",
            BuildStage::ComputeFee => "compute_fee",
            BuildStage::AssembleOutputs => "assemble_outputs",
            BuildStage::SerializeUnsigned => "serialize_unsigned",
            BuildStage::Sign => "sign",
            BuildStage::SerializeSigned => "serialize_signed",
        };
        f.write_str(name)
    }
}
