//! Hathor token transfers
//!
//! A Hathor transaction is serialized as three consecutive parts:
//!
//! * funds: version, token/input/output counts, token uids, inputs, outputs
//! * graph: weight, timestamp, parents
//! * nonce
//!
//! Inputs sign the funds part with every input's data field emptied. After
//! signing, the transaction is handed to the mining service, which chooses
//! parents, timestamp, weight and nonce.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bs58::Alphabet;
use tracing::debug;

use crate::crypto::hash::sha256d;
use crate::crypto::keys::base58::{
    decode_check, public_key_to_address, HATHOR_P2PKH_MAINNET, HATHOR_P2PKH_TESTNET, HATHOR_P2SH_MAINNET,
    HATHOR_P2SH_TESTNET,
};
use crate::crypto::keys::{decode_hash32, parse_secp256k1_secret};
use crate::crypto::Secp256k1Signer;
use crate::error::{Error, Result};
use crate::protocol::{Network, Protocol};
use crate::selection::{select_token_utxos, token_of};
use super::builder::BuildContext;
use super::external::MinedFields;
use super::mining::mine;
use super::types::{Authority, BlobEncoding, BuildRequest, BuildStage, SignedTransaction, SpendableOutput};

const PROTOCOL: Protocol = Protocol::Hathor;

/// Token id of the native HTR token
pub const NATIVE_TOKEN: &str = "00";

const TX_VERSION: u16 = 1;
const TOKEN_AUTHORITY_MASK: u8 = 0b1000_0000;
const TOKEN_MINT_MASK: u64 = 0b01;
const TOKEN_MELT_MASK: u64 = 0b10;
/// Data outputs burn this much HTR
const DATA_OUTPUT_VALUE: u64 = 1;

const MIN_WEIGHT: f64 = 14.0;
const WEIGHT_COEFFICIENT: f64 = 1.6;
const MIN_WEIGHT_K: f64 = 100.0;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_PUSHDATA1: u8 = 0x4c;

#[derive(Debug, Clone, PartialEq)]
pub struct HathorInput {
    pub tx_id: [u8; 32],
    pub index: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HathorOutput {
    pub value: u64,
    /// `0` for HTR, token index + 1 otherwise; high bit marks an authority
    pub token_data: u8,
    pub script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HathorTx {
    pub version: u16,
    pub tokens: Vec<[u8; 32]>,
    pub inputs: Vec<HathorInput>,
    pub outputs: Vec<HathorOutput>,
    pub weight: f64,
    pub timestamp: u32,
    pub parents: Vec<[u8; 32]>,
    pub nonce: u32,
}

fn count(what: &str, len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| Error::Serialization(format!("too many {}: {}", what, len)))
}

fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| Error::Serialization("script too long".to_string()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

/// Values above `i32::MAX` are written as a negated 8-byte integer
fn write_output_value(buf: &mut Vec<u8>, value: u64) -> Result<()> {
    if value <= i32::MAX as u64 {
        buf.extend_from_slice(&(value as i32).to_be_bytes());
    } else {
        let value = i64::try_from(value).map_err(|_| Error::Serialization(format!("output value {} too large", value)))?;
        buf.extend_from_slice(&(-value).to_be_bytes());
    }
    Ok(())
}

impl HathorTx {
    fn funds(&self, with_input_data: bool) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.push(count("tokens", self.tokens.len())?);
        buf.push(count("inputs", self.inputs.len())?);
        buf.push(count("outputs", self.outputs.len())?);
        for token in &self.tokens {
            buf.extend_from_slice(token);
        }
        for input in &self.inputs {
            buf.extend_from_slice(&input.tx_id);
            buf.push(input.index);
            let data: &[u8] = if with_input_data { &input.data } else { &[] };
            write_var_bytes(&mut buf, data)?;
        }
        for output in &self.outputs {
            write_output_value(&mut buf, output.value)?;
            buf.push(output.token_data);
            write_var_bytes(&mut buf, &output.script)?;
        }
        Ok(buf)
    }

    fn graph(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(13 + 32 * self.parents.len());
        buf.extend_from_slice(&self.weight.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.push(count("parents", self.parents.len())?);
        for parent in &self.parents {
            buf.extend_from_slice(parent);
        }
        Ok(buf)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = self.funds(true)?;
        buf.extend(self.graph()?);
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        Ok(buf)
    }

    /// Digest every input signs
    pub fn sighash_all(&self) -> Result<[u8; 32]> {
        Ok(sha256d(&self.funds(false)?))
    }

    /// Transaction id, displayed byte-reversed
    pub fn hash(&self) -> Result<String> {
        let mut hash = sha256d(&self.to_bytes()?);
        hash.reverse();
        Ok(hex::encode(hash))
    }

    fn merge_mined(&mut self, fields: &MinedFields) -> Result<()> {
        let nonce = fields.nonce.trim_start_matches("0x");
        self.nonce = u32::from_str_radix(nonce, 16)
            .map_err(|e| Error::external("mining", format!("invalid nonce '{}': {}", fields.nonce, e)))?;
        self.parents = fields
            .parents
            .iter()
            .map(|parent| decode_hash32("parents", parent))
            .collect::<Result<_>>()?;
        self.timestamp = fields.timestamp;
        self.weight = fields.weight;
        Ok(())
    }
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u8::try_from(data.len())
        .map_err(|_| Error::DataPayload(format!("{} bytes exceed a single script push", data.len())))?;
    if len >= OP_PUSHDATA1 {
        script.push(OP_PUSHDATA1);
    }
    script.push(len);
    script.extend_from_slice(data);
    Ok(())
}

/// Locking script for a base58 address on `network`
pub fn output_script(parameter: &str, address: &str, network: Network) -> Result<Vec<u8>> {
    let (version, hash) = decode_check(parameter, address, Alphabet::BITCOIN)?;
    let mut script = Vec::with_capacity(25);
    match (version, network) {
        (HATHOR_P2PKH_MAINNET, Network::Mainnet) | (HATHOR_P2PKH_TESTNET, Network::Testnet) => {
            script.extend_from_slice(&[OP_DUP, OP_HASH160]);
            push_data(&mut script, &hash)?;
            script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        }
        (HATHOR_P2SH_MAINNET, Network::Mainnet) | (HATHOR_P2SH_TESTNET, Network::Testnet) => {
            script.push(OP_HASH160);
            push_data(&mut script, &hash)?;
            script.push(OP_EQUAL);
        }
        _ => {
            return Err(Error::invalid_parameter(
                parameter,
                format!("address '{}' is not a {:?} address", address, network),
            ))
        }
    }
    Ok(script)
}

fn data_script(data: &[u8]) -> Result<Vec<u8>> {
    let mut script = Vec::with_capacity(data.len() + 3);
    push_data(&mut script, data)?;
    script.push(OP_CHECKSIG);
    Ok(script)
}

/// Minimum proof-of-work weight for a transaction of `size` bytes moving
/// `outputs_sum` base units
pub fn minimum_weight(size: usize, outputs_sum: u128) -> f64 {
    let amount = (outputs_sum as f64 / 10f64.powi(PROTOCOL.decimals() as i32)).max(1.0);
    let weight = WEIGHT_COEFFICIENT * (size as f64).log2() + 4.0 / (1.0 + MIN_WEIGHT_K / amount) + 4.0;
    weight.max(MIN_WEIGHT)
}

/// Custom token uids in order of first use
#[derive(Default)]
struct TokenTable {
    uids: Vec<String>,
}

impl TokenTable {
    /// `token_data` index for `token`, registering it if new
    fn index(&mut self, token: &str) -> Result<u8> {
        if token == NATIVE_TOKEN {
            return Ok(0);
        }
        let position = match self.uids.iter().position(|uid| uid == token) {
            Some(position) => position,
            None => {
                self.uids.push(token.to_string());
                self.uids.len() - 1
            }
        };
        let index = count("tokens", position + 1)?;
        if index & TOKEN_AUTHORITY_MASK != 0 {
            return Err(Error::Serialization("too many tokens".to_string()));
        }
        Ok(index)
    }

    fn into_uids(self) -> Result<Vec<[u8; 32]>> {
        self.uids.iter().map(|uid| decode_hash32("tokenId", uid)).collect()
    }
}

fn to_input(utxo: &SpendableOutput) -> Result<HathorInput> {
    Ok(HathorInput {
        tx_id: decode_hash32("transactionId", &utxo.transaction_id)?,
        index: u8::try_from(utxo.output_index)
            .map_err(|_| Error::invalid_parameter("outputIndex", format!("{} out of range", utxo.output_index)))?,
        data: Vec::new(),
    })
}

fn to_value(value: u128) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::InvalidAmount {
        value: value.to_string(),
        reason: "exceeds the output value range".to_string(),
    })
}

fn authority_value(authority: Authority) -> u64 {
    match authority {
        Authority::Mint => TOKEN_MINT_MASK,
        Authority::Melt => TOKEN_MELT_MASK,
    }
}

fn normalize_token(token_id: &Option<String>) -> Result<String> {
    let token = token_of(token_id, NATIVE_TOKEN);
    if token != NATIVE_TOKEN {
        decode_hash32("tokenId", token)?;
    }
    Ok(token.to_string())
}

pub(crate) async fn build(ctx: &BuildContext<'_>, request: &BuildRequest) -> Result<SignedTransaction> {
    let network = ctx.config.network;
    let wallet = request.require_wallet()?;
    let data = request.data_payload(ctx.config.data_payload_limit)?;
    if request.outputs.is_empty() && request.authorities.is_empty() {
        return Err(Error::invalid_parameter("outputs", "at least one output is required"));
    }

    let signer = Secp256k1Signer::new(parse_secp256k1_secret("wallet.privateKey", &wallet.private_key)?);
    let public_key = signer.public_key().serialize();
    let version = if network.is_mainnet() { HATHOR_P2PKH_MAINNET } else { HATHOR_P2PKH_TESTNET };
    if public_key_to_address(&public_key, version, Alphabet::BITCOIN) != wallet.address.trim() {
        return Err(Error::invalid_parameter("wallet.address", "private key does not control the wallet address"));
    }
    let change_script = output_script("wallet.address", &wallet.address, network)?;

    let mut tokens = TokenTable::default();
    let mut outputs = Vec::new();
    let mut totals: BTreeMap<String, u128> = BTreeMap::new();
    for (i, output) in request.outputs.iter().enumerate() {
        let token = normalize_token(&output.token_id)?;
        let value = crate::units::parse_positive_amount(&output.amount, PROTOCOL.decimals())?;
        outputs.push(HathorOutput {
            value: to_value(value)?,
            token_data: tokens.index(&token)?,
            script: output_script(&format!("outputs[{}].destinationAddress", i), &output.destination_address, network)?,
        });
        let total = totals.entry(token).or_insert(0);
        *total = total.checked_add(value).ok_or_else(|| Error::InvalidAmount {
            value: output.amount.clone(),
            reason: "output sum overflow".to_string(),
        })?;
    }
    if let Some(data) = &data {
        outputs.push(HathorOutput {
            value: DATA_OUTPUT_VALUE,
            token_data: 0,
            script: data_script(data)?,
        });
        *totals.entry(NATIVE_TOKEN.to_string()).or_insert(0) += DATA_OUTPUT_VALUE as u128;
    }

    let authority_scripts = request
        .authorities
        .iter()
        .enumerate()
        .map(|(i, authority)| {
            let token = normalize_token(&Some(authority.token_id.clone()))?;
            let script = match &authority.destination {
                Some(destination) => {
                    let parameter = format!("authorities[{}].destination", i);
                    Some(output_script(&parameter, destination, network)?)
                }
                None => None,
            };
            Ok((token, script))
        })
        .collect::<Result<Vec<_>>>()?;

    ctx.stage(BuildStage::CollectInputs);
    let candidates = ctx.services.utxo_index.get_utxos(&wallet.address, PROTOCOL).await?;
    debug!(candidates = candidates.len(), tokens = totals.len(), "utxos fetched");

    ctx.stage(BuildStage::ComputeFee);
    let selections = select_token_utxos(PROTOCOL, &candidates, NATIVE_TOKEN, &totals).await?;

    ctx.stage(BuildStage::AssembleOutputs);
    let mut inputs = Vec::new();
    for (token, selection) in &selections {
        for utxo in &selection.selected_inputs {
            inputs.push(to_input(utxo)?);
        }
        if selection.change_amount > 0 {
            outputs.push(HathorOutput {
                value: to_value(selection.change_amount)?,
                token_data: tokens.index(token)?,
                script: change_script.clone(),
            });
        }
    }

    let mut used_authorities: Vec<&SpendableOutput> = Vec::new();
    for (i, (authority, (token, script))) in request.authorities.iter().zip(authority_scripts).enumerate() {
        let utxo = candidates
            .iter()
            .find(|u| {
                u.authority == Some(authority.authority)
                    && token_of(&u.token_id, NATIVE_TOKEN) == token
                    && !used_authorities.iter().any(|used| std::ptr::eq(*used, *u))
            })
            .ok_or_else(|| {
                Error::invalid_parameter(
                    &format!("authorities[{}]", i),
                    format!("no {:?} authority available for token {}", authority.authority, token),
                )
            })?;
        used_authorities.push(utxo);
        inputs.push(to_input(utxo)?);

        let token_index = tokens.index(&token)?;
        if let Some(script) = script {
            outputs.push(HathorOutput {
                value: authority_value(authority.authority),
                token_data: TOKEN_AUTHORITY_MASK | token_index,
                script,
            });
        }
    }

    ctx.stage(BuildStage::SerializeUnsigned);
    let outputs_sum: u128 = totals.values().sum();
    let mut tx = HathorTx {
        version: TX_VERSION,
        tokens: tokens.into_uids()?,
        inputs,
        outputs,
        weight: 0.0,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default(),
        parents: Vec::new(),
        nonce: 0,
    };
    tx.weight = minimum_weight(tx.to_bytes()?.len(), outputs_sum);

    ctx.stage(BuildStage::Sign);
    let sighash = tx.sighash_all()?;
    let signature = signer.sign_digest_der(PROTOCOL, &sighash)?;
    let mut input_data = Vec::with_capacity(signature.len() + public_key.len() + 2);
    push_data(&mut input_data, &signature)?;
    push_data(&mut input_data, &public_key)?;
    for input in &mut tx.inputs {
        input.data = input_data.clone();
    }

    let fields = mine(
        ctx.services.mining.as_ref(),
        ctx.services.sleeper.as_ref(),
        &ctx.config.mining,
        &hex::encode(tx.to_bytes()?),
    )
    .await?;
    tx.merge_mined(&fields)?;

    ctx.stage(BuildStage::SerializeSigned);
    Ok(SignedTransaction {
        protocol: PROTOCOL,
        serialized_blob: hex::encode(tx.to_bytes()?),
        encoding: BlobEncoding::Hex,
        derived_hash: Some(tx.hash()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> HathorTx {
        HathorTx {
            version: TX_VERSION,
            tokens: vec![[0xaa; 32]],
            inputs: vec![HathorInput { tx_id: [1; 32], index: 3, data: vec![9, 9] }],
            outputs: vec![
                HathorOutput { value: 100, token_data: 0, script: vec![OP_CHECKSIG] },
                HathorOutput { value: 1, token_data: TOKEN_AUTHORITY_MASK | 1, script: vec![] },
            ],
            weight: 17.5,
            timestamp: 1_700_000_000,
            parents: vec![[2; 32], [3; 32]],
            nonce: 0xdead_beef,
        }
    }

    #[test]
    fn test_funds_layout() {
        let funds = sample_tx().funds(true).unwrap();
        assert_eq!(&funds[..5], &[0x00, 0x01, 1, 1, 2]);
        assert_eq!(&funds[5..37], &[0xaa; 32]);
        // input: tx id, index, data length, data
        assert_eq!(funds[69], 3);
        assert_eq!(&funds[70..74], &[0x00, 0x02, 9, 9]);
        // first output: 4-byte value, token data, script
        assert_eq!(&funds[74..82], &[0, 0, 0, 100, 0, 0, 1, OP_CHECKSIG]);
    }

    #[test]
    fn test_large_values_use_negated_eight_bytes() {
        let mut buf = Vec::new();
        write_output_value(&mut buf, i32::MAX as u64).unwrap();
        assert_eq!(buf, vec![0x7f, 0xff, 0xff, 0xff]);

        let mut buf = Vec::new();
        write_output_value(&mut buf, 1 << 31).unwrap();
        assert_eq!(buf, (-(1i64 << 31)).to_be_bytes().to_vec());
    }

    #[test]
    fn test_sighash_ignores_input_data() {
        let tx = sample_tx();
        let mut stripped = tx.clone();
        stripped.inputs[0].data.clear();
        assert_eq!(tx.sighash_all().unwrap(), stripped.sighash_all().unwrap());
        assert_ne!(tx.to_bytes().unwrap(), stripped.to_bytes().unwrap());
    }

    #[test]
    fn test_graph_and_nonce_trail_the_funds() {
        let tx = sample_tx();
        let bytes = tx.to_bytes().unwrap();
        let funds_len = tx.funds(true).unwrap().len();
        assert_eq!(&bytes[funds_len..funds_len + 8], &17.5f64.to_be_bytes());
        assert_eq!(bytes[funds_len + 12], 2);
        assert_eq!(&bytes[bytes.len() - 4..], &0xdead_beefu32.to_be_bytes());
    }

    #[test]
    fn test_merge_mined_fields() {
        let mut tx = sample_tx();
        tx.merge_mined(&MinedFields {
            nonce: "0000002a".to_string(),
            parents: vec!["ab".repeat(32)],
            timestamp: 1_700_000_123,
            weight: 21.25,
        })
        .unwrap();
        assert_eq!(tx.nonce, 42);
        assert_eq!(tx.parents, vec![[0xab; 32]]);
        assert_eq!(tx.timestamp, 1_700_000_123);
    }

    #[test]
    fn test_output_script_checks_network() {
        let address = public_key_to_address(&[2u8; 33], HATHOR_P2PKH_TESTNET, Alphabet::BITCOIN);
        let script = output_script("destination", &address, Network::Testnet).unwrap();
        assert_eq!(script.len(), 25);
        assert_eq!(&script[..3], &[OP_DUP, OP_HASH160, 20]);

        assert!(output_script("destination", &address, Network::Mainnet).is_err());
    }

    #[test]
    fn test_data_script_push_sizes() {
        let short = data_script(&[7; 10]).unwrap();
        assert_eq!(&short[..2], &[10, 7]);
        assert_eq!(short.last(), Some(&OP_CHECKSIG));

        let long = data_script(&[7; 255]).unwrap();
        assert_eq!(&long[..2], &[OP_PUSHDATA1, 255]);
        assert_eq!(long.len(), 255 + 3);

        let err = data_script(&[7; 256]).unwrap_err();
        assert!(matches!(err, Error::DataPayload(_)));
    }

    #[test]
    fn test_minimum_weight_floor() {
        assert_eq!(minimum_weight(2, 1), MIN_WEIGHT);
        assert!(minimum_weight(200, 100_000_000) > MIN_WEIGHT);
    }

    #[test]
    fn test_token_table_indexes() {
        let mut table = TokenTable::default();
        assert_eq!(table.index(NATIVE_TOKEN).unwrap(), 0);
        assert_eq!(table.index(&"aa".repeat(32)).unwrap(), 1);
        assert_eq!(table.index(&"bb".repeat(32)).unwrap(), 2);
        assert_eq!(table.index(&"aa".repeat(32)).unwrap(), 1);
        assert_eq!(table.into_uids().unwrap().len(), 2);
    }
}
