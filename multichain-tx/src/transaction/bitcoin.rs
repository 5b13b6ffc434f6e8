//! Bitcoin P2PKH transfers

use std::str::FromStr;

use bitcoin::blockdata::opcodes;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{absolute, transaction, Address, Amount, OutPoint, PrivateKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use tracing::debug;

use crate::crypto::keys::parse_secp256k1_secret;
use crate::crypto::Secp256k1Signer;
use crate::error::{Error, Result};
use crate::protocol::{Network, Protocol};
use crate::selection::{select_utxos, FeeSource, SelectionTarget};
use super::builder::BuildContext;
use super::types::{BlobEncoding, BuildRequest, BuildStage, Funding, KeyedInput, SignedTransaction, SpendableOutput};

const PROTOCOL: Protocol = Protocol::Bitcoin;

fn bitcoin_network(network: Network) -> bitcoin::Network {
    match network {
        Network::Mainnet => bitcoin::Network::Bitcoin,
        Network::Testnet => bitcoin::Network::Testnet,
    }
}

fn parse_address(parameter: &str, address: &str, network: bitcoin::Network) -> Result<Address> {
    Address::from_str(address.trim())
        .map_err(|e| Error::invalid_parameter(parameter, e.to_string()))?
        .require_network(network)
        .map_err(|e| Error::invalid_parameter(parameter, e.to_string()))
}

/// Hex keys are taken as compressed; WIF carries its own compression flag.
fn parse_private_key(parameter: &str, private_key: &str, network: bitcoin::Network) -> Result<PrivateKey> {
    if let Ok(key) = PrivateKey::from_wif(private_key.trim()) {
        return Ok(key);
    }
    let secret = parse_secp256k1_secret(parameter, private_key)?;
    Ok(PrivateKey::new(secret, network))
}

fn to_satoshis(value: u128) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::InvalidAmount {
        value: value.to_string(),
        reason: "exceeds the satoshi range".to_string(),
    })
}

/// An input with everything needed to sign it
struct Spend {
    outpoint: OutPoint,
    value: u128,
    key: PrivateKey,
    script_pubkey: ScriptBuf,
}

impl Spend {
    fn new(parameter: &str, utxo: &SpendableOutput, key: PrivateKey, owner: &Address) -> Result<Self> {
        let txid = Txid::from_str(&utxo.transaction_id)
            .map_err(|e| Error::invalid_parameter(parameter, format!("invalid transaction id: {}", e)))?;
        Ok(Self {
            outpoint: OutPoint::new(txid, utxo.output_index),
            value: utxo.value,
            key,
            script_pubkey: owner.script_pubkey(),
        })
    }
}

/// Check that `key` controls `owner` and return the P2PKH address
fn owner_address(parameter: &str, key: &PrivateKey, owner: &str, network: bitcoin::Network) -> Result<Address> {
    let secp = bitcoin::secp256k1::Secp256k1::signing_only();
    let derived = Address::p2pkh(&key.public_key(&secp), network);
    let claimed = parse_address(parameter, owner, network)?;
    if derived != claimed {
        return Err(Error::invalid_parameter(parameter, "private key does not control the owner address"));
    }
    Ok(derived)
}

pub(crate) async fn build(ctx: &BuildContext<'_>, request: &BuildRequest) -> Result<SignedTransaction> {
    let network = bitcoin_network(ctx.config.network);
    let data = request.data_payload(ctx.config.data_payload_limit)?;

    if request.outputs.is_empty() {
        return Err(Error::invalid_parameter("outputs", "at least one output is required"));
    }
    let mut outputs = Vec::with_capacity(request.outputs.len());
    for (i, output) in request.outputs.iter().enumerate() {
        let address = parse_address(&format!("outputs[{}].destinationAddress", i), &output.destination_address, network)?;
        let value = crate::units::parse_positive_amount(&output.amount, PROTOCOL.decimals())?;
        outputs.push((address.script_pubkey(), value));
    }
    let outputs_total = outputs
        .iter()
        .try_fold(0u128, |acc, (_, value)| acc.checked_add(*value))
        .ok_or_else(|| Error::InvalidAmount {
            value: "outputs".to_string(),
            reason: "output sum overflow".to_string(),
        })?;
    let requested_outputs = outputs.len() + usize::from(data.is_some());

    let mut template = ctx.fee_template(request);
    template.destination = request.outputs.first().map(|o| o.destination_address.clone());

    ctx.stage(BuildStage::CollectInputs);
    let (spends, change) = match request.funding()? {
        Funding::Wallet(wallet) => {
            let key = parse_private_key("wallet.privateKey", &wallet.private_key, network)?;
            let owner = owner_address("wallet.address", &key, &wallet.address, network)?;
            let candidates = ctx.services.utxo_index.get_utxos(&wallet.address, PROTOCOL).await?;
            debug!(candidates = candidates.len(), "utxos fetched");

            ctx.stage(BuildStage::ComputeFee);
            template.from = Some(wallet.address.clone());
            let fee_source = match &request.fee {
                Some(quote) => FeeSource::Fixed(quote.clone().into_flat(PROTOCOL)?.value),
                None => FeeSource::Oracle {
                    oracle: ctx.services.fee_oracle.as_ref(),
                    template,
                },
            };
            let target = SelectionTarget {
                protocol: PROTOCOL,
                token: PROTOCOL.native_symbol().to_string(),
                outputs_total,
                requested_outputs,
            };
            let selection = select_utxos(&candidates, &target, &fee_source).await?;

            let spends = selection
                .selected_inputs
                .iter()
                .enumerate()
                .map(|(i, utxo)| Spend::new(&format!("utxos[{}]", i), utxo, key, &owner))
                .collect::<Result<Vec<_>>>()?;
            let change = (selection.change_amount > 0).then(|| (owner.script_pubkey(), selection.change_amount));
            (spends, change)
        }
        Funding::Inputs(inputs) => explicit_spends(ctx, request, &inputs, network, outputs_total, requested_outputs, template).await?,
    };

    ctx.stage(BuildStage::AssembleOutputs);
    let mut tx_outputs = Vec::with_capacity(outputs.len() + 2);
    for (script_pubkey, value) in outputs {
        tx_outputs.push(TxOut {
            value: Amount::from_sat(to_satoshis(value)?),
            script_pubkey,
        });
    }
    if let Some(data) = data {
        tx_outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: op_return(&data)?,
        });
    }
    if let Some((script_pubkey, value)) = change {
        tx_outputs.push(TxOut {
            value: Amount::from_sat(to_satoshis(value)?),
            script_pubkey,
        });
    }

    ctx.stage(BuildStage::SerializeUnsigned);
    let tx = unsigned_transaction(&spends, tx_outputs);
    ctx.stage(BuildStage::Sign);
    let tx = sign(tx, &spends)?;
    ctx.stage(BuildStage::SerializeSigned);
    Ok(SignedTransaction {
        protocol: PROTOCOL,
        serialized_blob: serialize_hex(&tx),
        encoding: BlobEncoding::Hex,
        derived_hash: Some(tx.txid().to_string()),
    })
}

/// Every supplied input is spent. The fee shortfall check happens here
/// rather than through selection.
async fn explicit_spends(
    ctx: &BuildContext<'_>,
    request: &BuildRequest,
    inputs: &[KeyedInput],
    network: bitcoin::Network,
    outputs_total: u128,
    requested_outputs: usize,
    template: super::external::FeeRequest,
) -> Result<(Vec<Spend>, Option<(ScriptBuf, u128)>)> {
    let mut spends = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let parameter = format!("inputs[{}]", i);
        let key = parse_private_key(&format!("{}.privateKey", parameter), &input.private_key, network)?;
        let owner = owner_address(&format!("{}.ownerAddress", parameter), &key, &input.output.owner_address, network)?;
        spends.push(Spend::new(&parameter, &input.output, key, &owner)?);
    }
    let change_script = match &request.change_address {
        Some(address) => Some(parse_address("changeAddress", address, network)?.script_pubkey()),
        None => None,
    };

    ctx.stage(BuildStage::ComputeFee);
    let num_outputs = requested_outputs + usize::from(change_script.is_some());
    let fee = ctx
        .quote(request, template.for_shape(spends.len(), num_outputs))
        .await?
        .into_flat(PROTOCOL)?
        .value;

    let input_total: u128 = spends.iter().map(|s| s.value).sum();
    let required = outputs_total.saturating_add(fee);
    if input_total < required {
        return Err(Error::InsufficientBalance {
            protocol: PROTOCOL.to_string(),
            token: PROTOCOL.native_symbol().to_string(),
            required,
            available: input_total,
        });
    }
    let change = change_script
        .map(|script| (script, input_total - required))
        .filter(|(_, value)| *value > 0);
    Ok((spends, change))
}

fn op_return(data: &[u8]) -> Result<ScriptBuf> {
    let push = PushBytesBuf::try_from(data.to_vec()).map_err(|e| Error::DataPayload(e.to_string()))?;
    Ok(Builder::new()
        .push_opcode(opcodes::all::OP_RETURN)
        .push_slice(push)
        .into_script())
}

fn unsigned_transaction(spends: &[Spend], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input: spends
            .iter()
            .map(|spend| TxIn {
                previous_output: spend.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}

fn sign(mut tx: Transaction, spends: &[Spend]) -> Result<Transaction> {
    let sighashes = {
        let cache = SighashCache::new(&tx);
        spends
            .iter()
            .enumerate()
            .map(|(i, spend)| {
                cache
                    .legacy_signature_hash(i, &spend.script_pubkey, EcdsaSighashType::All.to_u32())
                    .map(|hash| hash.to_byte_array())
                    .map_err(|e| Error::Serialization(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?
    };

    for ((input, spend), sighash) in tx.input.iter_mut().zip(spends).zip(sighashes) {
        let signer = Secp256k1Signer::new(spend.key.inner);
        let mut signature = signer.sign_digest_der(PROTOCOL, &sighash)?;
        signature.push(EcdsaSighashType::All.to_u32() as u8);
        let signature = PushBytesBuf::try_from(signature).map_err(|e| Error::Serialization(e.to_string()))?;
        let public_key = bitcoin::PublicKey {
            compressed: spend.key.compressed,
            inner: signer.public_key(),
        };
        input.script_sig = Builder::new().push_slice(signature).push_key(&public_key).into_script();
    }
    Ok(tx)
}
