//! Account-nonce transactions: Ethereum and Celo

use std::str::FromStr;

use ethers::abi::AbiEncode;
use ethers::contract::abigen;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, TransactionRequest, H256, U256};
use ethers::utils::rlp::RlpStream;
use tracing::debug;

use crate::crypto::hash::keccak256;
use crate::crypto::keys::{decode_hex, parse_secp256k1_secret};
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use super::builder::BuildContext;
use super::types::{
    BlobEncoding, BuildRequest, BuildStage, ContractCall, FeeQuote, SignedTransaction, TransactionKind,
};

abigen!(
    IERC20,
    r#"[
        function transfer(address recipient, uint256 amount) external returns (bool)
    ]"#,
);

/// Decimals assumed for token contracts that don't state theirs
const DEFAULT_TOKEN_DECIMALS: u32 = 18;

/// Everything that goes into an unsigned account transaction
#[derive(Debug, Clone, PartialEq)]
pub struct AccountTransaction {
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: U256,
    pub chain_id: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    /// Celo only: token the fee is paid in
    pub fee_currency: Option<Address>,
}

fn parse_address(parameter: &str, address: &str) -> Result<Address> {
    Address::from_str(address.trim()).map_err(|e| Error::invalid_parameter(parameter, format!("invalid address: {}", e)))
}

fn u256(value: u128) -> U256 {
    U256::from(value)
}

pub(crate) async fn build(ctx: &BuildContext<'_>, request: &BuildRequest) -> Result<SignedTransaction> {
    let protocol = ctx.protocol;
    let wallet = request.require_wallet()?;
    if request.fee_currency.is_some() && protocol != Protocol::Celo {
        return Err(Error::InvalidParameterCombination(format!(
            "feeCurrency is not supported on {}",
            protocol
        )));
    }
    if request.kind == TransactionKind::Trustline {
        return Err(Error::InvalidParameterCombination(format!("trustlines are not supported on {}", protocol)));
    }
    let output = request.single_output()?;

    let secret = parse_secp256k1_secret("wallet.privateKey", &wallet.private_key)?;
    let signer = LocalWallet::from_bytes(&secret.secret_bytes())
        .map_err(|_| Error::invalid_parameter("wallet.privateKey", "not a valid secp256k1 private key"))?;
    let from = parse_address("wallet.address", &wallet.address)?;
    if signer.address() != from {
        return Err(Error::invalid_parameter("wallet.address", "private key does not control the wallet address"));
    }
    let destination = parse_address("destination", &output.destination_address)?;
    let fee_currency = match &request.fee_currency {
        Some(token) => Some(parse_address("feeCurrency", token)?),
        None => None,
    };

    let contract = match (request.kind, &request.contract) {
        (TransactionKind::ContractCall, None) => {
            return Err(Error::invalid_parameter("contract", "required for contract calls"))
        }
        (_, contract) => contract.as_ref(),
    };
    let (to, value, data) = match contract {
        None => {
            let value = crate::units::parse_positive_amount(&output.amount, protocol.decimals())?;
            let data = request.data_payload(ctx.config.data_payload_limit)?.unwrap_or_default();
            (destination, u256(value), data)
        }
        Some(ContractCall::TokenTransfer { contract_address, decimals }) => {
            let amount =
                crate::units::parse_positive_amount(&output.amount, decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS))?;
            let call = TransferCall {
                recipient: destination,
                amount: u256(amount),
            };
            (parse_address("contract.contractAddress", contract_address)?, U256::zero(), call.encode())
        }
        Some(ContractCall::Raw { contract_address, data }) => {
            let value = crate::units::to_base_units(&output.amount, protocol.decimals())?;
            (
                parse_address("contract.contractAddress", contract_address)?,
                u256(value),
                decode_hex("contract.data", data)?,
            )
        }
    };

    ctx.stage(BuildStage::CollectInputs);
    let nonce = match request.nonce {
        Some(nonce) => nonce,
        None => ctx
            .services
            .account_info
            .get_account_info(&wallet.address, protocol)
            .await?
            .nonce
            .ok_or_else(|| Error::external("account-info", format!("no nonce for {}", wallet.address)))?,
    };
    debug!(nonce, "nonce resolved");

    ctx.stage(BuildStage::ComputeFee);
    let mut template = ctx.fee_template(request);
    template.from = Some(wallet.address.clone());
    template.destination = Some(output.destination_address.clone());
    template.amount = Some(output.amount.clone());
    if let Some(contract) = contract {
        template.contract_address = Some(contract.contract_address().to_string());
        if let ContractCall::TokenTransfer { .. } = contract {
            template.method = Some("transfer".to_string());
            template.params = vec![output.destination_address.clone(), output.amount.clone()];
        }
    }
    let (gas, gas_price, chain_id) = match ctx.quote(request, template).await? {
        FeeQuote::Gas { gas, gas_price, chain_id } => (gas, gas_price, chain_id),
        FeeQuote::Flat(_) => {
            return Err(Error::external(
                "fee-oracle",
                format!("expected gas parameters for {}, got a flat estimate", protocol),
            ))
        }
    };

    ctx.stage(BuildStage::AssembleOutputs);
    let tx = AccountTransaction {
        nonce,
        gas,
        gas_price: u256(gas_price),
        chain_id,
        to,
        value,
        data,
        fee_currency,
    };

    ctx.stage(BuildStage::Sign);
    let raw = match protocol {
        Protocol::Celo => sign_celo(&signer, &tx)?,
        _ => sign_ethereum(&signer, &tx)?,
    };

    ctx.stage(BuildStage::SerializeSigned);
    Ok(SignedTransaction {
        protocol,
        serialized_blob: format!("0x{}", hex::encode(&raw)),
        encoding: BlobEncoding::Hex,
        derived_hash: Some(format!("0x{}", hex::encode(keccak256(&raw)))),
    })
}

/// Legacy EIP-155 transaction
pub fn sign_ethereum(signer: &LocalWallet, tx: &AccountTransaction) -> Result<Vec<u8>> {
    let request = TransactionRequest::new()
        .from(signer.address())
        .to(tx.to)
        .value(tx.value)
        .gas(tx.gas)
        .gas_price(tx.gas_price)
        .nonce(tx.nonce)
        .data(Bytes::from(tx.data.clone()))
        .chain_id(tx.chain_id);
    let typed: TypedTransaction = request.into();
    let signer = signer.clone().with_chain_id(tx.chain_id);

    let signature = signer
        .sign_transaction_sync(&typed)
        .map_err(|e| Error::verification(Protocol::Ethereum, e))?;
    signature
        .verify(typed.sighash(), signer.address())
        .map_err(|e| Error::verification(Protocol::Ethereum, e))?;
    Ok(typed.rlp_signed(&signature).to_vec())
}

fn celo_fields(stream: &mut RlpStream, tx: &AccountTransaction) {
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas);
    match &tx.fee_currency {
        Some(currency) => stream.append(currency),
        None => stream.append_empty_data(),
    };
    // gateway fee recipient and gateway fee are always empty
    stream.append_empty_data();
    stream.append(&U256::zero());
    stream.append(&tx.to);
    stream.append(&tx.value);
    stream.append(&tx.data);
}

/// Celo legacy transaction, which carries the fee currency and gateway
/// fields between gas and recipient
pub fn sign_celo(signer: &LocalWallet, tx: &AccountTransaction) -> Result<Vec<u8>> {
    let mut unsigned = RlpStream::new_list(12);
    celo_fields(&mut unsigned, tx);
    unsigned.append(&tx.chain_id);
    unsigned.append(&0u8);
    unsigned.append(&0u8);
    let sighash = H256::from(keccak256(&unsigned.out()));

    let signature = signer
        .sign_hash(sighash)
        .map_err(|e| Error::verification(Protocol::Celo, e))?;
    let signature = Signature {
        r: signature.r,
        s: signature.s,
        v: signature.v - 27 + 35 + 2 * tx.chain_id,
    };
    signature
        .verify(sighash, signer.address())
        .map_err(|e| Error::verification(Protocol::Celo, e))?;

    let mut signed = RlpStream::new_list(12);
    celo_fields(&mut signed, tx);
    signed.append(&signature.v);
    signed.append(&signature.r);
    signed.append(&signature.s);
    Ok(signed.out().to_vec())
}

#[cfg(test)]
mod tests {
    use ethers::types::Transaction;
    use ethers::utils::rlp::Rlp;

    use super::*;

    fn signer() -> LocalWallet {
        LocalWallet::from_bytes(&[0x11; 32]).unwrap()
    }

    fn transfer(fee_currency: Option<Address>) -> AccountTransaction {
        AccountTransaction {
            nonce: 2,
            gas: 21_000,
            gas_price: U256::from(4_000_000u64),
            chain_id: 4,
            to: Address::repeat_byte(0xd0),
            value: U256::from(100_000_000_000_000_000u128),
            data: Vec::new(),
            fee_currency,
        }
    }

    #[test]
    fn test_ethereum_transfer_recovers_fields() {
        let raw = sign_ethereum(&signer(), &transfer(None)).unwrap();
        let decoded: Transaction = ethers::utils::rlp::decode(&raw).unwrap();

        assert_eq!(decoded.to, Some(Address::repeat_byte(0xd0)));
        assert_eq!(decoded.value, U256::from(100_000_000_000_000_000u128));
        assert_eq!(decoded.nonce, U256::from(2));
        assert_eq!(decoded.gas, U256::from(21_000));
        assert_eq!(decoded.recover_from().unwrap(), signer().address());
    }

    #[test]
    fn test_celo_carries_fee_currency_separately() {
        let currency = Address::repeat_byte(0xcc);
        let tx = transfer(Some(currency));
        let raw = sign_celo(&signer(), &tx).unwrap();
        let rlp = Rlp::new(&raw);

        assert_eq!(rlp.item_count().unwrap(), 12);
        assert_eq!(rlp.val_at::<U256>(1).unwrap(), U256::from(4_000_000u64));
        assert_eq!(rlp.val_at::<Address>(3).unwrap(), currency);
        assert_eq!(rlp.val_at::<Address>(6).unwrap(), Address::repeat_byte(0xd0));
        assert_eq!(rlp.val_at::<U256>(7).unwrap(), tx.value);

        let v: u64 = rlp.val_at(9).unwrap();
        assert!(v == 35 + 2 * 4 || v == 36 + 2 * 4);

        let mut unsigned = RlpStream::new_list(12);
        celo_fields(&mut unsigned, &tx);
        unsigned.append(&4u64);
        unsigned.append(&0u8);
        unsigned.append(&0u8);
        let signature = Signature {
            r: rlp.val_at(10).unwrap(),
            s: rlp.val_at(11).unwrap(),
            v,
        };
        let recovered = signature.recover(H256::from(keccak256(&unsigned.out()))).unwrap();
        assert_eq!(recovered, signer().address());
    }

    #[test]
    fn test_celo_without_fee_currency_leaves_field_empty() {
        let raw = sign_celo(&signer(), &transfer(None)).unwrap();
        let rlp = Rlp::new(&raw);
        assert!(rlp.at(3).unwrap().is_empty());
    }

    #[test]
    fn test_token_transfer_call_data() {
        let call = TransferCall {
            recipient: Address::repeat_byte(0xd0),
            amount: U256::from(5u64),
        };
        let data = call.encode();
        // transfer(address,uint256)
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(data.len(), 4 + 32 + 32);
    }
}
