//! XRP ledger payments and trust lines
//!
//! Fields are written in canonical order (type code, then field code) using
//! the ledger's binary codec. Signing covers the `STX\0`-prefixed encoding
//! without `TxnSignature`; the transaction id is the SHA-512 half of the
//! `TXN\0`-prefixed signed blob.

use std::str::FromStr;

use bs58::Alphabet;
use rust_decimal::Decimal;
use tracing::debug;

use crate::crypto::hash::sha512_half;
use crate::crypto::keys::base58::{decode_check, public_key_to_address, RIPPLE_ACCOUNT_ID};
use crate::crypto::keys::{decode_hash32, decode_hex, parse_secp256k1_secret};
use crate::crypto::{Ed25519Signer, Secp256k1Signer};
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use super::builder::BuildContext;
use super::types::{BlobEncoding, BuildRequest, BuildStage, SignedTransaction, TransactionKind};

const PROTOCOL: Protocol = Protocol::Ripple;

const TT_PAYMENT: u16 = 0;
const TT_TRUST_SET: u16 = 20;
const TF_FULLY_CANONICAL_SIG: u32 = 0x8000_0000;

/// Ledgers a transaction stays valid for after the current one
pub const LEDGER_OFFSET: u32 = 20;

const HASH_PREFIX_SIGN: [u8; 4] = *b"STX\0";
const HASH_PREFIX_TX_ID: [u8; 4] = *b"TXN\0";

const ST_UINT16: u8 = 1;
const ST_UINT32: u8 = 2;
const ST_AMOUNT: u8 = 6;
const ST_BLOB: u8 = 7;
const ST_ACCOUNT: u8 = 8;
const ST_OBJECT: u8 = 14;
const ST_ARRAY: u8 = 15;

const OBJECT_END: u8 = 0xe1;
const ARRAY_END: u8 = 0xf1;

const NATIVE_POSITIVE: u64 = 0x4000_0000_0000_0000;
const ISSUED_NOT_NATIVE: u64 = 0x8000_0000_0000_0000;
const ISSUED_POSITIVE: u64 = 0x4000_0000_0000_0000;
const MIN_MANTISSA: u128 = 1_000_000_000_000_000;
const MAX_MANTISSA: u128 = 9_999_999_999_999_999;
const MIN_EXPONENT: i32 = -96;
const MAX_EXPONENT: i32 = 80;
const MAX_DROPS: u64 = 100_000_000_000_000_000;
/// Largest representable issued value, the default trust line limit
const MAX_ISSUED_VALUE: u64 =
    ISSUED_NOT_NATIVE | ISSUED_POSITIVE | ((MAX_EXPONENT + 97) as u64) << 54 | MAX_MANTISSA as u64;

/// `type_code` and `field_code` packed as the codec expects
pub fn field_header(type_code: u8, field_code: u8) -> Vec<u8> {
    match (type_code < 16, field_code < 16) {
        (true, true) => vec![type_code << 4 | field_code],
        (false, true) => vec![field_code, type_code],
        (true, false) => vec![type_code << 4, field_code],
        (false, false) => vec![0, type_code, field_code],
    }
}

/// Variable-length prefix
pub fn vl_prefix(len: usize) -> Result<Vec<u8>> {
    match len {
        0..=192 => Ok(vec![len as u8]),
        193..=12_480 => {
            let len = len - 193;
            Ok(vec![193 + (len >> 8) as u8, (len & 0xff) as u8])
        }
        12_481..=918_744 => {
            let len = len - 12_481;
            Ok(vec![241 + (len >> 16) as u8, ((len >> 8) & 0xff) as u8, (len & 0xff) as u8])
        }
        _ => Err(Error::Serialization(format!("blob of {} bytes is too long", len))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    Drops(u64),
    Issued {
        /// Encoded value bits
        value: u64,
        currency: [u8; 20],
        issuer: [u8; 20],
    },
}

fn to_drops(value: u128) -> Result<u64> {
    match u64::try_from(value) {
        Ok(drops) if drops <= MAX_DROPS => Ok(drops),
        _ => Err(Error::InvalidAmount {
            value: value.to_string(),
            reason: "exceeds the XRP supply".to_string(),
        }),
    }
}

impl Amount {
    pub fn drops(drops: u128) -> Result<Self> {
        Ok(Amount::Drops(to_drops(drops)?))
    }

    pub fn issued(value: &str, currency: &str, issuer: &str) -> Result<Self> {
        Ok(Amount::Issued {
            value: issued_value(value)?,
            currency: currency_code(currency)?,
            issuer: account_id("issuer", issuer)?,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Amount::Drops(drops) => buf.extend_from_slice(&(NATIVE_POSITIVE | drops).to_be_bytes()),
            Amount::Issued { value, currency, issuer } => {
                buf.extend_from_slice(&value.to_be_bytes());
                buf.extend_from_slice(currency);
                buf.extend_from_slice(issuer);
            }
        }
    }
}

/// Encode a non-negative decimal as the 64-bit issued-currency value:
/// not-native bit, sign bit, 8-bit biased exponent, 54-bit mantissa
pub fn issued_value(value: &str) -> Result<u64> {
    let invalid = |reason: &str| Error::InvalidAmount {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let decimal = Decimal::from_str(value.trim()).map_err(|_| invalid("not a decimal number"))?;
    if decimal.is_sign_negative() && !decimal.is_zero() {
        return Err(invalid("amount must not be negative"));
    }
    let mut mantissa = decimal.mantissa().unsigned_abs();
    if mantissa == 0 {
        return Ok(ISSUED_NOT_NATIVE);
    }
    let mut exponent = -(decimal.scale() as i32);
    while mantissa < MIN_MANTISSA {
        mantissa *= 10;
        exponent -= 1;
    }
    while mantissa > MAX_MANTISSA {
        if mantissa % 10 != 0 {
            return Err(invalid("more than 16 significant digits"));
        }
        mantissa /= 10;
        exponent += 1;
    }
    if !(MIN_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
        return Err(invalid("exponent out of range"));
    }
    Ok(ISSUED_NOT_NATIVE | ISSUED_POSITIVE | ((exponent + 97) as u64) << 54 | mantissa as u64)
}

/// Three-letter ISO-style code or 40 hex characters
pub fn currency_code(code: &str) -> Result<[u8; 20]> {
    let code = code.trim();
    let mut bytes = [0u8; 20];
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_alphanumeric()) && !code.eq_ignore_ascii_case("XRP") {
        bytes[12..15].copy_from_slice(code.as_bytes());
        return Ok(bytes);
    }
    if code.len() == 40 {
        let raw = decode_hex("currency", code)?;
        bytes.copy_from_slice(&raw);
        return Ok(bytes);
    }
    Err(Error::invalid_parameter("currency", format!("'{}' is not a valid currency code", code)))
}

pub fn account_id(parameter: &str, address: &str) -> Result<[u8; 20]> {
    let (version, payload) = decode_check(parameter, address, Alphabet::RIPPLE)?;
    if version != RIPPLE_ACCOUNT_ID {
        return Err(Error::invalid_parameter(parameter, format!("'{}' is not an account address", address)));
    }
    let mut id = [0u8; 20];
    id.copy_from_slice(&payload);
    Ok(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RippleTx {
    pub transaction_type: u16,
    pub flags: u32,
    pub sequence: u32,
    pub destination_tag: Option<u32>,
    pub last_ledger_sequence: Option<u32>,
    pub amount: Option<Amount>,
    pub limit_amount: Option<Amount>,
    pub fee: u64,
    pub signing_pub_key: Vec<u8>,
    pub txn_signature: Option<Vec<u8>>,
    pub account: [u8; 20],
    pub destination: Option<[u8; 20]>,
    pub memos: Vec<Vec<u8>>,
}

fn write_vl(buf: &mut Vec<u8>, type_code: u8, field_code: u8, data: &[u8]) -> Result<()> {
    buf.extend(field_header(type_code, field_code));
    buf.extend(vl_prefix(data.len())?);
    buf.extend_from_slice(data);
    Ok(())
}

impl RippleTx {
    pub fn to_bytes(&self, with_signature: bool) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(256);
        buf.extend(field_header(ST_UINT16, 2));
        buf.extend_from_slice(&self.transaction_type.to_be_bytes());
        buf.extend(field_header(ST_UINT32, 2));
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend(field_header(ST_UINT32, 4));
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        if let Some(tag) = self.destination_tag {
            buf.extend(field_header(ST_UINT32, 14));
            buf.extend_from_slice(&tag.to_be_bytes());
        }
        if let Some(ledger) = self.last_ledger_sequence {
            buf.extend(field_header(ST_UINT32, 27));
            buf.extend_from_slice(&ledger.to_be_bytes());
        }
        if let Some(amount) = &self.amount {
            buf.extend(field_header(ST_AMOUNT, 1));
            amount.write(&mut buf);
        }
        if let Some(limit) = &self.limit_amount {
            buf.extend(field_header(ST_AMOUNT, 3));
            limit.write(&mut buf);
        }
        buf.extend(field_header(ST_AMOUNT, 8));
        Amount::Drops(self.fee).write(&mut buf);
        write_vl(&mut buf, ST_BLOB, 3, &self.signing_pub_key)?;
        if with_signature {
            if let Some(signature) = &self.txn_signature {
                write_vl(&mut buf, ST_BLOB, 4, signature)?;
            }
        }
        write_vl(&mut buf, ST_ACCOUNT, 1, &self.account)?;
        if let Some(destination) = &self.destination {
            write_vl(&mut buf, ST_ACCOUNT, 3, destination)?;
        }
        if !self.memos.is_empty() {
            buf.extend(field_header(ST_ARRAY, 9));
            for memo in &self.memos {
                buf.extend(field_header(ST_OBJECT, 10));
                write_vl(&mut buf, ST_BLOB, 13, memo)?;
                buf.push(OBJECT_END);
            }
            buf.push(ARRAY_END);
        }
        Ok(buf)
    }

    pub fn signing_data(&self) -> Result<Vec<u8>> {
        let mut data = HASH_PREFIX_SIGN.to_vec();
        data.extend(self.to_bytes(false)?);
        Ok(data)
    }

    /// Transaction id in the ledger's uppercase hex form
    pub fn hash(&self) -> Result<String> {
        let mut data = HASH_PREFIX_TX_ID.to_vec();
        data.extend(self.to_bytes(true)?);
        Ok(hex::encode_upper(sha512_half(&data)))
    }
}

/// Account key: secp256k1 hex, or `ED`-prefixed hex for ed25519
pub enum RippleKey {
    Secp256k1(Secp256k1Signer),
    Ed25519(Ed25519Signer),
}

impl RippleKey {
    pub fn parse(private_key: &str) -> Result<Self> {
        let trimmed = private_key.trim();
        let ed_prefixed = trimmed.get(..2).map_or(false, |prefix| prefix.eq_ignore_ascii_case("ED"));
        if trimmed.len() == 66 && ed_prefixed {
            let seed = decode_hash32("wallet.privateKey", &trimmed[2..])
                .map_err(|_| Error::invalid_parameter("wallet.privateKey", "not a valid ed25519 key"))?;
            return Ok(RippleKey::Ed25519(Ed25519Signer::from_seed(&seed)));
        }
        Ok(RippleKey::Secp256k1(Secp256k1Signer::new(parse_secp256k1_secret(
            "wallet.privateKey",
            trimmed,
        )?)))
    }

    pub fn public_key(&self) -> Vec<u8> {
        match self {
            RippleKey::Secp256k1(signer) => signer.public_key().serialize().to_vec(),
            RippleKey::Ed25519(signer) => {
                let mut key = vec![0xed];
                key.extend_from_slice(&signer.public_key());
                key
            }
        }
    }

    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key(), RIPPLE_ACCOUNT_ID, Alphabet::RIPPLE)
    }

    /// ed25519 signs the data itself, secp256k1 its SHA-512 half
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            RippleKey::Secp256k1(signer) => signer.sign_digest_der(PROTOCOL, &sha512_half(data)),
            RippleKey::Ed25519(signer) => Ok(signer.sign(PROTOCOL, data)?.to_vec()),
        }
    }
}

pub(crate) async fn build(ctx: &BuildContext<'_>, request: &BuildRequest) -> Result<SignedTransaction> {
    let wallet = request.require_wallet()?;
    let key = RippleKey::parse(&wallet.private_key)?;
    if key.address() != wallet.address.trim() {
        return Err(Error::invalid_parameter("wallet.address", "private key does not control the wallet address"));
    }
    let account = account_id("wallet.address", &wallet.address)?;

    let mut template = ctx.fee_template(request);
    template.from = Some(wallet.address.clone());
    let (transaction_type, destination, amount, limit_amount) = match request.kind {
        TransactionKind::Transfer => {
            let output = request.single_output()?;
            let amount = match output.token_id.as_deref() {
                None | Some("XRP") => Amount::drops(crate::units::parse_positive_amount(&output.amount, PROTOCOL.decimals())?)?,
                Some(token) => {
                    let (currency, issuer) = token
                        .split_once(':')
                        .ok_or_else(|| Error::invalid_parameter("tokenId", "expected CURRENCY:ISSUER"))?;
                    let amount = Amount::issued(&output.amount, currency, issuer)?;
                    if let Amount::Issued { value: ISSUED_NOT_NATIVE, .. } = amount {
                        return Err(Error::InvalidAmount {
                            value: output.amount.clone(),
                            reason: "amount must be greater than zero".to_string(),
                        });
                    }
                    amount
                }
            };
            template.destination = Some(output.destination_address.clone());
            template.amount = Some(output.amount.clone());
            (TT_PAYMENT, Some(account_id("destination", &output.destination_address)?), Some(amount), None)
        }
        TransactionKind::Trustline => {
            let trustline = request
                .trustline
                .as_ref()
                .ok_or_else(|| Error::invalid_parameter("trustline", "required for trustline transactions"))?;
            let limit = Amount::Issued {
                value: match &trustline.limit {
                    Some(limit) => issued_value(limit)?,
                    None => MAX_ISSUED_VALUE,
                },
                currency: currency_code(&trustline.asset_code)?,
                issuer: account_id("issuer", &trustline.issuer)?,
            };
            template.destination = Some(trustline.issuer.clone());
            (TT_TRUST_SET, None, None, Some(limit))
        }
        TransactionKind::ContractCall => {
            return Err(Error::InvalidParameterCombination("contract calls are not supported on ripple".to_string()))
        }
    };
    let memos = match request.memo.as_deref() {
        Some(memo) if !memo.is_empty() => vec![memo.as_bytes().to_vec()],
        _ => Vec::new(),
    };

    ctx.stage(BuildStage::CollectInputs);
    let (sequence, ledger_current_index) = match request.sequence {
        Some(sequence) => (sequence, None),
        None => {
            let info = ctx.services.account_info.get_account_info(&wallet.address, PROTOCOL).await?;
            let sequence = info
                .sequence
                .ok_or_else(|| Error::external("account-info", format!("no sequence for {}", wallet.address)))?;
            (sequence, info.ledger_current_index)
        }
    };
    let sequence = u32::try_from(sequence)
        .map_err(|_| Error::invalid_parameter("sequence", format!("{} out of range", sequence)))?;
    debug!(sequence, ?ledger_current_index, "sequence resolved");

    ctx.stage(BuildStage::ComputeFee);
    let fee = ctx.quote(request, template).await?.into_flat(PROTOCOL)?.value;
    let fee = to_drops(fee)?;

    ctx.stage(BuildStage::AssembleOutputs);
    let mut tx = RippleTx {
        transaction_type,
        flags: TF_FULLY_CANONICAL_SIG,
        sequence,
        destination_tag: request.destination_tag,
        last_ledger_sequence: ledger_current_index.map(|index| index.saturating_add(LEDGER_OFFSET)),
        amount,
        limit_amount,
        fee,
        signing_pub_key: key.public_key(),
        txn_signature: None,
        account,
        destination,
        memos,
    };

    ctx.stage(BuildStage::SerializeUnsigned);
    let signing_data = tx.signing_data()?;
    ctx.stage(BuildStage::Sign);
    tx.txn_signature = Some(key.sign(&signing_data)?);

    ctx.stage(BuildStage::SerializeSigned);
    Ok(SignedTransaction {
        protocol: PROTOCOL,
        serialized_blob: hex::encode_upper(tx.to_bytes(true)?),
        encoding: BlobEncoding::Hex,
        derived_hash: Some(tx.hash()?),
    })
}
