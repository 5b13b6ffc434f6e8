//! Stellar payments, account creation and trustlines
//!
//! Transactions are written as XDR v1 envelopes. The signature covers
//! `sha256(network_id || ENVELOPE_TYPE_TX || tx)`, where the network id is the
//! hash of the network passphrase, so the same transaction signed for test
//! and production networks yields different signatures and hashes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use crate::crypto::hash::sha256;
use crate::crypto::keys::strkey::{self, VERSION_ACCOUNT_ID, VERSION_SEED};
use crate::crypto::keys::decode_hash32;
use crate::crypto::Ed25519Signer;
use crate::error::{Error, Result};
use crate::protocol::{Network, Protocol};
use super::builder::BuildContext;
use super::types::{BlobEncoding, BuildRequest, BuildStage, SignedTransaction, TransactionKind, TrustlineRequest};

const PROTOCOL: Protocol = Protocol::Stellar;

pub const PUBLIC_NETWORK_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
pub const TEST_NETWORK_PASSPHRASE: &str = "Test SDF Network ; September 2015";

const ENVELOPE_TYPE_TX: u32 = 2;
const KEY_TYPE_ED25519: u32 = 0;
const PRECOND_NONE: u32 = 0;

const MEMO_NONE: u32 = 0;
const MEMO_TEXT: u32 = 1;
const MEMO_HASH: u32 = 3;

const CREATE_ACCOUNT: u32 = 0;
const PAYMENT: u32 = 1;
const CHANGE_TRUST: u32 = 6;

const ASSET_TYPE_NATIVE: u32 = 0;
const ASSET_TYPE_CREDIT_ALPHANUM4: u32 = 1;
const ASSET_TYPE_CREDIT_ALPHANUM12: u32 = 2;

pub fn network_passphrase(network: Network) -> &'static str {
    match network {
        Network::Mainnet => PUBLIC_NETWORK_PASSPHRASE,
        Network::Testnet => TEST_NETWORK_PASSPHRASE,
    }
}

/// Big-endian XDR encoder
#[derive(Default)]
struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn fixed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.pad(data.len());
    }

    fn var(&mut self, data: &[u8]) {
        self.u32(data.len() as u32);
        self.fixed(data);
    }

    fn pad(&mut self, len: usize) {
        let padding = (4 - len % 4) % 4;
        self.buf.extend(std::iter::repeat(0).take(padding));
    }

    fn account_id(&mut self, key: &[u8; 32]) {
        self.u32(KEY_TYPE_ED25519);
        self.fixed(key);
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    Native,
    Credit { code: String, issuer: [u8; 32] },
}

impl Asset {
    /// `code` is 1-12 alphanumeric characters
    pub fn credit(code: &str, issuer: &str) -> Result<Self> {
        let code = code.trim();
        if code.is_empty() || code.len() > 12 || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::invalid_parameter("assetCode", format!("'{}' is not a valid asset code", code)));
        }
        Ok(Asset::Credit {
            code: code.to_string(),
            issuer: strkey::decode("issuer", VERSION_ACCOUNT_ID, issuer)?,
        })
    }

    /// `None` or the native symbol for lumens, `CODE:ISSUER` otherwise
    pub fn from_token_id(token_id: Option<&str>) -> Result<Self> {
        match token_id {
            None => Ok(Asset::Native),
            Some(token) if token.eq_ignore_ascii_case(PROTOCOL.native_symbol()) || token == "native" => Ok(Asset::Native),
            Some(token) => match token.split_once(':') {
                Some((code, issuer)) => Asset::credit(code, issuer),
                None => Err(Error::invalid_parameter("tokenId", "expected CODE:ISSUER")),
            },
        }
    }

    fn write(&self, w: &mut XdrWriter) {
        match self {
            Asset::Native => w.u32(ASSET_TYPE_NATIVE),
            Asset::Credit { code, issuer } => {
                let width = if code.len() <= 4 { 4 } else { 12 };
                w.u32(if width == 4 { ASSET_TYPE_CREDIT_ALPHANUM4 } else { ASSET_TYPE_CREDIT_ALPHANUM12 });
                let mut padded = code.as_bytes().to_vec();
                padded.resize(width, 0);
                w.fixed(&padded);
                w.account_id(issuer);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    None,
    Text(String),
    Hash([u8; 32]),
}

impl Memo {
    /// Text up to `text_limit` bytes, otherwise the SHA-256 of the text
    pub fn from_text(memo: Option<&str>, text_limit: usize) -> Self {
        match memo {
            None | Some("") => Memo::None,
            Some(text) if text.len() <= text_limit => Memo::Text(text.to_string()),
            Some(text) => Memo::Hash(sha256(text.as_bytes())),
        }
    }

    fn write(&self, w: &mut XdrWriter) {
        match self {
            Memo::None => w.u32(MEMO_NONE),
            Memo::Text(text) => {
                w.u32(MEMO_TEXT);
                w.var(text.as_bytes());
            }
            Memo::Hash(hash) => {
                w.u32(MEMO_HASH);
                w.fixed(hash);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateAccount { destination: [u8; 32], starting_balance: i64 },
    Payment { destination: [u8; 32], asset: Asset, amount: i64 },
    /// A zero limit removes the trustline
    ChangeTrust { asset: Asset, limit: i64 },
}

impl Operation {
    fn write(&self, w: &mut XdrWriter) {
        // no per-operation source account
        w.u32(0);
        match self {
            Operation::CreateAccount { destination, starting_balance } => {
                w.u32(CREATE_ACCOUNT);
                w.account_id(destination);
                w.i64(*starting_balance);
            }
            Operation::Payment { destination, asset, amount } => {
                w.u32(PAYMENT);
                w.account_id(destination);
                asset.write(w);
                w.i64(*amount);
            }
            Operation::ChangeTrust { asset, limit } => {
                w.u32(CHANGE_TRUST);
                asset.write(w);
                w.i64(*limit);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StellarTx {
    pub source: [u8; 32],
    pub fee: u32,
    pub sequence: i64,
    pub memo: Memo,
    pub operations: Vec<Operation>,
}

impl StellarTx {
    fn write(&self, w: &mut XdrWriter) {
        w.account_id(&self.source);
        w.u32(self.fee);
        w.i64(self.sequence);
        w.u32(PRECOND_NONE);
        self.memo.write(w);
        w.u32(self.operations.len() as u32);
        for operation in &self.operations {
            operation.write(w);
        }
        // ext
        w.u32(0);
    }

    pub fn to_xdr(&self) -> Vec<u8> {
        let mut w = XdrWriter::default();
        self.write(&mut w);
        w.into_bytes()
    }

    /// Hash that is signed and that identifies the transaction on `passphrase`'s network
    pub fn hash(&self, passphrase: &str) -> [u8; 32] {
        let mut payload = sha256(passphrase.as_bytes()).to_vec();
        payload.extend_from_slice(&ENVELOPE_TYPE_TX.to_be_bytes());
        payload.extend(self.to_xdr());
        sha256(&payload)
    }

    /// Signed envelope XDR and the transaction hash
    pub fn sign(&self, signer: &Ed25519Signer, passphrase: &str) -> Result<(Vec<u8>, [u8; 32])> {
        let hash = self.hash(passphrase);
        let signature = signer.sign(PROTOCOL, &hash)?;
        let public_key = signer.public_key();

        let mut w = XdrWriter::default();
        w.u32(ENVELOPE_TYPE_TX);
        self.write(&mut w);
        w.u32(1);
        w.fixed(&public_key[28..]);
        w.var(&signature);
        Ok((w.into_bytes(), hash))
    }
}

fn to_stroops(parameter: &str, amount: &str, allow_zero: bool) -> Result<i64> {
    let value = if allow_zero {
        crate::units::to_base_units(amount, PROTOCOL.decimals())?
    } else {
        crate::units::parse_positive_amount(amount, PROTOCOL.decimals())?
    };
    i64::try_from(value).map_err(|_| Error::InvalidAmount {
        value: amount.to_string(),
        reason: format!("{} exceeds the int64 stroop range", parameter),
    })
}

/// Secret seed as an `S...` strkey or 32-byte hex
fn parse_seed(private_key: &str) -> Result<[u8; 32]> {
    let trimmed = private_key.trim();
    if trimmed.starts_with('S') {
        return strkey::decode("wallet.privateKey", VERSION_SEED, trimmed)
            .map_err(|_| Error::invalid_parameter("wallet.privateKey", "not a valid secret seed"));
    }
    decode_hash32("wallet.privateKey", trimmed)
        .map_err(|_| Error::invalid_parameter("wallet.privateKey", "expected an S... secret seed or 32-byte hex"))
}

fn change_trust(trustline: &TrustlineRequest) -> Result<Operation> {
    let limit = match &trustline.limit {
        Some(limit) => to_stroops("limit", limit, true)?,
        None => i64::MAX,
    };
    Ok(Operation::ChangeTrust {
        asset: Asset::credit(&trustline.asset_code, &trustline.issuer)?,
        limit,
    })
}

fn payment(request: &BuildRequest) -> Result<Operation> {
    let output = request.single_output()?;
    let destination = strkey::decode("destination", VERSION_ACCOUNT_ID, &output.destination_address)?;
    let asset = Asset::from_token_id(output.token_id.as_deref())?;
    match &request.starting_balance {
        Some(balance) => {
            if asset != Asset::Native {
                return Err(Error::InvalidParameterCombination(
                    "startingBalance creates an account in the native asset only".to_string(),
                ));
            }
            Ok(Operation::CreateAccount {
                destination,
                starting_balance: to_stroops("startingBalance", balance, false)?,
            })
        }
        None => Ok(Operation::Payment {
            destination,
            asset,
            amount: to_stroops("amount", &output.amount, false)?,
        }),
    }
}

pub(crate) async fn build(ctx: &BuildContext<'_>, request: &BuildRequest) -> Result<SignedTransaction> {
    let wallet = request.require_wallet()?;
    let signer = Ed25519Signer::from_seed(&parse_seed(&wallet.private_key)?);
    let source = strkey::decode("wallet.address", VERSION_ACCOUNT_ID, &wallet.address)?;
    if signer.public_key() != source {
        return Err(Error::invalid_parameter("wallet.address", "secret seed does not control the wallet address"));
    }

    let mut template = ctx.fee_template(request);
    template.from = Some(wallet.address.clone());
    let operation = match request.kind {
        TransactionKind::Trustline => {
            let trustline = request
                .trustline
                .as_ref()
                .ok_or_else(|| Error::invalid_parameter("trustline", "required for trustline transactions"))?;
            template.destination = Some(trustline.issuer.clone());
            change_trust(trustline)?
        }
        TransactionKind::Transfer => {
            let operation = payment(request)?;
            let output = request.single_output()?;
            template.destination = Some(output.destination_address.clone());
            template.amount = Some(output.amount.clone());
            operation
        }
        TransactionKind::ContractCall => {
            return Err(Error::InvalidParameterCombination("contract calls are not supported on stellar".to_string()))
        }
    };
    let memo = Memo::from_text(request.memo.as_deref(), ctx.config.memo_text_limit);

    ctx.stage(BuildStage::CollectInputs);
    let current = match request.sequence {
        Some(sequence) => sequence,
        None => ctx
            .services
            .account_info
            .get_account_info(&wallet.address, PROTOCOL)
            .await?
            .sequence
            .ok_or_else(|| Error::external("account-info", format!("no sequence for {}", wallet.address)))?,
    };
    let sequence = i64::try_from(current)
        .ok()
        .and_then(|s| s.checked_add(1))
        .ok_or_else(|| Error::invalid_parameter("sequence", format!("{} out of range", current)))?;
    debug!(sequence, "sequence resolved");

    ctx.stage(BuildStage::ComputeFee);
    let fee = ctx.quote(request, template).await?.into_flat(PROTOCOL)?.value;
    let fee = u32::try_from(fee).map_err(|_| Error::external("fee-oracle", format!("fee {} exceeds u32", fee)))?;

    ctx.stage(BuildStage::AssembleOutputs);
    let tx = StellarTx {
        source,
        fee,
        sequence,
        memo,
        operations: vec![operation],
    };

    ctx.stage(BuildStage::SerializeUnsigned);
    let passphrase = network_passphrase(ctx.config.network);
    ctx.stage(BuildStage::Sign);
    let (envelope, hash) = tx.sign(&signer, passphrase)?;

    ctx.stage(BuildStage::SerializeSigned);
    Ok(SignedTransaction {
        protocol: PROTOCOL,
        serialized_blob: BASE64.encode(envelope),
        encoding: BlobEncoding::Base64,
        derived_hash: Some(hex::encode(hash)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> String {
        strkey::encode(VERSION_ACCOUNT_ID, &[7u8; 32])
    }

    fn trustline(limit: Option<&str>) -> TrustlineRequest {
        TrustlineRequest {
            asset_code: "USD".to_string(),
            issuer: issuer(),
            limit: limit.map(str::to_string),
        }
    }

    fn tx(operation: Operation) -> StellarTx {
        StellarTx {
            source: [1u8; 32],
            fee: 100,
            sequence: 42,
            memo: Memo::None,
            operations: vec![operation],
        }
    }

    #[test]
    fn test_trustline_revoke_and_establish_share_the_operation() {
        let revoke = tx(change_trust(&trustline(Some("0"))).unwrap()).to_xdr();
        let establish = tx(change_trust(&trustline(Some("100000000"))).unwrap()).to_xdr();

        assert_eq!(revoke.len(), establish.len());
        let differing: Vec<usize> = (0..revoke.len()).filter(|i| revoke[*i] != establish[*i]).collect();
        // only the trailing int64 limit (followed by the 4-byte ext) differs
        assert!(differing.iter().all(|i| *i >= revoke.len() - 12 && *i < revoke.len() - 4));
        assert_eq!(&establish[establish.len() - 12..establish.len() - 4], &1_000_000_000_000_000i64.to_be_bytes());
        assert_eq!(&revoke[revoke.len() - 12..revoke.len() - 4], &0i64.to_be_bytes());
    }

    #[test]
    fn test_default_trust_limit_is_max() {
        let operation = change_trust(&trustline(None)).unwrap();
        assert!(matches!(operation, Operation::ChangeTrust { limit: i64::MAX, .. }));
    }

    #[test]
    fn test_memo_text_or_hash() {
        let short = "a".repeat(28);
        assert_eq!(Memo::from_text(Some(short.as_str()), 28), Memo::Text(short.clone()));

        let long = "a".repeat(29);
        assert_eq!(Memo::from_text(Some(long.as_str()), 28), Memo::Hash(sha256(long.as_bytes())));
        assert_eq!(Memo::from_text(None, 28), Memo::None);
    }

    #[test]
    fn test_network_changes_the_signing_domain() {
        let signer = Ed25519Signer::from_seed(&[3u8; 32]);
        let tx = tx(Operation::Payment {
            destination: [2u8; 32],
            asset: Asset::Native,
            amount: 10_000_000,
        });

        let (public_envelope, public_hash) = tx.sign(&signer, PUBLIC_NETWORK_PASSPHRASE).unwrap();
        let (test_envelope, test_hash) = tx.sign(&signer, TEST_NETWORK_PASSPHRASE).unwrap();
        assert_ne!(public_hash, test_hash);
        assert_ne!(public_envelope, test_envelope);

        // envelope = type || tx || signature count || hint || signature
        let tx_xdr = tx.to_xdr();
        assert_eq!(&test_envelope[..4], &ENVELOPE_TYPE_TX.to_be_bytes());
        assert_eq!(&test_envelope[4..4 + tx_xdr.len()], tx_xdr.as_slice());
        assert_eq!(test_envelope.len(), 4 + tx_xdr.len() + 4 + 4 + 4 + 64);
        assert_eq!(&test_envelope[4 + tx_xdr.len() + 4..][..4], &signer.public_key()[28..]);
    }

    #[test]
    fn test_asset_codes() {
        let mut w = XdrWriter::default();
        Asset::credit("USDC", &issuer()).unwrap().write(&mut w);
        assert_eq!(&w.buf[..8], &[0, 0, 0, 1, b'U', b'S', b'D', b'C']);

        let mut w = XdrWriter::default();
        Asset::credit("LONGCODE", &issuer()).unwrap().write(&mut w);
        assert_eq!(&w.buf[..4], &[0, 0, 0, 2]);
        assert_eq!(w.buf.len(), 4 + 12 + 36);

        assert!(Asset::credit("TOO-LONG", &issuer()).is_err());
        assert_eq!(Asset::from_token_id(Some("XLM")).unwrap(), Asset::Native);
    }

    #[test]
    fn test_memo_text_is_padded() {
        let mut w = XdrWriter::default();
        Memo::Text("hello".to_string()).write(&mut w);
        assert_eq!(w.buf, vec![0, 0, 0, 1, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o', 0, 0, 0]);
    }
}
