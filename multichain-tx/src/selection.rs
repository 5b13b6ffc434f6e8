//! UTXO selection under a fee that depends on the selected shape
//!
//! Candidates are taken largest-first. Once the running input sum reaches the
//! output total, the fee for the current `(inputs, outputs)` shape is looked
//! up and the sum is checked against `outputs + fee`. If it falls short,
//! more inputs are added and the fee is looked up again for the new shape.
//! An exact match (`sum == outputs + fee`) is accepted.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::transaction::external::{FeeOracle, FeeRequest};
use crate::transaction::types::{SelectionResult, SpendableOutput};

/// Where the fee for a candidate shape comes from
pub enum FeeSource<'a> {
    /// Caller-supplied fee, used for every shape
    Fixed(u128),
    /// Ask the oracle, re-parameterizing `template` with the shape
    Oracle {
        oracle: &'a dyn FeeOracle,
        template: FeeRequest,
    },
}

struct FeeLookup<'a, 'b> {
    source: &'b FeeSource<'a>,
    protocol: Protocol,
    quotes: HashMap<(usize, usize), u128>,
}

impl FeeLookup<'_, '_> {
    async fn fee(&mut self, num_inputs: usize, num_outputs: usize) -> Result<u128> {
        match self.source {
            FeeSource::Fixed(fee) => Ok(*fee),
            FeeSource::Oracle { oracle, template } => {
                if let Some(fee) = self.quotes.get(&(num_inputs, num_outputs)) {
                    return Ok(*fee);
                }
                let quote = oracle.estimate_fee(&template.for_shape(num_inputs, num_outputs)).await?;
                let fee = quote.into_flat(self.protocol)?.value;
                trace!(num_inputs, num_outputs, fee, "fee estimate");
                self.quotes.insert((num_inputs, num_outputs), fee);
                Ok(fee)
            }
        }
    }
}

/// What a selection has to fund
#[derive(Debug, Clone)]
pub struct SelectionTarget {
    pub protocol: Protocol,
    /// Asset label used in errors
    pub token: String,
    /// Sum of requested outputs in base units
    pub outputs_total: u128,
    /// Number of outputs excluding change
    pub requested_outputs: usize,
}

/// Select inputs covering `outputs_total` plus the fee for the final shape
pub async fn select_utxos(
    candidates: &[SpendableOutput],
    target: &SelectionTarget,
    fee_source: &FeeSource<'_>,
) -> Result<SelectionResult> {
    let mut sorted: Vec<&SpendableOutput> = candidates.iter().collect();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut lookup = FeeLookup {
        source: fee_source,
        protocol: target.protocol,
        quotes: HashMap::new(),
    };
    let total = target.outputs_total;
    let mut selected: Vec<SpendableOutput> = Vec::new();
    let mut input_sum: u128 = 0;
    let mut last_fee: u128 = 0;

    for utxo in sorted {
        input_sum = input_sum.checked_add(utxo.value).ok_or_else(|| Error::InvalidAmount {
            value: utxo.value.to_string(),
            reason: "input sum overflow".to_string(),
        })?;
        selected.push(utxo.clone());

        if input_sum < total {
            continue;
        }

        let fee_with_change = lookup.fee(selected.len(), target.requested_outputs + 1).await?;
        last_fee = fee_with_change;
        if input_sum > spend_total(total, fee_with_change)? {
            let change_amount = input_sum - total - fee_with_change;
            debug!(inputs = selected.len(), fee = fee_with_change, change_amount, "selection complete");
            return Ok(SelectionResult {
                selected_inputs: selected,
                change_amount,
                fee: fee_with_change,
            });
        }

        // Leftover too small to pay for its own change output goes to the fee.
        let fee_without_change = lookup.fee(selected.len(), target.requested_outputs).await?;
        if input_sum >= spend_total(total, fee_without_change)? {
            debug!(inputs = selected.len(), fee = input_sum - total, "selection complete without change");
            return Ok(SelectionResult {
                selected_inputs: selected,
                change_amount: 0,
                fee: input_sum - total,
            });
        }
        last_fee = fee_without_change;
        trace!(inputs = selected.len(), input_sum, fee = last_fee, "fee not covered, adding inputs");
    }

    Err(Error::InsufficientBalance {
        protocol: target.protocol.to_string(),
        token: target.token.clone(),
        required: total.saturating_add(last_fee),
        available: input_sum,
    })
}

fn spend_total(total: u128, fee: u128) -> Result<u128> {
    total
        .checked_add(fee)
        .ok_or_else(|| Error::external("fee-oracle", format!("fee {} overflows the spend total", fee)))
}

/// Token of a UTXO, with `None` meaning the native asset
pub fn token_of<'a>(token_id: &'a Option<String>, native: &'a str) -> &'a str {
    token_id.as_deref().unwrap_or(native)
}

/// Fee-less selection run independently per asset.
///
/// Authority outputs are never used as funding.
pub async fn select_token_utxos(
    protocol: Protocol,
    candidates: &[SpendableOutput],
    native: &str,
    totals: &BTreeMap<String, u128>,
) -> Result<BTreeMap<String, SelectionResult>> {
    let mut results = BTreeMap::new();
    for (token, total) in totals {
        let funding: Vec<SpendableOutput> = candidates
            .iter()
            .filter(|u| u.authority.is_none() && token_of(&u.token_id, native) == token)
            .cloned()
            .collect();
        let target = SelectionTarget {
            protocol,
            token: token.clone(),
            outputs_total: *total,
            requested_outputs: 0,
        };
        let selection = select_utxos(&funding, &target, &FeeSource::Fixed(0)).await?;
        results.insert(token.clone(), selection);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::transaction::types::{Authority, FeeQuote, TransactionKind};

    fn utxo(id: &str, value: u128) -> SpendableOutput {
        SpendableOutput::new(id, 0, value, "mnPLowner")
    }

    fn target(outputs_total: u128, requested_outputs: usize) -> SelectionTarget {
        SelectionTarget {
            protocol: Protocol::Bitcoin,
            token: "BTC".to_string(),
            outputs_total,
            requested_outputs,
        }
    }

    /// Fee grows with the shape: 100 per input, 50 per output
    struct ShapeOracle {
        calls: Mutex<Vec<(usize, usize)>>,
    }

    #[async_trait]
    impl FeeOracle for ShapeOracle {
        async fn estimate_fee(&self, request: &FeeRequest) -> Result<FeeQuote> {
            let shape = (request.num_inputs.unwrap(), request.num_outputs.unwrap());
            self.calls.lock().unwrap().push(shape);
            Ok(FeeQuote::flat(100 * shape.0 as u128 + 50 * shape.1 as u128, "satoshi"))
        }
    }

    #[tokio::test]
    async fn test_single_input_with_change() {
        let candidates = vec![utxo("03fc", 2_022_623)];
        let result = select_utxos(&candidates, &target(1_000_000, 1), &FeeSource::Fixed(400)).await.unwrap();

        assert_eq!(result.selected_inputs.len(), 1);
        assert_eq!(result.fee, 400);
        assert_eq!(result.change_amount, 1_022_223);
        assert_eq!(result.input_total(), 1_000_000 + result.fee + result.change_amount);
    }

    #[tokio::test]
    async fn test_picks_the_two_largest() {
        let candidates = vec![utxo("a", 300), utxo("b", 700), utxo("c", 100), utxo("d", 600), utxo("e", 650)];
        let result = select_utxos(&candidates, &target(1_200, 2), &FeeSource::Fixed(10)).await.unwrap();

        let ids: Vec<&str> = result.selected_inputs.iter().map(|u| u.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "e"]);
        assert_eq!(result.change_amount, 140);
    }

    #[tokio::test]
    async fn test_exact_match_is_sufficient() {
        let candidates = vec![utxo("a", 1_400)];
        let result = select_utxos(&candidates, &target(1_000, 1), &FeeSource::Fixed(400)).await.unwrap();

        assert_eq!(result.change_amount, 0);
        assert_eq!(result.fee, 400);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let candidates = vec![utxo("a", 500), utxo("b", 400)];
        let err = select_utxos(&candidates, &target(1_000, 1), &FeeSource::Fixed(10)).await.unwrap_err();

        match err {
            Error::InsufficientBalance { available, required, .. } => {
                assert_eq!(available, 900);
                assert_eq!(required, 1_000);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_fee_shortfall_after_covering_outputs() {
        let candidates = vec![utxo("a", 1_000), utxo("b", 5)];
        let err = select_utxos(&candidates, &target(1_000, 1), &FeeSource::Fixed(10)).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { required: 1_010, available: 1_005, .. }));
    }

    #[tokio::test]
    async fn test_fee_overflowing_the_total_is_rejected() {
        let candidates = vec![utxo("a", 2_000)];
        let err = select_utxos(&candidates, &target(1_000, 1), &FeeSource::Fixed(u128::MAX)).await.unwrap_err();
        assert!(matches!(err, Error::ExternalService { ref service, .. } if service == "fee-oracle"));
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let err = select_utxos(&[], &target(1, 1), &FeeSource::Fixed(0)).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { available: 0, .. }));
    }

    #[tokio::test]
    async fn test_oracle_is_requeried_as_inputs_grow() {
        let oracle = ShapeOracle { calls: Mutex::new(Vec::new()) };
        let source = FeeSource::Oracle {
            oracle: &oracle,
            template: FeeRequest::new(TransactionKind::Transfer, Protocol::Bitcoin),
        };
        // One input covers the outputs but not the 200 fee for (1 in, 2 out).
        let candidates = vec![utxo("a", 1_100), utxo("b", 1_000)];
        let result = select_utxos(&candidates, &target(1_000, 1), &source).await.unwrap();

        assert_eq!(result.selected_inputs.len(), 2);
        assert_eq!(result.fee, 300);
        assert_eq!(result.change_amount, 800);
        assert_eq!(*oracle.calls.lock().unwrap(), vec![(1, 2), (1, 1), (2, 2)]);
    }

    #[tokio::test]
    async fn test_leftover_below_change_cost_goes_to_fee() {
        let oracle = ShapeOracle { calls: Mutex::new(Vec::new()) };
        let source = FeeSource::Oracle {
            oracle: &oracle,
            template: FeeRequest::new(TransactionKind::Transfer, Protocol::Bitcoin),
        };
        // Fee with change is 200, without change 150; 170 is left over.
        let candidates = vec![utxo("a", 1_170)];
        let result = select_utxos(&candidates, &target(1_000, 1), &source).await.unwrap();

        assert_eq!(result.change_amount, 0);
        assert_eq!(result.fee, 170);
    }

    #[tokio::test]
    async fn test_token_selection_skips_authorities() {
        let token = "00aa";
        let candidates = vec![
            utxo("htr", 500),
            utxo("tok-1", 30).with_token(token),
            utxo("tok-2", 80).with_token(token),
            utxo("mint", 1).with_token(token).with_authority(Authority::Mint),
        ];
        let mut totals = BTreeMap::new();
        totals.insert("00".to_string(), 100);
        totals.insert(token.to_string(), 100);

        let results = select_token_utxos(Protocol::Hathor, &candidates, "00", &totals).await.unwrap();

        assert_eq!(results["00"].change_amount, 400);
        let token_ids: Vec<&str> = results[token].selected_inputs.iter().map(|u| u.transaction_id.as_str()).collect();
        assert_eq!(token_ids, vec!["tok-2", "tok-1"]);
        assert_eq!(results[token].change_amount, 10);
    }

    #[tokio::test]
    async fn test_token_selection_fails_per_token() {
        let candidates = vec![utxo("htr", 500), utxo("mint", 1).with_token("00aa").with_authority(Authority::Mint)];
        let mut totals = BTreeMap::new();
        totals.insert("00aa".to_string(), 1);

        let err = select_token_utxos(Protocol::Hathor, &candidates, "00", &totals).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { ref token, .. } if token == "00aa"));
    }
}
