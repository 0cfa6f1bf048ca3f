use crate::domain::coin::Coin;
use crate::foundation::constants::{P2WPKH_INPUT_VSIZE, P2WPKH_OUTPUT_VSIZE, SHARED_TX_OVERHEAD_VSIZE};
use crate::foundation::{CoordinatorError, Result};
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, FeeRate, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};
use std::collections::BTreeMap;

/// The in-progress transaction while inputs and outputs are still being
/// folded in. Every mutation returns a new state so concurrent readers never
/// observe a half-updated transaction.
#[derive(Clone, Debug)]
pub struct ConstructionState {
    mining_fee_rate: FeeRate,
    inputs: Vec<Coin>,
    outputs: Vec<TxOut>,
}

impl ConstructionState {
    pub fn new(mining_fee_rate: FeeRate) -> Self {
        Self { mining_fee_rate, inputs: Vec::new(), outputs: Vec::new() }
    }

    pub fn inputs(&self) -> &[Coin] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    pub fn add_input(&self, coin: Coin) -> Self {
        let mut next = self.clone();
        next.inputs.push(coin);
        next
    }

    pub fn add_output(&self, tx_out: TxOut) -> Self {
        let mut next = self.clone();
        next.outputs.push(tx_out);
        next
    }

    pub fn estimated_vsize(&self) -> u64 {
        SHARED_TX_OVERHEAD_VSIZE
            .saturating_add(self.inputs.len() as u64 * P2WPKH_INPUT_VSIZE)
            .saturating_add(self.outputs.len() as u64 * P2WPKH_OUTPUT_VSIZE)
    }

    pub fn total_input_amount(&self) -> Result<Amount> {
        self.inputs
            .iter()
            .try_fold(Amount::ZERO, |acc, coin| acc.checked_add(coin.amount()))
            .ok_or_else(|| CoordinatorError::Message("input amount overflow".to_string()))
    }

    pub fn total_output_amount(&self) -> Result<Amount> {
        self.outputs
            .iter()
            .try_fold(Amount::ZERO, |acc, out| acc.checked_add(out.value))
            .ok_or_else(|| CoordinatorError::Message("output amount overflow".to_string()))
    }

    fn estimated_mining_fee(&self) -> Result<Amount> {
        self.mining_fee_rate
            .fee_vb(self.estimated_vsize())
            .ok_or_else(|| CoordinatorError::Message("mining fee overflow".to_string()))
    }

    /// Value left over once all outputs and the estimated mining fee are
    /// paid. Saturates at zero; `finalize` is where a shortfall becomes an
    /// error.
    pub fn balance(&self) -> Result<Amount> {
        let inputs = self.total_input_amount()?;
        let spent = self.total_output_amount()?.checked_add(self.estimated_mining_fee()?);
        let spent = spent.ok_or_else(|| CoordinatorError::Message("output amount overflow".to_string()))?;
        Ok(inputs.checked_sub(spent).unwrap_or(Amount::ZERO))
    }

    /// Locks the input/output sets into a signing-ready state. Rejects a
    /// transaction whose inputs cannot cover outputs plus the mining fee.
    pub fn finalize(&self) -> Result<SigningState> {
        let inputs = self.total_input_amount()?;
        let required = self
            .total_output_amount()?
            .checked_add(self.estimated_mining_fee()?)
            .ok_or_else(|| CoordinatorError::Message("output amount overflow".to_string()))?;
        if inputs < required {
            return Err(CoordinatorError::Message(format!(
                "inputs {inputs} do not cover outputs plus mining fee {required}"
            )));
        }
        Ok(SigningState { inputs: self.inputs.clone(), outputs: self.outputs.clone(), witnesses: BTreeMap::new() })
    }
}

/// Finalized input/output sets awaiting witnesses. Witness insertion is a
/// value transition like construction-state mutation.
#[derive(Clone, Debug)]
pub struct SigningState {
    inputs: Vec<Coin>,
    outputs: Vec<TxOut>,
    witnesses: BTreeMap<usize, Witness>,
}

impl SigningState {
    pub fn inputs(&self) -> &[Coin] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    pub fn input_index_of(&self, outpoint: &OutPoint) -> Option<usize> {
        self.inputs.iter().position(|coin| coin.outpoint == *outpoint)
    }

    pub fn is_input_signed(&self, index: usize) -> bool {
        self.witnesses.contains_key(&index)
    }

    pub fn is_fully_signed(&self) -> bool {
        self.witnesses.len() == self.inputs.len()
    }

    pub fn add_witness(&self, index: usize, witness: Witness) -> Result<Self> {
        if index >= self.inputs.len() {
            return Err(CoordinatorError::InvalidInputIndex(index));
        }
        if witness.is_empty() {
            return Err(CoordinatorError::Message("empty witness".to_string()));
        }
        if self.witnesses.contains_key(&index) {
            return Err(CoordinatorError::WitnessAlreadyProvided { input_index: index });
        }
        let mut next = self.clone();
        next.witnesses.insert(index, witness);
        Ok(next)
    }

    pub fn unsigned_transaction(&self) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: self
                .inputs
                .iter()
                .map(|coin| TxIn {
                    previous_output: coin.outpoint,
                    script_sig: Default::default(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
                .collect(),
            output: self.outputs.clone(),
        }
    }

    pub fn signed_transaction(&self) -> Result<Transaction> {
        if !self.is_fully_signed() {
            return Err(CoordinatorError::Message("transaction is not fully signed".to_string()));
        }
        let mut tx = self.unsigned_transaction();
        for (index, witness) in &self.witnesses {
            tx.input[*index].witness = witness.clone();
        }
        Ok(tx)
    }
}

#[derive(Clone, Debug)]
pub enum CoinjoinState {
    Construction(ConstructionState),
    Signing(SigningState),
}

impl CoinjoinState {
    pub fn as_construction(&self) -> Result<&ConstructionState> {
        match self {
            CoinjoinState::Construction(state) => Ok(state),
            CoinjoinState::Signing(_) => Err(CoordinatorError::Message("coinjoin already finalized".to_string())),
        }
    }

    pub fn as_signing(&self) -> Result<&SigningState> {
        match self {
            CoinjoinState::Signing(state) => Ok(state),
            CoinjoinState::Construction(_) => Err(CoordinatorError::Message("coinjoin not finalized yet".to_string())),
        }
    }
}
