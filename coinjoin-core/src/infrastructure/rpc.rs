use crate::foundation::constants::RPC_BATCH_SIZE;
use crate::foundation::{CoordinatorError, Result};
use async_trait::async_trait;
use bitcoin::{FeeRate, OutPoint, Transaction, TxOut, Txid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Spend status of an outpoint as reported by the chain node. A missing
/// entry means the output is spent or never existed.
#[derive(Clone, Debug)]
pub struct SpendStatus {
    pub confirmations: u64,
    pub is_coinbase: bool,
    pub tx_out: TxOut,
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_tx_out(&self, outpoint: OutPoint, include_mempool: bool) -> Result<Option<SpendStatus>>;

    /// One round trip for many outpoints, order preserved. The default falls
    /// back to per-outpoint lookups for backends without a batch endpoint.
    async fn get_tx_outs(&self, outpoints: &[OutPoint], include_mempool: bool) -> Result<Vec<Option<SpendStatus>>> {
        let mut statuses = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            statuses.push(self.get_tx_out(*outpoint, include_mempool).await?);
        }
        Ok(statuses)
    }

    async fn get_transaction(&self, txid: Txid) -> Result<Option<Transaction>>;
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid>;
    async fn estimate_fee_rate(&self, confirmation_target: u16) -> Result<FeeRate>;
}

/// Spend-status lookup for many outpoints, one batch call per
/// `RPC_BATCH_SIZE` chunk.
pub async fn spend_statuses(rpc: &dyn ChainRpc, outpoints: &[OutPoint]) -> Result<Vec<Option<SpendStatus>>> {
    let mut statuses = Vec::with_capacity(outpoints.len());
    for chunk in outpoints.chunks(RPC_BATCH_SIZE) {
        statuses.extend(rpc.get_tx_outs(chunk, true).await?);
    }
    Ok(statuses)
}

/// In-memory chain double for tests and local runs: a settable UTXO set,
/// recorded broadcasts, and a failure toggle.
pub struct InMemoryRpc {
    utxos: Mutex<HashMap<OutPoint, SpendStatus>>,
    transactions: Mutex<HashMap<Txid, Transaction>>,
    broadcasts: Mutex<Vec<Transaction>>,
    fee_rate: Mutex<FeeRate>,
    fail_broadcast: AtomicBool,
}

impl InMemoryRpc {
    pub fn new(fee_rate: FeeRate) -> Self {
        Self {
            utxos: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            fee_rate: Mutex::new(fee_rate),
            fail_broadcast: AtomicBool::new(false),
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn insert_utxo(&self, outpoint: OutPoint, status: SpendStatus) {
        Self::lock(&self.utxos).insert(outpoint, status);
    }

    /// Simulates the outpoint getting spent elsewhere.
    pub fn remove_utxo(&self, outpoint: &OutPoint) {
        Self::lock(&self.utxos).remove(outpoint);
    }

    pub fn insert_transaction(&self, tx: Transaction) {
        let txid = tx.compute_txid();
        Self::lock(&self.transactions).insert(txid, tx);
    }

    pub fn broadcast_transactions(&self) -> Vec<Transaction> {
        Self::lock(&self.broadcasts).clone()
    }

    pub fn set_fail_broadcast(&self, fail: bool) {
        self.fail_broadcast.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChainRpc for InMemoryRpc {
    async fn get_tx_out(&self, outpoint: OutPoint, _include_mempool: bool) -> Result<Option<SpendStatus>> {
        Ok(Self::lock(&self.utxos).get(&outpoint).cloned())
    }

    async fn get_tx_outs(&self, outpoints: &[OutPoint], _include_mempool: bool) -> Result<Vec<Option<SpendStatus>>> {
        let utxos = Self::lock(&self.utxos);
        Ok(outpoints.iter().map(|outpoint| utxos.get(outpoint).cloned()).collect())
    }

    async fn get_transaction(&self, txid: Txid) -> Result<Option<Transaction>> {
        Ok(Self::lock(&self.transactions).get(&txid).cloned())
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        if self.fail_broadcast.load(Ordering::Relaxed) {
            return Err(CoordinatorError::RpcError("broadcast rejected".to_string()));
        }
        Self::lock(&self.broadcasts).push(tx.clone());
        Ok(tx.compute_txid())
    }

    async fn estimate_fee_rate(&self, _confirmation_target: u16) -> Result<FeeRate> {
        Ok(*Self::lock(&self.fee_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, ScriptBuf};

    fn status(sats: u64) -> SpendStatus {
        SpendStatus { confirmations: 6, is_coinbase: false, tx_out: TxOut { value: Amount::from_sat(sats), script_pubkey: ScriptBuf::new() } }
    }

    struct BatchCountingRpc {
        inner: InMemoryRpc,
        batch_calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ChainRpc for BatchCountingRpc {
        async fn get_tx_out(&self, outpoint: OutPoint, include_mempool: bool) -> Result<Option<SpendStatus>> {
            self.inner.get_tx_out(outpoint, include_mempool).await
        }

        async fn get_tx_outs(&self, outpoints: &[OutPoint], include_mempool: bool) -> Result<Vec<Option<SpendStatus>>> {
            self.batch_calls.fetch_add(1, Ordering::Relaxed);
            self.inner.get_tx_outs(outpoints, include_mempool).await
        }

        async fn get_transaction(&self, txid: Txid) -> Result<Option<Transaction>> {
            self.inner.get_transaction(txid).await
        }

        async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
            self.inner.broadcast(tx).await
        }

        async fn estimate_fee_rate(&self, confirmation_target: u16) -> Result<FeeRate> {
            self.inner.estimate_fee_rate(confirmation_target).await
        }
    }

    #[tokio::test]
    async fn batched_lookup_preserves_order() {
        let rpc = BatchCountingRpc {
            inner: InMemoryRpc::new(FeeRate::from_sat_per_vb_unchecked(1)),
            batch_calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let mut outpoints = Vec::new();
        for tag in 0..40u8 {
            let outpoint = OutPoint { txid: Txid::from_byte_array([tag; 32]), vout: 0 };
            outpoints.push(outpoint);
            if tag % 2 == 0 {
                rpc.inner.insert_utxo(outpoint, status(1_000 + u64::from(tag)));
            }
        }
        let statuses = spend_statuses(&rpc, &outpoints).await.expect("statuses");
        assert_eq!(statuses.len(), 40);
        for (index, entry) in statuses.iter().enumerate() {
            assert_eq!(entry.is_some(), index % 2 == 0);
        }
        // 40 outpoints at 16 per chunk is exactly three batch round trips.
        assert_eq!(rpc.batch_calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn broadcast_failure_toggle() {
        let rpc = InMemoryRpc::new(FeeRate::from_sat_per_vb_unchecked(1));
        let tx = Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        rpc.set_fail_broadcast(true);
        assert!(rpc.broadcast(&tx).await.is_err());
        rpc.set_fail_broadcast(false);
        rpc.broadcast(&tx).await.expect("broadcast");
        assert_eq!(rpc.broadcast_transactions().len(), 1);
    }
}
