mod handlers;
pub mod requests;
mod status;
mod tick;

pub use status::{RoundState, RoundStateCheckpoint};

use crate::service::events::CoinjoinBroadcast;
use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use coinjoin_core::domain::{MaxSuggestedAmountProvider, Offense, Prison, Round, RoundParameterFactory};
use coinjoin_core::foundation::constants::COINBASE_MATURITY;
use coinjoin_core::foundation::{CoordinatorError, Result, RoundId};
use coinjoin_core::infrastructure::config::CoordinatorConfig;
use coinjoin_core::infrastructure::credentials::IssuerFactory;
use coinjoin_core::infrastructure::rpc::{ChainRpc, SpendStatus};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Everything the coarse lock protects: the round collection plus the
/// cross-round bookkeeping the admission checks need a consistent view of.
pub(crate) struct ArenaInner {
    pub(crate) rounds: BTreeMap<RoundId, Round>,
    pub(crate) round_counter: u64,
    pub(crate) suggested: MaxSuggestedAmountProvider,
    /// Txids of every coinjoin this coordinator broadcast; feeds the
    /// coordination-fee exemption heuristic.
    pub(crate) coinjoin_txids: HashSet<Txid>,
    /// Output scripts of every past coinjoin; address reuse against these is
    /// rejected.
    pub(crate) coinjoin_scripts: HashSet<ScriptBuf>,
    /// Rounds flagged from outside as disrupted; aborted by the next tick.
    pub(crate) disrupted: HashSet<RoundId>,
}

impl ArenaInner {
    /// True when the outpoint is an admitted alice in any live round.
    pub(crate) fn is_input_registered(&self, outpoint: &OutPoint) -> bool {
        self.rounds.values().any(|round| !round.phase().is_terminal() && round.alice(outpoint).is_some())
    }

    /// True when the script appears in a past coinjoin or any live round.
    pub(crate) fn is_script_known(&self, script: &ScriptBuf) -> bool {
        self.coinjoin_scripts.contains(script)
            || self.rounds.values().any(|round| !round.phase().is_terminal() && round.is_script_used(script))
    }
}

/// The round collection driver. A single periodic tick owns every phase
/// transition; participant operations run concurrently and serialize only
/// their commit step through the same coarse lock.
pub struct Arena {
    pub(crate) config: CoordinatorConfig,
    pub(crate) params_factory: RoundParameterFactory,
    pub(crate) rpc: Arc<dyn ChainRpc>,
    pub(crate) prison: Arc<Prison>,
    pub(crate) issuer_factory: Arc<dyn IssuerFactory>,
    pub(crate) coordinator_script: ScriptBuf,
    /// Time limit on external calls made inside a tick step.
    tick_call_limit: Duration,
    /// Time limit on external calls made while serving one participant request.
    request_call_limit: Duration,
    pub(crate) inner: Mutex<ArenaInner>,
    snapshot: RwLock<Arc<Vec<RoundState>>>,
    pub(crate) broadcasts: mpsc::UnboundedSender<CoinjoinBroadcast>,
}

impl Arena {
    pub fn new(
        config: CoordinatorConfig,
        rpc: Arc<dyn ChainRpc>,
        prison: Arc<Prison>,
        issuer_factory: Arc<dyn IssuerFactory>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<CoinjoinBroadcast>)> {
        config.validate()?;
        let coordinator_script = config.coordinator_script()?;
        let suggested = MaxSuggestedAmountProvider::new(
            Amount::from_sat(config.max_suggested_amount_base_sats),
            Amount::from_sat(config.max_registrable_amount_sats),
        );
        let params_factory = RoundParameterFactory::new(config.clone());
        let (broadcasts, broadcast_rx) = mpsc::unbounded_channel();
        let tick_call_limit = Duration::from_secs(config.tick_interval_secs);
        let request_call_limit = Duration::from_secs(config.request_deadline_secs);
        let arena = Arc::new(Self {
            config,
            params_factory,
            rpc,
            prison,
            issuer_factory,
            coordinator_script,
            tick_call_limit,
            request_call_limit,
            inner: Mutex::new(ArenaInner {
                rounds: BTreeMap::new(),
                round_counter: 0,
                suggested,
                coinjoin_txids: HashSet::new(),
                coinjoin_scripts: HashSet::new(),
                disrupted: HashSet::new(),
            }),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            broadcasts,
        });
        Ok((arena, broadcast_rx))
    }

    /// Rounds whose state id moved past the caller's checkpoints. An empty
    /// checkpoint list returns everything.
    pub fn get_status(&self, checkpoints: &[RoundStateCheckpoint]) -> Vec<RoundState> {
        let snapshot = self.snapshot.read().unwrap_or_else(|err| err.into_inner()).clone();
        snapshot
            .iter()
            .filter(|state| {
                checkpoints
                    .iter()
                    .find(|checkpoint| checkpoint.round_id == state.round_id)
                    .map_or(true, |checkpoint| state.state_id > checkpoint.state_id)
            })
            .cloned()
            .collect()
    }

    /// Marks a round for abort on the next tick. Used by external supervision
    /// when a round is known to be unusable (issuer restart, chain reorg).
    pub async fn flag_disrupted(&self, round_id: RoundId) {
        self.inner.lock().await.disrupted.insert(round_id);
    }

    pub(crate) fn publish_snapshot(&self, states: Vec<RoundState>) {
        let mut guard = self.snapshot.write().unwrap_or_else(|err| err.into_inner());
        *guard = Arc::new(states);
    }

    /// Runs one tick-step call to an external collaborator under the tick
    /// interval; an elapsed limit surfaces as an RPC error so the per-round
    /// failure paths apply and the coarse lock is never held indefinitely.
    pub(crate) async fn bound_by_tick<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        bound(self.tick_call_limit, operation, call).await
    }

    /// Same, but for calls made while serving one participant request.
    pub(crate) async fn bound_by_request<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        bound(self.request_call_limit, operation, call).await
    }

    /// Bans the offending input when the error proves misbehavior, then hands
    /// the error back for propagation.
    pub(crate) fn punish_on_misbehavior(
        &self,
        outpoint: OutPoint,
        round_id: RoundId,
        now_nanos: u64,
        err: CoordinatorError,
    ) -> CoordinatorError {
        if err.evidences_clear_misbehavior() {
            let offense = match &err {
                CoordinatorError::CredentialVerificationFailed(_) => Offense::FailedToVerify,
                _ => Offense::Cheating,
            };
            self.prison.note(outpoint, offense, round_id, now_nanos);
        }
        err
    }

    /// Bans a batch of offenders, downgrading to the short backend-stability
    /// ban when implausibly many inputs are implicated at once (coordinator
    /// infrastructure is then the likelier culprit).
    pub(crate) fn ban_offenders(&self, offenders: &[OutPoint], offense: Offense, round_id: RoundId, now_nanos: u64) {
        let offense = if offenders.len() > self.config.effective_reasonable_offender_count() {
            Offense::BackendStability
        } else {
            offense
        };
        for outpoint in offenders {
            self.prison.note(*outpoint, offense, round_id, now_nanos);
        }
    }
}

async fn bound<T>(limit: Duration, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CoordinatorError::RpcError(format!("{operation} deadline elapsed after {}s", limit.as_secs()))),
    }
}

/// Maps a chain lookup to the registration-facing rejection codes.
pub(crate) fn classify_spend_status(status: Option<SpendStatus>) -> Result<SpendStatus> {
    match status {
        None => Err(CoordinatorError::InputSpent),
        Some(status) if status.confirmations == 0 => Err(CoordinatorError::InputUnconfirmed),
        Some(status) if status.is_coinbase && status.confirmations < COINBASE_MATURITY => Err(CoordinatorError::InputImmature),
        Some(status) => Ok(status),
    }
}
