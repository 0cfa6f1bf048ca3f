use bitcoin::{Transaction, Txid};
use coinjoin_core::foundation::RoundId;

/// Outbound notification emitted once per successful coinjoin broadcast.
/// Consumed by whatever orchestration sits on the other end of the Arena's
/// broadcast queue; the engine never waits on the consumer.
#[derive(Clone, Debug)]
pub struct CoinjoinBroadcast {
    pub round_id: RoundId,
    pub txid: Txid,
    pub transaction: Transaction,
}
