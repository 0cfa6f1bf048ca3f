use crate::foundation::constants::NANOS_PER_SEC;
use crate::foundation::RoundId;
use bitcoin::OutPoint;
use log::info;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Why an input was locked out of future round admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Offense {
    FailedToConfirm,
    FailedToSign,
    DoubleSpent,
    FailedToVerify,
    Cheating,
    /// Short safety ban used when the coordinator's own infrastructure is
    /// the likelier culprit than the clients.
    BackendStability,
}

impl Offense {
    /// Punitive offenses escalate with repeat convictions; the backend
    /// stability ban is deliberately flat.
    pub fn is_punitive(self) -> bool {
        !matches!(self, Offense::BackendStability)
    }
}

impl fmt::Display for Offense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Offense::FailedToConfirm => "failed_to_confirm",
            Offense::FailedToSign => "failed_to_sign",
            Offense::DoubleSpent => "double_spent",
            Offense::FailedToVerify => "failed_to_verify",
            Offense::Cheating => "cheating",
            Offense::BackendStability => "backend_stability",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
struct Conviction {
    offense: Offense,
    banned_until_nanos: u64,
}

/// In-memory ban registry. Repeat punitive offenders serve multiplied
/// sentences; expired convictions stay on record for the multiplier until
/// they age out of the expiry sweep.
pub struct Prison {
    punitive_ban_secs: u64,
    backend_stability_ban_secs: u64,
    inmates: Mutex<HashMap<OutPoint, Vec<Conviction>>>,
}

impl Prison {
    pub fn new(punitive_ban_secs: u64, backend_stability_ban_secs: u64) -> Self {
        Self { punitive_ban_secs, backend_stability_ban_secs, inmates: Mutex::new(HashMap::new()) }
    }

    fn lock_inmates(&self) -> std::sync::MutexGuard<'_, HashMap<OutPoint, Vec<Conviction>>> {
        self.inmates.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Records a conviction and returns the ban expiry.
    pub fn note(&self, outpoint: OutPoint, offense: Offense, round_id: RoundId, now_nanos: u64) -> u64 {
        let mut inmates = self.lock_inmates();
        let record = inmates.entry(outpoint).or_default();
        let duration_secs = if offense.is_punitive() {
            let prior = record.iter().filter(|c| c.offense.is_punitive()).count() as u64;
            self.punitive_ban_secs.saturating_mul(prior + 1)
        } else {
            self.backend_stability_ban_secs
        };
        let banned_until_nanos = now_nanos.saturating_add(duration_secs.saturating_mul(NANOS_PER_SEC));
        record.push(Conviction { offense, banned_until_nanos });
        info!(
            "input banned outpoint={} offense={} round_id={} banned_until_nanos={}",
            outpoint, offense, round_id, banned_until_nanos
        );
        banned_until_nanos
    }

    /// Latest active ban expiry for the outpoint, if any.
    pub fn banned_until(&self, outpoint: &OutPoint, now_nanos: u64) -> Option<u64> {
        let inmates = self.lock_inmates();
        inmates
            .get(outpoint)?
            .iter()
            .map(|c| c.banned_until_nanos)
            .filter(|until| *until > now_nanos)
            .max()
    }

    pub fn is_banned(&self, outpoint: &OutPoint, now_nanos: u64) -> bool {
        self.banned_until(outpoint, now_nanos).is_some()
    }

    /// Drops records whose every conviction expired before the cutoff.
    pub fn sweep_expired(&self, cutoff_nanos: u64) -> usize {
        let mut inmates = self.lock_inmates();
        let before = inmates.len();
        inmates.retain(|_, record| record.iter().any(|c| c.banned_until_nanos > cutoff_nanos));
        before - inmates.len()
    }

    pub fn inmate_count(&self) -> usize {
        self.lock_inmates().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn outpoint(tag: u8) -> OutPoint {
        OutPoint { txid: Txid::from_byte_array([tag; 32]), vout: 0 }
    }

    #[test]
    fn ban_and_expiry() {
        let prison = Prison::new(10, 1);
        let until = prison.note(outpoint(1), Offense::FailedToSign, RoundId::new([0u8; 32]), 0);
        assert_eq!(until, 10 * NANOS_PER_SEC);
        assert!(prison.is_banned(&outpoint(1), 5 * NANOS_PER_SEC));
        assert!(!prison.is_banned(&outpoint(1), 10 * NANOS_PER_SEC));
        assert!(!prison.is_banned(&outpoint(2), 0));
    }

    #[test]
    fn repeat_punitive_offenders_serve_longer() {
        let prison = Prison::new(10, 1);
        let first = prison.note(outpoint(1), Offense::FailedToConfirm, RoundId::new([0u8; 32]), 0);
        let second = prison.note(outpoint(1), Offense::DoubleSpent, RoundId::new([0u8; 32]), 0);
        assert_eq!(first, 10 * NANOS_PER_SEC);
        assert_eq!(second, 20 * NANOS_PER_SEC);
    }

    #[test]
    fn backend_stability_ban_is_flat_and_short() {
        let prison = Prison::new(10, 1);
        prison.note(outpoint(1), Offense::FailedToConfirm, RoundId::new([0u8; 32]), 0);
        let safety = prison.note(outpoint(1), Offense::BackendStability, RoundId::new([0u8; 32]), 0);
        assert_eq!(safety, NANOS_PER_SEC);
    }

    #[test]
    fn sweep_drops_fully_expired_records() {
        let prison = Prison::new(10, 1);
        prison.note(outpoint(1), Offense::FailedToConfirm, RoundId::new([0u8; 32]), 0);
        prison.note(outpoint(2), Offense::FailedToConfirm, RoundId::new([0u8; 32]), 100 * NANOS_PER_SEC);
        assert_eq!(prison.sweep_expired(50 * NANOS_PER_SEC), 1);
        assert_eq!(prison.inmate_count(), 1);
    }
}
