use crate::foundation::constants::MAX_AMOUNT_PER_ALICE;
use bitcoin::Amount;

/// Ladder of `(divider, max amount)` tiers staggering round sizes across
/// round generations: every level doubles the divider and multiplies the
/// amount by ten, so large-amount rounds recur less frequently and
/// participants with very different balances land in different rounds.
#[derive(Clone, Debug)]
pub struct MaxSuggestedAmountProvider {
    ladder: Vec<(u64, Amount)>,
}

impl MaxSuggestedAmountProvider {
    pub fn new(base_amount: Amount, absolute_max: Amount) -> Self {
        let mut ladder = Vec::new();
        let mut divider: u64 = 1;
        let mut amount = base_amount;
        loop {
            if amount >= absolute_max {
                ladder.push((divider, absolute_max));
                break;
            }
            ladder.push((divider, amount));
            divider = divider.saturating_mul(2);
            amount = match amount.checked_mul(10) {
                Some(next) => next,
                None => {
                    ladder.push((divider, absolute_max));
                    break;
                }
            };
        }
        Self { ladder }
    }

    /// Largest tier whose divider evenly divides the (non-zero) round
    /// counter; counter 0 and indivisible counters get the base tier.
    pub fn max_suggested_amount(&self, round_counter: u64) -> Amount {
        let base = self.ladder.first().map(|(_, amount)| *amount).unwrap_or(MAX_AMOUNT_PER_ALICE);
        if round_counter == 0 {
            return base;
        }
        self.ladder
            .iter()
            .rev()
            .find(|(divider, _)| round_counter % divider == 0)
            .map(|(_, amount)| *amount)
            .unwrap_or(base)
    }

    pub fn tier_count(&self) -> usize {
        self.ladder.len()
    }
}
