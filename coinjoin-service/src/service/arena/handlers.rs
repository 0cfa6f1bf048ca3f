use super::requests::{
    ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest, InputRegistrationResponse,
    OutputRegistrationRequest, ReadyToSignRequest, ReissuanceRequest, ReissuanceResponse, TransactionSignatureRequest,
};
use super::{classify_spend_status, Arena};
use bitcoin::Amount;
use coinjoin_core::domain::{Alice, Bob, Coin, CoinjoinState, Phase, Round};
use coinjoin_core::foundation::{now_nanos, CoordinatorError, Result};
use log::{debug, info};

/// Participant-facing operations.
///
/// Every handler follows the same two-step protocol: validate against a
/// snapshot of the round under the lock, do chain/credential work with the
/// lock released, then re-acquire the lock, re-validate the guards that may
/// have moved, and commit. Phase transitions themselves happen only in the
/// tick, so a handler can observe at most one phase flip between its two
/// lock scopes. Chain and issuer calls run under the per-request deadline;
/// an elapsed deadline rejects the request and never bans the input.
impl Arena {
    pub async fn register_input(&self, request: InputRegistrationRequest) -> Result<InputRegistrationResponse> {
        let now = now_nanos();
        let InputRegistrationRequest { round_id, outpoint, ownership_proof, zero_amount_credentials, zero_vsize_credentials } =
            request;

        ownership_proof
            .validate_envelope()
            .map_err(|err| self.punish_on_misbehavior(outpoint, round_id, now, err))?;
        if let Some(banned_until_nanos) = self.prison.banned_until(&outpoint, now) {
            return Err(CoordinatorError::InputBanned { banned_until_nanos });
        }

        let (params, amount_issuer, vsize_issuer) = {
            let inner = self.inner.lock().await;
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            ensure_accepting_registrations(round, now)?;
            if !round.is_whitelisted(&outpoint) {
                return Err(CoordinatorError::InputNotWhitelisted);
            }
            if inner.is_input_registered(&outpoint) {
                return Err(CoordinatorError::AliceAlreadyRegistered);
            }
            (round.parameters.clone(), round.amount_issuer(), round.vsize_issuer())
        };

        let status = classify_spend_status(self.bound_by_request("spend status lookup", self.rpc.get_tx_out(outpoint, true)).await?)?;
        let coin = Coin::new(outpoint, status.tx_out);
        let vsize = coin.spend_vsize()?;
        if vsize > params.max_vsize_allocation_per_alice {
            return Err(CoordinatorError::TooMuchVsize { vsize, max: params.max_vsize_allocation_per_alice });
        }
        let amount = coin.amount();
        if amount < params.min_registrable_amount {
            return Err(CoordinatorError::NotEnoughFunds { amount: amount.to_sat(), min: params.min_registrable_amount.to_sat() });
        }
        if amount > params.max_registrable_amount {
            return Err(CoordinatorError::TooMuchFunds { amount: amount.to_sat(), max: params.max_registrable_amount.to_sat() });
        }
        // Funding transaction feeds the one-hop fee-exemption heuristic.
        let funding_tx = self.bound_by_request("funding transaction lookup", self.rpc.get_transaction(outpoint.txid)).await?;
        let zero_amount = self
            .bound_by_request("zero amount issuance", amount_issuer.handle_zero_request(&zero_amount_credentials))
            .await
            .map_err(|err| self.punish_on_misbehavior(outpoint, round_id, now, err))?;
        let zero_vsize = self
            .bound_by_request("zero vsize issuance", vsize_issuer.handle_zero_request(&zero_vsize_credentials))
            .await
            .map_err(|err| self.punish_on_misbehavior(outpoint, round_id, now, err))?;

        let mut inner = self.inner.lock().await;
        let exempted = inner.coinjoin_txids.contains(&outpoint.txid)
            || funding_tx.as_ref().is_some_and(|tx| {
                !tx.input.is_empty() && tx.input.iter().all(|txin| inner.coinjoin_txids.contains(&txin.previous_output.txid))
            });
        if inner.is_input_registered(&outpoint) {
            return Err(CoordinatorError::AliceAlreadyRegistered);
        }
        let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        ensure_accepting_registrations(round, now)?;
        if !round.is_whitelisted(&outpoint) {
            return Err(CoordinatorError::InputNotWhitelisted);
        }
        let mut alice = Alice::new(coin, ownership_proof, exempted, now);
        if alice.remaining_amount(&round.parameters)? == Amount::ZERO {
            return Err(CoordinatorError::UneconomicalInput);
        }
        alice.set_deadline(now, round.parameters.connection_confirmation_timeout_nanos);
        let confirm_by_nanos = alice.deadline_nanos;
        round.add_alice(alice)?;
        info!("input registered round_id={} outpoint={} amount={} fee_exempted={}", round_id, outpoint, amount, exempted);

        Ok(InputRegistrationResponse { round_id, zero_amount_credentials: zero_amount, zero_vsize_credentials: zero_vsize, confirm_by_nanos })
    }

    pub async fn confirm_connection(&self, request: ConnectionConfirmationRequest) -> Result<ConnectionConfirmationResponse> {
        let now = now_nanos();
        let ConnectionConfirmationRequest {
            round_id,
            outpoint,
            zero_amount_credentials,
            zero_vsize_credentials,
            real_amount_credentials,
            real_vsize_credentials,
        } = request;

        let (phase, amount_issuer, vsize_issuer, entitlement_amount, entitlement_vsize) = {
            let inner = self.inner.lock().await;
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            let phase = round.phase();
            if !matches!(phase, Phase::InputRegistration | Phase::ConnectionConfirmation) {
                return Err(CoordinatorError::WrongPhase { round_id, phase: phase.to_string() });
            }
            let alice = round.alice(&outpoint).ok_or(CoordinatorError::AliceNotFound)?;
            if alice.confirmed_connection {
                return Err(CoordinatorError::Message("connection already confirmed".to_string()));
            }
            (
                phase,
                round.amount_issuer(),
                round.vsize_issuer(),
                alice.remaining_amount(&round.parameters)?,
                alice.remaining_vsize(&round.parameters)?,
            )
        };

        let zero_amount = self
            .bound_by_request("zero amount issuance", amount_issuer.handle_zero_request(&zero_amount_credentials))
            .await
            .map_err(|err| self.punish_on_misbehavior(outpoint, round_id, now, err))?;
        let zero_vsize = self
            .bound_by_request("zero vsize issuance", vsize_issuer.handle_zero_request(&zero_vsize_credentials))
            .await
            .map_err(|err| self.punish_on_misbehavior(outpoint, round_id, now, err))?;

        if phase == Phase::InputRegistration {
            // Keep-alive: zero credentials only, refreshed deadline. The
            // client re-confirms for real credentials after the phase flip.
            let mut inner = self.inner.lock().await;
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            if round.phase() != Phase::InputRegistration {
                return Err(CoordinatorError::WrongPhase { round_id, phase: round.phase().to_string() });
            }
            let timeout = round.parameters.connection_confirmation_timeout_nanos;
            let alice = round.alice_mut(&outpoint).ok_or(CoordinatorError::AliceNotFound)?;
            alice.set_deadline(now, timeout);
            return Ok(ConnectionConfirmationResponse {
                zero_amount_credentials: zero_amount,
                zero_vsize_credentials: zero_vsize,
                real_amount_credentials: None,
                real_vsize_credentials: None,
            });
        }

        // Final confirmation: requested deltas must equal the entitlement
        // exactly; a mismatch is a rejection, never a silent truncation.
        let expected_amount = entitlement_amount.to_sat() as i64;
        if real_amount_credentials.delta != expected_amount {
            return Err(CoordinatorError::IncorrectRequestedAmountCredentials {
                expected: expected_amount,
                actual: real_amount_credentials.delta,
            });
        }
        let expected_vsize = entitlement_vsize as i64;
        if real_vsize_credentials.delta != expected_vsize {
            return Err(CoordinatorError::IncorrectRequestedVsizeCredentials {
                expected: expected_vsize,
                actual: real_vsize_credentials.delta,
            });
        }
        let real_amount = self
            .bound_by_request("real amount issuance", amount_issuer.handle_real_request(&real_amount_credentials))
            .await
            .map_err(|err| self.punish_on_misbehavior(outpoint, round_id, now, err))?;
        let real_vsize = self
            .bound_by_request("real vsize issuance", vsize_issuer.handle_real_request(&real_vsize_credentials))
            .await
            .map_err(|err| self.punish_on_misbehavior(outpoint, round_id, now, err))?;

        let mut inner = self.inner.lock().await;
        let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        if round.phase() != Phase::ConnectionConfirmation {
            return Err(CoordinatorError::WrongPhase { round_id, phase: round.phase().to_string() });
        }
        let coin = {
            let alice = round.alice(&outpoint).ok_or(CoordinatorError::AliceNotFound)?;
            if alice.confirmed_connection {
                return Err(CoordinatorError::Message("connection already confirmed".to_string()));
            }
            alice.coin.clone()
        };
        let construction = round.coinjoin().as_construction()?.add_input(coin);
        round.set_coinjoin(CoinjoinState::Construction(construction));
        let alice = round.alice_mut(&outpoint).ok_or(CoordinatorError::AliceNotFound)?;
        alice.confirmed_connection = true;
        info!("connection confirmed round_id={} outpoint={} amount_delta={}", round_id, outpoint, expected_amount);

        Ok(ConnectionConfirmationResponse {
            zero_amount_credentials: zero_amount,
            zero_vsize_credentials: zero_vsize,
            real_amount_credentials: Some(real_amount),
            real_vsize_credentials: Some(real_vsize),
        })
    }

    pub async fn register_output(&self, request: OutputRegistrationRequest) -> Result<()> {
        let OutputRegistrationRequest { round_id, script, amount, amount_credentials, vsize_credentials } = request;
        let bob = Bob::new(script, amount)?;

        let (amount_issuer, vsize_issuer) = {
            let inner = self.inner.lock().await;
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            if round.phase() != Phase::OutputRegistration {
                return Err(CoordinatorError::WrongPhase { round_id, phase: round.phase().to_string() });
            }
            if inner.is_script_known(&bob.script) {
                return Err(CoordinatorError::AlreadyRegisteredScript);
            }
            if amount < round.parameters.min_output_amount {
                return Err(CoordinatorError::NotEnoughFunds {
                    amount: amount.to_sat(),
                    min: round.parameters.min_output_amount.to_sat(),
                });
            }
            if amount > round.parameters.max_registrable_amount {
                return Err(CoordinatorError::TooMuchFunds {
                    amount: amount.to_sat(),
                    max: round.parameters.max_registrable_amount.to_sat(),
                });
            }
            let expected_amount = -(amount.to_sat() as i64);
            if amount_credentials.delta != expected_amount {
                return Err(CoordinatorError::IncorrectRequestedAmountCredentials {
                    expected: expected_amount,
                    actual: amount_credentials.delta,
                });
            }
            let expected_vsize = -(bob.output_vsize() as i64);
            if vsize_credentials.delta != expected_vsize {
                return Err(CoordinatorError::IncorrectRequestedVsizeCredentials {
                    expected: expected_vsize,
                    actual: vsize_credentials.delta,
                });
            }
            (round.amount_issuer(), round.vsize_issuer())
        };

        // Output registration is anonymous; there is no input to punish, so
        // verification failures only propagate.
        self.bound_by_request("real amount issuance", amount_issuer.handle_real_request(&amount_credentials)).await?;
        self.bound_by_request("real vsize issuance", vsize_issuer.handle_real_request(&vsize_credentials)).await?;

        let mut inner = self.inner.lock().await;
        if inner.is_script_known(&bob.script) {
            return Err(CoordinatorError::AlreadyRegisteredScript);
        }
        let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        if round.phase() != Phase::OutputRegistration {
            return Err(CoordinatorError::WrongPhase { round_id, phase: round.phase().to_string() });
        }
        let construction = round.coinjoin().as_construction()?.add_output(bob.to_tx_out());
        round.set_coinjoin(CoinjoinState::Construction(construction));
        info!("output registered round_id={} amount={}", round_id, amount);
        round.add_bob(bob);
        Ok(())
    }

    pub async fn ready_to_sign(&self, request: ReadyToSignRequest) -> Result<()> {
        let ReadyToSignRequest { round_id, outpoint } = request;
        let mut inner = self.inner.lock().await;
        let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        if round.phase() != Phase::OutputRegistration {
            return Err(CoordinatorError::WrongPhase { round_id, phase: round.phase().to_string() });
        }
        let alice = round.alice_mut(&outpoint).ok_or(CoordinatorError::AliceNotFound)?;
        alice.ready_to_sign = true;
        debug!("alice ready to sign round_id={} outpoint={}", round_id, outpoint);
        Ok(())
    }

    /// Accepts one input's witness. Partial witness sets are fine; the tick
    /// broadcasts once the set is complete.
    pub async fn sign_transaction(&self, request: TransactionSignatureRequest) -> Result<()> {
        let TransactionSignatureRequest { round_id, outpoint, witness } = request;
        let mut inner = self.inner.lock().await;
        let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        if round.phase() != Phase::TransactionSigning {
            return Err(CoordinatorError::WrongPhase { round_id, phase: round.phase().to_string() });
        }
        let signing = round.coinjoin().as_signing()?;
        let index = signing.input_index_of(&outpoint).ok_or(CoordinatorError::AliceNotFound)?;
        let updated = signing.add_witness(index, witness)?;
        round.set_coinjoin(CoinjoinState::Signing(updated));
        debug!("witness accepted round_id={} outpoint={} input_index={}", round_id, outpoint, index);
        Ok(())
    }

    /// Zero-sum credential swap: breaks linkage between issuance and
    /// redemption without moving any value.
    pub async fn reissue_credentials(&self, request: ReissuanceRequest) -> Result<ReissuanceResponse> {
        let ReissuanceRequest { round_id, amount_credentials, vsize_credentials } = request;
        let (amount_issuer, vsize_issuer) = {
            let inner = self.inner.lock().await;
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            if !matches!(round.phase(), Phase::ConnectionConfirmation | Phase::OutputRegistration) {
                return Err(CoordinatorError::WrongPhase { round_id, phase: round.phase().to_string() });
            }
            (round.amount_issuer(), round.vsize_issuer())
        };
        if amount_credentials.delta != 0 {
            return Err(CoordinatorError::DeltaNotZero(amount_credentials.delta));
        }
        if vsize_credentials.delta != 0 {
            return Err(CoordinatorError::DeltaNotZero(vsize_credentials.delta));
        }
        let amount = self.bound_by_request("reissuance", amount_issuer.handle_real_request(&amount_credentials)).await?;
        let vsize = self.bound_by_request("reissuance", vsize_issuer.handle_real_request(&vsize_credentials)).await?;
        Ok(ReissuanceResponse { amount_credentials: amount, vsize_credentials: vsize })
    }
}

fn ensure_accepting_registrations(round: &Round, now_nanos: u64) -> Result<()> {
    if round.phase() != Phase::InputRegistration || round.is_input_registration_ended(now_nanos) {
        return Err(CoordinatorError::WrongPhase { round_id: round.id(), phase: round.phase().to_string() });
    }
    Ok(())
}
