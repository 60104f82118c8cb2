//! The aggregate sidechain consensus state.

use std::collections::BTreeSet;

use bitcoin::{Amount, Transaction};
use drivechain_primitives::{buf::Buf32, params::SidechainParams, sidechain::SidechainNumber};
use tracing::*;

use crate::{
    activation::{ActivationOutcome, ActivationTracker},
    bundle::{self, FIRST_PAYOUT_OUTPUT},
    deposit::{Deposit, DepositLedger},
    errors::{ActivationError, DepositError, WithdrawalError},
    registry::SidechainRegistry,
    sidechain::SidechainProposal,
    vote::VoteVector,
    withdrawal::WithdrawalLedger,
};

/// Everything the sidechain rules track.  Cloning it is how speculative
/// checks get a copy to throw away.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScdbState {
    registry: SidechainRegistry,
    withdrawals: WithdrawalLedger,
    deposits: DepositLedger,
    activation: ActivationTracker,
}

impl ScdbState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SidechainRegistry {
        &self.registry
    }

    pub fn withdrawals(&self) -> &WithdrawalLedger {
        &self.withdrawals
    }

    pub fn withdrawals_mut(&mut self) -> &mut WithdrawalLedger {
        &mut self.withdrawals
    }

    pub fn deposits(&self) -> &DepositLedger {
        &self.deposits
    }

    pub fn deposits_mut(&mut self) -> &mut DepositLedger {
        &mut self.deposits
    }

    pub fn activation(&self) -> &ActivationTracker {
        &self.activation
    }

    pub fn add_withdrawal(
        &mut self,
        params: &SidechainParams,
        slot: SidechainNumber,
        hash: Buf32,
    ) -> Result<(), WithdrawalError> {
        self.withdrawals
            .add_withdrawal(&self.registry, params, slot, hash)
    }

    pub fn check_work_score(
        &self,
        params: &SidechainParams,
        slot: SidechainNumber,
        hash: &Buf32,
    ) -> bool {
        self.withdrawals
            .check_work_score(&self.registry, params, slot, hash)
    }

    pub fn update_scores(&mut self, votes: &VoteVector, new_slots: &BTreeSet<SidechainNumber>) {
        self.withdrawals.update_scores(votes, new_slots);
    }

    pub fn age_and_expire(&mut self, params: &SidechainParams, block_hash: Buf32) -> Vec<Buf32> {
        self.withdrawals.age_and_expire(params, block_hash)
    }

    pub fn add_deposits(&mut self, list: Vec<Deposit>) -> Result<usize, DepositError> {
        self.deposits.add_deposits(&self.registry, list)
    }

    /// Validates a withdrawal bundle found in a block and, unless
    /// `just_check` is set, pays it out: the change output becomes the new
    /// CTIP and the bundle moves to the spent set.
    ///
    /// Returns the bundle hash.  State is untouched on error.
    pub fn spend_withdrawal(
        &mut self,
        params: &SidechainParams,
        slot: SidechainNumber,
        block_hash: Buf32,
        tx: &Transaction,
        tx_index: u32,
        just_check: bool,
    ) -> Result<Buf32, WithdrawalError> {
        if !self.registry.is_active(slot) {
            return Err(WithdrawalError::SidechainInactive(slot));
        }

        let n_outputs = tx.output.len();
        if n_outputs < FIRST_PAYOUT_OUTPUT + 1 {
            return Err(WithdrawalError::TooFewOutputs(n_outputs));
        }

        let hash = bundle::bundle_hash(tx).ok_or(WithdrawalError::TooFewOutputs(n_outputs))?;
        if !self.check_work_score(params, slot, &hash) {
            return Err(WithdrawalError::InsufficientWorkScore(hash));
        }

        let return_dests = tx
            .output
            .iter()
            .filter(|out| bundle::is_return_dest(&out.script_pubkey))
            .count();
        if return_dests != 1 {
            return Err(WithdrawalError::ReturnDestCount(return_dests));
        }

        let sc_script = slot.script();
        let sc_outputs = tx
            .output
            .iter()
            .filter(|out| out.script_pubkey == sc_script)
            .count();
        if sc_outputs != 1 {
            return Err(WithdrawalError::SidechainOutputCount(sc_outputs));
        }
        let change_n = n_outputs - 1;
        let change = &tx.output[change_n];
        if change.script_pubkey != sc_script {
            return Err(WithdrawalError::MisplacedChange);
        }

        let ctip = *self
            .deposits
            .ctip(slot)
            .ok_or(WithdrawalError::MissingCtip(slot))?;
        let spends_ctip = tx
            .input
            .first()
            .is_some_and(|txin| txin.previous_output == ctip.outpoint());
        if !spends_ctip {
            return Err(WithdrawalError::CtipNotSpent(slot));
        }

        let fee = bundle::bundle_fee(tx).ok_or(WithdrawalError::InvalidFeeOutput)?;
        let output_total = sum_values(tx.output.iter().map(|out| out.value))?;
        let payout_total = sum_values(
            tx.output[FIRST_PAYOUT_OUTPUT..change_n]
                .iter()
                .map(|out| out.value),
        )?;

        let payout_matches = output_total.checked_sub(change.value) == Some(payout_total);
        let change_matches = payout_total
            .checked_add(fee)
            .and_then(|spent| ctip.amount().checked_sub(spent))
            == Some(change.value);
        if !payout_matches || !change_matches {
            return Err(WithdrawalError::Unbalanced);
        }

        if just_check {
            return Ok(hash);
        }

        let deposit = Deposit::new(
            slot,
            String::new(),
            tx.clone(),
            change_n as u32,
            tx_index,
            block_hash,
        )?;
        self.deposits.add_deposits(&self.registry, vec![deposit])?;
        self.withdrawals.mark_spent(slot, hash, block_hash);

        info!(%slot, %hash, payout = %payout_total, %fee, "withdrawal paid out");
        Ok(hash)
    }

    /// Runs the activation tracker for a block and clears the ledgers of any
    /// slot that got a new sidechain.
    pub fn process_activation(
        &mut self,
        params: &SidechainParams,
        proposals: &[SidechainProposal],
        acks: &[Buf32],
    ) -> Result<ActivationOutcome, ActivationError> {
        let outcome = self
            .activation
            .process_block(&mut self.registry, params, proposals, acks)?;
        for (slot, _) in &outcome.promoted {
            self.withdrawals.reset_slot(*slot);
            self.deposits.reset_slot(*slot);
        }
        Ok(outcome)
    }
}

fn sum_values(mut values: impl Iterator<Item = Amount>) -> Result<Amount, WithdrawalError> {
    values
        .try_fold(Amount::ZERO, |acc, v| acc.checked_add(v))
        .ok_or(WithdrawalError::Unbalanced)
}

#[cfg(test)]
mod tests {
    use bitcoin::{OutPoint, TxOut};
    use drivechain_test_utils::{
        bitcoin::{complete_bundle, deposit_tx, payout_output},
        ArbitraryGenerator,
    };

    use super::*;
    use crate::withdrawal::WithdrawalState;

    const SLOT: SidechainNumber = SidechainNumber(0);

    /// State with an active sidechain and a single 100k sat deposit.
    fn funded_state() -> ScdbState {
        let mut prop: SidechainProposal = ArbitraryGenerator::new().generate();
        prop.slot = SLOT;
        let mut state = ScdbState::new();
        state.registry.install(prop.to_sidechain());

        let tx = deposit_tx(SLOT.0, None, Amount::from_sat(100_000), "addr");
        let deposit = Deposit::from_transaction(&tx, 1, Buf32::from([1; 32]))
            .unwrap()
            .unwrap();
        state.add_deposits(vec![deposit]).unwrap();
        state
    }

    /// Bundle paying 30k + 20k with a 1k fee, spending the CTIP.
    fn bundle(state: &ScdbState) -> (Transaction, Buf32) {
        let raw = bundle::build_raw_bundle(
            Amount::from_sat(1_000),
            vec![payout_output(30_000), payout_output(20_000)],
        );
        let hash = bundle::raw_bundle_hash(&raw);
        let ctip = state.deposits().ctip(SLOT).unwrap();
        let change = ctip.amount() - Amount::from_sat(51_000);
        let tx = complete_bundle(&raw, ctip.outpoint(), SLOT.script(), change);
        (tx, hash)
    }

    fn with_score(state: &mut ScdbState, hash: Buf32, score: u16) {
        state
            .withdrawals_mut()
            .restore_tracked(vec![WithdrawalState::new(SLOT, hash, 100, score)]);
    }

    #[test]
    fn test_spend_withdrawal() {
        let params = SidechainParams::regtest();
        let mut state = funded_state();
        let (tx, hash) = bundle(&state);
        with_score(&mut state, hash, params.min_workscore);

        let block = Buf32::from([2; 32]);
        let before = state.clone();
        assert_eq!(
            state.spend_withdrawal(&params, SLOT, block, &tx, 1, true),
            Ok(hash)
        );
        assert_eq!(state, before);

        assert_eq!(
            state.spend_withdrawal(&params, SLOT, block, &tx, 1, false),
            Ok(hash)
        );
        assert!(state.withdrawals().is_spent(SLOT, &hash));
        assert!(state.withdrawals().tracked().is_empty());
        let ctip = state.deposits().ctip(SLOT).unwrap();
        assert_eq!(ctip.outpoint(), OutPoint::new(tx.compute_txid(), 4));
        assert_eq!(ctip.amount(), Amount::from_sat(49_000));

        // Not tracked anymore.
        assert_eq!(
            state.spend_withdrawal(&params, SLOT, block, &tx, 1, false),
            Err(WithdrawalError::InsufficientWorkScore(hash))
        );
    }

    #[test]
    fn test_spend_needs_workscore() {
        let params = SidechainParams::regtest();
        let mut state = funded_state();
        let (tx, hash) = bundle(&state);
        with_score(&mut state, hash, params.min_workscore - 1);
        assert_eq!(
            state.spend_withdrawal(&params, SLOT, Buf32::zero(), &tx, 1, false),
            Err(WithdrawalError::InsufficientWorkScore(hash))
        );
    }

    #[test]
    fn test_spend_rejects_bad_shapes() {
        let params = SidechainParams::regtest();
        let mut state = funded_state();
        let (tx, hash) = bundle(&state);
        with_score(&mut state, hash, params.min_workscore);
        let before = state.clone();

        let spend = |state: &mut ScdbState, tx: &Transaction| {
            state.spend_withdrawal(&params, SLOT, Buf32::zero(), tx, 1, false)
        };

        // Inactive slot.
        assert_eq!(
            state.spend_withdrawal(&params, SidechainNumber(1), Buf32::zero(), &tx, 1, false),
            Err(WithdrawalError::SidechainInactive(SidechainNumber(1)))
        );

        let mut short = tx.clone();
        short.output.truncate(2);
        assert_eq!(spend(&mut state, &short), Err(WithdrawalError::TooFewOutputs(2)));

        // Any change to the payouts changes the hash.
        let mut altered = tx.clone();
        altered.output[2].value = Amount::from_sat(29_000);
        assert!(matches!(
            spend(&mut state, &altered),
            Err(WithdrawalError::InsufficientWorkScore(_))
        ));

        // Paying more change than the reconciliation allows.
        let mut greedy = tx.clone();
        greedy.output[4].value = Amount::from_sat(49_001);
        assert_eq!(spend(&mut state, &greedy), Err(WithdrawalError::Unbalanced));

        // Not spending the CTIP.
        let mut wrong_input = tx.clone();
        wrong_input.input[0].previous_output = OutPoint::null();
        assert_eq!(
            spend(&mut state, &wrong_input),
            Err(WithdrawalError::CtipNotSpent(SLOT))
        );

        assert_eq!(state, before);
    }

    #[test]
    fn test_spend_rejects_extra_markers() {
        let params = SidechainParams::regtest();
        let mut state = funded_state();

        let raw = bundle::build_raw_bundle(
            Amount::from_sat(1_000),
            vec![
                payout_output(30_000),
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: bundle::return_dest_script(),
                },
            ],
        );
        let hash = bundle::raw_bundle_hash(&raw);
        let ctip = *state.deposits().ctip(SLOT).unwrap();
        let tx = complete_bundle(
            &raw,
            ctip.outpoint(),
            SLOT.script(),
            Amount::from_sat(69_000),
        );
        with_score(&mut state, hash, params.min_workscore);
        assert_eq!(
            state.spend_withdrawal(&params, SLOT, Buf32::zero(), &tx, 1, false),
            Err(WithdrawalError::ReturnDestCount(2))
        );
    }
}
