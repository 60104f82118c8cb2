//! Deposits and the CTIP derived from them.
//!
//! Every deposit into a sidechain spends the previous deposit's sidechain
//! output, so the deposits of a slot form a single spend chain.  The chain's
//! last sidechain output is the CTIP.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{script::Instruction, Amount, OutPoint, Script, Transaction, Txid};
use borsh::{BorshDeserialize, BorshSerialize};
use drivechain_primitives::{buf::Buf32, l1::OutputRef, sidechain::SidechainNumber};
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{errors::DepositError, registry::SidechainRegistry};

/// A transaction that moved funds into a sidechain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Deposit {
    slot: SidechainNumber,

    /// Sidechain address the funds are for.
    dest: String,
    tx: Transaction,
    txid: Txid,

    /// Index of the output paying to the sidechain script.
    n_output: u32,
    tx_index: u32,
    block_hash: Buf32,
}

impl Deposit {
    pub fn new(
        slot: SidechainNumber,
        dest: String,
        tx: Transaction,
        n_output: u32,
        tx_index: u32,
        block_hash: Buf32,
    ) -> Result<Self, DepositError> {
        let txid = tx.compute_txid();
        if n_output as usize >= tx.output.len() {
            return Err(DepositError::InvalidOutputIndex(txid, n_output));
        }
        Ok(Self {
            slot,
            dest,
            tx,
            txid,
            n_output,
            tx_index,
            block_hash,
        })
    }

    /// Parses a deposit out of a transaction.
    ///
    /// Returns `Ok(None)` if the transaction doesn't pay to any sidechain
    /// script.  A deposit must pay to exactly one.
    pub fn from_transaction(
        tx: &Transaction,
        tx_index: u32,
        block_hash: Buf32,
    ) -> Result<Option<Self>, DepositError> {
        let sc_outputs: Vec<(usize, SidechainNumber)> = tx
            .output
            .iter()
            .enumerate()
            .filter_map(|(i, out)| {
                SidechainNumber::from_script(&out.script_pubkey)
                    .ok()
                    .map(|slot| (i, slot))
            })
            .collect();

        let (n_output, slot) = match sc_outputs.as_slice() {
            [] => return Ok(None),
            [one] => *one,
            many => {
                return Err(DepositError::MultipleSidechainOutputs(
                    tx.compute_txid(),
                    many.len(),
                ))
            }
        };

        let dest = tx
            .output
            .iter()
            .find(|out| out.script_pubkey.is_op_return())
            .map(|out| op_return_data(&out.script_pubkey))
            .unwrap_or_default();

        Self::new(slot, dest, tx.clone(), n_output as u32, tx_index, block_hash).map(Some)
    }

    pub fn slot(&self) -> SidechainNumber {
        self.slot
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn n_output(&self) -> u32 {
        self.n_output
    }

    pub fn tx_index(&self) -> u32 {
        self.tx_index
    }

    pub fn block_hash(&self) -> &Buf32 {
        &self.block_hash
    }

    /// The output that holds the sidechain's funds after this deposit.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.n_output)
    }

    pub fn amount(&self) -> Amount {
        // Checked in the constructor.
        self.tx.output[self.n_output as usize].value
    }

    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.tx
            .input
            .iter()
            .any(|txin| txin.previous_output == *outpoint)
    }
}

/// Concatenated pushes of an `OP_RETURN` script, read as UTF-8.
fn op_return_data(script: &Script) -> String {
    let data: Vec<u8> = script
        .instructions()
        .skip(1)
        .filter_map(|ins| match ins {
            Ok(Instruction::PushBytes(push)) => Some(push.as_bytes().to_vec()),
            _ => None,
        })
        .flatten()
        .collect();
    String::from_utf8_lossy(&data).into_owned()
}

/// The most recent sidechain output of a slot.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Ctip {
    outpoint: OutputRef,
    amount: u64,
}

impl Ctip {
    pub fn new(outpoint: OutPoint, amount: Amount) -> Self {
        Self {
            outpoint: outpoint.into(),
            amount: amount.to_sat(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        *self.outpoint.outpoint()
    }

    pub fn amount(&self) -> Amount {
        Amount::from_sat(self.amount)
    }
}

/// Orders deposits along their spend chain.
///
/// The head is the one deposit that doesn't spend any other listed deposit.
/// Fails if there isn't exactly one head or if the chain breaks.
pub fn sort_deposits(
    slot: SidechainNumber,
    deposits: Vec<Deposit>,
) -> Result<Vec<Deposit>, DepositError> {
    if deposits.is_empty() {
        return Ok(deposits);
    }

    let outpoints: Vec<OutPoint> = deposits.iter().map(Deposit::outpoint).collect();
    let heads: Vec<usize> = deposits
        .iter()
        .enumerate()
        .filter(|(i, d)| {
            !outpoints
                .iter()
                .enumerate()
                .any(|(j, op)| j != *i && d.spends(op))
        })
        .map(|(i, _)| i)
        .collect();

    let head = match heads.as_slice() {
        [] => return Err(DepositError::NoChainHead(slot)),
        [head] => *head,
        many => {
            return Err(DepositError::MultipleChainHeads {
                slot,
                count: many.len(),
            })
        }
    };

    let mut remaining = deposits;
    let mut sorted = Vec::with_capacity(remaining.len());
    sorted.push(remaining.swap_remove(head));

    while let Some(last) = sorted.last() {
        if remaining.is_empty() {
            break;
        }
        let prev = last.outpoint();
        match remaining.iter().position(|d| d.spends(&prev)) {
            Some(i) => sorted.push(remaining.swap_remove(i)),
            None => {
                return Err(DepositError::BrokenChain {
                    slot,
                    unplaced: remaining.len(),
                })
            }
        }
    }

    Ok(sorted)
}

/// Deposits of every slot, kept in spend chain order, and their CTIPs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepositLedger {
    deposits: BTreeMap<SidechainNumber, Vec<Deposit>>,
    ctips: BTreeMap<SidechainNumber, Ctip>,
}

impl DepositLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposits(&self, slot: SidechainNumber) -> &[Deposit] {
        self.deposits.get(&slot).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn ctip(&self, slot: SidechainNumber) -> Option<&Ctip> {
        self.ctips.get(&slot)
    }

    pub fn ctips(&self) -> impl Iterator<Item = (SidechainNumber, &Ctip)> + '_ {
        self.ctips.iter().map(|(slot, ctip)| (*slot, ctip))
    }

    pub fn have_deposit(&self, txid: &Txid) -> bool {
        self.deposits.values().flatten().any(|d| d.txid == *txid)
    }

    /// Slot whose CTIP the transaction spends, if any.
    pub fn ctip_spent_by(&self, tx: &Transaction) -> Option<SidechainNumber> {
        self.ctips.iter().find_map(|(slot, ctip)| {
            let op = ctip.outpoint();
            tx.input
                .iter()
                .any(|txin| txin.previous_output == op)
                .then_some(*slot)
        })
    }

    /// Checks a deposit found in a block adds value to its sidechain.
    pub fn check_new_deposit(&self, deposit: &Deposit) -> Result<(), DepositError> {
        match self.ctip(deposit.slot) {
            Some(ctip) if deposit.amount() <= ctip.amount() => {
                Err(DepositError::ValueNotAboveCtip(deposit.txid))
            }
            _ => Ok(()),
        }
    }

    /// Adds deposits, dropping the ones for inactive slots or that we already
    /// have.  Every touched slot is sorted again from scratch.  On error
    /// nothing is changed.  Returns the number of deposits added.
    pub fn add_deposits(
        &mut self,
        registry: &SidechainRegistry,
        list: Vec<Deposit>,
    ) -> Result<usize, DepositError> {
        let mut staged: BTreeMap<SidechainNumber, Vec<Deposit>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut added = 0;

        for deposit in list {
            if !registry.is_active(deposit.slot) {
                debug!(slot = %deposit.slot, txid = %deposit.txid, "ignoring deposit to inactive sidechain");
                continue;
            }
            if self.have_deposit(&deposit.txid) || !seen.insert(deposit.txid) {
                continue;
            }
            staged
                .entry(deposit.slot)
                .or_insert_with(|| self.deposits(deposit.slot).to_vec())
                .push(deposit);
            added += 1;
        }

        let mut sorted = Vec::with_capacity(staged.len());
        for (slot, deposits) in staged {
            sorted.push((slot, sort_deposits(slot, deposits)?));
        }
        for (slot, deposits) in sorted {
            self.deposits.insert(slot, deposits);
        }

        self.update_ctip();
        Ok(added)
    }

    /// Recomputes every CTIP from the sorted deposit lists.
    pub fn update_ctip(&mut self) {
        self.deposits.retain(|_, list| !list.is_empty());
        self.ctips = self
            .deposits
            .iter()
            .filter_map(|(slot, list)| {
                list.last()
                    .map(|d| (*slot, Ctip::new(d.outpoint(), d.amount())))
            })
            .collect();
    }

    /// Removes the deposits made in a block.  Returns how many were removed.
    pub fn remove_block_deposits(&mut self, block_hash: &Buf32) -> Result<usize, DepositError> {
        let mut removed = 0;
        let mut resorted = Vec::new();
        for (slot, list) in &self.deposits {
            let before = list.len();
            let kept: Vec<Deposit> = list
                .iter()
                .filter(|d| d.block_hash != *block_hash)
                .cloned()
                .collect();
            if kept.len() != before {
                removed += before - kept.len();
                resorted.push((*slot, sort_deposits(*slot, kept)?));
            }
        }

        for (slot, list) in resorted {
            self.deposits.insert(slot, list);
        }
        self.update_ctip();
        Ok(removed)
    }

    /// Drops everything about a slot that got a new sidechain.
    pub fn reset_slot(&mut self, slot: SidechainNumber) {
        self.deposits.remove(&slot);
        self.ctips.remove(&slot);
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{ScriptBuf, TxIn, TxOut};
    use drivechain_test_utils::{bitcoin::deposit_tx, ArbitraryGenerator};

    use super::*;
    use crate::sidechain::SidechainProposal;

    fn registry_with(slot: SidechainNumber) -> SidechainRegistry {
        let mut prop: SidechainProposal = ArbitraryGenerator::new().generate();
        prop.slot = slot;
        let mut reg = SidechainRegistry::new();
        reg.install(prop.to_sidechain());
        reg
    }

    fn deposit(slot: SidechainNumber, prev: Option<OutPoint>, sats: u64, block: u8) -> Deposit {
        let tx = deposit_tx(slot.0, prev, Amount::from_sat(sats), "sc-address");
        Deposit::from_transaction(&tx, 1, Buf32::from([block; 32]))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_from_transaction() {
        let slot = SidechainNumber(2);
        let d = deposit(slot, None, 5000, 1);
        assert_eq!(d.slot(), slot);
        assert_eq!(d.dest(), "sc-address");
        assert_eq!(d.amount(), Amount::from_sat(5000));
        assert_eq!(
            d.tx().output[d.n_output() as usize].script_pubkey,
            slot.script()
        );

        let mut tx = d.tx().clone();
        tx.output.push(TxOut {
            value: Amount::from_sat(1),
            script_pubkey: SidechainNumber(3).script(),
        });
        assert!(matches!(
            Deposit::from_transaction(&tx, 1, Buf32::zero()),
            Err(DepositError::MultipleSidechainOutputs(_, 2))
        ));

        tx.output.clear();
        tx.output.push(TxOut {
            value: Amount::from_sat(1),
            script_pubkey: ScriptBuf::new(),
        });
        assert_eq!(Deposit::from_transaction(&tx, 1, Buf32::zero()), Ok(None));
    }

    #[test]
    fn test_sort_reverse_order() {
        let slot = SidechainNumber(0);
        let d1 = deposit(slot, None, 1000, 1);
        let d2 = deposit(slot, Some(d1.outpoint()), 3000, 2);
        let d3 = deposit(slot, Some(d2.outpoint()), 4000, 3);

        let sorted = sort_deposits(slot, vec![d3.clone(), d1.clone(), d2.clone()]).unwrap();
        assert_eq!(sorted, vec![d1, d2, d3]);
    }

    #[test]
    fn test_sort_failures() {
        let slot = SidechainNumber(0);
        let d1 = deposit(slot, None, 1000, 1);
        let d2 = deposit(slot, None, 2000, 1);
        assert_eq!(
            sort_deposits(slot, vec![d1.clone(), d2]),
            Err(DepositError::MultipleChainHeads { slot, count: 2 })
        );

        // Two deposits spending each other's outputs can't both be heads.
        let mut a = d1.clone();
        let b = deposit(slot, Some(a.outpoint()), 3000, 1);
        a.tx.input = vec![TxIn {
            previous_output: b.outpoint(),
            ..Default::default()
        }];
        assert_eq!(
            sort_deposits(slot, vec![b, a]),
            Err(DepositError::NoChainHead(slot))
        );
    }

    #[test]
    fn test_add_deposits_and_ctip() {
        let slot = SidechainNumber(0);
        let reg = registry_with(slot);
        let mut ledger = DepositLedger::new();

        let d1 = deposit(slot, None, 1000, 1);
        let d2 = deposit(slot, Some(d1.outpoint()), 2500, 2);
        let other = deposit(SidechainNumber(9), None, 1000, 2);

        let added = ledger
            .add_deposits(&reg, vec![d2.clone(), d1.clone(), other, d1.clone()])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(ledger.deposits(slot), &[d1.clone(), d2.clone()]);

        let ctip = ledger.ctip(slot).unwrap();
        assert_eq!(ctip.outpoint(), d2.outpoint());
        assert_eq!(ctip.amount(), Amount::from_sat(2500));
        assert!(ledger.ctip(SidechainNumber(9)).is_none());

        // Adding the same ones again is a no-op.
        assert_eq!(ledger.add_deposits(&reg, vec![d1, d2]).unwrap(), 0);
    }

    #[test]
    fn test_add_deposits_is_atomic() {
        let slot = SidechainNumber(0);
        let reg = registry_with(slot);
        let mut ledger = DepositLedger::new();

        let d1 = deposit(slot, None, 1000, 1);
        ledger.add_deposits(&reg, vec![d1.clone()]).unwrap();
        let before = ledger.clone();

        // Doesn't spend the CTIP, so there would be two heads.
        let stray = deposit(slot, None, 5000, 2);
        assert!(ledger.add_deposits(&reg, vec![stray]).is_err());
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_check_new_deposit() {
        let slot = SidechainNumber(0);
        let reg = registry_with(slot);
        let mut ledger = DepositLedger::new();
        let d1 = deposit(slot, None, 1000, 1);
        assert!(ledger.check_new_deposit(&d1).is_ok());
        ledger.add_deposits(&reg, vec![d1.clone()]).unwrap();

        let low = deposit(slot, Some(d1.outpoint()), 1000, 2);
        assert!(matches!(
            ledger.check_new_deposit(&low),
            Err(DepositError::ValueNotAboveCtip(_))
        ));
        let high = deposit(slot, Some(d1.outpoint()), 1001, 2);
        assert!(ledger.check_new_deposit(&high).is_ok());
        assert_eq!(ledger.ctip_spent_by(high.tx()), Some(slot));
    }

    #[test]
    fn test_remove_block_deposits() {
        let slot = SidechainNumber(0);
        let reg = registry_with(slot);
        let mut ledger = DepositLedger::new();

        let d1 = deposit(slot, None, 1000, 1);
        let d2 = deposit(slot, Some(d1.outpoint()), 2000, 2);
        ledger.add_deposits(&reg, vec![d1.clone(), d2]).unwrap();

        assert_eq!(ledger.remove_block_deposits(&Buf32::from([2; 32])).unwrap(), 1);
        assert_eq!(ledger.ctip(slot).unwrap().outpoint(), d1.outpoint());

        assert_eq!(ledger.remove_block_deposits(&Buf32::from([1; 32])).unwrap(), 1);
        assert!(ledger.ctip(slot).is_none());
        assert!(ledger.deposits(slot).is_empty());
    }
}
