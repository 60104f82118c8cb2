//! Signing the CTIP input of withdrawal payouts.

use std::collections::BTreeMap;

use bitcoin::{
    ecdsa,
    hashes::Hash,
    script::{Builder, PushBytesBuf},
    secp256k1::{All, Message, Secp256k1},
    sighash::{EcdsaSighashType, SighashCache},
    Amount, PrivateKey, Script, Transaction,
};
use drivechain_primitives::sidechain::SidechainNumber;

use crate::errors::SignError;

/// Keys the node holds for the sidechains it pays out.
pub trait SidechainKeys: Send + Sync + 'static {
    fn key_for(&self, slot: SidechainNumber) -> Option<PrivateKey>;
}

/// Fixed set of keys, typically loaded at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticKeys {
    keys: BTreeMap<SidechainNumber, PrivateKey>,
}

impl StaticKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: SidechainNumber, key: PrivateKey) {
        self.keys.insert(slot, key);
    }
}

impl SidechainKeys for StaticKeys {
    fn key_for(&self, slot: SidechainNumber) -> Option<PrivateKey> {
        self.keys.get(&slot).copied()
    }
}

/// Produces the signature script of one input.
pub trait InputSigner: Send + Sync + 'static {
    fn sign_input(
        &self,
        tx: &mut Transaction,
        input: usize,
        script_code: &Script,
        value: Amount,
        key: &PrivateKey,
    ) -> Result<(), SignError>;
}

/// Legacy `SIGHASH_ALL` ECDSA signer.  The sidechain script isn't segwit, so
/// the spent value doesn't enter the sighash.
#[derive(Debug)]
pub struct EcdsaSigner {
    secp: Secp256k1<All>,
}

impl Default for EcdsaSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl EcdsaSigner {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }
}

impl InputSigner for EcdsaSigner {
    fn sign_input(
        &self,
        tx: &mut Transaction,
        input: usize,
        script_code: &Script,
        _value: Amount,
        key: &PrivateKey,
    ) -> Result<(), SignError> {
        let sighash_type = EcdsaSighashType::All;
        let sighash = SighashCache::new(&*tx)
            .legacy_signature_hash(input, script_code, sighash_type.to_u32())
            .map_err(|_| SignError::InputOutOfRange(input))?;

        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = ecdsa::Signature {
            signature: self.secp.sign_ecdsa(&msg, &key.inner),
            sighash_type,
        };
        let sig_push =
            PushBytesBuf::try_from(signature.to_vec()).map_err(|_| SignError::PushTooLarge)?;

        let script_sig = Builder::new()
            .push_slice(sig_push)
            .push_key(&key.public_key(&self.secp))
            .into_script();
        let txin = tx
            .input
            .get_mut(input)
            .ok_or(SignError::InputOutOfRange(input))?;
        txin.script_sig = script_sig;
        Ok(())
    }
}
