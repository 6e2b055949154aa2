//! MockLedger: in-memory ledger with signature checks, sequence ordering, fee
//! and balance accounting, escrow objects and explicit ledger closes.

use std::collections::{BTreeMap, HashMap};

use ledgerpay_crypto::{decode_and_verify, verify_signed};
use ledgerpay_types::{
    AccountState, Address, Drops, Escrow, EscrowStatus, LedgerTime, NetworkId, Operation,
    Sequence, SignedTransaction, SubmissionOutcome, SubmissionResult, TxHash,
};
use tracing::debug;

pub const DEFAULT_BASE_FEE: Drops = 10;
pub const TES_SUCCESS: &str = "tesSUCCESS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountRoot {
    pub sequence: Sequence,
    pub balance: Drops,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TxRecord {
    Pending { sequence: Sequence },
    Validated { sequence: Sequence, ledger_index: u32 },
}

#[derive(Debug, Clone)]
pub struct MockLedger {
    network_id: NetworkId,
    pub base_fee: Drops,
    pub accounts: HashMap<Address, AccountRoot>,
    pub escrows: BTreeMap<(Address, Sequence), Escrow>,
    transactions: HashMap<TxHash, TxRecord>,
    pending_order: Vec<TxHash>,
    ledger_index: u32,
    close_time: LedgerTime,
}

impl MockLedger {
    pub fn new(network_id: NetworkId, close_time: LedgerTime) -> Self {
        Self {
            network_id,
            base_fee: DEFAULT_BASE_FEE,
            accounts: HashMap::new(),
            escrows: BTreeMap::new(),
            transactions: HashMap::new(),
            pending_order: Vec::new(),
            ledger_index: 1,
            close_time,
        }
    }

    pub fn with_account(mut self, address: Address, sequence: Sequence, balance: Drops) -> Self {
        self.accounts
            .insert(address, AccountRoot { sequence, balance });
        self
    }

    pub fn fund(&mut self, address: Address, amount: Drops) {
        self.credit(address, amount);
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn ledger_index(&self) -> u32 {
        self.ledger_index
    }

    pub fn set_ledger_index(&mut self, ledger_index: u32) {
        self.ledger_index = ledger_index;
    }

    pub fn close_time(&self) -> LedgerTime {
        self.close_time
    }

    pub fn set_close_time(&mut self, close_time: LedgerTime) {
        self.close_time = close_time;
    }

    pub fn advance_time(&mut self, seconds: u32) {
        self.close_time = self.close_time.saturating_add(seconds);
    }

    pub fn account_state(&self, address: &Address) -> Option<AccountState> {
        self.accounts.get(address).map(|root| AccountState {
            sequence: root.sequence,
            balance: root.balance,
            exists: true,
        })
    }

    pub fn escrows_of(&self, owner: &Address) -> Vec<Escrow> {
        self.escrows
            .range((*owner, Sequence::MIN)..=(*owner, Sequence::MAX))
            .map(|(_, escrow)| escrow.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_order.len()
    }

    /// Validates every pending transaction in a new ledger and returns its index.
    pub fn close_ledger(&mut self) -> u32 {
        self.ledger_index += 1;
        for hash in self.pending_order.drain(..) {
            if let Some(record) = self.transactions.get_mut(&hash) {
                if let TxRecord::Pending { sequence } = *record {
                    *record = TxRecord::Validated {
                        sequence,
                        ledger_index: self.ledger_index,
                    };
                }
            }
        }
        debug!(ledger_index = self.ledger_index, "mock ledger closed");
        self.ledger_index
    }

    /// `None` when the ledger has never seen the hash.
    pub fn transaction_status(&self, hash: &TxHash) -> Option<SubmissionResult> {
        self.transactions.get(hash).map(|record| match *record {
            TxRecord::Pending { sequence } => {
                SubmissionResult::new(*hash, SubmissionOutcome::ProvisionallyAccepted, TES_SUCCESS)
                    .with_sequence(sequence)
            }
            TxRecord::Validated {
                sequence,
                ledger_index,
            } => SubmissionResult::new(*hash, SubmissionOutcome::Validated, TES_SUCCESS)
                .with_sequence(sequence)
                .with_ledger_index(ledger_index),
        })
    }

    pub fn submit_blob(&mut self, blob: &[u8]) -> SubmissionResult {
        match decode_and_verify(blob) {
            Ok(signed) => self.apply(&signed),
            Err(err) => SubmissionResult::new(
                ledgerpay_crypto::compute_tx_hash(blob),
                SubmissionOutcome::Rejected,
                format!("temMALFORMED: {err}"),
            ),
        }
    }

    pub fn submit(&mut self, signed: &SignedTransaction) -> SubmissionResult {
        if let Err(err) = verify_signed(signed) {
            return reject(signed, format!("temBAD_SIGNATURE: {err}"));
        }
        self.apply(signed)
    }

    fn apply(&mut self, signed: &SignedTransaction) -> SubmissionResult {
        let hash = *signed.hash();
        if self.transactions.contains_key(&hash) {
            return SubmissionResult::new(hash, SubmissionOutcome::ProvisionallyAccepted, "tefALREADY")
                .with_sequence(signed.sequence());
        }
        let tx = signed.unsigned();
        if tx.network_id != self.network_id {
            return reject(signed, "telWRONG_NETWORK");
        }
        if tx.fee < self.base_fee {
            return reject(signed, "telINSUF_FEE_P");
        }
        let Some(root) = self.accounts.get(&tx.account).copied() else {
            return reject(signed, "terNO_ACCOUNT");
        };
        if tx.sequence < root.sequence {
            return reject(signed, "tefPAST_SEQ");
        }
        if tx.sequence > root.sequence {
            return reject(signed, "terPRE_SEQ");
        }
        let debit = tx.operation.debit().saturating_add(tx.fee);
        if root.balance < debit {
            return reject(signed, "tecUNFUNDED_PAYMENT");
        }
        if let Err(code) = self.check_operation(tx.account, tx.sequence, &tx.operation) {
            return reject(signed, code);
        }

        self.accounts.insert(
            tx.account,
            AccountRoot {
                sequence: root.sequence + 1,
                balance: root.balance - debit,
            },
        );
        self.apply_operation(tx.account, tx.sequence, tx.operation);
        self.transactions.insert(
            hash,
            TxRecord::Pending {
                sequence: tx.sequence,
            },
        );
        self.pending_order.push(hash);
        debug!(%hash, sequence = tx.sequence, "mock ledger accepted transaction");
        SubmissionResult::new(hash, SubmissionOutcome::ProvisionallyAccepted, TES_SUCCESS)
            .with_sequence(tx.sequence)
    }

    fn check_operation(
        &self,
        account: Address,
        sequence: Sequence,
        operation: &Operation,
    ) -> Result<(), &'static str> {
        let now = self.close_time;
        match *operation {
            Operation::Payment {
                destination,
                amount,
            } => {
                if amount == 0 {
                    return Err("temBAD_AMOUNT");
                }
                if destination == account {
                    return Err("temREDUNDANT");
                }
            }
            Operation::EscrowCreate {
                amount,
                finish_after,
                cancel_after,
                ..
            } => {
                if amount == 0 {
                    return Err("temBAD_AMOUNT");
                }
                match (finish_after, cancel_after) {
                    (None, None) => return Err("temBAD_EXPIRATION"),
                    (Some(finish), Some(cancel)) if finish >= cancel => {
                        return Err("temBAD_EXPIRATION")
                    }
                    _ => {}
                }
                if cancel_after.is_some_and(|cancel| !cancel.is_after(now))
                    || finish_after.is_some_and(|finish| !finish.is_after(now))
                {
                    return Err("tecNO_PERMISSION");
                }
                if self.escrows.contains_key(&(account, sequence)) {
                    return Err("tefINTERNAL");
                }
            }
            Operation::EscrowFinish {
                owner,
                offer_sequence,
            } => {
                let escrow = self
                    .escrows
                    .get(&(owner, offer_sequence))
                    .ok_or("tecNO_TARGET")?;
                if escrow.finish_after.is_some_and(|finish| !now.is_after(finish))
                    || escrow.cancel_after.is_some_and(|cancel| now.is_after(cancel))
                {
                    return Err("tecNO_PERMISSION");
                }
            }
            Operation::EscrowCancel {
                owner,
                offer_sequence,
            } => {
                let escrow = self
                    .escrows
                    .get(&(owner, offer_sequence))
                    .ok_or("tecNO_TARGET")?;
                match escrow.cancel_after {
                    Some(cancel) if now.is_after(cancel) => {}
                    _ => return Err("tecNO_PERMISSION"),
                }
            }
        }
        Ok(())
    }

    fn apply_operation(&mut self, account: Address, sequence: Sequence, operation: Operation) {
        match operation {
            Operation::Payment {
                destination,
                amount,
            } => self.credit(destination, amount),
            Operation::EscrowCreate {
                destination,
                amount,
                finish_after,
                cancel_after,
            } => {
                self.escrows.insert(
                    (account, sequence),
                    Escrow {
                        owner: account,
                        destination,
                        amount,
                        offer_sequence: sequence,
                        finish_after,
                        cancel_after,
                        status: EscrowStatus::Created,
                    },
                );
            }
            Operation::EscrowFinish {
                owner,
                offer_sequence,
            } => {
                if let Some(escrow) = self.escrows.remove(&(owner, offer_sequence)) {
                    self.credit(escrow.destination, escrow.amount);
                }
            }
            Operation::EscrowCancel {
                owner,
                offer_sequence,
            } => {
                if let Some(escrow) = self.escrows.remove(&(owner, offer_sequence)) {
                    self.credit(escrow.owner, escrow.amount);
                }
            }
        }
    }

    fn credit(&mut self, address: Address, amount: Drops) {
        let ledger_index = self.ledger_index;
        self.accounts
            .entry(address)
            .and_modify(|root| root.balance = root.balance.saturating_add(amount))
            .or_insert(AccountRoot {
                // New accounts start at the current ledger index, as on the live network.
                sequence: ledger_index,
                balance: amount,
            });
    }
}

fn reject(signed: &SignedTransaction, code: impl Into<String>) -> SubmissionResult {
    let code = code.into();
    debug!(hash = %signed.hash(), code = code.as_str(), "mock ledger rejected transaction");
    SubmissionResult::new(*signed.hash(), SubmissionOutcome::Rejected, code)
}

#[cfg(test)]
mod tests {
    use ledgerpay_crypto::{sign_transaction, KeyStore};
    use ledgerpay_types::{
        Address, LedgerTime, Operation, SubmissionOutcome, UnsignedTransaction,
    };

    use super::{MockLedger, DEFAULT_BASE_FEE};

    fn setup() -> (MockLedger, KeyStore, Address) {
        let alice = KeyStore::from_seed_bytes(&[0x11; 32]);
        let bob = Address::new([0x02; 20]);
        let ledger = MockLedger::new(0, LedgerTime::from_seconds(1_000))
            .with_account(alice.address(), 10, 10_000);
        (ledger, alice, bob)
    }

    fn tx(store: &KeyStore, sequence: u32, operation: Operation) -> UnsignedTransaction {
        UnsignedTransaction {
            account: store.address(),
            operation,
            sequence,
            fee: DEFAULT_BASE_FEE,
            network_id: 0,
        }
    }

    #[test]
    fn payment_applies_and_validates_on_close() {
        let (mut ledger, alice, bob) = setup();
        let signed = sign_transaction(
            tx(&alice, 10, Operation::Payment { destination: bob, amount: 50 }),
            alice.keypair(),
        )
        .unwrap();
        let result = ledger.submit(&signed);
        assert_eq!(result.outcome, SubmissionOutcome::ProvisionallyAccepted);
        let state = ledger.account_state(&alice.address()).unwrap();
        assert_eq!(state.sequence, 11);
        assert_eq!(state.balance, 10_000 - 50 - DEFAULT_BASE_FEE);

        let index = ledger.close_ledger();
        let status = ledger.transaction_status(signed.hash()).unwrap();
        assert_eq!(status.outcome, SubmissionOutcome::Validated);
        assert_eq!(status.ledger_index, Some(index));
    }

    #[test]
    fn duplicate_submission_is_idempotent() {
        let (mut ledger, alice, bob) = setup();
        let signed = sign_transaction(
            tx(&alice, 10, Operation::Payment { destination: bob, amount: 50 }),
            alice.keypair(),
        )
        .unwrap();
        ledger.submit(&signed);
        let again = ledger.submit_blob(signed.blob());
        assert_eq!(again.outcome, SubmissionOutcome::ProvisionallyAccepted);
        assert_eq!(again.diagnostic, "tefALREADY");
        assert_eq!(ledger.account_state(&alice.address()).unwrap().sequence, 11);
    }

    #[test]
    fn rejects_out_of_order_and_unfunded() {
        let (mut ledger, alice, bob) = setup();
        let past = sign_transaction(
            tx(&alice, 9, Operation::Payment { destination: bob, amount: 1 }),
            alice.keypair(),
        )
        .unwrap();
        assert_eq!(ledger.submit(&past).diagnostic, "tefPAST_SEQ");

        let unfunded = sign_transaction(
            tx(&alice, 10, Operation::Payment { destination: bob, amount: 1_000_000 }),
            alice.keypair(),
        )
        .unwrap();
        let result = ledger.submit(&unfunded);
        assert_eq!(result.outcome, SubmissionOutcome::Rejected);
        assert_eq!(ledger.account_state(&alice.address()).unwrap().sequence, 10);
    }

    #[test]
    fn escrow_windows_follow_strict_after_rule() {
        let (mut ledger, alice, bob) = setup();
        let create = sign_transaction(
            tx(
                &alice,
                10,
                Operation::EscrowCreate {
                    destination: bob,
                    amount: 1_000,
                    finish_after: Some(LedgerTime::from_seconds(1_060)),
                    cancel_after: Some(LedgerTime::from_seconds(4_600)),
                },
            ),
            alice.keypair(),
        )
        .unwrap();
        assert_eq!(
            ledger.submit(&create).outcome,
            SubmissionOutcome::ProvisionallyAccepted
        );
        assert_eq!(ledger.escrows_of(&alice.address()).len(), 1);

        ledger.set_close_time(LedgerTime::from_seconds(1_060));
        let finish = sign_transaction(
            tx(
                &alice,
                11,
                Operation::EscrowFinish {
                    owner: alice.address(),
                    offer_sequence: 10,
                },
            ),
            alice.keypair(),
        )
        .unwrap();
        assert_eq!(ledger.submit(&finish).diagnostic, "tecNO_PERMISSION");

        ledger.advance_time(1);
        assert_eq!(
            ledger.submit(&finish).outcome,
            SubmissionOutcome::ProvisionallyAccepted
        );
        assert!(ledger.escrows_of(&alice.address()).is_empty());
        assert_eq!(ledger.account_state(&bob).unwrap().balance, 1_000);
    }

    #[test]
    fn rejects_bad_signature_blob() {
        let (mut ledger, alice, bob) = setup();
        let signed = sign_transaction(
            tx(&alice, 10, Operation::Payment { destination: bob, amount: 5 }),
            alice.keypair(),
        )
        .unwrap();
        let mut blob = signed.blob().to_vec();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let result = ledger.submit_blob(&blob);
        assert_eq!(result.outcome, SubmissionOutcome::Rejected);
        assert!(result.diagnostic.starts_with("temMALFORMED"));
    }
}
