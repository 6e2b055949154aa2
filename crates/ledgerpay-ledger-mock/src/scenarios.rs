use ledgerpay_crypto::KeyStore;
use ledgerpay_types::{Drops, LedgerTime, NetworkId, Sequence};

use crate::mock_ledger::MockLedger;

pub const DEMO_NETWORK_ID: NetworkId = 0;
/// 2030-01-01T00:00:00Z in ledger time.
pub const DEMO_START_TIME: LedgerTime = LedgerTime::from_seconds(946_771_200);
pub const DEMO_ALICE_SEQUENCE: Sequence = 10;
pub const DEMO_ALICE_BALANCE: Drops = 100_000;
pub const DEMO_BOB_BALANCE: Drops = 5_000;

/// Two funded accounts on a fresh mock ledger: Alice starts at sequence 10.
#[derive(Debug)]
pub struct DemoScenario {
    pub alice: KeyStore,
    pub bob: KeyStore,
    pub ledger: MockLedger,
}

impl DemoScenario {
    pub fn new() -> Self {
        let alice = KeyStore::from_seed_bytes(&[0x11; 32]);
        let bob = KeyStore::from_seed_bytes(&[0x22; 32]);
        let ledger = MockLedger::new(DEMO_NETWORK_ID, DEMO_START_TIME)
            .with_account(alice.address(), DEMO_ALICE_SEQUENCE, DEMO_ALICE_BALANCE)
            .with_account(bob.address(), 1, DEMO_BOB_BALANCE);
        Self { alice, bob, ledger }
    }
}

impl Default for DemoScenario {
    fn default() -> Self {
        Self::new()
    }
}
