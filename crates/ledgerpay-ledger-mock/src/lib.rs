//! In-memory ledger for exercising ledgerpay without network infrastructure.

pub mod mock_ledger;
pub mod scenarios;

pub use mock_ledger::{AccountRoot, MockLedger, DEFAULT_BASE_FEE, TES_SUCCESS};
pub use scenarios::{
    DemoScenario, DEMO_ALICE_BALANCE, DEMO_ALICE_SEQUENCE, DEMO_BOB_BALANCE, DEMO_NETWORK_ID,
    DEMO_START_TIME,
};
