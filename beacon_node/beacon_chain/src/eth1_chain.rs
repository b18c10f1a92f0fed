//! The seam to the proof-of-work deposit watcher.

use crate::events::Feed;
use parking_lot::RwLock;
use types::{Deposit, Eth1Data, Hash256};

/// What the consensus core needs from the deposit-contract watcher: the
/// chain-start trigger and eth1 block lookups for block pre-validity.
pub trait Eth1ChainBackend: Send + Sync + 'static {
    /// `true` if the watcher has processed and accepted the eth1 block.
    fn block_by_hash(&self, hash: Hash256) -> bool;

    /// Topic carrying the genesis timestamp when chain start triggers.
    fn chain_start_feed(&self) -> &Feed<u64>;

    fn chain_start_deposits(&self) -> Vec<Deposit>;

    fn chain_start_eth1_data(&self) -> Eth1Data;
}

/// A watcher stub for testing: chain-start data is set programmatically and
/// eth1 lookups always succeed unless a hash is explicitly unknown.
pub struct TestingEth1Backend {
    feed: Feed<u64>,
    deposits: RwLock<Vec<Deposit>>,
    eth1_data: RwLock<Eth1Data>,
    unknown_hashes: RwLock<Vec<Hash256>>,
}

impl TestingEth1Backend {
    pub fn new() -> Self {
        Self {
            feed: Feed::new(),
            deposits: RwLock::new(vec![]),
            eth1_data: RwLock::new(Eth1Data::default()),
            unknown_hashes: RwLock::new(vec![]),
        }
    }

    pub fn set_chain_start(&self, deposits: Vec<Deposit>, eth1_data: Eth1Data) {
        *self.deposits.write() = deposits;
        *self.eth1_data.write() = eth1_data;
    }

    pub fn mark_unknown(&self, hash: Hash256) {
        self.unknown_hashes.write().push(hash);
    }

    /// Fire the chain-start event at `genesis_time`.
    pub fn trigger_chain_start(&self, genesis_time: u64) -> usize {
        self.feed.send(genesis_time)
    }
}

impl Default for TestingEth1Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Eth1ChainBackend for TestingEth1Backend {
    fn block_by_hash(&self, hash: Hash256) -> bool {
        !self.unknown_hashes.read().contains(&hash)
    }

    fn chain_start_feed(&self) -> &Feed<u64> {
        &self.feed
    }

    fn chain_start_deposits(&self) -> Vec<Deposit> {
        self.deposits.read().clone()
    }

    fn chain_start_eth1_data(&self) -> Eth1Data {
        self.eth1_data.read().clone()
    }
}
