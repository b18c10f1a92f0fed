//! Harness for driving a `BeaconChain` against in-memory collaborators.

use crate::attestation_handler::AttestationTargetService;
use crate::events::Feed;
use crate::eth1_chain::TestingEth1Backend;
use crate::{
    BeaconBlockAnnounce, BeaconChain, BeaconChainConfig, BeaconChainTypes, Broadcaster,
    ChainConfig, OperationFeeds,
};
use parking_lot::Mutex;
use slog::{o, Logger};
use state_processing::{genesis_deposits, state_transition, TransitionConfig};
use std::sync::Arc;
use store::{ChainDB, Context, MemoryStore};
use types::{
    Attestation, BeaconBlock, BeaconState, ChainSpec, DepositData, Eth1Data, Hash256,
    PublicKeyBytes, SignatureBytes, Slot,
};

/// Records every announce, standing in for the p2p layer.
#[derive(Default)]
pub struct TestingBroadcaster {
    pub announces: Mutex<Vec<BeaconBlockAnnounce>>,
}

impl Broadcaster for Arc<TestingBroadcaster> {
    fn broadcast(&self, _ctx: &Context, announce: BeaconBlockAnnounce) {
        self.announces.lock().push(announce);
    }
}

/// An operation pool stub with an inspectable feed.
#[derive(Default)]
pub struct TestingOpPool {
    feed: Feed<BeaconBlock>,
    pub attestations: Mutex<Vec<Attestation>>,
}

impl OperationFeeds for Arc<TestingOpPool> {
    fn incoming_processed_block_feed(&self) -> &Feed<BeaconBlock> {
        &self.feed
    }

    fn pool_attestations(&self) -> Vec<Attestation> {
        self.attestations.lock().clone()
    }
}

pub struct TestingChainTypes;

impl BeaconChainTypes for TestingChainTypes {
    type Store = MemoryStore;
    type Eth1Chain = Arc<TestingEth1Backend>;
    type Broadcaster = Arc<TestingBroadcaster>;
    type TargetHandler = AttestationTargetService<MemoryStore>;
    type OpPool = Arc<TestingOpPool>;
}

impl crate::eth1_chain::Eth1ChainBackend for Arc<TestingEth1Backend> {
    fn block_by_hash(&self, hash: Hash256) -> bool {
        self.as_ref().block_by_hash(hash)
    }

    fn chain_start_feed(&self) -> &Feed<u64> {
        self.as_ref().chain_start_feed()
    }

    fn chain_start_deposits(&self) -> Vec<types::Deposit> {
        self.as_ref().chain_start_deposits()
    }

    fn chain_start_eth1_data(&self) -> Eth1Data {
        self.as_ref().chain_start_eth1_data()
    }
}

pub struct BeaconChainHarness {
    pub chain: Arc<BeaconChain<TestingChainTypes>>,
    pub eth1: Arc<TestingEth1Backend>,
    pub broadcaster: Arc<TestingBroadcaster>,
    pub op_pool: Arc<TestingOpPool>,
    pub ctx: Context,
    pub spec: ChainSpec,
}

impl BeaconChainHarness {
    /// A chain bootstrapped at a genesis time far enough in the past that
    /// early slots are never "from the future".
    pub fn new(validator_count: usize) -> Self {
        let spec = ChainSpec::minimal();
        let log = Logger::root(slog::Discard, o!());
        let db = Arc::new(
            ChainDB::open(MemoryStore::open(), spec.clone(), log.clone())
                .expect("memory store opens"),
        );

        let eth1 = Arc::new(TestingEth1Backend::new());
        let broadcaster = Arc::new(TestingBroadcaster::default());
        let op_pool = Arc::new(TestingOpPool::default());
        let target_handler = AttestationTargetService::new(db.clone(), spec.clone(), log.clone());

        let data: Vec<DepositData> = (0..validator_count)
            .map(|i| {
                let mut pubkey = [0_u8; 48];
                pubkey[0..8].copy_from_slice(&(i as u64).to_le_bytes());
                DepositData {
                    pubkey: PublicKeyBytes::from_bytes(&pubkey).expect("valid pubkey length"),
                    withdrawal_credentials: Hash256::zero(),
                    amount: spec.max_effective_balance,
                    signature: SignatureBytes::empty(),
                }
            })
            .collect();
        let (deposits, deposit_root) = genesis_deposits(data, &spec);
        eth1.set_chain_start(
            deposits.clone(),
            Eth1Data {
                deposit_root,
                deposit_count: deposits.len() as u64,
                block_hash: Hash256::zero(),
            },
        );

        let chain_config = ChainConfig {
            max_workers: 64,
            transition: TransitionConfig {
                verify_signatures: false,
            },
        };

        let ctx = Context::new();
        let chain = Arc::new(BeaconChain::new(
            ctx.child(),
            BeaconChainConfig {
                db,
                eth1_chain: eth1.clone(),
                broadcaster: broadcaster.clone(),
                target_handler,
                op_pool: op_pool.clone(),
                chain_config,
                spec: spec.clone(),
                log,
            },
        ));

        let genesis_time = crate::beacon_chain::wall_clock().saturating_sub(10_000);
        chain
            .initialize_beacon_chain(genesis_time)
            .expect("genesis bootstrap succeeds");

        Self {
            chain,
            eth1,
            broadcaster,
            op_pool,
            ctx,
            spec,
        }
    }

    pub fn genesis_block(&self) -> BeaconBlock {
        self.chain.db.chain_head().expect("chain is initialized")
    }

    pub fn head_state(&self) -> BeaconState {
        self.chain
            .db
            .head_state(&self.ctx)
            .expect("store is readable")
            .expect("chain is initialized")
    }

    /// A valid empty block at `slot` extending `parent`, with the correct
    /// post-state root committed. The parent must be stored.
    pub fn build_block_on(&self, parent: &BeaconBlock, slot: Slot) -> BeaconBlock {
        self.build_block_with(parent, slot, |_| {})
    }

    /// Like `build_block_on`, with the body customised before the state
    /// root is computed.
    pub fn build_block_with<F>(&self, parent: &BeaconBlock, slot: Slot, customise: F) -> BeaconBlock
    where
        F: FnOnce(&mut types::BeaconBlockBody),
    {
        let parent_root = parent.canonical_root();
        let pre_state = self
            .chain
            .db
            .historical_state_from_slot(&self.ctx, parent.slot, parent_root)
            .expect("parent state is reconstructable");
        self.build_block_on_state(&pre_state, parent_root, slot, customise)
    }

    /// Build a valid block over an explicit parent post-state, for parents
    /// that are not (yet) stored.
    pub fn build_block_on_state<F>(
        &self,
        parent_state: &BeaconState,
        parent_root: Hash256,
        slot: Slot,
        customise: F,
    ) -> BeaconBlock
    where
        F: FnOnce(&mut types::BeaconBlockBody),
    {
        let mut block = BeaconBlock::empty(slot);
        block.parent_root = parent_root;
        customise(&mut block.body);

        let config = TransitionConfig {
            verify_signatures: false,
        };
        let (post_state, _) = state_transition(parent_state, &block, &config, &self.spec)
            .expect("extension block is valid");
        block.state_root = post_state.canonical_root();
        block
    }

    /// The post-state of `block` applied over `pre_state`.
    pub fn post_state(&self, pre_state: &BeaconState, block: &BeaconBlock) -> BeaconState {
        let config = TransitionConfig {
            verify_signatures: false,
        };
        let (post_state, _) = state_transition(pre_state, block, &config, &self.spec)
            .expect("block is valid");
        post_state
    }
}
