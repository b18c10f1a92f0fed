//! End-to-end admission-pipeline scenarios against in-memory collaborators.

use beacon_chain::test_utils::BeaconChainHarness;
use beacon_chain::{BeaconChainError, ListFilter, OperationFeeds};
use ssz_types::BitList;
use state_processing::common::beacon_committee;
use types::{
    Attestation, AttestationData, BeaconBlock, Checkpoint, Epoch, Hash256, SignatureBytes, Slot,
    VoluntaryExit,
};

#[test]
fn happy_path_block_is_processed_and_announced() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();
    let feed = harness.op_pool.incoming_processed_block_feed().subscribe();

    let block = harness.build_block_on(&genesis, Slot::new(1));
    let root = block.canonical_root();

    let post = harness.chain.receive_block(&harness.ctx, &block).unwrap();
    assert_eq!(post.slot, Slot::new(1));
    assert!(harness.chain.db.has_block(root).unwrap());
    assert_eq!(
        harness.chain.db.historical_state(root).unwrap().unwrap(),
        post
    );

    // Saved before announced.
    let announces = harness.broadcaster.announces.lock();
    assert_eq!(announces.len(), 1);
    assert_eq!(announces[0].hash, root);
    assert_eq!(announces[0].slot_number, Slot::new(1));

    // The processed block reached the operation pool.
    assert_eq!(feed.receiver.recv().unwrap().canonical_root(), root);

    // An attestation target was recorded for descendant lookups.
    let target = harness
        .chain
        .db
        .attestation_target(root)
        .unwrap()
        .unwrap();
    assert_eq!(target.parent_root, genesis.canonical_root());
}

#[test]
fn unknown_parent_is_retryable() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();
    let genesis_state = harness.head_state();

    let block_1 = harness.build_block_on(&genesis, Slot::new(1));
    let post_1 = harness.post_state(&genesis_state, &block_1);
    let block_2 =
        harness.build_block_on_state(&post_1, block_1.canonical_root(), Slot::new(2), |_| {});

    assert!(matches!(
        harness.chain.receive_block(&harness.ctx, &block_2),
        Err(BeaconChainError::UnknownParent(_))
    ));
    assert!(!harness
        .chain
        .db
        .has_block(block_2.canonical_root())
        .unwrap());

    harness.chain.receive_block(&harness.ctx, &block_1).unwrap();
    harness.chain.receive_block(&harness.ctx, &block_2).unwrap();
    assert!(harness
        .chain
        .db
        .has_block(block_2.canonical_root())
        .unwrap());
}

#[test]
fn genesis_replay_is_rejected() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();

    let mut replay = BeaconBlock::empty(Slot::new(0));
    replay.parent_root = genesis.canonical_root();

    assert!(matches!(
        harness.chain.receive_block(&harness.ctx, &replay),
        Err(BeaconChainError::GenesisReplay)
    ));
}

#[test]
fn blocks_from_the_future_are_rejected() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();

    // Far past the wall clock for a genesis ten thousand seconds ago.
    let mut block = BeaconBlock::empty(Slot::new(1_000_000));
    block.parent_root = genesis.canonical_root();

    assert!(matches!(
        harness.chain.receive_block(&harness.ctx, &block),
        Err(BeaconChainError::FromFuture { .. })
    ));
    assert!(!harness.chain.db.has_block(block.canonical_root()).unwrap());
}

#[test]
fn unknown_eth1_reference_is_rejected() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();
    harness.eth1.mark_unknown(Hash256::zero());

    let block = harness.build_block_on(&genesis, Slot::new(1));
    assert!(matches!(
        harness.chain.receive_block(&harness.ctx, &block),
        Err(BeaconChainError::UnknownEth1(_))
    ));
}

#[test]
fn failed_transition_poisons_the_block() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();

    // A voluntary exit for a validator that does not exist fails the
    // transition after the block has been saved.
    let mut block = harness.build_block_on(&genesis, Slot::new(1));
    block
        .body
        .voluntary_exits
        .push(VoluntaryExit {
            epoch: Epoch::new(0),
            validator_index: 9_999,
            signature: SignatureBytes::empty(),
        })
        .unwrap();
    let root = block.canonical_root();

    assert!(matches!(
        harness.chain.receive_block(&harness.ctx, &block),
        Err(BeaconChainError::BlockFailedProcessing(_))
    ));
    assert!(!harness.chain.db.has_block(root).unwrap());

    // The root is remembered as evil.
    assert!(matches!(
        harness.chain.db.save_block(&block),
        Err(store::Error::Blacklisted(r)) if r == root
    ));
}

#[test]
fn state_root_mismatch_poisons_the_block() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();

    let mut block = harness.build_block_on(&genesis, Slot::new(1));
    block.state_root = Hash256::repeat_byte(0xbd);
    let root = block.canonical_root();

    assert!(matches!(
        harness.chain.receive_block(&harness.ctx, &block),
        Err(BeaconChainError::StateRootMismatch { .. })
    ));
    assert!(!harness.chain.db.has_block(root).unwrap());
    assert!(harness.chain.db.save_block(&block).is_err());
}

#[test]
fn epoch_boundary_updates_participation() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();
    let slots_per_epoch = harness.spec.slots_per_epoch;

    let block_1 = harness.build_block_on(&genesis, Slot::new(slots_per_epoch));
    harness.chain.receive_block(&harness.ctx, &block_1).unwrap();

    let block_2 = harness.build_block_on(&block_1, Slot::new(slots_per_epoch * 2));
    harness.chain.receive_block(&harness.ctx, &block_2).unwrap();

    // Nobody attested, but the eligible stake for epoch 1 is known.
    let participation = harness.chain.participation(Epoch::new(1)).unwrap();
    assert_eq!(participation.voted_gwei, 0);
    assert!(participation.eligible_gwei > 0);
    assert_eq!(participation.participation_rate, 0.0);
}

#[test]
fn block_attestations_update_latest_messages() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();
    let genesis_root = genesis.canonical_root();
    let state = harness.head_state();

    let committee = beacon_committee(&state, Slot::new(0), 0, &harness.spec).unwrap();
    let mut aggregation_bits = BitList::with_capacity(committee.len()).unwrap();
    for i in 0..committee.len() {
        aggregation_bits.set(i, true).unwrap();
    }
    let attestation = Attestation {
        aggregation_bits,
        data: AttestationData {
            slot: Slot::new(0),
            committee_index: 0,
            beacon_block_root: genesis_root,
            source: Checkpoint::default(),
            target: Checkpoint {
                epoch: Epoch::new(0),
                root: genesis_root,
            },
        },
        custody_bits: BitList::with_capacity(committee.len()).unwrap(),
        signature: SignatureBytes::empty(),
    };

    let block = harness.build_block_with(&genesis, Slot::new(1), |body| {
        body.attestations.push(attestation).unwrap();
    });
    harness.chain.receive_block(&harness.ctx, &block).unwrap();

    for index in committee {
        let message = harness.chain.db.latest_message(index).unwrap().unwrap();
        assert_eq!(message.epoch, Epoch::new(0));
        assert_eq!(message.root, genesis_root);
    }
}

#[test]
fn chain_head_query_reflects_genesis() {
    let harness = BeaconChainHarness::new(16);
    let genesis_root = harness.genesis_block().canonical_root();

    let head = harness.chain.chain_head().unwrap();
    assert_eq!(head.block_root, genesis_root);
    assert_eq!(head.block_slot, Slot::new(0));
    assert_eq!(head.justified_block_root, genesis_root);
    assert_eq!(head.finalized_block_root, genesis_root);
    assert_eq!(head.previous_justified_slot, Slot::new(0));
}

#[test]
fn list_blocks_by_slot_and_epoch() {
    let harness = BeaconChainHarness::new(16);
    let genesis = harness.genesis_block();

    let block = harness.build_block_on(&genesis, Slot::new(1));
    harness.chain.receive_block(&harness.ctx, &block).unwrap();

    let by_slot = harness.chain.list_blocks(ListFilter::Slot(Slot::new(1))).unwrap();
    assert_eq!(by_slot.len(), 1);

    let by_epoch = harness.chain.list_blocks(ListFilter::Epoch(Epoch::new(0))).unwrap();
    assert_eq!(by_epoch.len(), 2);

    let by_missing_slot = harness
        .chain
        .list_blocks(ListFilter::Slot(Slot::new(5)))
        .unwrap();
    assert!(by_missing_slot.is_empty());
}

#[test]
fn status_respects_worker_bound() {
    let harness = BeaconChainHarness::new(16);
    assert!(harness.chain.status().is_ok());
}
