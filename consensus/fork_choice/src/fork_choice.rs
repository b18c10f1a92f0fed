use slog::{debug, info, Logger};
use state_processing::common::{
    active_validator_indices, attestation_data_slot, get_indexed_attestation,
};
use state_processing::{
    genesis_block, is_valid_indexed_attestation, process_slots, state_transition,
    BlockProcessingError, StateTransitionError, TransitionConfig,
};
use std::sync::Arc;
use store::{ChainDB, Context, ItemStore};
use types::{
    Attestation, BeaconBlock, BeaconState, ChainSpec, Checkpoint, Hash256, LatestMessage, Slot,
};

#[derive(Debug)]
pub enum Error {
    /// The block's parent is not in the store; the caller may retry once it
    /// arrives.
    UnknownParent(Hash256),
    /// The block's slot is ahead of wall time; retry after `on_tick`.
    FromFuture { slot_time: u64, now: u64 },
    /// The attestation's target epoch has not started yet.
    FromFutureEpoch { epoch_time: u64, now: u64 },
    /// The attestation may only influence fork choice from the next slot on.
    NotYetUsable { usable_at: u64, now: u64 },
    /// The attestation's target block is unknown.
    UnknownTarget(Hash256),
    /// The block does not descend from the finalized checkpoint.
    NotDescendantOfFinalized(Hash256),
    /// The block is not later than the start of the finalized epoch.
    NotAfterFinalizedSlot { block: Slot, finalized: Slot },
    /// An ancestor walk went below the requested slot.
    SlotUnderflow { slot: Slot, wanted: Slot },
    /// An ancestor walk hit a hole in the store. Corruption signal.
    AncestorMissing(Hash256),
    InvalidAttestation(BlockProcessingError),
    BlockTransitionFailed(StateTransitionError),
    MissingCheckpointState(Checkpoint),
    MissingBlock(Hash256),
    StoreError(store::Error),
    CommitteeError(state_processing::common::CommitteeError),
}

impl From<store::Error> for Error {
    fn from(e: store::Error) -> Error {
        Error::StoreError(e)
    }
}

impl From<state_processing::common::CommitteeError> for Error {
    fn from(e: state_processing::common::CommitteeError) -> Error {
        Error::CommitteeError(e)
    }
}

/// The fork-choice store: wall time, the justified and finalized
/// checkpoints, and latest per-validator messages held in the chain store.
///
/// Blocks and states are referenced by root, never by in-memory handle.
pub struct ForkChoice<E: ItemStore> {
    db: Arc<ChainDB<E>>,
    ctx: Context,
    /// Seconds since the unix epoch, advanced monotonically by `on_tick`.
    time: u64,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    config: TransitionConfig,
    spec: ChainSpec,
    log: Logger,
}

impl<E: ItemStore> ForkChoice<E> {
    pub fn new(
        db: Arc<ChainDB<E>>,
        ctx: Context,
        config: TransitionConfig,
        spec: ChainSpec,
        log: Logger,
    ) -> Self {
        Self {
            db,
            ctx,
            time: 0,
            justified_checkpoint: Checkpoint::default(),
            finalized_checkpoint: Checkpoint::default(),
            config,
            spec,
            log,
        }
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    /// Seed the store from a genesis state: the genesis block, both
    /// checkpoints at epoch zero, and the checkpoint states.
    pub fn genesis_store(&mut self, state: &BeaconState) -> Result<(), Error> {
        let genesis = genesis_block(state.canonical_root(), &self.spec);
        let root = genesis.canonical_root();

        self.time = state.genesis_time;
        let checkpoint = Checkpoint {
            epoch: self.spec.genesis_epoch,
            root,
        };
        self.justified_checkpoint = checkpoint;
        self.finalized_checkpoint = checkpoint;

        self.db.save_block(&genesis)?;
        self.db.save_state(&self.ctx, state)?;
        self.db.save_historical_state(&self.ctx, state, root)?;
        self.db
            .save_checkpoint_state(&self.ctx, &self.justified_checkpoint, state)?;
        self.db
            .save_checkpoint_state(&self.ctx, &self.finalized_checkpoint, state)?;

        info!(self.log, "Seeded fork-choice store"; "genesis_root" => ?root);
        Ok(())
    }

    /// Monotonic wall-time update.
    pub fn on_tick(&mut self, time: u64) {
        if time > self.time {
            self.time = time;
        }
    }

    /// Walk `root`'s ancestry to the block at exactly `slot`.
    pub fn ancestor(&self, root: Hash256, slot: Slot) -> Result<Hash256, Error> {
        let mut root = root;
        loop {
            let block = self
                .db
                .block(root)?
                .ok_or(Error::AncestorMissing(root))?;
            if block.slot < slot {
                return Err(Error::SlotUnderflow {
                    slot: block.slot,
                    wanted: slot,
                });
            }
            if block.slot == slot {
                return Ok(root);
            }
            root = block.parent_root;
        }
    }

    /// Sum of effective balances of validators whose latest message is on
    /// the branch through `root`.
    pub fn latest_attesting_balance(&self, root: Hash256) -> Result<u64, Error> {
        let justified_state = self
            .db
            .checkpoint_state(&self.ctx, &self.justified_checkpoint)?
            .ok_or(Error::MissingCheckpointState(self.justified_checkpoint))?;
        let justified_epoch = justified_state.current_epoch(&self.spec);
        let active = active_validator_indices(&justified_state, justified_epoch);

        let wanted = self.db.block(root)?.ok_or(Error::MissingBlock(root))?;

        let mut balance = 0_u64;
        for index in active {
            if let Some(message) = self.db.latest_message(index)? {
                // A message for a branch shorter than `wanted.slot` cannot
                // support this subtree; it contributes nothing.
                match self.ancestor(message.root, wanted.slot) {
                    Ok(ancestor_root) if ancestor_root == root => {
                        balance = balance.saturating_add(
                            justified_state
                                .validators
                                .get(index as usize)
                                .map_or(0, |v| v.effective_balance),
                        );
                    }
                    Ok(_) | Err(Error::SlotUnderflow { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(balance)
    }

    /// LMD-GHOST descent from the justified checkpoint.
    ///
    /// Ties break lexicographically on the 32-byte root, so concurrent nodes
    /// agree on a head without coordination.
    pub fn head(&self) -> Result<Hash256, Error> {
        let mut head = self.justified_checkpoint.root;
        let justified_slot = self
            .justified_checkpoint
            .epoch
            .start_slot(self.spec.slots_per_epoch);

        loop {
            let children =
                self.db
                    .children_of(head, justified_slot, self.db.highest_block_slot())?;
            if children.is_empty() {
                return Ok(head);
            }

            let mut best = children[0];
            let mut best_balance = self.latest_attesting_balance(best)?;
            for child in children.into_iter().skip(1) {
                let balance = self.latest_attesting_balance(child)?;
                if balance > best_balance || (balance == best_balance && child > best) {
                    best = child;
                    best_balance = balance;
                }
            }
            head = best;
        }
    }

    /// Fork-choice block ingest, separate from the pipeline's admission
    /// path.
    pub fn on_block(&mut self, block: &BeaconBlock) -> Result<(), Error> {
        if self.db.block(block.parent_root)?.is_none() {
            return Err(Error::UnknownParent(block.parent_root));
        }
        let pre_state =
            self.db
                .historical_state_from_slot(&self.ctx, block.slot, block.parent_root)?;

        let slot_time = pre_state.genesis_time
            + block.slot.as_u64() * self.spec.seconds_per_slot;
        if slot_time > self.time {
            return Err(Error::FromFuture {
                slot_time,
                now: self.time,
            });
        }

        self.db.save_block(block)?;
        let root = block.canonical_root();

        let finalized_block = self
            .db
            .block(self.finalized_checkpoint.root)?
            .ok_or(Error::MissingBlock(self.finalized_checkpoint.root))?;
        if self.ancestor(root, finalized_block.slot)? != self.finalized_checkpoint.root {
            return Err(Error::NotDescendantOfFinalized(root));
        }

        let finalized_slot = self
            .finalized_checkpoint
            .epoch
            .start_slot(self.spec.slots_per_epoch);
        if block.slot <= finalized_slot {
            return Err(Error::NotAfterFinalizedSlot {
                block: block.slot,
                finalized: finalized_slot,
            });
        }

        let (post_state, _) = state_transition(&pre_state, block, &self.config, &self.spec)
            .map_err(Error::BlockTransitionFailed)?;

        // Post-states are keyed by the block's signing root: the state root
        // is not yet known to peers asking for this block's state.
        self.db
            .save_historical_state(&self.ctx, &post_state, root)?;

        if post_state.current_justified_checkpoint.epoch > self.justified_checkpoint.epoch {
            self.justified_checkpoint = post_state.current_justified_checkpoint;
        }
        if post_state.finalized_checkpoint.epoch > self.finalized_checkpoint.epoch {
            self.finalized_checkpoint = post_state.finalized_checkpoint;
            debug!(
                self.log, "Finalized checkpoint advanced";
                "epoch" => %self.finalized_checkpoint.epoch,
            );
        }
        Ok(())
    }

    /// Fold an attestation into the latest-message table.
    pub fn on_attestation(&mut self, attestation: &Attestation) -> Result<(), Error> {
        let target = attestation.data.target;

        if !self.db.has_block(target.root)? {
            return Err(Error::UnknownTarget(target.root));
        }

        let target_slot = target.epoch.start_slot(self.spec.slots_per_epoch);
        let mut base_state =
            self.db
                .historical_state_from_slot(&self.ctx, target_slot, target.root)?;

        let epoch_time =
            base_state.genesis_time + target_slot.as_u64() * self.spec.seconds_per_slot;
        if epoch_time > self.time {
            return Err(Error::FromFutureEpoch {
                epoch_time,
                now: self.time,
            });
        }

        if !self.db.has_checkpoint(&target)? {
            process_slots(&mut base_state, target_slot, &self.spec)
                .map_err(Error::BlockTransitionFailed)?;
            self.db
                .save_checkpoint_state(&self.ctx, &target, &base_state)?;
        }
        let target_state = self
            .db
            .checkpoint_state(&self.ctx, &target)?
            .ok_or(Error::MissingCheckpointState(target))?;

        // Attestations only affect the fork choice of subsequent slots.
        let attestation_slot = attestation_data_slot(&target_state, &attestation.data, &self.spec)?;
        let usable_at = target_state.genesis_time
            + (attestation_slot.as_u64() + 1) * self.spec.seconds_per_slot;
        if usable_at > self.time {
            return Err(Error::NotYetUsable {
                usable_at,
                now: self.time,
            });
        }

        let indexed = get_indexed_attestation(&target_state, attestation, &self.spec)?;
        is_valid_indexed_attestation(&target_state, &indexed, &self.config, &self.spec)
            .map_err(Error::InvalidAttestation)?;

        // A validator's message is replaced only when absent or older.
        for index in indexed.attesting_indices() {
            let replace = match self.db.latest_message(index)? {
                None => true,
                Some(existing) => target.epoch > existing.epoch,
            };
            if replace {
                self.db.save_latest_message(
                    &self.ctx,
                    index,
                    &LatestMessage {
                        epoch: target.epoch,
                        root: attestation.data.beacon_block_root,
                    },
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;
    use ssz_types::BitList;
    use state_processing::common::beacon_committee;
    use state_processing::{genesis_deposits, initialize_beacon_state_from_eth1};
    use store::MemoryStore;
    use types::{AttestationData, DepositData, Epoch, Eth1Data, PublicKeyBytes, SignatureBytes};

    const GENESIS_TIME: u64 = 1_000_000;

    fn genesis_state(validators: usize, spec: &ChainSpec) -> BeaconState {
        let data: Vec<DepositData> = (0..validators)
            .map(|i| {
                let mut pubkey = [0_u8; 48];
                pubkey[0..8].copy_from_slice(&(i as u64).to_le_bytes());
                DepositData {
                    pubkey: PublicKeyBytes::from_bytes(&pubkey).unwrap(),
                    withdrawal_credentials: Hash256::zero(),
                    amount: spec.max_effective_balance,
                    signature: SignatureBytes::empty(),
                }
            })
            .collect();
        let (deposits, root) = genesis_deposits(data, spec);
        let eth1_data = Eth1Data {
            deposit_root: root,
            deposit_count: deposits.len() as u64,
            block_hash: Hash256::zero(),
        };
        initialize_beacon_state_from_eth1(GENESIS_TIME, &deposits, eth1_data, spec).unwrap()
    }

    fn setup() -> (ForkChoice<MemoryStore>, Arc<ChainDB<MemoryStore>>, BeaconState, Hash256) {
        let spec = ChainSpec::minimal();
        let log = Logger::root(slog::Discard, o!());
        let db =
            Arc::new(ChainDB::open(MemoryStore::open(), spec.clone(), log.clone()).unwrap());
        let state = genesis_state(16, &spec);
        let config = TransitionConfig {
            verify_signatures: false,
        };
        let mut fork_choice = ForkChoice::new(db.clone(), Context::new(), config, spec, log);
        fork_choice.genesis_store(&state).unwrap();
        let genesis_root = fork_choice.justified_checkpoint().root;
        (fork_choice, db, state, genesis_root)
    }

    fn block_at(slot: u64, parent_root: Hash256, graffiti: u8) -> BeaconBlock {
        let mut block = BeaconBlock::empty(Slot::new(slot));
        block.parent_root = parent_root;
        block.body.graffiti = Hash256::repeat_byte(graffiti);
        block
    }

    #[test]
    fn genesis_store_seeds_checkpoints() {
        let (fork_choice, db, state, genesis_root) = setup();

        assert_eq!(fork_choice.time(), GENESIS_TIME);
        let expected = Checkpoint {
            epoch: Epoch::new(0),
            root: genesis_root,
        };
        assert_eq!(fork_choice.justified_checkpoint(), expected);
        assert_eq!(fork_choice.finalized_checkpoint(), expected);

        assert!(db.has_block(genesis_root).unwrap());
        assert!(db.has_checkpoint(&expected).unwrap());
        assert_eq!(db.historical_state(genesis_root).unwrap().unwrap(), state);
    }

    #[test]
    fn on_tick_is_monotonic() {
        let (mut fork_choice, _, _, _) = setup();
        fork_choice.on_tick(GENESIS_TIME + 10);
        assert_eq!(fork_choice.time(), GENESIS_TIME + 10);
        fork_choice.on_tick(GENESIS_TIME + 3);
        assert_eq!(fork_choice.time(), GENESIS_TIME + 10);
    }

    #[test]
    fn ancestor_identity_and_underflow() {
        let (fork_choice, db, _, genesis_root) = setup();

        assert_eq!(
            fork_choice.ancestor(genesis_root, Slot::new(0)).unwrap(),
            genesis_root
        );
        assert!(matches!(
            fork_choice.ancestor(genesis_root, Slot::new(1)),
            Err(Error::SlotUnderflow { .. })
        ));

        let child = block_at(2, genesis_root, 0xaa);
        let child_root = child.canonical_root();
        db.save_block(&child).unwrap();
        assert_eq!(
            fork_choice.ancestor(child_root, Slot::new(0)).unwrap(),
            genesis_root
        );
    }

    #[test]
    fn head_weighs_latest_messages() {
        let (fork_choice, db, _, genesis_root) = setup();
        let ctx = Context::new();

        let block_a = block_at(1, genesis_root, 0xaa);
        let block_b = block_at(1, genesis_root, 0xbb);
        let root_a = block_a.canonical_root();
        let root_b = block_b.canonical_root();
        db.save_block(&block_a).unwrap();
        db.save_block(&block_b).unwrap();

        let vote = |root: Hash256| LatestMessage {
            epoch: Epoch::new(0),
            root,
        };
        for index in 0..5 {
            db.save_latest_message(&ctx, index, &vote(root_a)).unwrap();
        }
        for index in 5..8 {
            db.save_latest_message(&ctx, index, &vote(root_b)).unwrap();
        }
        assert_eq!(fork_choice.head().unwrap(), root_a);

        // The majority flips.
        for index in 0..5 {
            db.save_latest_message(&ctx, index, &vote(root_b)).unwrap();
        }
        assert_eq!(fork_choice.head().unwrap(), root_b);

        // A lone child extends the winning branch even without direct votes.
        let block_c = block_at(2, root_b, 0xcc);
        let root_c = block_c.canonical_root();
        db.save_block(&block_c).unwrap();
        assert_eq!(fork_choice.head().unwrap(), root_c);
    }

    #[test]
    fn head_tie_breaks_lexicographically() {
        let (fork_choice, db, _, genesis_root) = setup();

        let block_a = block_at(1, genesis_root, 0xaa);
        let block_b = block_at(1, genesis_root, 0xbb);
        db.save_block(&block_a).unwrap();
        db.save_block(&block_b).unwrap();

        let expected = std::cmp::max(block_a.canonical_root(), block_b.canonical_root());
        assert_eq!(fork_choice.head().unwrap(), expected);
    }

    #[test]
    fn on_block_rejects_future_slots() {
        let (mut fork_choice, db, _, genesis_root) = setup();
        let block = block_at(3, genesis_root, 0);
        let root = block.canonical_root();

        assert!(matches!(
            fork_choice.on_block(&block),
            Err(Error::FromFuture { .. })
        ));

        fork_choice.on_tick(GENESIS_TIME + 100);
        fork_choice.on_block(&block).unwrap();

        // The post-state is stored under the block's signing root.
        let post = db.historical_state(root).unwrap().unwrap();
        assert_eq!(post.slot, Slot::new(3));
    }

    #[test]
    fn on_block_requires_known_parent() {
        let (mut fork_choice, _, _, _) = setup();
        fork_choice.on_tick(GENESIS_TIME + 100);
        let block = block_at(1, Hash256::repeat_byte(0xde), 0);
        assert!(matches!(
            fork_choice.on_block(&block),
            Err(Error::UnknownParent(_))
        ));
    }

    #[test]
    fn on_block_rejects_non_descendants_of_finalized() {
        let (mut fork_choice, db, _, genesis_root) = setup();
        fork_choice.on_tick(GENESIS_TIME + 100);

        let block_a = block_at(1, genesis_root, 0xaa);
        let block_b = block_at(1, genesis_root, 0xbb);
        db.save_block(&block_a).unwrap();
        db.save_block(&block_b).unwrap();

        fork_choice.finalized_checkpoint = Checkpoint {
            epoch: Epoch::new(0),
            root: block_a.canonical_root(),
        };

        let on_b = block_at(2, block_b.canonical_root(), 0);
        assert!(matches!(
            fork_choice.on_block(&on_b),
            Err(Error::NotDescendantOfFinalized(_))
        ));
    }

    #[test]
    fn on_block_requires_slot_after_finalized_epoch() {
        let (mut fork_choice, _, _, genesis_root) = setup();
        fork_choice.on_tick(GENESIS_TIME + 1_000);
        fork_choice.finalized_checkpoint.epoch = Epoch::new(1);

        let block = block_at(2, genesis_root, 0);
        assert!(matches!(
            fork_choice.on_block(&block),
            Err(Error::NotAfterFinalizedSlot { .. })
        ));
    }

    #[test]
    fn on_attestation_requires_known_target() {
        let (mut fork_choice, _, _, _) = setup();
        let mut attestation = empty_attestation(Hash256::repeat_byte(0x77), 2);
        attestation.data.target.root = Hash256::repeat_byte(0x77);
        assert!(matches!(
            fork_choice.on_attestation(&attestation),
            Err(Error::UnknownTarget(_))
        ));
    }

    fn empty_attestation(target_root: Hash256, committee_len: usize) -> Attestation {
        Attestation {
            aggregation_bits: BitList::with_capacity(committee_len).unwrap(),
            data: AttestationData {
                slot: Slot::new(0),
                committee_index: 0,
                beacon_block_root: target_root,
                source: Checkpoint::default(),
                target: Checkpoint {
                    epoch: Epoch::new(0),
                    root: target_root,
                },
            },
            custody_bits: BitList::with_capacity(committee_len).unwrap(),
            signature: SignatureBytes::empty(),
        }
    }

    #[test]
    fn on_attestation_updates_latest_messages() {
        let (mut fork_choice, db, state, genesis_root) = setup();
        let ctx = Context::new();
        let spec = ChainSpec::minimal();

        let committee = beacon_committee(&state, Slot::new(0), 0, &spec).unwrap();
        let mut attestation = empty_attestation(genesis_root, committee.len());
        for i in 0..committee.len() {
            attestation.aggregation_bits.set(i, true).unwrap();
        }

        // Not usable until the attested slot has passed.
        assert!(matches!(
            fork_choice.on_attestation(&attestation),
            Err(Error::NotYetUsable { .. })
        ));

        // Pre-seed one attester with a newer message; it must survive.
        let pinned = committee[0];
        let newer = LatestMessage {
            epoch: Epoch::new(5),
            root: Hash256::repeat_byte(0x99),
        };
        db.save_latest_message(&ctx, pinned, &newer).unwrap();

        fork_choice.on_tick(GENESIS_TIME + spec.seconds_per_slot);
        fork_choice.on_attestation(&attestation).unwrap();

        assert_eq!(db.latest_message(pinned).unwrap().unwrap(), newer);
        for &index in committee.iter().skip(1) {
            assert_eq!(
                db.latest_message(index).unwrap().unwrap(),
                LatestMessage {
                    epoch: Epoch::new(0),
                    root: genesis_root,
                }
            );
        }
    }
}
