//! The chain's logical store: blocks, states, checkpoints, latest messages,
//! the canonical index and the evil-block deny list, over any
//! `KeyValueStore` engine.

use crate::errors::{Error, Result};
use crate::metrics;
use crate::{get_key_for_col, Context, DBColumn, ItemStore, KeyValueStoreOp, StoreItem};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use slog::{debug, info, Logger};
use ssz::{Decode, Encode};
use state_processing::{
    genesis_block, initialize_beacon_state_from_eth1, per_block_processing, process_slots,
    TransitionConfig,
};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use types::{
    AttestationTarget, BeaconBlock, BeaconState, ChainSpec, Checkpoint, Deposit, Eth1Data,
    Hash256, LatestMessage, PublicKeyBytes, Slot,
};

const HEAD_BLOCK_ROOT_KEY: &[u8] = b"head_block_root";
const HEAD_STATE_KEY: &[u8] = b"head_state";
const JUSTIFIED_BLOCK_KEY: &[u8] = b"justified_block";
const FINALIZED_BLOCK_KEY: &[u8] = b"finalized_block";
const JUSTIFIED_STATE_KEY: &[u8] = b"justified_state";
const FINALIZED_STATE_KEY: &[u8] = b"finalized_state";
const HIGHEST_SLOT_KEY: &[u8] = b"highest_block_slot";

const BLOCK_CACHE_SIZE: usize = 64;

/// Durable and cached storage for the consensus core.
///
/// All writes go through the engine before any in-memory structure reflects
/// them.
pub struct ChainDB<E: ItemStore> {
    db: E,
    spec: ChainSpec,
    /// Write-through block cache, guarded together with the block write
    /// path.
    block_cache: Mutex<LruCache<Hash256, BeaconBlock>>,
    /// slot -> canonical block root, mirrored from the engine.
    canonical_index: RwLock<BTreeMap<Slot, Hash256>>,
    highest_block_slot: RwLock<Slot>,
    /// Deposits observed on eth1 but not yet included in a block.
    pending_deposits: Mutex<Vec<Deposit>>,
    log: Logger,
}

fn slot_key(slot: Slot) -> [u8; 8] {
    slot.as_u64().to_le_bytes()
}

fn checkpoint_key(checkpoint: &Checkpoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(&checkpoint.epoch.as_u64().to_le_bytes());
    key.extend_from_slice(checkpoint.root.as_bytes());
    key
}

impl<E: ItemStore> ChainDB<E> {
    /// Open the store, rebuilding the in-memory canonical index and highest
    /// slot from the engine.
    pub fn open(db: E, spec: ChainSpec, log: Logger) -> Result<Self> {
        let mut canonical_index = BTreeMap::new();
        for entry in db.iter_column(DBColumn::CanonicalIndex) {
            let (key, value) = entry?;
            if key.len() == 8 && value.len() == 32 {
                let mut slot_bytes = [0_u8; 8];
                slot_bytes.copy_from_slice(&key);
                canonical_index.insert(
                    Slot::new(u64::from_le_bytes(slot_bytes)),
                    Hash256::from_slice(&value),
                );
            }
        }

        let highest_block_slot = db
            .get_bytes(DBColumn::BeaconMeta.into(), HIGHEST_SLOT_KEY)?
            .map(|bytes| Slot::from_ssz_bytes(&bytes))
            .transpose()?
            .unwrap_or_else(|| Slot::new(0));

        Ok(Self {
            db,
            spec,
            block_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(BLOCK_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            canonical_index: RwLock::new(canonical_index),
            highest_block_slot: RwLock::new(highest_block_slot),
            pending_deposits: Mutex::new(vec![]),
            log,
        })
    }

    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    /*
     * Blocks
     */

    /// Upsert `block` by signing root, atomically with the slot index and
    /// `highest_block_slot`.
    pub fn save_block(&self, block: &BeaconBlock) -> Result<()> {
        let root = block.canonical_root();
        if self
            .db
            .key_exists(DBColumn::EvilBlock.into(), root.as_bytes())?
        {
            return Err(Error::Blacklisted(root));
        }

        let mut highest = self.highest_block_slot.write();
        let mut batch = vec![KeyValueStoreOp::PutKeyValue(
            get_key_for_col(DBColumn::BeaconBlock.into(), root.as_bytes()),
            block.as_store_bytes(),
        )];

        let mut roots_at_slot = self.block_roots_at_slot(block.slot)?;
        if !roots_at_slot.contains(&root) {
            roots_at_slot.push(root);
            batch.push(KeyValueStoreOp::PutKeyValue(
                get_key_for_col(DBColumn::SlotIndex.into(), &slot_key(block.slot)),
                roots_at_slot.as_ssz_bytes(),
            ));
        }

        if block.slot > *highest {
            batch.push(KeyValueStoreOp::PutKeyValue(
                get_key_for_col(DBColumn::BeaconMeta.into(), HIGHEST_SLOT_KEY),
                block.slot.as_ssz_bytes(),
            ));
        }

        self.db.do_atomically(batch)?;
        if block.slot > *highest {
            *highest = block.slot;
        }
        // Refresh the cache entry even when one (possibly stale) exists.
        self.block_cache.lock().put(root, block.clone());
        Ok(())
    }

    /// The block with signing root `root`. A missing key is not an error.
    pub fn block(&self, root: Hash256) -> Result<Option<BeaconBlock>> {
        if let Some(block) = self.block_cache.lock().get(&root) {
            metrics::inc_counter(&metrics::BLOCK_CACHE_HIT_COUNT);
            return Ok(Some(block.clone()));
        }
        let block = self.db.get::<BeaconBlock>(root.as_bytes())?;
        if let Some(block) = &block {
            self.block_cache.lock().put(root, block.clone());
        }
        Ok(block)
    }

    pub fn has_block(&self, root: Hash256) -> Result<bool> {
        if self.block_cache.lock().contains(&root) {
            return Ok(true);
        }
        self.db.exists::<BeaconBlock>(root.as_bytes())
    }

    /// Remove `block` from the cache, the engine, and the slot index.
    pub fn delete_block(&self, block: &BeaconBlock) -> Result<()> {
        let root = block.canonical_root();
        let mut highest = self.highest_block_slot.write();

        let mut batch = vec![KeyValueStoreOp::DeleteKey(get_key_for_col(
            DBColumn::BeaconBlock.into(),
            root.as_bytes(),
        ))];

        let mut roots_at_slot = self.block_roots_at_slot(block.slot)?;
        roots_at_slot.retain(|r| *r != root);
        if roots_at_slot.is_empty() {
            batch.push(KeyValueStoreOp::DeleteKey(get_key_for_col(
                DBColumn::SlotIndex.into(),
                &slot_key(block.slot),
            )));
        } else {
            batch.push(KeyValueStoreOp::PutKeyValue(
                get_key_for_col(DBColumn::SlotIndex.into(), &slot_key(block.slot)),
                roots_at_slot.as_ssz_bytes(),
            ));
        }

        self.db.do_atomically(batch)?;
        self.block_cache.lock().pop(&root);

        // Keep `highest_block_slot` equal to the maximum stored slot.
        if *highest == block.slot && roots_at_slot.is_empty() {
            let mut slot = block.slot;
            while slot > 0 {
                slot -= 1;
                if !self.block_roots_at_slot(slot)?.is_empty() {
                    break;
                }
            }
            *highest = slot;
            self.db.put_bytes(
                DBColumn::BeaconMeta.into(),
                HIGHEST_SLOT_KEY,
                &slot.as_ssz_bytes(),
            )?;
        }
        Ok(())
    }

    fn block_roots_at_slot(&self, slot: Slot) -> Result<Vec<Hash256>> {
        match self
            .db
            .get_bytes(DBColumn::SlotIndex.into(), &slot_key(slot))?
        {
            Some(bytes) => Vec::<Hash256>::from_ssz_bytes(&bytes).map_err(Into::into),
            None => Ok(vec![]),
        }
    }

    /// All blocks at `slot`; more than one on unresolved forks, empty on
    /// none.
    pub fn blocks_by_slot(&self, slot: Slot) -> Result<Vec<BeaconBlock>> {
        let mut blocks = vec![];
        for root in self.block_roots_at_slot(slot)? {
            if let Some(block) = self.block(root)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    /// Children of `parent_root` with slots in `(from, to]`, for fork-choice
    /// descent.
    pub fn children_of(&self, parent_root: Hash256, from: Slot, to: Slot) -> Result<Vec<Hash256>> {
        let mut children = vec![];
        let mut slot = from + 1;
        while slot <= to {
            for root in self.block_roots_at_slot(slot)? {
                if let Some(block) = self.block(root)? {
                    if block.parent_root == parent_root {
                        children.push(root);
                    }
                }
            }
            slot += 1;
        }
        Ok(children)
    }

    /*
     * Chain head and canonical index
     */

    /// The block at the head of the canonical chain.
    pub fn chain_head(&self) -> Result<BeaconBlock> {
        let root = self
            .db
            .get_bytes(DBColumn::BeaconMeta.into(), HEAD_BLOCK_ROOT_KEY)?
            .ok_or(Error::NoChainHead)?;
        let root = Hash256::from_slice(&root);
        self.block(root)?.ok_or(Error::BlockNotFound(root))
    }

    /// Set `block` as the canonical head and commit its `state`, rewriting
    /// the canonical index wherever it disagrees at slots >= `block.slot`.
    ///
    /// Readers see either the old head or the new head, never a mixture.
    pub fn update_chain_head(
        &self,
        ctx: &Context,
        block: &BeaconBlock,
        state: &BeaconState,
    ) -> Result<()> {
        ctx.check()?;
        let root = block.canonical_root();
        if !self.has_block(root)? {
            return Err(Error::BlockNotFound(root));
        }

        let mut index = self.canonical_index.write();
        let mut batch = vec![
            KeyValueStoreOp::PutKeyValue(
                get_key_for_col(DBColumn::BeaconMeta.into(), HEAD_BLOCK_ROOT_KEY),
                root.as_bytes().to_vec(),
            ),
            KeyValueStoreOp::PutKeyValue(
                get_key_for_col(DBColumn::BeaconMeta.into(), HEAD_STATE_KEY),
                state.as_ssz_bytes(),
            ),
        ];

        // Anything canonical above the new head is stale.
        let stale: Vec<Slot> = index.range(block.slot + 1..).map(|(s, _)| *s).collect();
        for slot in &stale {
            batch.push(KeyValueStoreOp::DeleteKey(get_key_for_col(
                DBColumn::CanonicalIndex.into(),
                &slot_key(*slot),
            )));
        }

        // Rewrite the path from the new head back to the fork point.
        let mut rewrites = vec![(block.slot, root)];
        let mut current = block.clone();
        while current.slot > 0 {
            let parent_root = current.parent_root;
            let parent = match self.block(parent_root)? {
                Some(parent) => parent,
                None => break,
            };
            if index.get(&parent.slot) == Some(&parent_root) {
                break;
            }
            rewrites.push((parent.slot, parent_root));
            current = parent;
        }
        for (slot, root) in &rewrites {
            batch.push(KeyValueStoreOp::PutKeyValue(
                get_key_for_col(DBColumn::CanonicalIndex.into(), &slot_key(*slot)),
                root.as_bytes().to_vec(),
            ));
        }

        self.db.do_atomically(batch)?;
        for slot in stale {
            index.remove(&slot);
        }
        for (slot, root) in rewrites {
            index.insert(slot, root);
        }

        debug!(self.log, "Updated chain head"; "slot" => %block.slot, "root" => ?root);
        Ok(())
    }

    /// The canonical block at exactly `slot`, if one is recorded.
    pub fn canonical_block_by_slot(&self, slot: Slot) -> Result<Option<BeaconBlock>> {
        let root = { self.canonical_index.read().get(&slot).copied() };
        match root {
            Some(root) => self.block(root),
            None => Ok(None),
        }
    }

    /// The canonical root recorded for `slot`.
    pub fn canonical_root_by_slot(&self, slot: Slot) -> Option<Hash256> {
        self.canonical_index.read().get(&slot).copied()
    }

    /*
     * States
     */

    /// Commit `state` as the current head state.
    pub fn save_state(&self, ctx: &Context, state: &BeaconState) -> Result<()> {
        ctx.check()?;
        self.db.put_bytes(
            DBColumn::BeaconMeta.into(),
            HEAD_STATE_KEY,
            &state.as_ssz_bytes(),
        )
    }

    /// The state at the current head, absent before initialization.
    pub fn head_state(&self, ctx: &Context) -> Result<Option<BeaconState>> {
        ctx.check()?;
        self.db
            .get_bytes(DBColumn::BeaconMeta.into(), HEAD_STATE_KEY)?
            .map(|bytes| BeaconState::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    /// Store a post-state keyed by the signing root of the block that
    /// produced it.
    pub fn save_historical_state(
        &self,
        ctx: &Context,
        state: &BeaconState,
        block_root: Hash256,
    ) -> Result<()> {
        ctx.check()?;
        self.db.put(block_root.as_bytes(), state)
    }

    pub fn historical_state(&self, block_root: Hash256) -> Result<Option<BeaconState>> {
        self.db.get::<BeaconState>(block_root.as_bytes())
    }

    /// Reconstruct the state at `(slot, block_root)` by replaying forward
    /// from the nearest saved ancestor state.
    ///
    /// Replay never re-verifies signatures; every replayed block was already
    /// accepted once.
    pub fn historical_state_from_slot(
        &self,
        ctx: &Context,
        slot: Slot,
        block_root: Hash256,
    ) -> Result<BeaconState> {
        ctx.check()?;
        let timer = metrics::start_timer(&metrics::STATE_REPLAY_TIMES);

        let mut to_replay: Vec<BeaconBlock> = vec![];
        let mut current_root = block_root;
        let mut state = loop {
            if let Some(state) = self.historical_state(current_root)? {
                break state;
            }
            let block = self
                .block(current_root)?
                .ok_or(Error::BlockNotFound(current_root))?;
            if block.slot == 0 {
                return Err(Error::NoBaseState(block_root));
            }
            current_root = block.parent_root;
            to_replay.push(block);
        };

        if slot < state.slot {
            return Err(Error::ReplaySlotUnderflow {
                base: state.slot,
                target: slot,
            });
        }

        let config = TransitionConfig {
            verify_signatures: false,
        };
        for block in to_replay.iter().rev() {
            process_slots(&mut state, block.slot, &self.spec)?;
            per_block_processing(&mut state, block, &config, &self.spec)
                .map_err(state_processing::StateTransitionError::from)?;
        }
        process_slots(&mut state, slot, &self.spec)?;

        metrics::stop_timer(timer);
        Ok(state)
    }

    /*
     * Justified and finalized singletons
     */

    pub fn save_justified_block(&self, block: &BeaconBlock) -> Result<()> {
        self.db.put_bytes(
            DBColumn::BeaconMeta.into(),
            JUSTIFIED_BLOCK_KEY,
            &block.as_ssz_bytes(),
        )
    }

    pub fn justified_block(&self) -> Result<BeaconBlock> {
        self.meta_block(JUSTIFIED_BLOCK_KEY)
    }

    pub fn save_finalized_block(&self, block: &BeaconBlock) -> Result<()> {
        self.db.put_bytes(
            DBColumn::BeaconMeta.into(),
            FINALIZED_BLOCK_KEY,
            &block.as_ssz_bytes(),
        )
    }

    pub fn finalized_block(&self) -> Result<BeaconBlock> {
        self.meta_block(FINALIZED_BLOCK_KEY)
    }

    fn meta_block(&self, key: &[u8]) -> Result<BeaconBlock> {
        self.db
            .get_bytes(DBColumn::BeaconMeta.into(), key)?
            .ok_or(Error::NoCheckpoint)
            .and_then(|bytes| BeaconBlock::from_ssz_bytes(&bytes).map_err(Into::into))
    }

    pub fn save_justified_state(&self, state: &BeaconState) -> Result<()> {
        self.db.put_bytes(
            DBColumn::BeaconMeta.into(),
            JUSTIFIED_STATE_KEY,
            &state.as_ssz_bytes(),
        )
    }

    pub fn save_finalized_state(&self, state: &BeaconState) -> Result<()> {
        self.db.put_bytes(
            DBColumn::BeaconMeta.into(),
            FINALIZED_STATE_KEY,
            &state.as_ssz_bytes(),
        )
    }

    /*
     * Checkpoint states
     */

    pub fn save_checkpoint_state(
        &self,
        ctx: &Context,
        checkpoint: &Checkpoint,
        state: &BeaconState,
    ) -> Result<()> {
        ctx.check()?;
        self.db.put_bytes(
            DBColumn::CheckpointState.into(),
            &checkpoint_key(checkpoint),
            &state.as_ssz_bytes(),
        )
    }

    pub fn has_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool> {
        self.db
            .key_exists(DBColumn::CheckpointState.into(), &checkpoint_key(checkpoint))
    }

    pub fn checkpoint_state(
        &self,
        ctx: &Context,
        checkpoint: &Checkpoint,
    ) -> Result<Option<BeaconState>> {
        ctx.check()?;
        self.db
            .get_bytes(DBColumn::CheckpointState.into(), &checkpoint_key(checkpoint))?
            .map(|bytes| BeaconState::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    /*
     * Latest messages
     */

    /// Record the latest attestation target for `validator_index`.
    ///
    /// Writes are monotone in epoch: a message older than the stored one is
    /// dropped.
    pub fn save_latest_message(
        &self,
        ctx: &Context,
        validator_index: u64,
        message: &LatestMessage,
    ) -> Result<()> {
        ctx.check()?;
        if let Some(existing) = self.latest_message(validator_index)? {
            if existing.epoch > message.epoch {
                return Ok(());
            }
        }
        self.db
            .put(&validator_index.to_le_bytes(), message)
    }

    pub fn has_latest_message(&self, validator_index: u64) -> Result<bool> {
        self.db
            .exists::<LatestMessage>(&validator_index.to_le_bytes())
    }

    pub fn latest_message(&self, validator_index: u64) -> Result<Option<LatestMessage>> {
        self.db.get::<LatestMessage>(&validator_index.to_le_bytes())
    }

    /*
     * Attestation targets
     */

    pub fn save_attestation_target(&self, ctx: &Context, target: &AttestationTarget) -> Result<()> {
        ctx.check()?;
        self.db.put(target.beacon_block_root.as_bytes(), target)
    }

    pub fn attestation_target(&self, block_root: Hash256) -> Result<Option<AttestationTarget>> {
        self.db.get::<AttestationTarget>(block_root.as_bytes())
    }

    /*
     * Pending deposits
     */

    pub fn insert_pending_deposit(&self, ctx: &Context, deposit: &Deposit) -> Result<()> {
        ctx.check()?;
        self.pending_deposits.lock().push(deposit.clone());
        Ok(())
    }

    /// Drop an included deposit from the pending queue.
    pub fn remove_pending_deposit(&self, ctx: &Context, deposit: &Deposit) -> Result<()> {
        ctx.check()?;
        self.pending_deposits.lock().retain(|d| d != deposit);
        Ok(())
    }

    pub fn pending_deposits(&self) -> Vec<Deposit> {
        self.pending_deposits.lock().clone()
    }

    /*
     * Evil blocks
     */

    /// Remember `root` as irrecoverably bad; later saves of it fail.
    pub fn mark_evil_block_hash(&self, root: Hash256) -> Result<()> {
        self.db
            .put_bytes(DBColumn::EvilBlock.into(), root.as_bytes(), &[1])
    }

    /*
     * Validator pubkey index
     */

    pub fn save_validator_index(&self, pubkey: &PublicKeyBytes, index: u64) -> Result<()> {
        self.db.put_bytes(
            DBColumn::ValidatorIndex.into(),
            pubkey.as_bytes(),
            &index.as_ssz_bytes(),
        )
    }

    pub fn validator_index(&self, pubkey: &PublicKeyBytes) -> Result<Option<u64>> {
        self.db
            .get_bytes(DBColumn::ValidatorIndex.into(), pubkey.as_bytes())?
            .map(|bytes| u64::from_ssz_bytes(&bytes).map_err(Into::into))
            .transpose()
    }

    pub fn delete_validator_index(&self, pubkey: &PublicKeyBytes) -> Result<()> {
        self.db
            .key_delete(DBColumn::ValidatorIndex.into(), pubkey.as_bytes())
    }

    /*
     * Misc
     */

    /// Drop the in-memory block cache; the engine is unaffected.
    pub fn clear_block_cache(&self) {
        self.block_cache.lock().clear();
    }

    pub fn highest_block_slot(&self) -> Slot {
        *self.highest_block_slot.read()
    }

    /// Build and persist the genesis state and block from the chain-start
    /// deposit set.
    pub fn initialize_state(
        &self,
        ctx: &Context,
        genesis_time: u64,
        deposits: &[Deposit],
        eth1_data: Eth1Data,
    ) -> Result<BeaconState> {
        let state =
            initialize_beacon_state_from_eth1(genesis_time, deposits, eth1_data, &self.spec)?;
        let block = genesis_block(state.canonical_root(), &self.spec);
        let root = block.canonical_root();

        self.save_block(&block)?;
        self.update_chain_head(ctx, &block, &state)?;
        self.save_historical_state(ctx, &state, root)?;

        info!(
            self.log, "Initialized genesis state";
            "validators" => state.validators.len(),
            "root" => ?root,
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use slog::o;
    use state_processing::genesis_deposits;
    use std::time::{SystemTime, UNIX_EPOCH};
    use types::{DepositData, SignatureBytes};

    fn setup_db() -> ChainDB<MemoryStore> {
        let log = Logger::root(slog::Discard, o!());
        ChainDB::open(MemoryStore::open(), ChainSpec::minimal(), log).unwrap()
    }

    fn setup_initial_deposits(count: usize, spec: &ChainSpec) -> (Vec<Deposit>, Eth1Data) {
        let data: Vec<DepositData> = (0..count)
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
        (deposits, eth1_data)
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn nil_lookup_ok() {
        let db = setup_db();
        let block = BeaconBlock::empty(Slot::new(0));
        let root = block.canonical_root();

        assert!(!db.has_block(root).unwrap());
        assert_eq!(db.block(root).unwrap(), None);
    }

    #[test]
    fn save_block_ok() {
        let db = setup_db();

        let block_1 = BeaconBlock::empty(Slot::new(0));
        let root_1 = block_1.canonical_root();
        db.save_block(&block_1).unwrap();
        assert_eq!(db.block(root_1).unwrap().unwrap(), block_1);

        let mut block_2 = BeaconBlock::empty(Slot::new(0));
        block_2.parent_root = Hash256::repeat_byte(1);
        let root_2 = block_2.canonical_root();
        db.save_block(&block_2).unwrap();
        assert_eq!(db.block(root_2).unwrap().unwrap(), block_2);

        // Idempotent upsert.
        db.save_block(&block_2).unwrap();
        assert_eq!(db.block(root_2).unwrap().unwrap(), block_2);
        assert_eq!(db.blocks_by_slot(Slot::new(0)).unwrap().len(), 2);
    }

    #[test]
    fn delete_block_ok() {
        let db = setup_db();
        let block = BeaconBlock::empty(Slot::new(0));
        let root = block.canonical_root();

        db.save_block(&block).unwrap();
        assert_eq!(db.block(root).unwrap().unwrap(), block);

        db.delete_block(&block).unwrap();
        assert_eq!(db.block(root).unwrap(), None);
        assert!(!db.has_block(root).unwrap());
    }

    #[test]
    fn blocks_by_slot_empty_chain_ok() {
        let db = setup_db();
        assert!(db.blocks_by_slot(Slot::new(0)).unwrap().is_empty());
    }

    #[test]
    fn blocks_by_slot_multiple_blocks() {
        let db = setup_db();
        let slot = Slot::new(3);

        for byte in [b'A', b'B', b'C'] {
            let mut block = BeaconBlock::empty(slot);
            block.parent_root = Hash256::repeat_byte(byte);
            block.body.randao_reveal = SignatureBytes::from_bytes(&[byte; 96]).unwrap();
            db.save_block(&block).unwrap();
        }

        assert_eq!(db.blocks_by_slot(slot).unwrap().len(), 3);
    }

    #[test]
    fn update_chain_head_requires_saved_block() {
        let db = setup_db();
        let ctx = Context::new();
        let (deposits, eth1_data) = setup_initial_deposits(10, db.spec());
        db.initialize_state(&ctx, now(), &deposits, eth1_data)
            .unwrap();
        let state = db.head_state(&ctx).unwrap().unwrap();

        let block = BeaconBlock::empty(Slot::new(1));
        assert!(matches!(
            db.update_chain_head(&ctx, &block, &state),
            Err(Error::BlockNotFound(_))
        ));
    }

    #[test]
    fn update_chain_head_ok() {
        let db = setup_db();
        let ctx = Context::new();
        let (deposits, eth1_data) = setup_initial_deposits(10, db.spec());
        db.initialize_state(&ctx, now(), &deposits, eth1_data)
            .unwrap();

        let genesis = db.chain_head().unwrap();
        let state = db.head_state(&ctx).unwrap().unwrap();

        let mut block = BeaconBlock::empty(Slot::new(1));
        block.parent_root = genesis.canonical_root();
        let root = block.canonical_root();

        db.save_block(&block).unwrap();
        db.update_chain_head(&ctx, &block, &state).unwrap();

        let canonical = db.canonical_block_by_slot(Slot::new(1)).unwrap().unwrap();
        assert_eq!(canonical.canonical_root(), root);
        assert_eq!(db.chain_head().unwrap().canonical_root(), root);
    }

    #[test]
    fn chain_progress_ok() {
        let db = setup_db();
        let ctx = Context::new();
        let (deposits, eth1_data) = setup_initial_deposits(100, db.spec());
        db.initialize_state(&ctx, now(), &deposits, eth1_data)
            .unwrap();
        let state = db.head_state(&ctx).unwrap().unwrap();
        let slots_per_epoch = db.spec().slots_per_epoch;

        let block_1 = BeaconBlock::empty(Slot::new(1));
        db.save_block(&block_1).unwrap();
        db.update_chain_head(&ctx, &block_1, &state).unwrap();
        assert_eq!(db.chain_head().unwrap().slot, Slot::new(1));

        let block_2 = BeaconBlock::empty(Slot::new(slots_per_epoch));
        db.save_block(&block_2).unwrap();
        db.update_chain_head(&ctx, &block_2, &state).unwrap();
        assert_eq!(db.chain_head().unwrap().slot, Slot::new(slots_per_epoch));

        // A head update may move backwards; the explicit set wins.
        let block_3 = BeaconBlock::empty(Slot::new(3));
        db.save_block(&block_3).unwrap();
        db.update_chain_head(&ctx, &block_3, &state).unwrap();
        assert_eq!(db.chain_head().unwrap().slot, Slot::new(3));

        // Stale canonical entries above the new head were removed.
        assert!(db
            .canonical_block_by_slot(Slot::new(slots_per_epoch))
            .unwrap()
            .is_none());
    }

    #[test]
    fn justified_block_none_exists() {
        let db = setup_db();
        assert!(matches!(db.justified_block(), Err(Error::NoCheckpoint)));
    }

    #[test]
    fn justified_block_save_retrieve() {
        let db = setup_db();
        let block = BeaconBlock::empty(Slot::new(10));
        db.save_justified_block(&block).unwrap();
        assert_eq!(db.justified_block().unwrap().slot, Slot::new(10));
    }

    #[test]
    fn finalized_block_none_exists() {
        let db = setup_db();
        assert!(matches!(db.finalized_block(), Err(Error::NoCheckpoint)));
    }

    #[test]
    fn finalized_block_save_retrieve() {
        let db = setup_db();
        let block = BeaconBlock::empty(Slot::new(22));
        db.save_finalized_block(&block).unwrap();
        assert_eq!(db.finalized_block().unwrap().slot, Slot::new(22));
    }

    #[test]
    fn has_block_returns_true() {
        let db = setup_db();
        let block = BeaconBlock::empty(Slot::new(44));
        let root = block.canonical_root();
        db.save_block(&block).unwrap();
        assert!(db.has_block(root).unwrap());
    }

    #[test]
    fn highest_block_slot_updated_on_save() {
        let db = setup_db();

        let mut block = BeaconBlock::empty(Slot::new(23));
        db.save_block(&block).unwrap();
        assert_eq!(db.highest_block_slot(), Slot::new(23));

        block.slot = Slot::new(55);
        db.save_block(&block).unwrap();
        assert_eq!(db.highest_block_slot(), Slot::new(55));
    }

    #[test]
    fn highest_block_slot_tracks_deletes() {
        let db = setup_db();
        let low = BeaconBlock::empty(Slot::new(23));
        let high = BeaconBlock::empty(Slot::new(55));
        db.save_block(&low).unwrap();
        db.save_block(&high).unwrap();

        db.delete_block(&high).unwrap();
        assert_eq!(db.highest_block_slot(), Slot::new(23));
    }

    #[test]
    fn clear_block_cache_keeps_db_reads() {
        let db = setup_db();
        let block = BeaconBlock::empty(Slot::new(0));
        let root = block.canonical_root();
        db.save_block(&block).unwrap();

        db.clear_block_cache();
        assert_eq!(db.block(root).unwrap().unwrap(), block);
    }

    #[test]
    fn latest_message_is_monotone_in_epoch() {
        let db = setup_db();
        let ctx = Context::new();
        let index = 7;

        let msg = |epoch: u64, byte: u8| LatestMessage {
            epoch: types::Epoch::new(epoch),
            root: Hash256::repeat_byte(byte),
        };

        db.save_latest_message(&ctx, index, &msg(5, 1)).unwrap();
        db.save_latest_message(&ctx, index, &msg(3, 2)).unwrap();
        assert_eq!(db.latest_message(index).unwrap().unwrap(), msg(5, 1));

        db.save_latest_message(&ctx, index, &msg(7, 3)).unwrap();
        assert_eq!(db.latest_message(index).unwrap().unwrap(), msg(7, 3));
        assert!(db.has_latest_message(index).unwrap());
        assert!(!db.has_latest_message(index + 1).unwrap());
    }

    #[test]
    fn evil_block_rejected_on_save() {
        let db = setup_db();
        let block = BeaconBlock::empty(Slot::new(9));
        let root = block.canonical_root();

        db.mark_evil_block_hash(root).unwrap();
        assert!(matches!(
            db.save_block(&block),
            Err(Error::Blacklisted(r)) if r == root
        ));
    }

    #[test]
    fn checkpoint_state_round_trip() {
        let db = setup_db();
        let ctx = Context::new();
        let (deposits, eth1_data) = setup_initial_deposits(10, db.spec());
        let state = db
            .initialize_state(&ctx, 0, &deposits, eth1_data)
            .unwrap();

        let checkpoint = Checkpoint {
            epoch: types::Epoch::new(0),
            root: Hash256::repeat_byte(0xc0),
        };
        assert!(!db.has_checkpoint(&checkpoint).unwrap());

        db.save_checkpoint_state(&ctx, &checkpoint, &state).unwrap();
        assert!(db.has_checkpoint(&checkpoint).unwrap());
        assert_eq!(
            db.checkpoint_state(&ctx, &checkpoint).unwrap().unwrap(),
            state
        );
    }

    #[test]
    fn historical_state_replays_to_slot() {
        let db = setup_db();
        let ctx = Context::new();
        let (deposits, eth1_data) = setup_initial_deposits(16, db.spec());
        db.initialize_state(&ctx, 0, &deposits, eth1_data).unwrap();
        let genesis = db.chain_head().unwrap();

        let state = db
            .historical_state_from_slot(&ctx, Slot::new(4), genesis.canonical_root())
            .unwrap();
        assert_eq!(state.slot, Slot::new(4));
    }

    #[test]
    fn cancelled_context_aborts_without_commit() {
        let db = setup_db();
        let ctx = Context::new();
        ctx.cancel();

        let msg = LatestMessage {
            epoch: types::Epoch::new(1),
            root: Hash256::zero(),
        };
        assert!(matches!(
            db.save_latest_message(&ctx, 0, &msg),
            Err(Error::Cancelled)
        ));
        assert!(!db.has_latest_message(0).unwrap());
    }
}
