//! The life-cycle of the beacon chain: the sole block-admission pipeline,
//! the chain-start bootstrap, and the service-level canonical view.

use crate::attestation_handler::AttestationTargetHandler;
use crate::caches::HelperCaches;
use crate::errors::BeaconChainError;
use crate::events::Feed;
use crate::eth1_chain::Eth1ChainBackend;
use crate::metrics;
use crate::{BeaconBlockAnnounce, BeaconChainTypes, Broadcaster, OperationFeeds};
use parking_lot::{Mutex, RwLock};
use slog::{crit, debug, error, info, Logger};
use state_processing::{genesis_block, state_transition, EpochSummary, TransitionConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use store::{ChainDB, Context, ItemStore};
use types::{AttestationTarget, BeaconBlock, BeaconState, ChainSpec, Epoch, Hash256, Slot};

/// Tunables of the chain service.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Health checks fail when live workers exceed this bound.
    pub max_workers: usize,
    pub transition: TransitionConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_workers: 1_024,
            transition: TransitionConfig::default(),
        }
    }
}

/// Tracks live long-lived workers for the supervisory health check.
#[derive(Default)]
pub struct WorkerRegistry {
    live: Arc<AtomicUsize>,
}

pub struct WorkerGuard {
    live: Arc<AtomicUsize>,
}

impl WorkerRegistry {
    pub fn register(&self) -> WorkerGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            live: self.live.clone(),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Constructor wiring for `BeaconChain`.
pub struct BeaconChainConfig<T: BeaconChainTypes> {
    pub db: Arc<ChainDB<T::Store>>,
    pub eth1_chain: T::Eth1Chain,
    pub broadcaster: T::Broadcaster,
    pub target_handler: T::TargetHandler,
    pub op_pool: T::OpPool,
    pub chain_config: ChainConfig,
    pub spec: ChainSpec,
    pub log: Logger,
}

/// The internal logic of managing the full proof-of-stake beacon chain.
pub struct BeaconChain<T: BeaconChainTypes> {
    pub db: Arc<ChainDB<T::Store>>,
    ctx: Context,
    eth1_chain: T::Eth1Chain,
    broadcaster: T::Broadcaster,
    target_handler: T::TargetHandler,
    op_pool: T::OpPool,
    canonical_block_feed: Feed<BeaconBlock>,
    state_initialized_feed: Feed<u64>,
    /// Service-level canonical roots by slot, for cheap `is_canonical`
    /// queries.
    canonical_blocks: RwLock<BTreeMap<Slot, Hash256>>,
    /// At most one block may be in the admission pipeline at a time.
    receive_block_lock: Mutex<()>,
    genesis_time: RwLock<Option<u64>>,
    finalized_epoch: RwLock<Epoch>,
    /// `(voted, eligible)` gwei per processed epoch, for participation
    /// queries.
    participation_by_epoch: RwLock<HashMap<Epoch, (u64, u64)>>,
    pub(crate) caches: HelperCaches,
    workers: WorkerRegistry,
    chain_config: ChainConfig,
    spec: ChainSpec,
    log: Logger,
}

impl<T: BeaconChainTypes> BeaconChain<T> {
    pub fn new(ctx: Context, config: BeaconChainConfig<T>) -> Self {
        Self {
            db: config.db,
            ctx,
            eth1_chain: config.eth1_chain,
            broadcaster: config.broadcaster,
            target_handler: config.target_handler,
            op_pool: config.op_pool,
            canonical_block_feed: Feed::new(),
            state_initialized_feed: Feed::new(),
            canonical_blocks: RwLock::new(BTreeMap::new()),
            receive_block_lock: Mutex::new(()),
            genesis_time: RwLock::new(None),
            finalized_epoch: RwLock::new(Epoch::new(0)),
            participation_by_epoch: RwLock::new(HashMap::new()),
            caches: HelperCaches::new(),
            workers: WorkerRegistry::default(),
            chain_config: config.chain_config,
            spec: config.spec,
            log: config.log,
        }
    }

    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    pub fn canonical_block_feed(&self) -> &Feed<BeaconBlock> {
        &self.canonical_block_feed
    }

    pub fn state_initialized_feed(&self) -> &Feed<u64> {
        &self.state_initialized_feed
    }

    pub fn finalized_epoch(&self) -> Epoch {
        *self.finalized_epoch.read()
    }

    pub(crate) fn op_pool(&self) -> &T::OpPool {
        &self.op_pool
    }

    pub(crate) fn participation_for(&self, epoch: Epoch) -> Option<(u64, u64)> {
        self.participation_by_epoch.read().get(&epoch).copied()
    }

    /// Start the service: resume from a persisted chain, or wait for the
    /// deposit watcher's chain-start event.
    pub fn start(self: &Arc<Self>) -> Result<(), BeaconChainError> {
        if let Some(state) = self.db.head_state(&self.ctx)? {
            info!(self.log, "Beacon chain data already exists, starting service");
            *self.genesis_time.write() = Some(state.genesis_time);
            *self.finalized_epoch.write() = state.finalized_checkpoint.epoch;
            return Ok(());
        }

        info!(
            self.log,
            "Waiting for ChainStart from the validator deposit contract"
        );
        let subscription = self.eth1_chain.chain_start_feed().subscribe();
        let chain = self.clone();
        self.spawn_worker("chain-start", move || {
            if let Ok(genesis_time) = subscription.receiver.recv() {
                if let Err(e) = chain.initialize_beacon_chain(genesis_time) {
                    // The node cannot operate without genesis.
                    crit!(chain.log, "Could not initialize beacon chain"; "error" => ?e);
                    std::process::exit(1);
                }
                chain
                    .eth1_chain
                    .chain_start_feed()
                    .unsubscribe(subscription.id);
            }
        });
        Ok(())
    }

    /// Spawn a registered long-lived worker thread.
    pub fn spawn_worker<F>(&self, name: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.workers.register();
        let builder = std::thread::Builder::new().name(name.to_string());
        let spawned = builder.spawn(move || {
            let _guard = guard;
            f()
        });
        if let Err(e) = spawned {
            error!(self.log, "Failed to spawn worker"; "name" => name, "error" => %e);
        }
    }

    /// Supervisory health check.
    pub fn status(&self) -> Result<(), BeaconChainError> {
        let live = self.workers.live();
        if live > self.chain_config.max_workers {
            return Err(BeaconChainError::TooManyWorkers {
                live,
                max: self.chain_config.max_workers,
            });
        }
        Ok(())
    }

    /// Build and persist everything the chain needs at genesis, in order:
    /// state, block, attestation target, chain head, then the justified and
    /// finalized singletons. Publishes on the state-initialized feed.
    pub fn initialize_beacon_chain(
        &self,
        genesis_time: u64,
    ) -> Result<BeaconState, BeaconChainError> {
        info!(self.log, "ChainStart time reached, starting the beacon chain");

        let deposits = self.eth1_chain.chain_start_deposits();
        let eth1_data = self.eth1_chain.chain_start_eth1_data();
        let state = self
            .db
            .initialize_state(&self.ctx, genesis_time, &deposits, eth1_data)?;

        let genesis = genesis_block(state.canonical_root(), &self.spec);
        let root = genesis.canonical_root();

        self.db.save_block(&genesis)?;
        self.db.save_attestation_target(
            &self.ctx,
            &AttestationTarget {
                slot: genesis.slot,
                beacon_block_root: root,
                parent_root: genesis.parent_root,
            },
        )?;
        self.db.update_chain_head(&self.ctx, &genesis, &state)?;
        self.db.save_justified_block(&genesis)?;
        self.db.save_finalized_block(&genesis)?;
        self.db.save_justified_state(&state)?;
        self.db.save_finalized_state(&state)?;

        *self.genesis_time.write() = Some(genesis_time);
        *self.finalized_epoch.write() = state.finalized_checkpoint.epoch;
        self.update_canonical_roots(&genesis, root);
        self.state_initialized_feed.send(genesis_time);
        Ok(state)
    }

    /*
     * The block pipeline
     */

    /// The sole admission path for blocks. Serialised: at most one block is
    /// in flight per node.
    pub fn receive_block(
        &self,
        ctx: &Context,
        block: &BeaconBlock,
    ) -> Result<BeaconState, BeaconChainError> {
        let _pipeline = self.receive_block_lock.lock();
        let timer = metrics::start_timer(&metrics::BLOCK_PROCESSING_TIMES);

        let result = self.process_block(ctx, block);
        match &result {
            Ok(_) => metrics::inc_counter(&metrics::BLOCK_PROCESSING_SUCCESSES),
            Err(_) => metrics::inc_counter(&metrics::BLOCK_PROCESSING_FAILURES),
        }

        metrics::stop_timer(timer);
        result
    }

    fn process_block(
        &self,
        ctx: &Context,
        block: &BeaconBlock,
    ) -> Result<BeaconState, BeaconChainError> {
        ctx.check().map_err(BeaconChainError::StoreError)?;

        // 1. Locate the parent.
        let parent = self
            .db
            .block(block.parent_root)?
            .ok_or(BeaconChainError::UnknownParent(block.parent_root))?;

        // 2. Load the pre-state.
        let pre_state = self
            .db
            .historical_state_from_slot(ctx, parent.slot, block.parent_root)
            .map_err(BeaconChainError::StatePreload)?;

        let block_root = block.canonical_root();

        // 3. Pre-validity.
        self.verify_block_validity(block, &pre_state)?;

        // 4. Persist, then announce; announcing first would let peers echo
        // the block back before we can recognise it.
        self.save_and_broadcast_block(ctx, block, block_root)?;

        info!(self.log, "Executing state transition"; "slot" => %block.slot);

        // 5. The core state transition.
        let (post_state, summaries) = self.advance_state(&pre_state, block, block_root)?;

        debug!(
            self.log, "State transition complete";
            "slot" => %post_state.slot,
            "epoch" => %post_state.current_epoch(&self.spec),
        );

        // 6. The block must commit to the state we computed.
        let state_root = post_state.canonical_root();
        if state_root != block.state_root {
            self.db.mark_evil_block_hash(block_root)?;
            self.db.delete_block(block)?;
            return Err(BeaconChainError::StateRootMismatch {
                expected: block.state_root,
                found: state_root,
            });
        }

        // 7. Epoch-boundary housekeeping.
        self.epoch_boundary_housekeeping(ctx, &pre_state, &post_state, &summaries)?;

        // 8. Persist the post-state under the block's signing root.
        self.db.save_historical_state(ctx, &post_state, block_root)?;

        // 9. Operation cleanup.
        self.cleanup_block_operations(ctx, block)?;

        info!(
            self.log, "Finished processing beacon block";
            "slot" => %block.slot,
            "attestations" => block.body.attestations.len(),
            "deposits" => block.body.deposits.len(),
        );
        Ok(post_state)
    }

    /// The pre-processing conditions: not a genesis replay, not from the
    /// future, parent known, eth1 reference known.
    pub fn verify_block_validity(
        &self,
        block: &BeaconBlock,
        pre_state: &BeaconState,
    ) -> Result<(), BeaconChainError> {
        if block.slot == self.spec.genesis_slot {
            return Err(BeaconChainError::GenesisReplay);
        }

        let slot_time =
            pre_state.genesis_time + block.slot.as_u64() * self.spec.seconds_per_slot;
        let now = wall_clock();
        if now < slot_time {
            return Err(BeaconChainError::FromFuture { slot_time, now });
        }

        if !self.db.has_block(block.parent_root)? {
            return Err(BeaconChainError::UnknownParent(block.parent_root));
        }

        let eth1_hash = pre_state.eth1_data.block_hash;
        if !self.eth1_chain.block_by_hash(eth1_hash) {
            return Err(BeaconChainError::UnknownEth1(eth1_hash));
        }
        Ok(())
    }

    /// Store the block and its attestation target, then announce it.
    ///
    /// The save must precede the announce: peers may echo announced blocks
    /// straight back, and a block we already stored is not re-processed.
    fn save_and_broadcast_block(
        &self,
        ctx: &Context,
        block: &BeaconBlock,
        block_root: Hash256,
    ) -> Result<(), BeaconChainError> {
        self.db.save_block(block)?;
        self.db.save_attestation_target(
            ctx,
            &AttestationTarget {
                slot: block.slot,
                beacon_block_root: block_root,
                parent_root: block.parent_root,
            },
        )?;
        self.broadcaster.broadcast(
            ctx,
            BeaconBlockAnnounce {
                hash: block_root,
                slot_number: block.slot,
            },
        );
        Ok(())
    }

    /// Run the core transition. A transition failure poisons the block: its
    /// root joins the deny list and the block leaves the store.
    fn advance_state(
        &self,
        pre_state: &BeaconState,
        block: &BeaconBlock,
        block_root: Hash256,
    ) -> Result<(BeaconState, Vec<EpochSummary>), BeaconChainError> {
        match state_transition(pre_state, block, &self.chain_config.transition, &self.spec) {
            Ok(result) => Ok(result),
            Err(e) => {
                self.db.mark_evil_block_hash(block_root)?;
                self.db.delete_block(block)?;
                Err(BeaconChainError::BlockFailedProcessing(e))
            }
        }
    }

    /// Registry index maintenance, FFG singleton refresh and telemetry at
    /// epoch starts; cache teardown when finalization advances.
    fn epoch_boundary_housekeeping(
        &self,
        ctx: &Context,
        pre_state: &BeaconState,
        post_state: &BeaconState,
        summaries: &[EpochSummary],
    ) -> Result<(), BeaconChainError> {
        if post_state.slot.is_epoch_start(self.spec.slots_per_epoch) {
            for summary in summaries {
                self.save_validator_indices(post_state, summary)?;
                self.participation_by_epoch.write().insert(
                    summary.epoch,
                    (summary.target_attesting_gwei, summary.eligible_gwei),
                );
            }
            self.update_ffg_checkpoints(ctx, post_state)?;
            metrics::inc_counter(&metrics::EPOCH_TRANSITIONS);
            self.log_epoch_data(post_state);
        }

        if post_state.finalized_checkpoint.epoch > pre_state.finalized_checkpoint.epoch {
            // Shuffling memoization must not survive a finality boundary.
            self.caches.clear_all();
            self.db.clear_block_cache();
            *self.finalized_epoch.write() = post_state.finalized_checkpoint.epoch;
            metrics::inc_counter(&metrics::FINALITY_ADVANCES);
            info!(
                self.log, "Finalized checkpoint advanced";
                "epoch" => %post_state.finalized_checkpoint.epoch,
            );
        }
        Ok(())
    }

    /// Maintain the pubkey-to-index namespace from the epoch's registry
    /// movement.
    fn save_validator_indices(
        &self,
        state: &BeaconState,
        summary: &EpochSummary,
    ) -> Result<(), BeaconChainError> {
        for &index in &summary.activated {
            if let Some(validator) = state.validators.get(index as usize) {
                self.db.save_validator_index(&validator.pubkey, index)?;
            }
        }
        for &index in &summary.exited {
            if let Some(validator) = state.validators.get(index as usize) {
                self.db.delete_validator_index(&validator.pubkey)?;
            }
        }
        Ok(())
    }

    /// Refresh the justified/finalized block and state singletons from the
    /// state's checkpoints.
    fn update_ffg_checkpoints(
        &self,
        ctx: &Context,
        state: &BeaconState,
    ) -> Result<(), BeaconChainError> {
        let justified = state.current_justified_checkpoint;
        if justified.root != Hash256::zero() {
            if let Some(block) = self.db.block(justified.root)? {
                self.db.save_justified_block(&block)?;
                if let Some(justified_state) = self.db.historical_state(justified.root)? {
                    self.db.save_justified_state(&justified_state)?;
                }
            }
        }

        let finalized = state.finalized_checkpoint;
        if finalized.root != Hash256::zero() {
            if let Some(block) = self.db.block(finalized.root)? {
                self.db.save_finalized_block(&block)?;
                if let Some(finalized_state) = self.db.historical_state(finalized.root)? {
                    self.db.save_finalized_state(&finalized_state)?;
                }
            }
        }
        Ok(())
    }

    /// Forward the processed block to the operation pool, update latest
    /// messages from its attestations, drop its deposits from the pending
    /// queue.
    fn cleanup_block_operations(
        &self,
        ctx: &Context,
        block: &BeaconBlock,
    ) -> Result<(), BeaconChainError> {
        if self
            .op_pool
            .incoming_processed_block_feed()
            .send(block.clone())
            == 0
        {
            error!(self.log, "Sent processed block to no subscribers");
        }

        self.target_handler
            .batch_update_latest_attestation(ctx, &block.body.attestations)?;

        for deposit in block.body.deposits.iter() {
            self.db.remove_pending_deposit(ctx, deposit)?;
        }
        Ok(())
    }

    fn log_epoch_data(&self, state: &BeaconState) {
        info!(
            self.log, "Epoch transition successfully processed";
            "slot" => %state.slot,
            "current_epoch_attestations" => state.current_epoch_attestations.len(),
            "previous_epoch_attestations" => state.previous_epoch_attestations.len(),
            "previous_justified_epoch" => %state.previous_justified_checkpoint.epoch,
            "justified_epoch" => %state.current_justified_checkpoint.epoch,
            "finalized_epoch" => %state.finalized_checkpoint.epoch,
            "eth1_deposit_index" => state.eth1_deposit_index,
            "validator_count" => state.validators.len(),
        );
    }

    /*
     * Service-level canonical view
     */

    /// The signing root of the current chain head.
    pub fn chain_head_root(&self) -> Result<Hash256, BeaconChainError> {
        Ok(self.db.chain_head()?.canonical_root())
    }

    /// Record a new canonical head root and publish the block.
    pub fn update_canonical_roots(&self, block: &BeaconBlock, root: Hash256) {
        self.canonical_blocks.write().insert(block.slot, root);
        self.canonical_block_feed.send(block.clone());
    }

    /// `true` if `root` is the canonical block for `slot`.
    pub fn is_canonical(&self, slot: Slot, root: Hash256) -> bool {
        self.canonical_blocks.read().get(&slot) == Some(&root)
    }
}

pub(crate) fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
