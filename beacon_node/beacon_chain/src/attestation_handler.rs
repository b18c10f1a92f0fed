//! Batch maintenance of the per-validator latest-message table from the
//! attestations carried in processed blocks.

use crate::errors::BeaconChainError;
use slog::{debug, Logger};
use state_processing::common::get_indexed_attestation;
use std::sync::Arc;
use store::{ChainDB, Context, ItemStore};
use types::{Attestation, ChainSpec, LatestMessage};

/// Consumer of block attestations on the admission path.
pub trait AttestationTargetHandler: Send + Sync + 'static {
    fn batch_update_latest_attestation(
        &self,
        ctx: &Context,
        attestations: &[Attestation],
    ) -> Result<(), BeaconChainError>;
}

/// Updates latest messages against the head state's committee layout.
pub struct AttestationTargetService<E: ItemStore> {
    db: Arc<ChainDB<E>>,
    spec: ChainSpec,
    log: Logger,
}

impl<E: ItemStore> AttestationTargetService<E> {
    pub fn new(db: Arc<ChainDB<E>>, spec: ChainSpec, log: Logger) -> Self {
        Self { db, spec, log }
    }
}

impl<E: ItemStore> AttestationTargetHandler for AttestationTargetService<E> {
    fn batch_update_latest_attestation(
        &self,
        ctx: &Context,
        attestations: &[Attestation],
    ) -> Result<(), BeaconChainError> {
        let state = match self.db.head_state(ctx)? {
            Some(state) => state,
            None => return Err(BeaconChainError::NotInitialized),
        };

        for attestation in attestations {
            // An attestation whose committee cannot be resolved against the
            // head state is skipped, not fatal; the block carrying it has
            // already passed full validation.
            let indexed = match get_indexed_attestation(&state, attestation, &self.spec) {
                Ok(indexed) => indexed,
                Err(e) => {
                    debug!(
                        self.log, "Skipping latest-message update";
                        "reason" => ?e,
                        "slot" => %attestation.data.slot,
                    );
                    continue;
                }
            };

            let message = LatestMessage {
                epoch: attestation.data.target.epoch,
                root: attestation.data.beacon_block_root,
            };
            for index in indexed.attesting_indices() {
                self.db.save_latest_message(ctx, index, &message)?;
            }
        }
        Ok(())
    }
}
