use lazy_static::lazy_static;
use prometheus::{Histogram, IntCounter};
use store::metrics::{try_create_histogram, try_create_int_counter};

lazy_static! {
    pub static ref BLOCK_PROCESSING_SUCCESSES: prometheus::Result<IntCounter> =
        try_create_int_counter(
            "beacon_block_processing_successes_total",
            "Count of blocks accepted by the pipeline"
        );
    pub static ref BLOCK_PROCESSING_FAILURES: prometheus::Result<IntCounter> =
        try_create_int_counter(
            "beacon_block_processing_failures_total",
            "Count of blocks rejected by the pipeline"
        );
    pub static ref BLOCK_PROCESSING_TIMES: prometheus::Result<Histogram> = try_create_histogram(
        "beacon_block_processing_seconds",
        "Full receive_block pipeline latency"
    );
    pub static ref EPOCH_TRANSITIONS: prometheus::Result<IntCounter> = try_create_int_counter(
        "beacon_epoch_transitions_total",
        "Count of epoch boundaries processed"
    );
    pub static ref FINALITY_ADVANCES: prometheus::Result<IntCounter> = try_create_int_counter(
        "beacon_finality_advances_total",
        "Count of finalized-checkpoint advances observed by the pipeline"
    );
}

pub use store::metrics::{inc_counter, start_timer, stop_timer};
