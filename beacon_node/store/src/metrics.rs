use lazy_static::lazy_static;
pub use prometheus::{Histogram, HistogramOpts, HistogramTimer, IntCounter, Opts};

lazy_static! {
    pub static ref DISK_DB_WRITE_COUNT: prometheus::Result<IntCounter> =
        try_create_int_counter("store_disk_db_write_count", "Total number of DB writes");
    pub static ref DISK_DB_READ_COUNT: prometheus::Result<IntCounter> =
        try_create_int_counter("store_disk_db_read_count", "Total number of DB reads");
    pub static ref DISK_DB_DELETE_COUNT: prometheus::Result<IntCounter> =
        try_create_int_counter("store_disk_db_delete_count", "Total number of DB deletes");
    pub static ref BLOCK_CACHE_HIT_COUNT: prometheus::Result<IntCounter> = try_create_int_counter(
        "store_block_cache_hit_count",
        "Block reads served from the in-memory cache"
    );
    pub static ref STATE_REPLAY_TIMES: prometheus::Result<Histogram> = try_create_histogram(
        "store_state_replay_seconds",
        "Time to rebuild a historical state by replay"
    );
}

pub fn try_create_int_counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

pub fn try_create_histogram(name: &str, help: &str) -> prometheus::Result<Histogram> {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help))?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

pub fn inc_counter(counter: &prometheus::Result<IntCounter>) {
    if let Ok(counter) = counter {
        counter.inc();
    }
}

pub fn start_timer(histogram: &prometheus::Result<Histogram>) -> Option<HistogramTimer> {
    histogram.as_ref().ok().map(|h| h.start_timer())
}

pub fn stop_timer(timer: Option<HistogramTimer>) {
    if let Some(timer) = timer {
        timer.observe_duration();
    }
}
