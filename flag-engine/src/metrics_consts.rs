// Evaluation
pub const FLAG_EVALUATIONS_COUNTER: &str = "flag_engine_evaluations_total";
pub const FLAG_EVALUATION_ERRORS_COUNTER: &str = "flag_engine_evaluation_errors_total";
pub const FLAG_EVALUATION_TIME: &str = "flag_engine_evaluation_time";

// Cache reads, tagged with the source
pub const FLAG_CACHE_READS_COUNTER: &str = "flag_engine_cache_reads_total";
pub const FLAG_CACHE_FAR_ERRORS_COUNTER: &str = "flag_engine_cache_far_errors_total";
pub const FLAG_INVALIDATION_PUBLISH_ERRORS_COUNTER: &str =
    "flag_engine_invalidation_publish_errors_total";

// Admin writes, tagged with the audit action
pub const FLAG_MUTATIONS_COUNTER: &str = "flag_engine_mutations_total";

// Cache stats gauges, refreshed by the sweeper
pub const CACHE_REQUESTS: &str = "flag_engine_cache_requests";
pub const CACHE_NEAR_HITS: &str = "flag_engine_cache_near_hits";
pub const CACHE_NEAR_MISSES: &str = "flag_engine_cache_near_misses";
pub const CACHE_FAR_HITS: &str = "flag_engine_cache_far_hits";
pub const CACHE_FAR_MISSES: &str = "flag_engine_cache_far_misses";
pub const CACHE_FAR_ERRORS: &str = "flag_engine_cache_far_errors";
pub const CACHE_REPOSITORY_LOADS: &str = "flag_engine_cache_repository_loads";
pub const CACHE_REPOSITORY_ERRORS: &str = "flag_engine_cache_repository_errors";
pub const CACHE_INVALIDATIONS_PUBLISHED: &str = "flag_engine_cache_invalidations_published";
pub const CACHE_INVALIDATIONS_RECEIVED: &str = "flag_engine_cache_invalidations_received";
pub const CACHE_HIT_RATE: &str = "flag_engine_cache_hit_rate";
pub const CACHE_NEAR_ENTRIES: &str = "flag_engine_cache_near_entries";
