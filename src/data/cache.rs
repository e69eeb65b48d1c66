/// Store for completed prompt/response pairs, keyed by a content hash.
///
/// Lookups and stores are both best-effort: a miss or a storage failure
/// must never interrupt the pipeline, so `put` has fire-and-forget
/// semantics (implementations log failures instead of returning them).
pub trait ResponseCache {
    /// Returns the cached response for `key`, if one exists and is readable.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous entry.
    fn put(&self, key: &str, value: &str);
}
