/// Worker count used when a job does not set one: one thread per available
/// core, never less than 1.
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
