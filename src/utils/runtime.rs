use anyhow::Result;

/// The host is a single cooperative event loop, so it never needs worker threads.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
