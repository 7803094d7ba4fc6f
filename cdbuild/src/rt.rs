use anyhow::Context;

/// Drive `f` to completion on a fresh multi-threaded runtime.
pub fn block_on<F>(f: F) -> anyhow::Result<F::Output>
where
    F: Future,
{
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "Failed to build Tokio runtime")?;
    Ok(rt.block_on(f))
}
