use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
pub struct Metrics {
    pub reconcile_count: AtomicU64,
    pub reconcile_errors: AtomicU64,
    pub conflicts: AtomicU64,
    pub remote_mutations: AtomicU64,
    pub open_tunnels: AtomicU64,
}

impl Metrics {
    pub fn record_reconcile(&self) {
        self.reconcile_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_mutations(&self, count: u64) {
        self.remote_mutations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn incr_open_tunnels(&self) {
        self.open_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_open_tunnels(&self) {
        self.open_tunnels.fetch_sub(1, Ordering::Relaxed);
    }
}

fn env_filter() -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("ctf_ui_operator=info".parse()?)
        .add_directive("kube=info".parse()?))
}

#[cfg(not(debug_assertions))]
pub fn init() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter()?)
        .json()
        .init();
    Ok(())
}

#[cfg(debug_assertions)]
pub fn init() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .pretty()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(env_filter()?)
        .init();
    Ok(())
}
