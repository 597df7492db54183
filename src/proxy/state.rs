//! Shared proxy state: the reqwest client, the correlator pipeline, and the
//! counter that mints flow ids for the flow table.

use crate::correlator::Pipeline;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub pipeline: Arc<Pipeline>,
    flow_ids: Arc<AtomicU64>,
}

impl ProxyState {
    pub fn new(client: reqwest::Client, pipeline: Arc<Pipeline>) -> Self {
        Self {
            client,
            pipeline,
            flow_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_flow_id(&self) -> u64 {
        self.flow_ids.fetch_add(1, Ordering::Relaxed)
    }
}
