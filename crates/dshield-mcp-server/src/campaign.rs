//! In-process campaign state.
//!
//! `analyze_campaign` produces a record; the expansion, timeline, and report
//! tools look it up by id. Records live for the process lifetime only; there
//! is deliberately no persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One analyzed campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    /// Deterministic id derived from the sorted seed indicators.
    pub campaign_id: String,
    /// The indicators the analysis started from.
    pub seed_iocs: Vec<String>,
    /// Correlation window in minutes.
    pub correlation_window_minutes: u32,
    /// Explicit time range, when the caller supplied one.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Events matched during analysis.
    pub event_count: u64,
    /// Earliest matched event.
    pub first_seen: Option<String>,
    /// Latest matched event.
    pub last_seen: Option<String>,
    /// Most active source addresses with their event counts.
    pub top_sources: Vec<(String, u64)>,
    /// When the analysis ran.
    pub analyzed_at: DateTime<Utc>,
}

/// Deterministic campaign id: the same indicator set always maps to the
/// same id, so re-analysis is idempotent.
pub fn campaign_id_for(seed_iocs: &[String]) -> String {
    let mut sorted: Vec<&String> = seed_iocs.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for ioc in sorted {
        hasher.update(ioc.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("campaign-{hex}")
}

/// Process-lifetime campaign map.
#[derive(Debug, Default)]
pub struct CampaignStore {
    campaigns: DashMap<String, Arc<CampaignRecord>>,
}

impl CampaignStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: CampaignRecord) -> Arc<CampaignRecord> {
        let record = Arc::new(record);
        self.campaigns
            .insert(record.campaign_id.clone(), Arc::clone(&record));
        record
    }

    /// Look up a record by id.
    pub fn get(&self, campaign_id: &str) -> Option<Arc<CampaignRecord>> {
        self.campaigns.get(campaign_id).map(|r| Arc::clone(&r))
    }

    /// Number of known campaigns.
    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}
