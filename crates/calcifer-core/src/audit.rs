// ── Audit sink ──
//
// Append-only decision log behind a trait seam. Writes are best-effort:
// the caller logs a failed write and moves on; auditability never costs
// availability.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::CoreError;
use crate::metrics::KernelMetrics;
use crate::model::{AuditEntry, CorrelationId, DecisionType, DeviceId, FunctionalSystemId};

/// Append-only audit seam.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), CoreError>;
}

/// Filter for querying recorded entries. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub correlation_id: Option<CorrelationId>,
    pub device_id: Option<DeviceId>,
    pub system_id: Option<FunctionalSystemId>,
    pub decision: Option<DecisionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditQuery {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.correlation_id
            .is_none_or(|c| entry.correlation_id == c)
            && self
                .device_id
                .as_ref()
                .is_none_or(|d| entry.device_id.as_ref() == Some(d))
            && self
                .system_id
                .as_ref()
                .is_none_or(|s| entry.system_id.as_ref() == Some(s))
            && self.decision.is_none_or(|t| entry.decision == t)
            && self.from.is_none_or(|from| entry.timestamp >= from)
            && self.to.is_none_or(|to| entry.timestamp <= to)
    }
}

/// In-memory append-only sink with query support.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries matching the filter, in append order.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| query.matches(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), CoreError> {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.push(entry);
                Ok(())
            }
            Err(poisoned) => {
                poisoned.into_inner().push(entry);
                Ok(())
            }
        }
    }
}

/// Best-effort append: failure is a warn log and a metric, never an error
/// for the caller.
pub async fn record(sink: &dyn AuditSink, metrics: &Arc<KernelMetrics>, entry: AuditEntry) {
    let decision = entry.decision;
    if let Err(err) = sink.append(entry).await {
        metrics.audit_failures.incr();
        warn!(%decision, error = %err, "audit write failed, continuing");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::DeviceValue;

    fn device_id() -> DeviceId {
        DeviceId::parse("c1:fan").unwrap()
    }

    #[tokio::test]
    async fn append_and_query_by_device() {
        let sink = MemoryAuditSink::new();
        let correlation = CorrelationId::new();
        sink.append(
            AuditEntry::new(correlation, DecisionType::DesiredCalculated, "system", "intent")
                .with_device(device_id())
                .with_values(None, Some(DeviceValue::fan(2))),
        )
        .await
        .unwrap();
        sink.append(AuditEntry::new(
            CorrelationId::new(),
            DecisionType::OverrideApplied,
            "op",
            "manual",
        ))
        .await
        .unwrap();

        let by_device = sink.query(&AuditQuery {
            device_id: Some(device_id()),
            ..AuditQuery::default()
        });
        assert_eq!(by_device.len(), 1);
        assert_eq!(by_device[0].decision, DecisionType::DesiredCalculated);

        let by_correlation = sink.query(&AuditQuery {
            correlation_id: Some(correlation),
            ..AuditQuery::default()
        });
        assert_eq!(by_correlation.len(), 1);
    }

    #[tokio::test]
    async fn record_swallows_sink_failures() {
        struct FailingSink;

        #[async_trait]
        impl AuditSink for FailingSink {
            async fn append(&self, _entry: AuditEntry) -> Result<(), CoreError> {
                Err(CoreError::Storage {
                    reason: "audit collection down".into(),
                })
            }
        }

        let metrics = Arc::new(KernelMetrics::new());
        record(
            &FailingSink,
            &metrics,
            AuditEntry::new(
                CorrelationId::new(),
                DecisionType::DesiredCalculated,
                "system",
                "x",
            ),
        )
        .await;
        assert_eq!(metrics.audit_failures.get(), 1);
    }
}
