//! One-way notification boundary toward the UI/charting collaborator.
//!
//! The core publishes tree entries, P/L series points, and timestamped audit
//! labels; it never reads anything back or makes UI decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Identifier for a chart-tree node handed out by the sink.
pub type TreeId = u64;

/// P/L series the registry appends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlSeries {
    Current,
    Unrealized,
    Realized,
    Commission,
}

pub trait ChartSink: Send + Sync {
    fn chart_root(&self, name: &str) -> TreeId;
    fn chart_add(&self, parent: TreeId, name: &str) -> TreeId;
    fn chart_del(&self, id: TreeId);
    fn append_pl(&self, tree: TreeId, series: PlSeries, at: DateTime<Utc>, value: Decimal);
    /// Textual audit label at an order submit/fill point.
    fn add_label(&self, tree: TreeId, at: DateTime<Utc>, price: Decimal, text: &str);
    /// Persist collected series under the given path prefix.
    fn save(&self, path: &str);
}

/// A recorded audit label.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub tree: TreeId,
    pub at: DateTime<Utc>,
    pub price: Decimal,
    pub text: String,
}

#[derive(Debug, Default)]
struct ChartBufferInner {
    nodes: Vec<(TreeId, Option<TreeId>, String)>,
    points: Vec<(TreeId, PlSeries, DateTime<Utc>, Decimal)>,
    labels: Vec<Label>,
    saves: Vec<String>,
}

/// Buffering sink for headless runs and tests: records everything, renders
/// nothing.
#[derive(Debug, Default)]
pub struct ChartBuffer {
    next_id: AtomicU64,
    inner: Mutex<ChartBufferInner>,
}

impl ChartBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChartBufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn labels(&self) -> Vec<Label> {
        self.lock().labels.clone()
    }

    pub fn labels_containing(&self, fragment: &str) -> Vec<Label> {
        self.lock()
            .labels
            .iter()
            .filter(|l| l.text.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.lock().nodes.iter().map(|(_, _, n)| n.clone()).collect()
    }

    pub fn saves(&self) -> Vec<String> {
        self.lock().saves.clone()
    }
}

impl ChartSink for ChartBuffer {
    fn chart_root(&self, name: &str) -> TreeId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().nodes.push((id, None, name.to_string()));
        id
    }

    fn chart_add(&self, parent: TreeId, name: &str) -> TreeId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().nodes.push((id, Some(parent), name.to_string()));
        id
    }

    fn chart_del(&self, id: TreeId) {
        self.lock().nodes.retain(|(node, _, _)| *node != id);
    }

    fn append_pl(&self, tree: TreeId, series: PlSeries, at: DateTime<Utc>, value: Decimal) {
        self.lock().points.push((tree, series, at, value));
    }

    fn add_label(&self, tree: TreeId, at: DateTime<Utc>, price: Decimal, text: &str) {
        self.lock().labels.push(Label {
            tree,
            at,
            price,
            text: text.to_string(),
        });
    }

    fn save(&self, path: &str) {
        self.lock().saves.push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buffer_records_tree_and_labels() {
        let sink = ChartBuffer::new();
        let root = sink.chart_root("Master P/L");
        let child = sink.chart_add(root, "Strategies");
        sink.add_label(child, Utc::now(), dec!(100), "LeS-1");

        assert_eq!(sink.node_names(), vec!["Master P/L", "Strategies"]);
        assert_eq!(sink.labels_containing("LeS").len(), 1);

        sink.chart_del(child);
        assert_eq!(sink.node_names(), vec!["Master P/L"]);
    }
}
