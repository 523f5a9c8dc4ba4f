//! Launcher tables: per-dispatch-target execution state.
//!
//! A launcher models one in-order dispatch target: the host walking the
//! top-level function, a processor executing launch bodies, or a DMA
//! executing copies. Each holds a cursor into the block it is currently
//! unrolling, a FIFO of async ops other launchers handed it, and at
//! most one in-flight op.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::ir::{BlockId, Graph, OpId};

/// A launcher's record of its current in-flight op.
#[derive(Debug, Clone)]
pub struct OpEntry {
    pub op: OpId,
    /// Per-instance id; disambiguates re-executions in the trace.
    pub tid: u64,
    /// Set on the first schedule attempt; a later actual start means
    /// the launcher stalled on a signal.
    pub queue_ready_time: Option<u64>,
    /// Set once the op actually starts.
    pub start_time: Option<u64>,
    pub end_time: u64,
    /// Uids of the memories this op reserved, for memory trace rows.
    pub mem_tids: SmallVec<[u64; 2]>,
}

impl OpEntry {
    pub fn new(op: OpId, tid: u64) -> Self {
        Self {
            op,
            tid,
            queue_ready_time: None,
            start_time: None,
            end_time: 0,
            mem_tids: SmallVec::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn is_done(&self, time: u64) -> bool {
        self.is_started() && time >= self.end_time
    }
}

/// One dispatch target's execution state.
#[derive(Debug, Default)]
pub struct Launcher {
    /// Block being unrolled; `None` until the first launch arrives
    /// (the host starts with the top-level function body).
    pub block: Option<BlockId>,
    /// Index of the next op to introduce from `block`.
    pub cursor: usize,
    /// Async ops awaiting this launcher's attention, in arrival order.
    pub event_queue: VecDeque<OpId>,
    /// The single in-flight op, if any.
    pub current: Option<OpEntry>,
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(block: BlockId) -> Self {
        Self {
            block: Some(block),
            ..Self::default()
        }
    }

    /// No op in flight.
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Start walking `block` from its first op.
    pub fn enter_block(&mut self, block: BlockId) {
        self.block = Some(block);
        self.cursor = 0;
    }

    /// Offer an async op to this launcher's event queue. Queues are
    /// unbounded, so the offer is always accepted.
    pub fn accept(&mut self, op: OpId) -> bool {
        self.event_queue.push_back(op);
        true
    }

    /// Cursor has no more ops to introduce.
    pub fn at_end(&self, graph: &Graph) -> bool {
        match self.block {
            Some(b) => self.cursor >= graph.block(b).ops.len(),
            None => true,
        }
    }

    /// Nothing in flight, nothing queued, nothing left to walk.
    pub fn drained(&self, graph: &Graph) -> bool {
        self.is_idle() && self.event_queue.is_empty() && self.at_end(graph)
    }

    /// One-line state render for deadlock diagnostics.
    pub fn describe(&self, graph: &Graph) -> String {
        let current = match &self.current {
            Some(entry) => {
                let name = graph.op(entry.op).kind.name().to_string();
                if entry.is_started() {
                    format!("{} (running until {})", name, entry.end_time)
                } else {
                    format!("{} (blocked)", name)
                }
            }
            None => "-".to_string(),
        };
        let queued: Vec<&str> = self
            .event_queue
            .iter()
            .map(|&op| graph.op(op).kind.name())
            .collect();
        format!(
            "current={} queue=[{}] cursor={}",
            current,
            queued.join(", "),
            if self.at_end(graph) {
                "end".to_string()
            } else {
                self.cursor.to_string()
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphBuilder;

    #[test]
    fn test_entry_lifecycle() {
        let mut entry = OpEntry::new(OpId(0), 3);
        assert!(!entry.is_started());
        assert!(!entry.is_done(100));

        entry.start_time = Some(5);
        entry.end_time = 9;
        assert!(entry.is_started());
        assert!(!entry.is_done(8));
        assert!(entry.is_done(9));
    }

    #[test]
    fn test_drained_without_block() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        b.func_return(body);
        let g = b.finish();

        // A device launcher before any launch arrives.
        let mut l = Launcher::new();
        assert!(l.drained(&g));

        l.accept(OpId(0));
        assert!(!l.drained(&g));
    }

    #[test]
    fn test_cursor_end() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        b.const_index(body, 1);
        b.func_return(body);
        let g = b.finish();

        let mut l = Launcher::with_block(body);
        assert!(!l.at_end(&g));
        l.cursor = 2;
        assert!(l.at_end(&g));
    }
}
