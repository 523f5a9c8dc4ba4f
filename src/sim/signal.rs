//! Signal identity, iteration accounting, and the readiness oracle.
//!
//! Values cross region boundaries twice in this IR: launch operands
//! become launch-body arguments, and for-loop init operands become
//! iteration arguments. [`SignalState`] canonicalizes both so the
//! scheduler reasons over a single identity space, tracks how many
//! times each signal has been produced and each op has consumed, and
//! answers the one question the event loop keeps asking: *is this
//! operand ready for this op's current iteration?*
//!
//! The readiness arithmetic is deliberately exact integer math. With
//! `k` the op's consumption count, `Mo` the multiplier of the op's
//! block, `P(s)` the production count of the signal observed at the
//! operand and `M(s)` the multiplier of the producer's block, an
//! operand is ready iff `k < Mo * P(s) / M(s)`: one consumption per
//! production, scaled across loop nests. Iteration arguments bound to a
//! previous yield additionally get credit for the in-flight iteration
//! (`P(s) + 1`) but only once the loop's initial signal exists.

use std::collections::HashMap;

use crate::ir::{BlockId, FuncId, Graph, OpId, OpKind, Type, ValueDef, ValueId};

use super::SimError;

/// All identity and counting state for one simulation.
#[derive(Debug)]
pub struct SignalState {
    /// Canonical representative of every value.
    canon: HashMap<ValueId, ValueId>,
    /// Which upstream value currently produces the signal observed here.
    produced_by: HashMap<ValueId, ValueId>,
    /// How many times each signal has been produced.
    value_count: HashMap<ValueId, u64>,
    /// How many times each op has consumed its inputs.
    op_consumed: HashMap<OpId, u64>,
    /// How many times each yield has executed.
    yield_count: HashMap<OpId, u64>,
    /// Iteration argument -> identity of the loop's initial signal.
    iter_init: HashMap<ValueId, ValueId>,
    /// Iteration argument -> currently bound to a yield (continuing)
    /// rather than the loop entry (fresh).
    iter_continuing: HashMap<ValueId, bool>,
    /// Dynamic executions of each block relative to the top level.
    block_mult: HashMap<BlockId, u64>,
    /// Constant-folded trip count of every for op.
    trip_counts: HashMap<OpId, u64>,
    /// Entry block of the simulated function.
    top_block: BlockId,
}

impl SignalState {
    /// Walk the function's regions and build the canonical-identity,
    /// iteration-init and block-multiplier maps. Fails if a for-loop
    /// bound does not fold to a constant or yields a non-positive trip
    /// count.
    pub fn build(graph: &Graph, func: FuncId) -> Result<Self, SimError> {
        let top = graph.func_body(func);
        let mut state = Self {
            canon: HashMap::new(),
            produced_by: HashMap::new(),
            value_count: HashMap::new(),
            op_consumed: HashMap::new(),
            yield_count: HashMap::new(),
            iter_init: HashMap::new(),
            iter_continuing: HashMap::new(),
            block_mult: HashMap::new(),
            trip_counts: HashMap::new(),
            top_block: top,
        };
        state.visit_block(graph, top)?;
        Ok(state)
    }

    fn visit_block(&mut self, graph: &Graph, block: BlockId) -> Result<(), SimError> {
        let parent_op = graph.parent_op(block);
        let parent_kind = parent_op.map(|op| &graph.op(op).kind);

        // Multiplier: product of enclosing trip counts.
        let parent_mult = parent_op
            .map(|op| self.multiplier(graph.parent_block(op)))
            .unwrap_or(1);
        let own_trips = match (parent_op, parent_kind) {
            (Some(op), Some(OpKind::For)) => {
                let trips = self.fold_trip_count(graph, op)?;
                self.trip_counts.insert(op, trips);
                trips
            }
            _ => 1,
        };
        self.block_mult.insert(block, parent_mult * own_trips);

        // Identity: launch-body args alias their launch operands, loop
        // iteration args keep their own identity but remember which
        // initial signal seeds them.
        match (parent_op, parent_kind) {
            (Some(op), Some(OpKind::Launch)) => {
                let operands = graph.launch_operands(op).to_vec();
                for (arg, operand) in graph.block(block).args.iter().zip(operands) {
                    let canonical = self.canon(operand);
                    self.canon.insert(*arg, canonical);
                }
            }
            (Some(op), Some(OpKind::For)) => {
                for &arg in &graph.block(block).args {
                    self.canon.insert(arg, arg);
                }
                let operands = graph.for_iter_operands(op).to_vec();
                for (&arg, operand) in graph.for_iter_args(op).iter().zip(operands) {
                    let init = self.canon(operand);
                    self.iter_init.insert(arg, init);
                }
            }
            _ => {
                for &arg in &graph.block(block).args {
                    self.canon.insert(arg, arg);
                }
            }
        }

        for &op in &graph.block(block).ops {
            for &result in &graph.op(op).results {
                self.canon.insert(result, result);
            }
        }

        for &op in &graph.block(block).ops {
            for &region in &graph.op(op).regions {
                self.visit_block(graph, region)?;
            }
        }
        Ok(())
    }

    fn fold_trip_count(&self, graph: &Graph, for_op: OpId) -> Result<u64, SimError> {
        let (lb, ub, step) = graph
            .for_bounds(for_op)
            .ok_or(SimError::NonConstantBound)?;
        if step <= 0 {
            return Err(SimError::NonPositiveTripCount(0));
        }
        let trips = (ub - lb) / step;
        if trips <= 0 {
            return Err(SimError::NonPositiveTripCount(trips));
        }
        Ok(trips as u64)
    }

    /// Canonical representative of a value.
    pub fn canon(&self, v: ValueId) -> ValueId {
        self.canon.get(&v).copied().unwrap_or(v)
    }

    /// The value currently producing the signal observed at `v`
    /// (expects a canonical value).
    pub fn producer(&self, v: ValueId) -> ValueId {
        self.produced_by.get(&v).copied().unwrap_or(v)
    }

    /// Iteration multiplier of a block.
    pub fn multiplier(&self, block: BlockId) -> u64 {
        self.block_mult.get(&block).copied().unwrap_or(1)
    }

    /// Constant-folded trip count of a for op.
    pub fn trip_count(&self, for_op: OpId) -> u64 {
        self.trip_counts.get(&for_op).copied().unwrap_or(1)
    }

    pub fn consumed(&self, op: OpId) -> u64 {
        self.op_consumed.get(&op).copied().unwrap_or(0)
    }

    pub fn bump_consumed(&mut self, op: OpId) {
        *self.op_consumed.entry(op).or_insert(0) += 1;
    }

    /// Count one more execution of a yield; returns the new count.
    pub fn bump_yield(&mut self, yield_op: OpId) -> u64 {
        let count = self.yield_count.entry(yield_op).or_insert(0);
        *count += 1;
        *count
    }

    pub fn yields(&self, yield_op: OpId) -> u64 {
        self.yield_count.get(&yield_op).copied().unwrap_or(0)
    }

    pub fn production_count(&self, v: ValueId) -> u64 {
        self.value_count.get(&self.canon(v)).copied().unwrap_or(0)
    }

    /// Bump the production count of every signal-typed value in `values`.
    pub fn record_production<I>(&mut self, graph: &Graph, values: I)
    where
        I: IntoIterator<Item = ValueId>,
    {
        for v in values {
            if graph.value(v).ty == Type::Signal {
                let key = self.canon(v);
                let count = self.value_count.entry(key).or_insert(0);
                *count += 1;
                log::debug!("signal {:?} produced ({} total)", key, *count);
            }
        }
    }

    /// Point each signal-typed `dst` at the producer of the paired `src`.
    pub fn bind_producers(&mut self, graph: &Graph, dsts: &[ValueId], srcs: &[ValueId]) {
        for (&dst, &src) in dsts.iter().zip(srcs) {
            if graph.value(dst).ty == Type::Signal {
                let from = self.producer(self.canon(src));
                self.produced_by.insert(self.canon(dst), from);
            }
        }
    }

    /// Mark signal-typed iteration args fresh (loop entry) or
    /// continuing (bound by a yield).
    pub fn set_iter_state(&mut self, graph: &Graph, args: &[ValueId], continuing: bool) {
        for &arg in args {
            if graph.value(arg).ty == Type::Signal {
                self.iter_continuing.insert(self.canon(arg), continuing);
            }
        }
    }

    /// Is `operand` of `op` satisfied for the op's current iteration?
    ///
    /// Pure; callers that act on readiness bump the counters themselves.
    pub fn is_ready(&self, graph: &Graph, op: OpId, operand: ValueId) -> bool {
        let in_c = self.canon(operand);
        let signal = self.producer(in_c);
        let mo = self.multiplier(graph.parent_block(op));
        let m_sig = graph
            .defining_op(signal)
            .map(|d| self.multiplier(graph.parent_block(d)))
            .unwrap_or(1);
        let k = self.consumed(op);

        let p_sig = match self.value_count.get(&signal) {
            Some(&p) => p,
            None => {
                // Never produced. Top-level inputs arrive from outside
                // and are always present; an iteration arg bound past
                // the entry only needs its initial signal to exist.
                if self.is_top_level_arg(graph, signal) {
                    return true;
                }
                return match self.iter_init.get(&in_c) {
                    Some(&init) if init != signal => self.value_count.contains_key(&init),
                    _ => false,
                };
            }
        };

        if let Some(&init) = self.iter_init.get(&in_c) {
            if init != signal {
                // Bound by a previous yield: credit the in-flight
                // iteration, but never run ahead of the loop entry.
                let m_init = graph
                    .defining_op(init)
                    .map(|d| self.multiplier(graph.parent_block(d)))
                    .unwrap_or(1);
                let p_init = self.value_count.get(&init).copied().unwrap_or(0);
                if k >= mo * p_init / m_init {
                    return false;
                }
                if k >= mo * (p_sig + 1) / m_sig {
                    return false;
                }
                return true;
            }
        }

        k < mo * p_sig / m_sig
    }

    /// All signal operands of `op` ready.
    pub fn signals_ready(&self, graph: &Graph, op: OpId) -> bool {
        graph
            .op(op)
            .operands
            .iter()
            .filter(|&&v| graph.value(v).ty == Type::Signal)
            .all(|&v| self.is_ready(graph, op, v))
    }

    fn is_top_level_arg(&self, graph: &Graph, v: ValueId) -> bool {
        matches!(
            graph.value(v).def,
            ValueDef::BlockArg { block, .. } if block == self.top_block
        )
    }

    /// One-line iteration-state render for deadlock diagnostics.
    pub fn describe_iter_state(&self) -> String {
        let continuing = self.iter_continuing.values().filter(|&&c| c).count();
        let fresh = self.iter_continuing.len() - continuing;
        format!("loop iters: {} continuing, {} fresh", continuing, fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphBuilder};

    /// `%go = control(); for i in 0..3 { %done = memcopy(.., %it); yield %done }`
    fn loop_graph() -> (Graph, LoopIds) {
        let mut b = GraphBuilder::new();
        let (f, body) = b.func("graph", &[]);
        let go = b.control(body, &[], 1)[0];
        let dram = b.create_mem(body, "DRAM", &[4], DataType::F32);
        let sram = b.create_mem(body, "SRAM", &[4], DataType::F32);
        let src = b.alloc(body, dram, &[4], DataType::F32);
        let dst = b.alloc(body, sram, &[4], DataType::F32);
        let dma = b.create_dma(body);
        let lb = b.const_index(body, 0);
        let ub = b.const_index(body, 3);
        let step = b.const_index(body, 1);
        let parts = b.for_loop(body, lb, ub, step, &[go]);
        let it = parts.iter_args[0];
        let done = b.mem_copy(parts.body, src, dst, dma, &[it]);
        b.loop_yield(parts.body, &[done]);
        b.func_return(body);
        let g = b.finish();
        let copy_op = g.defining_op(done).unwrap();
        (
            g,
            LoopIds {
                func: f,
                go,
                it,
                done,
                copy_op,
            },
        )
    }

    struct LoopIds {
        func: FuncId,
        go: ValueId,
        it: ValueId,
        done: ValueId,
        copy_op: OpId,
    }

    #[test]
    fn test_block_multipliers_nested() {
        let mut b = GraphBuilder::new();
        let (f, body) = b.func("graph", &[]);
        let lb = b.const_index(body, 0);
        let ub2 = b.const_index(body, 2);
        let ub3 = b.const_index(body, 3);
        let step = b.const_index(body, 1);
        let outer = b.for_loop(body, lb, ub2, step, &[]);
        let inner = b.for_loop(outer.body, lb, ub3, step, &[]);
        b.loop_yield(inner.body, &[]);
        b.loop_yield(outer.body, &[]);
        b.func_return(body);
        let g = b.finish();

        let s = SignalState::build(&g, f).unwrap();
        assert_eq!(s.multiplier(body), 1);
        assert_eq!(s.multiplier(outer.body), 2);
        assert_eq!(s.multiplier(inner.body), 6);
        assert_eq!(s.trip_count(outer.op), 2);
        assert_eq!(s.trip_count(inner.op), 3);
    }

    #[test]
    fn test_non_constant_bound_fails() {
        let mut b = GraphBuilder::new();
        let (f, body) = b.func("graph", &[]);
        let lb = b.const_index(body, 0);
        let ub = b.compute(body, "dyn_bound", &[], Type::Index);
        let step = b.const_index(body, 1);
        let parts = b.for_loop(body, lb, ub, step, &[]);
        b.loop_yield(parts.body, &[]);
        b.func_return(body);
        let g = b.finish();

        assert!(matches!(
            SignalState::build(&g, f),
            Err(SimError::NonConstantBound)
        ));
    }

    #[test]
    fn test_zero_trip_count_fails() {
        let mut b = GraphBuilder::new();
        let (f, body) = b.func("graph", &[]);
        let lb = b.const_index(body, 0);
        let ub = b.const_index(body, 0);
        let step = b.const_index(body, 1);
        let parts = b.for_loop(body, lb, ub, step, &[]);
        b.loop_yield(parts.body, &[]);
        b.func_return(body);
        let g = b.finish();

        assert!(matches!(
            SignalState::build(&g, f),
            Err(SimError::NonPositiveTripCount(0))
        ));
    }

    #[test]
    fn test_launch_args_alias_operands() {
        let mut b = GraphBuilder::new();
        let (f, body) = b.func("graph", &[]);
        let go = b.control(body, &[], 1)[0];
        let proc = b.create_proc(body, "generic");
        let parts = b.launch(body, go, proc, &[go], 0);
        b.ret(parts.body, &[]);
        b.func_return(body);
        let g = b.finish();

        let s = SignalState::build(&g, f).unwrap();
        assert_eq!(s.canon(parts.block_args[0]), go);
    }

    #[test]
    fn test_iter_init_recorded() {
        let (g, ids) = loop_graph();
        let s = SignalState::build(&g, ids.func).unwrap();
        // The iter arg keeps its own identity but remembers its seed.
        assert_eq!(s.canon(ids.it), ids.it);
        assert_eq!(s.iter_init.get(&ids.it), Some(&ids.go));
    }

    /// Pins the iteration arithmetic: one in-flight iteration of
    /// credit, then exactly one admission per production, capped by the
    /// loop entry count.
    #[test]
    fn test_oracle_admits_one_consumption_per_production() {
        let (g, ids) = loop_graph();
        let mut s = SignalState::build(&g, ids.func).unwrap();

        // Nothing produced yet: the iter arg still waits on its seed.
        assert!(!s.is_ready(&g, ids.copy_op, ids.it));

        // Host retires the control op and enters the loop.
        s.record_production(&g, [ids.go]);
        s.bind_producers(&g, &[ids.it], &[ids.go]);
        s.set_iter_state(&g, &[ids.it], false);
        assert!(s.is_ready(&g, ids.copy_op, ids.it));

        // Copy #1 starts; the walker yields, rebinding the iter arg to
        // the still-unproduced copy result. The in-flight iteration
        // itself is credited, since the seed exists.
        s.bump_consumed(ids.copy_op);
        s.bind_producers(&g, &[ids.it], &[ids.done]);
        s.set_iter_state(&g, &[ids.it], true);
        assert!(s.is_ready(&g, ids.copy_op, ids.it));

        // Copy #1 retires and #2 starts; now the credit is spent and
        // iteration #3 must wait for #2's production.
        s.record_production(&g, [ids.done]);
        assert!(s.is_ready(&g, ids.copy_op, ids.it));
        s.bump_consumed(ids.copy_op);
        assert!(!s.is_ready(&g, ids.copy_op, ids.it));

        // Copy #2 retires: the third and final iteration unlocks.
        s.record_production(&g, [ids.done]);
        assert!(s.is_ready(&g, ids.copy_op, ids.it));

        // Copy #3 consumed: the loop is exhausted, no fourth admission
        // even after the last production lands.
        s.bump_consumed(ids.copy_op);
        s.record_production(&g, [ids.done]);
        assert!(!s.is_ready(&g, ids.copy_op, ids.it));
    }

    #[test]
    fn test_top_level_arg_always_ready() {
        let mut b = GraphBuilder::new();
        let (f, body) = b.func("graph", &[Type::Signal]);
        b.compute(body, "consume", &[], Type::Tensor);
        b.func_return(body);
        let g = b.finish();
        let top = g.func_body(f);
        let arg = g.block(top).args[0];
        let op = g.block(top).ops[0];

        let s = SignalState::build(&g, f).unwrap();
        assert!(s.is_ready(&g, op, arg));
    }
}
