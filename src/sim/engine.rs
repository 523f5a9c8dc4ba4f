//! The four-phase event loop.
//!
//! One [`Simulator`] owns all mutable state for a run: the launcher
//! tables, the device registry, the signal/iteration maps and the
//! virtual clock. Each tick:
//!
//! 1. every launcher advances its cursor, handing async ops to their
//!    dispatch target's event queue and taking the next sync op as its
//!    in-flight entry;
//! 2. every launcher drains its event queue head while the readiness
//!    oracle allows;
//! 3. if every launcher is fully drained, the run is complete;
//! 4. launchers with an unstarted entry try to start it, reserving
//!    device time and emitting begin events;
//! 5. the clock jumps to the earliest pending completion;
//! 6. every entry whose end time has arrived retires, propagating
//!    signal bindings and emitting end events.
//!
//! A tick that makes no progress and cannot advance the clock is a
//! deadlock and aborts the run with a state snapshot.

use indexmap::IndexMap;

use crate::config::Config;
use crate::device::{AccessKind, DeviceRegistry};
use crate::ir::{Graph, OpId, OpKind, Type, ValueId};
use crate::trace::{EventCategory, Phase, TraceEvent, TraceSink};

use super::launcher::{Launcher, OpEntry};
use super::signal::SignalState;
use super::SimError;

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimStats {
    /// Virtual time when the last launcher drained.
    pub final_time: u64,
    /// Event-loop iterations.
    pub ticks: u64,
    /// Ops retired across all launchers.
    pub ops_retired: u64,
    /// Trace events emitted.
    pub trace_events: u64,
    /// Devices installed by create ops.
    pub devices_created: u64,
    /// Launcher tables installed by create ops (host excluded).
    pub launchers_created: u64,
}

impl SimStats {
    /// Print a run summary.
    pub fn print_summary(&self) {
        println!("Simulation Summary");
        println!("==================");
        println!("Final time:    {} cycles", self.final_time);
        println!("Ticks:         {}", self.ticks);
        println!("Ops retired:   {}", self.ops_retired);
        println!("Trace events:  {}", self.trace_events);
        println!("Devices:       {}", self.devices_created);
        println!("Launchers:     {} (+host)", self.launchers_created);
    }
}

/// Identity of a launcher table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LauncherKey {
    /// Walks the top-level function.
    Host,
    /// Created by a `create_proc`/`create_dma`, keyed by the canonical
    /// identity of the create op's result.
    Device(ValueId),
}

/// Per-tick progress counters; a tick where nothing moved and time
/// cannot advance is a deadlock.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    advanced: u64,
    drained: u64,
    installed: u64,
    started: u64,
    retired: u64,
}

impl Progress {
    fn any(&self) -> bool {
        self.advanced + self.drained + self.installed + self.started + self.retired > 0
    }
}

/// Locate the `entry` function in `graph`, validate its signature and
/// simulate it to completion, emitting trace events into `trace`.
pub fn simulate(
    graph: &Graph,
    entry: &str,
    config: &Config,
    trace: &mut dyn TraceSink,
) -> Result<SimStats, SimError> {
    let mut sim = Simulator::new(graph, entry, config, trace)?;
    sim.run()
}

/// The engine: all mutable simulation state, threaded through each
/// phase explicitly.
pub struct Simulator<'g, T: TraceSink> {
    graph: &'g Graph,
    signals: SignalState,
    devices: DeviceRegistry,
    /// Host first, then device launchers in creation order. The map
    /// position is the launcher's trace pid.
    tables: IndexMap<LauncherKey, Launcher>,
    trace: T,
    time: u64,
    next_tid: u64,
    stats: SimStats,
}

impl<'g, T: TraceSink> Simulator<'g, T> {
    /// Validate the entry function and build the identity/iteration
    /// maps. Fails on a missing entry, a non-tensor top-level argument
    /// or an unsimulatable loop.
    pub fn new(graph: &'g Graph, entry: &str, config: &Config, trace: T) -> Result<Self, SimError> {
        let func = graph
            .func(entry)
            .ok_or_else(|| SimError::TopLevelNotFound(entry.to_string()))?;
        let body = graph.func_body(func);
        for &arg in &graph.block(body).args {
            let ty = graph.value(arg).ty;
            if ty != Type::Tensor {
                return Err(SimError::UnsupportedArgument(ty));
            }
        }

        let signals = SignalState::build(graph, func)?;
        let mut tables = IndexMap::new();
        tables.insert(LauncherKey::Host, Launcher::with_block(body));

        Ok(Self {
            graph,
            signals,
            devices: DeviceRegistry::new(config.dram, config.sram, config.dma),
            tables,
            trace,
            time: 1,
            next_tid: 0,
            stats: SimStats::default(),
        })
    }

    /// Run the event loop until every launcher drains. Call once.
    pub fn run(&mut self) -> Result<SimStats, SimError> {
        let graph = self.graph;
        log::info!("simulation start");
        loop {
            self.stats.ticks += 1;
            let mut progress = Progress::default();

            let n = self.tables.len();
            for i in 0..n {
                self.advance_cursor(i, &mut progress)?;
            }
            for i in 0..n {
                self.drain_queue(i, &mut progress)?;
            }

            if self.tables.values().all(|l| l.is_idle()) {
                if self.tables.values().all(|l| l.drained(graph)) {
                    break;
                }
                // Something is still queued; either a later drain pass
                // unblocks it or the deadlock check fires below.
            }

            for i in 0..n {
                self.schedule(i, &mut progress)?;
            }

            let before = self.time;
            if let Some(next) = self.next_end_time() {
                self.time = next;
            }

            for i in 0..n {
                self.retire(i, &mut progress)?;
            }

            if !progress.any() && self.time == before {
                return Err(SimError::Deadlock {
                    time: self.time,
                    snapshot: self.snapshot(),
                });
            }
        }

        self.stats.final_time = self.time;
        log::info!(
            "simulation done @ {} ({} ops, {} ticks)",
            self.time,
            self.stats.ops_retired,
            self.stats.ticks
        );
        Ok(self.stats)
    }

    /// Current virtual time.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn signals(&self) -> &SignalState {
        &self.signals
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn launchers(&self) -> impl Iterator<Item = &Launcher> {
        self.tables.values()
    }

    pub fn trace(&self) -> &T {
        &self.trace
    }

    pub fn into_trace(self) -> T {
        self.trace
    }

    /// Phase 1: introduce ops from the launcher's block. Async ops are
    /// handed to their dispatch target (and the walk continues); the
    /// first sync op becomes the in-flight entry. For-loops descend
    /// into their body, yields loop back or ascend past the loop.
    fn advance_cursor(&mut self, i: usize, progress: &mut Progress) -> Result<(), SimError> {
        let graph = self.graph;
        loop {
            let table = &self.tables[i];
            if !table.is_idle() {
                break;
            }
            let Some(block) = table.block else { break };
            let cursor = table.cursor;
            let ops = &graph.block(block).ops;
            if cursor >= ops.len() {
                break;
            }
            let op = ops[cursor];
            let kind = &graph.op(op).kind;

            if kind.is_async() {
                let target = if kind.is_control() {
                    i
                } else {
                    self.dispatch_index(op)?
                };
                if !self.tables[target].accept(op) {
                    break;
                }
                log::debug!("launcher {} handed {} to launcher {}", i, kind.name(), target);
                self.tables[i].cursor += 1;
                progress.advanced += 1;
                continue;
            }

            let tid = self.fresh_tid();
            let entry = OpEntry::new(op, tid);
            match kind {
                OpKind::For => {
                    let body = graph.body_block(op);
                    let table = &mut self.tables[i];
                    table.current = Some(entry);
                    table.enter_block(body);
                }
                OpKind::Yield => {
                    let count = self.signals.bump_yield(op);
                    match graph
                        .parent_op(block)
                        .filter(|&p| matches!(graph.op(p).kind, OpKind::For))
                    {
                        Some(for_op) if count % self.signals.trip_count(for_op) == 0 => {
                            // Final iteration: resume after the loop.
                            let table = &mut self.tables[i];
                            table.current = Some(entry);
                            table.block = Some(graph.parent_block(for_op));
                            table.cursor = graph.op(for_op).index_in_block + 1;
                        }
                        Some(_) => {
                            // Loop back to the body start.
                            let table = &mut self.tables[i];
                            table.current = Some(entry);
                            table.cursor = 0;
                        }
                        None => {
                            let table = &mut self.tables[i];
                            table.current = Some(entry);
                            table.cursor += 1;
                        }
                    }
                }
                _ => {
                    let table = &mut self.tables[i];
                    table.current = Some(entry);
                    table.cursor += 1;
                }
            }
            log::debug!("launcher {} took {}", i, kind.name());
            progress.advanced += 1;
            break;
        }
        Ok(())
    }

    /// Phase 2: work the head of the event queue. Control ops take
    /// effect in place; a ready launch or copy is installed as the
    /// in-flight entry when the launcher is idle, at most one per tick.
    fn drain_queue(&mut self, i: usize, progress: &mut Progress) -> Result<(), SimError> {
        let graph = self.graph;
        loop {
            let Some(&op) = self.tables[i].event_queue.front() else {
                break;
            };
            let kind = &graph.op(op).kind;

            if kind.is_control() {
                if !self.signals.signals_ready(graph, op) {
                    break;
                }
                self.signals.bump_consumed(op);
                self.signals
                    .record_production(graph, graph.op(op).results.iter().copied());
                self.tables[i].event_queue.pop_front();
                progress.drained += 1;
                log::debug!("launcher {} drained control op", i);
                continue;
            }

            let ready = match kind {
                // A launch is gated on its start signal only; its other
                // operands are plumbed through to the body.
                OpKind::Launch => self
                    .signals
                    .is_ready(graph, op, graph.launch_start_signal(op)),
                _ => self.signals.signals_ready(graph, op),
            };
            if !ready {
                break;
            }

            if self.tables[i].is_idle() {
                let tid = self.fresh_tid();
                let table = &mut self.tables[i];
                table.current = Some(OpEntry::new(op, tid));
                if matches!(kind, OpKind::Launch) {
                    table.enter_block(graph.body_block(op));
                }
                table.event_queue.pop_front();
                progress.installed += 1;
                log::debug!("launcher {} installed {}", i, kind.name());
            }
            break;
        }
        Ok(())
    }

    /// Phase 4: start the in-flight entry if its signals allow,
    /// reserving device time and emitting begin events.
    fn schedule(&mut self, i: usize, progress: &mut Progress) -> Result<(), SimError> {
        let Some(mut entry) = self.tables[i].current.take() else {
            return Ok(());
        };
        let result = if entry.is_started() {
            Ok(())
        } else {
            self.schedule_entry(i, &mut entry, progress)
        };
        self.tables[i].current = Some(entry);
        result
    }

    fn schedule_entry(
        &mut self,
        i: usize,
        entry: &mut OpEntry,
        progress: &mut Progress,
    ) -> Result<(), SimError> {
        let graph = self.graph;
        let now = self.time;
        if entry.queue_ready_time.is_none() {
            entry.queue_ready_time = Some(now);
        }

        let kind = &graph.op(entry.op).kind;
        if matches!(kind, OpKind::Await) && !self.signals.signals_ready(graph, entry.op) {
            log::debug!("launcher {} awaiting signals @ {}", i, now);
            return Ok(());
        }

        if matches!(kind, OpKind::Launch | OpKind::MemCopy | OpKind::Await) {
            self.signals.bump_consumed(entry.op);
        }

        entry.start_time = Some(now);
        entry.end_time = self.model_op(now, entry)?;
        progress.started += 1;
        log::debug!(
            "launcher {} started {} @ {} - {}",
            i,
            kind.name(),
            now,
            entry.end_time
        );

        let pid = i as u64;
        let name = format!("{}{}", kind.name(), entry.tid);
        if entry.end_time != now {
            self.emit(&name, EventCategory::Operation, Phase::B, now, pid, entry.tid)?;
        }
        for idx in 0..entry.mem_tids.len() {
            let tid = entry.mem_tids[idx];
            self.emit(&name, EventCategory::Memory, Phase::B, now, pid, tid)?;
        }
        if let Some(ready) = entry.queue_ready_time {
            if now > ready {
                self.emit("stall", EventCategory::Operation, Phase::B, ready, pid, entry.tid)?;
                self.emit("stall", EventCategory::Operation, Phase::E, now, pid, entry.tid)?;
            }
        }
        Ok(())
    }

    /// Built-in cost rules: reserve device time and answer the entry's
    /// completion time. Create ops install their device here, when the
    /// op starts.
    fn model_op(&mut self, now: u64, entry: &mut OpEntry) -> Result<u64, SimError> {
        let graph = self.graph;
        let data = graph.op(entry.op);
        match &data.kind {
            OpKind::CreateMem { kind, shape, elem } => {
                let key = self.signals.canon(data.results[0]);
                self.devices.create_memory(key, kind, shape, *elem)?;
                self.stats.devices_created += 1;
                Ok(now + 1)
            }
            OpKind::CreateDma => {
                let key = self.signals.canon(data.results[0]);
                self.devices.create_dma(key);
                self.stats.devices_created += 1;
                Ok(now + 1)
            }
            OpKind::MemRead { has_offset } => {
                let (mem_key, volume) = self.buffer_target(data.operands[0], "mem_read")?;
                let lines = if *has_offset { 1 } else { volume };
                let mem = self.devices.memory(mem_key)?;
                entry.mem_tids.push(mem.uid);
                let cycles = mem.cost.read_cycles(lines);
                Ok(self
                    .devices
                    .schedule_memory_access(mem_key, now, cycles, AccessKind::Read)?)
            }
            OpKind::MemWrite => {
                let (mem_key, volume) = self.buffer_target(data.operands[0], "mem_write")?;
                let mem = self.devices.memory(mem_key)?;
                entry.mem_tids.push(mem.uid);
                let cycles = mem.cost.write_cycles(volume);
                Ok(self
                    .devices
                    .schedule_memory_access(mem_key, now, cycles, AccessKind::Write)?)
            }
            OpKind::MemCopy => {
                let (src_key, src_vol) = self.buffer_target(data.operands[0], "mem_copy")?;
                let (dst_key, dst_vol) = self.buffer_target(data.operands[1], "mem_copy")?;
                let lines = src_vol.min(dst_vol);

                let src = self.devices.memory(src_key)?;
                entry.mem_tids.push(src.uid);
                let read = src.cost.read_cycles(lines);
                let bytes = lines * src.elem_bytes;

                let dst = self.devices.memory(dst_key)?;
                entry.mem_tids.push(dst.uid);
                let write = dst.cost.write_cycles(lines);

                let dma_key = self.signals.canon(data.operands[2]);
                let transfer = self.devices.dma(dma_key)?.cost.transfer_cycles(bytes);

                // The slowest leg determines completion.
                let cycles = read.max(write).max(transfer);
                Ok(self
                    .devices
                    .schedule_dma(dma_key, src_key, dst_key, now, cycles)?)
            }
            kind if kind.is_structural() => Ok(now),
            _ => Ok(now + 1),
        }
    }

    /// Phase 6: retire a completed entry, propagating signal bindings
    /// and emitting end events.
    fn retire(&mut self, i: usize, progress: &mut Progress) -> Result<(), SimError> {
        let Some(entry) = self.tables[i].current.take() else {
            return Ok(());
        };
        if !entry.is_done(self.time) {
            self.tables[i].current = Some(entry);
            return Ok(());
        }

        let graph = self.graph;
        let op = entry.op;
        let data = graph.op(op);
        match &data.kind {
            OpKind::MemCopy => {
                self.signals
                    .record_production(graph, data.results.iter().copied());
            }
            OpKind::Launch => {
                let body = graph.body_block(op);
                self.signals.bind_producers(
                    graph,
                    &graph.block(body).args,
                    graph.launch_operands(op),
                );
            }
            OpKind::Return => {
                if let Some(launch) = graph.parent_op(graph.parent_block(op)) {
                    let results = &graph.op(launch).results;
                    if let Some((&done, rest)) = results.split_first() {
                        self.signals.record_production(graph, [done]);
                        self.signals.bind_producers(graph, rest, &data.operands);
                    }
                }
            }
            OpKind::For => {
                let args = graph.for_iter_args(op);
                self.signals
                    .bind_producers(graph, args, graph.for_iter_operands(op));
                self.signals.set_iter_state(graph, args, false);
            }
            OpKind::Yield => {
                if let Some(for_op) = graph
                    .parent_op(graph.parent_block(op))
                    .filter(|&p| matches!(graph.op(p).kind, OpKind::For))
                {
                    if self.signals.yields(op) % self.signals.trip_count(for_op) == 0 {
                        // Final iteration: the loop's results surface.
                        self.signals.bind_producers(
                            graph,
                            &graph.op(for_op).results,
                            &data.operands,
                        );
                    } else {
                        let args = graph.for_iter_args(for_op);
                        self.signals.bind_producers(graph, args, &data.operands);
                        self.signals.set_iter_state(graph, args, true);
                    }
                }
            }
            OpKind::CreateProc { .. } | OpKind::CreateDma => {
                let key = self.signals.canon(data.results[0]);
                self.tables.insert(LauncherKey::Device(key), Launcher::new());
                self.stats.launchers_created += 1;
                log::debug!("launcher {} registered", self.tables.len() - 1);
            }
            _ => {}
        }

        let pid = i as u64;
        let name = format!("{}{}", data.kind.name(), entry.tid);
        if Some(entry.end_time) != entry.start_time {
            self.emit(
                &name,
                EventCategory::Operation,
                Phase::E,
                self.time,
                pid,
                entry.tid,
            )?;
        }
        for idx in 0..entry.mem_tids.len() {
            let tid = entry.mem_tids[idx];
            self.emit(&name, EventCategory::Memory, Phase::E, self.time, pid, tid)?;
        }

        log::debug!("launcher {} retired {} @ {}", i, data.kind.name(), self.time);
        progress.retired += 1;
        self.stats.ops_retired += 1;
        Ok(())
    }

    /// Phase 5 helper: earliest completion among started entries.
    fn next_end_time(&self) -> Option<u64> {
        self.tables
            .values()
            .filter_map(|l| l.current.as_ref())
            .filter(|entry| entry.is_started())
            .map(|entry| entry.end_time)
            .min()
    }

    /// Launcher position an async op dispatches to.
    fn dispatch_index(&self, op: OpId) -> Result<usize, SimError> {
        let graph = self.graph;
        let kind = &graph.op(op).kind;
        let handle = match kind {
            OpKind::Launch => graph.launch_device(op),
            OpKind::MemCopy => graph.op(op).operands[2],
            _ => return Err(SimError::UnknownLauncher(kind.name().to_string())),
        };
        let key = self.signals.canon(handle);
        self.tables
            .get_index_of(&LauncherKey::Device(key))
            .ok_or_else(|| SimError::UnknownLauncher(kind.name().to_string()))
    }

    /// Resolve a buffer operand to its memory device key and full
    /// allocation volume in lines.
    fn buffer_target(&self, buffer: ValueId, what: &str) -> Result<(ValueId, u64), SimError> {
        let graph = self.graph;
        let canonical = self.signals.canon(buffer);
        let alloc = graph
            .defining_op(canonical)
            .ok_or_else(|| SimError::NotABuffer(what.to_string()))?;
        match &graph.op(alloc).kind {
            OpKind::MemAlloc { shape, .. } => {
                let volume = shape.iter().product::<i64>().max(0) as u64;
                let mem_key = self.signals.canon(graph.op(alloc).operands[0]);
                Ok((mem_key, volume))
            }
            _ => Err(SimError::NotABuffer(what.to_string())),
        }
    }

    fn fresh_tid(&mut self) -> u64 {
        let tid = self.next_tid;
        self.next_tid += 1;
        tid
    }

    fn emit(
        &mut self,
        name: &str,
        cat: EventCategory,
        ph: Phase,
        ts: u64,
        pid: u64,
        tid: u64,
    ) -> Result<(), SimError> {
        self.trace
            .event(&TraceEvent::new(name, cat, ph, ts, pid, tid))?;
        self.stats.trace_events += 1;
        Ok(())
    }

    /// Render every launcher's state for the deadlock diagnostic.
    fn snapshot(&self) -> String {
        let mut lines = Vec::new();
        for (pos, (key, table)) in self.tables.iter().enumerate() {
            let what = match key {
                LauncherKey::Host => "host",
                LauncherKey::Device(_) => "device",
            };
            lines.push(format!(
                "  pid {} ({}): {}",
                pos,
                what,
                table.describe(self.graph)
            ));
        }
        lines.push(format!("  {}", self.signals.describe_iter_state()));
        lines.join("\n")
    }

    #[cfg(test)]
    fn table(&self, i: usize) -> &Launcher {
        &self.tables[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::cost::{DmaCostModel, MemCostModel};
    use crate::ir::{BlockId, DataType, GraphBuilder};
    use crate::trace::{check_balanced, CollectSink};

    fn run(graph: &Graph) -> (SimStats, Vec<TraceEvent>) {
        let mut sink = CollectSink::default();
        let stats = simulate(graph, "graph", &Config::default(), &mut sink)
            .expect("simulation should complete");
        (stats, sink.events)
    }

    fn ops_on_pid(events: &[TraceEvent], pid: u64) -> Vec<&TraceEvent> {
        events
            .iter()
            .filter(|e| e.pid == pid && e.cat == EventCategory::Operation && e.name != "stall")
            .collect()
    }

    /// Shared scaffolding: DRAM + SRAM + DMA + both buffers.
    struct CopyFixture {
        b: GraphBuilder,
        body: BlockId,
        src: ValueId,
        dst: ValueId,
        dma: ValueId,
    }

    fn copy_fixture(lines: i64) -> CopyFixture {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let dram = b.create_mem(body, "DRAM", &[lines], DataType::F32);
        let sram = b.create_mem(body, "SRAM", &[lines], DataType::F32);
        let dma = b.create_dma(body);
        let src = b.alloc(body, dram, &[lines], DataType::F32);
        let dst = b.alloc(body, sram, &[lines], DataType::F32);
        CopyFixture {
            b,
            body,
            src,
            dst,
            dma,
        }
    }

    #[test]
    fn test_s1_const_and_return() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        b.const_index(body, 5);
        b.func_return(body);
        let g = b.finish();

        let (stats, events) = run(&g);
        // Structural ops are free: no events, no time.
        assert!(events.is_empty());
        assert_eq!(stats.final_time, 1);
        assert_eq!(stats.ops_retired, 2);
        assert!(stats.ticks <= 3);
    }

    #[test]
    fn test_s2_single_memcopy() {
        let mut fx = copy_fixture(4);
        let body = fx.body;
        fx.b.mem_copy(body, fx.src, fx.dst, fx.dma, &[]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let config = Config::default();
        let mut sim = Simulator::new(&g, "graph", &config, CollectSink::default()).unwrap();
        sim.run().unwrap();

        // The slowest leg determines the copy's window.
        let dram = MemCostModel::new(config.dram);
        let sram = MemCostModel::new(config.sram);
        let dma = DmaCostModel::new(config.dma);
        let expected = dram
            .read_cycles(4)
            .max(sram.write_cycles(4))
            .max(dma.transfer_cycles(16));

        let events = &sim.trace().events;
        check_balanced(events).unwrap();

        // One operation pair on the DMA launcher (pid 1).
        let copy_events = ops_on_pid(events, 1);
        assert_eq!(copy_events.len(), 2);
        assert!(copy_events[0].name.starts_with("mem_copy"));
        assert_eq!(copy_events[1].ts - copy_events[0].ts, expected);

        // Two memory pairs, tids = the two memory uids.
        let mem_events: Vec<_> = events
            .iter()
            .filter(|e| e.cat == EventCategory::Memory)
            .collect();
        assert_eq!(mem_events.len(), 4);
        let mut tids: Vec<u64> = mem_events.iter().map(|e| e.tid).collect();
        tids.sort_unstable();
        tids.dedup();
        assert_eq!(tids, vec![0, 1]);
    }

    #[test]
    fn test_s3_loop_of_three_copies() {
        let mut fx = copy_fixture(4);
        let body = fx.body;
        let go = fx.b.control(body, &[], 1)[0];
        let lb = fx.b.const_index(body, 0);
        let ub = fx.b.const_index(body, 3);
        let step = fx.b.const_index(body, 1);
        let parts = fx.b.for_loop(body, lb, ub, step, &[go]);
        let it = parts.iter_args[0];
        let done = fx.b.mem_copy(parts.body, fx.src, fx.dst, fx.dma, &[it]);
        fx.b.loop_yield(parts.body, &[done]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let config = Config::default();
        let mut sim = Simulator::new(&g, "graph", &config, CollectSink::default()).unwrap();
        sim.run().unwrap();

        // Three copies on the DMA launcher.
        let copy_events = ops_on_pid(&sim.trace().events, 1);
        assert_eq!(copy_events.len(), 6);
        check_balanced(&sim.trace().events).unwrap();

        // The DMA serialized them: reservations strictly ordered.
        let dma_key = sim.signals().canon(fx.dma);
        let reservations = sim.devices().dma(dma_key).unwrap().schedule.reservations();
        assert_eq!(reservations.len(), 3);
        for pair in reservations.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }

        // Each iteration produced the loop's chained signal once, and
        // the loop result now observes that producer.
        assert_eq!(sim.signals().production_count(done), 3);
        let result = sim.signals().canon(parts.results[0]);
        assert_eq!(sim.signals().producer(result), done);
    }

    #[test]
    fn test_s4_launch_waits_for_start_signal() {
        let mut fx = copy_fixture(4);
        let body = fx.body;
        let s = fx.b.mem_copy(body, fx.src, fx.dst, fx.dma, &[]);
        let proc = fx.b.create_proc(body, "generic");
        let parts = fx.b.launch(body, s, proc, &[], 0);
        fx.b.compute(parts.body, "crunch", &[], Type::Tensor);
        fx.b.ret(parts.body, &[]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let (_stats, events) = run(&g);
        check_balanced(&events).unwrap();

        let copy_end = events
            .iter()
            .find(|e| e.name.starts_with("mem_copy") && e.ph == Phase::E)
            .expect("copy end event")
            .ts;
        let crunch_begin = events
            .iter()
            .find(|e| e.name.starts_with("crunch") && e.ph == Phase::B)
            .expect("crunch begin event")
            .ts;
        assert!(crunch_begin >= copy_end);
    }

    #[test]
    fn test_s5_nested_loops_six_copies() {
        let mut fx = copy_fixture(4);
        let body = fx.body;
        let go = fx.b.control(body, &[], 1)[0];
        let lb = fx.b.const_index(body, 0);
        let ub2 = fx.b.const_index(body, 2);
        let ub3 = fx.b.const_index(body, 3);
        let step = fx.b.const_index(body, 1);

        let outer = fx.b.for_loop(body, lb, ub2, step, &[go]);
        // Bridge the outer iteration signal into the inner loop through
        // ops, so every level's production counts at its own multiplier.
        let t = fx.b.control(outer.body, &[outer.iter_args[0]], 1)[0];
        let inner = fx.b.for_loop(outer.body, lb, ub3, step, &[t]);
        let done = fx
            .b
            .mem_copy(inner.body, fx.src, fx.dst, fx.dma, &[inner.iter_args[0]]);
        fx.b.loop_yield(inner.body, &[done]);
        let u = fx.b.control(outer.body, &[inner.results[0]], 1)[0];
        fx.b.loop_yield(outer.body, &[u]);
        fx.b.await_signals(body, &[outer.results[0]]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let config = Config::default();
        let mut sim = Simulator::new(&g, "graph", &config, CollectSink::default()).unwrap();
        sim.run().unwrap();

        // Six copies, admitted exactly once per iteration.
        assert_eq!(sim.signals().production_count(done), 6);
        let copy_events = ops_on_pid(&sim.trace().events, 1);
        assert_eq!(copy_events.len(), 12);
        check_balanced(&sim.trace().events).unwrap();

        // No memory device ever double-books its port.
        for mem in sim.devices().memories() {
            for pair in mem.schedule.reservations().windows(2) {
                assert!(pair[0].end <= pair[1].start);
            }
        }
    }

    #[test]
    fn test_s6_stall_interval() {
        let mut fx = copy_fixture(4);
        let body = fx.body;
        let go = fx.b.control(body, &[], 1)[0];
        let s = fx.b.mem_copy(body, fx.src, fx.dst, fx.dma, &[]);
        let proc = fx.b.create_proc(body, "generic");
        let parts = fx.b.launch(body, go, proc, &[s], 0);
        fx.b.await_signals(parts.body, &[parts.block_args[0]]);
        fx.b.ret(parts.body, &[]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let (_stats, events) = run(&g);

        let copy_end = events
            .iter()
            .find(|e| e.name.starts_with("mem_copy") && e.ph == Phase::E)
            .expect("copy end event")
            .ts;
        let stall_b = events
            .iter()
            .find(|e| e.name == "stall" && e.ph == Phase::B)
            .expect("stall begin");
        let stall_e = events
            .iter()
            .find(|e| e.name == "stall" && e.ph == Phase::E)
            .expect("stall end");

        // The launcher went ready early, the signal landed with the
        // copy's completion.
        assert!(stall_b.ts < stall_e.ts);
        assert_eq!(stall_e.ts, copy_end);
        assert_eq!(stall_b.pid, stall_e.pid);
        // The await itself is free, so the stall is the only operation
        // interval on that launcher.
        assert_eq!(stall_b.pid, 2);
    }

    #[test]
    fn test_time_monotonic_and_queues_drained() {
        let mut fx = copy_fixture(4);
        let body = fx.body;
        let s1 = fx.b.mem_copy(body, fx.src, fx.dst, fx.dma, &[]);
        let s2 = fx.b.mem_copy(body, fx.dst, fx.src, fx.dma, &[s1]);
        fx.b.await_signals(body, &[s2]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let config = Config::default();
        let mut sim = Simulator::new(&g, "graph", &config, CollectSink::default()).unwrap();
        let stats = sim.run().unwrap();

        assert!(stats.final_time >= 1);
        for launcher in sim.launchers() {
            assert!(launcher.drained(&g));
        }
        // Begin events never run backwards per launcher.
        for pid in 0..2u64 {
            let begins: Vec<u64> = sim
                .trace()
                .events
                .iter()
                .filter(|e| e.pid == pid && e.ph == Phase::B && e.name != "stall")
                .map(|e| e.ts)
                .collect();
            for pair in begins.windows(2) {
                assert!(pair[0] <= pair[1]);
            }
        }
    }

    #[test]
    fn test_missing_toplevel_is_fatal() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("not_graph", &[]);
        b.func_return(body);
        let g = b.finish();

        let mut sink = CollectSink::default();
        let err = simulate(&g, "graph", &Config::default(), &mut sink).unwrap_err();
        assert!(matches!(err, SimError::TopLevelNotFound(_)));
    }

    #[test]
    fn test_non_tensor_argument_is_fatal() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[Type::Index]);
        b.func_return(body);
        let g = b.finish();

        let mut sink = CollectSink::default();
        let err = simulate(&g, "graph", &Config::default(), &mut sink).unwrap_err();
        assert!(matches!(err, SimError::UnsupportedArgument(Type::Index)));
    }

    #[test]
    fn test_unknown_memory_kind_is_fatal() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        b.create_mem(body, "HBM", &[4], DataType::F32);
        b.func_return(body);
        let g = b.finish();

        let mut sink = CollectSink::default();
        let err = simulate(&g, "graph", &Config::default(), &mut sink).unwrap_err();
        assert!(matches!(
            err,
            SimError::Device(crate::device::DeviceError::UnknownMemoryKind(_))
        ));
    }

    /// Threading a raw iteration argument as a nested loop's seed gives
    /// the inner consumers a signal that is never produced at a
    /// countable site; the engine must report the deadlock instead of
    /// spinning.
    #[test]
    fn test_unproducible_signal_deadlocks() {
        let mut fx = copy_fixture(4);
        let body = fx.body;
        let go = fx.b.control(body, &[], 1)[0];
        let lb = fx.b.const_index(body, 0);
        let ub = fx.b.const_index(body, 2);
        let step = fx.b.const_index(body, 1);
        let outer = fx.b.for_loop(body, lb, ub, step, &[go]);
        let inner = fx
            .b
            .for_loop(outer.body, lb, ub, step, &[outer.iter_args[0]]);
        let done = fx
            .b
            .mem_copy(inner.body, fx.src, fx.dst, fx.dma, &[inner.iter_args[0]]);
        fx.b.loop_yield(inner.body, &[done]);
        fx.b.loop_yield(outer.body, &[inner.results[0]]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let mut sink = CollectSink::default();
        let err = simulate(&g, "graph", &Config::default(), &mut sink).unwrap_err();
        match err {
            SimError::Deadlock { snapshot, .. } => {
                assert!(snapshot.contains("mem_copy"));
            }
            other => panic!("expected deadlock, got {other}"),
        }
    }

    #[test]
    fn test_launcher_single_occupancy() {
        // While the first copy runs, the second sits in the queue, not
        // in a second in-flight slot.
        let mut fx = copy_fixture(4);
        let body = fx.body;
        fx.b.mem_copy(body, fx.src, fx.dst, fx.dma, &[]);
        fx.b.mem_copy(body, fx.src, fx.dst, fx.dma, &[]);
        fx.b.func_return(body);
        let g = fx.b.finish();

        let config = Config::default();
        let mut sim = Simulator::new(&g, "graph", &config, CollectSink::default()).unwrap();
        sim.run().unwrap();

        // Serialized on the DMA: two back-to-back reservations.
        let copies = ops_on_pid(&sim.trace().events, 1);
        assert_eq!(copies.len(), 4);
        let mut begins: Vec<u64> = copies
            .iter()
            .filter(|e| e.ph == Phase::B)
            .map(|e| e.ts)
            .collect();
        begins.sort_unstable();
        let ends: Vec<u64> = copies
            .iter()
            .filter(|e| e.ph == Phase::E)
            .map(|e| e.ts)
            .collect();
        assert!(begins[1] >= ends[0]);
        assert!(sim.table(1).drained(&g));
    }
}
