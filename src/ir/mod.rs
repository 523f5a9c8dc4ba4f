//! In-memory dataflow IR consumed by the simulator.
//!
//! The compiled program is a [`Graph`]: an arena of functions, blocks,
//! operations and values addressed by dense index ids. Ops own their
//! nested blocks (launch bodies, loop bodies), blocks know their parent
//! op, and every value records its defining op result or block argument,
//! so the simulator can navigate in both directions without owning any
//! IR nodes itself.
//!
//! Graphs are built programmatically with [`GraphBuilder`]; there is no
//! textual frontend.
//!
//! # Example
//!
//! ```
//! use equeue_sim::ir::{GraphBuilder, DataType};
//!
//! let mut b = GraphBuilder::new();
//! let (_f, body) = b.func("graph", &[]);
//! let mem = b.create_mem(body, "DRAM", &[8], DataType::F32);
//! let _buf = b.alloc(body, mem, &[8], DataType::F32);
//! b.func_return(body);
//! let graph = b.finish();
//! assert!(graph.func("graph").is_some());
//! ```

pub mod build;

pub use build::{ForParts, GraphBuilder, LaunchParts};

/// Index of a value in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Index of an operation in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// Index of a block in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of a function in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Value types.
///
/// Only the distinctions the scheduler cares about are modeled: signal
/// values gate execution, handles name dispatch targets and devices,
/// everything else is opaque payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    /// Dataflow token; its production count gates consumers.
    Signal,
    /// Loop bound / induction value.
    Index,
    /// Opaque data payload (also the only legal top-level argument type).
    Tensor,
    /// Handle to a memory created by `create_mem`.
    MemHandle,
    /// Handle to a processor created by `create_proc`.
    ProcHandle,
    /// Handle to a DMA created by `create_dma`.
    DmaHandle,
    /// Buffer carved out of a memory by `alloc`.
    Buffer,
}

/// Element type of a memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    F32,
    F16,
    I32,
    I8,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn bytes(&self) -> u64 {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I8 => 1,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::F32 => write!(f, "f32"),
            DataType::F16 => write!(f, "f16"),
            DataType::I32 => write!(f, "i32"),
            DataType::I8 => write!(f, "i8"),
        }
    }
}

/// Operation kinds, with their attributes inlined.
///
/// The simulator routes on this enum everywhere instead of downcasting;
/// new kinds extend the enum and every `match` with a default arm keeps
/// working (unknown ops cost one cycle and touch no device).
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Compile-time index constant.
    ConstIndex { value: i64 },
    /// Create a memory device. `kind` is validated when the op executes.
    CreateMem {
        kind: String,
        shape: Vec<i64>,
        elem: DataType,
    },
    /// Create a processor (a dispatch target for `launch`).
    CreateProc { kind: String },
    /// Create a DMA engine (a dispatch target for `mem_copy`).
    CreateDma,
    /// Allocate a buffer in a memory. Operand 0 is the memory handle.
    MemAlloc { shape: Vec<i64>, elem: DataType },
    /// Read from a buffer. Operand 0 is the buffer; with `has_offset`
    /// the access touches a single line instead of the whole buffer.
    MemRead { has_offset: bool },
    /// Write a buffer in full. Operand 0 is the buffer.
    MemWrite,
    /// Copy between buffers via a DMA. Operands: src buffer, dst buffer,
    /// DMA handle, then gating signals. Results are signals.
    MemCopy,
    /// Dispatch a region onto a processor. Operand 0 is the start
    /// signal, operand 1 the device handle, the rest map 1:1 onto the
    /// body block's arguments. Result 0 is the done signal.
    Launch,
    /// Block the issuing launcher until all signal operands are ready.
    Await,
    /// Pure signal plumbing; takes effect while still in the event
    /// queue, producing its results immediately.
    Control,
    /// Opaque unit-cost compute op.
    Compute { name: String },
    /// Terminator of a launch body; surfaces results to the launch.
    Return,
    /// Counted loop. Operands: lb, ub, step, then iter operands. Body
    /// args: induction variable, then iter args.
    For,
    /// Terminator of a loop body.
    Yield,
    /// Terminator of a function body.
    FuncReturn,
}

impl OpKind {
    /// Display name used in trace events and diagnostics.
    pub fn name(&self) -> &str {
        match self {
            OpKind::ConstIndex { .. } => "const",
            OpKind::CreateMem { .. } => "create_mem",
            OpKind::CreateProc { .. } => "create_proc",
            OpKind::CreateDma => "create_dma",
            OpKind::MemAlloc { .. } => "alloc",
            OpKind::MemRead { .. } => "mem_read",
            OpKind::MemWrite => "mem_write",
            OpKind::MemCopy => "mem_copy",
            OpKind::Launch => "launch",
            OpKind::Await => "await",
            OpKind::Control => "control",
            OpKind::Compute { name } => name,
            OpKind::Return => "return",
            OpKind::For => "for",
            OpKind::Yield => "yield",
            OpKind::FuncReturn => "func_return",
        }
    }

    /// Async ops are never executed by the launcher that walks past
    /// them; they are handed to a dispatch target's event queue.
    pub fn is_async(&self) -> bool {
        matches!(self, OpKind::Launch | OpKind::MemCopy | OpKind::Control)
    }

    /// Control ops take effect inside the event queue itself.
    pub fn is_control(&self) -> bool {
        matches!(self, OpKind::Control)
    }

    /// Structural ops cost zero cycles.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            OpKind::ConstIndex { .. }
                | OpKind::Await
                | OpKind::Launch
                | OpKind::Return
                | OpKind::For
                | OpKind::Yield
                | OpKind::FuncReturn
        )
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    /// `index`-th result of `op`.
    Result { op: OpId, index: usize },
    /// `index`-th argument of `block`.
    BlockArg { block: BlockId, index: usize },
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

#[derive(Debug, Clone)]
pub struct OpData {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    /// Nested region blocks (launch body, loop body).
    pub regions: Vec<BlockId>,
    pub parent: BlockId,
    /// Position of this op inside its parent block.
    pub index_in_block: usize,
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub args: Vec<ValueId>,
    pub ops: Vec<OpId>,
    /// `None` for function entry blocks.
    pub parent_op: Option<OpId>,
}

#[derive(Debug, Clone)]
pub struct FuncData {
    pub name: String,
    pub body: BlockId,
}

/// A compiled module: the arena all ids index into.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) values: Vec<ValueData>,
    pub(crate) ops: Vec<OpData>,
    pub(crate) blocks: Vec<BlockData>,
    pub(crate) funcs: Vec<FuncData>,
}

impl Graph {
    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    pub fn op(&self, id: OpId) -> &OpData {
        &self.ops[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    /// Look up a function by name.
    pub fn func(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn func_body(&self, id: FuncId) -> BlockId {
        self.funcs[id.0 as usize].body
    }

    /// Defining op of a value, or `None` for block arguments.
    pub fn defining_op(&self, v: ValueId) -> Option<OpId> {
        match self.value(v).def {
            ValueDef::Result { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// Block an op lives in.
    pub fn parent_block(&self, op: OpId) -> BlockId {
        self.op(op).parent
    }

    /// Op owning a block, or `None` for function entry blocks.
    pub fn parent_op(&self, block: BlockId) -> Option<OpId> {
        self.block(block).parent_op
    }

    /// The block holding the value's defining op, or the block the value
    /// is an argument of.
    pub fn defining_block(&self, v: ValueId) -> BlockId {
        match self.value(v).def {
            ValueDef::Result { op, .. } => self.parent_block(op),
            ValueDef::BlockArg { block, .. } => block,
        }
    }

    /// Fold a value to a constant index, if its defining op is one.
    pub fn const_index(&self, v: ValueId) -> Option<i64> {
        let op = self.defining_op(v)?;
        match self.op(op).kind {
            OpKind::ConstIndex { value } => Some(value),
            _ => None,
        }
    }

    /// Fold a for-loop's `(lb, ub, step)` operands to constants.
    pub fn for_bounds(&self, for_op: OpId) -> Option<(i64, i64, i64)> {
        let operands = &self.op(for_op).operands;
        let lb = self.const_index(operands[0])?;
        let ub = self.const_index(operands[1])?;
        let step = self.const_index(operands[2])?;
        Some((lb, ub, step))
    }

    /// Iter operands of a for op (everything after lb/ub/step).
    pub fn for_iter_operands(&self, for_op: OpId) -> &[ValueId] {
        &self.op(for_op).operands[3..]
    }

    /// Iter args of a for body (everything after the induction var).
    pub fn for_iter_args(&self, for_op: OpId) -> &[ValueId] {
        let body = self.op(for_op).regions[0];
        &self.block(body).args[1..]
    }

    /// Start-signal operand of a launch.
    pub fn launch_start_signal(&self, launch: OpId) -> ValueId {
        self.op(launch).operands[0]
    }

    /// Device-handle operand of a launch.
    pub fn launch_device(&self, launch: OpId) -> ValueId {
        self.op(launch).operands[1]
    }

    /// Launch operands mapped onto the body block's arguments.
    pub fn launch_operands(&self, launch: OpId) -> &[ValueId] {
        &self.op(launch).operands[2..]
    }

    /// Body block of a launch or for op.
    pub fn body_block(&self, op: OpId) -> BlockId {
        self.op(op).regions[0]
    }

    /// Visit every block under `root` in containment (pre-)order:
    /// a block before the blocks nested in its ops.
    pub fn walk_blocks<F: FnMut(&Graph, BlockId)>(&self, root: BlockId, f: &mut F) {
        f(self, root);
        let ops = self.block(root).ops.clone();
        for op in ops {
            let regions = self.op(op).regions.clone();
            for region in regions {
                self.walk_blocks(region, f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_folding() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let c = b.const_index(body, 42);
        b.func_return(body);
        let g = b.finish();
        assert_eq!(g.const_index(c), Some(42));
    }

    #[test]
    fn test_for_bounds_fold() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let lb = b.const_index(body, 0);
        let ub = b.const_index(body, 3);
        let step = b.const_index(body, 1);
        let parts = b.for_loop(body, lb, ub, step, &[]);
        b.loop_yield(parts.body, &[]);
        b.func_return(body);
        let g = b.finish();
        assert_eq!(g.for_bounds(parts.op), Some((0, 3, 1)));
    }

    #[test]
    fn test_for_bounds_non_constant() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let lb = b.const_index(body, 0);
        let ub = b.compute(body, "dyn_bound", &[], Type::Index);
        let step = b.const_index(body, 1);
        let parts = b.for_loop(body, lb, ub, step, &[]);
        b.loop_yield(parts.body, &[]);
        b.func_return(body);
        let g = b.finish();
        assert_eq!(g.for_bounds(parts.op), None);
    }

    #[test]
    fn test_navigation() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let go = b.control(body, &[], 1)[0];
        let proc = b.create_proc(body, "generic");
        let launch = b.launch(body, go, proc, &[go], 0);
        b.ret(launch.body, &[]);
        b.func_return(body);
        let g = b.finish();

        assert_eq!(g.parent_op(launch.body), Some(launch.op));
        assert_eq!(g.parent_op(body), None);
        assert_eq!(g.launch_start_signal(launch.op), go);
        assert_eq!(g.launch_device(launch.op), proc);
        assert_eq!(g.launch_operands(launch.op), &[go]);
        assert_eq!(g.block(launch.body).args.len(), 1);
        assert_eq!(g.defining_block(launch.block_args[0]), launch.body);
    }

    #[test]
    fn test_walk_blocks_preorder() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let lb = b.const_index(body, 0);
        let ub = b.const_index(body, 2);
        let step = b.const_index(body, 1);
        let outer = b.for_loop(body, lb, ub, step, &[]);
        let inner = b.for_loop(outer.body, lb, ub, step, &[]);
        b.loop_yield(inner.body, &[]);
        b.loop_yield(outer.body, &[]);
        b.func_return(body);
        let g = b.finish();

        let mut seen = Vec::new();
        g.walk_blocks(body, &mut |_, blk| seen.push(blk));
        assert_eq!(seen, vec![body, outer.body, inner.body]);
    }
}
