//! Programmatic graph construction.
//!
//! The builder appends ops to blocks in program order and wires up
//! parent/child navigation as it goes. Structured ops return a *parts*
//! struct bundling the op id, its body block and the values it defines.

use super::{
    BlockData, BlockId, DataType, FuncData, FuncId, Graph, OpData, OpId, OpKind, Type, ValueData,
    ValueDef, ValueId,
};

/// Handles produced by [`GraphBuilder::launch`].
#[derive(Debug, Clone)]
pub struct LaunchParts {
    pub op: OpId,
    /// Body block; walk ops into this and terminate with `ret`.
    pub body: BlockId,
    /// Done signal (result 0).
    pub done: ValueId,
    /// Remaining results, surfaced by the body's `return`.
    pub results: Vec<ValueId>,
    /// Body arguments, one per launch operand.
    pub block_args: Vec<ValueId>,
}

/// Handles produced by [`GraphBuilder::for_loop`].
#[derive(Debug, Clone)]
pub struct ForParts {
    pub op: OpId,
    pub body: BlockId,
    /// Induction variable (body arg 0).
    pub induction: ValueId,
    /// Iteration arguments (body args 1..).
    pub iter_args: Vec<ValueId>,
    /// Loop results, one per iter operand.
    pub results: Vec<ValueId>,
}

/// Builds a [`Graph`] one op at a time.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a function; returns its id and entry block.
    pub fn func(&mut self, name: &str, params: &[Type]) -> (FuncId, BlockId) {
        let block = self.new_block(None);
        for (i, &ty) in params.iter().enumerate() {
            let arg = self.new_value(ty, ValueDef::BlockArg { block, index: i });
            self.graph.blocks[block.0 as usize].args.push(arg);
        }
        let id = FuncId(self.graph.funcs.len() as u32);
        self.graph.funcs.push(FuncData {
            name: name.to_string(),
            body: block,
        });
        (id, block)
    }

    pub fn const_index(&mut self, block: BlockId, value: i64) -> ValueId {
        self.op(block, OpKind::ConstIndex { value }, &[], &[Type::Index], &[])
            .1[0]
    }

    pub fn create_mem(
        &mut self,
        block: BlockId,
        kind: &str,
        shape: &[i64],
        elem: DataType,
    ) -> ValueId {
        let kind = OpKind::CreateMem {
            kind: kind.to_string(),
            shape: shape.to_vec(),
            elem,
        };
        self.op(block, kind, &[], &[Type::MemHandle], &[]).1[0]
    }

    pub fn create_proc(&mut self, block: BlockId, kind: &str) -> ValueId {
        let kind = OpKind::CreateProc {
            kind: kind.to_string(),
        };
        self.op(block, kind, &[], &[Type::ProcHandle], &[]).1[0]
    }

    pub fn create_dma(&mut self, block: BlockId) -> ValueId {
        self.op(block, OpKind::CreateDma, &[], &[Type::DmaHandle], &[])
            .1[0]
    }

    pub fn alloc(
        &mut self,
        block: BlockId,
        mem: ValueId,
        shape: &[i64],
        elem: DataType,
    ) -> ValueId {
        let kind = OpKind::MemAlloc {
            shape: shape.to_vec(),
            elem,
        };
        self.op(block, kind, &[mem], &[Type::Buffer], &[]).1[0]
    }

    pub fn mem_read(&mut self, block: BlockId, buffer: ValueId, offset: Option<ValueId>) -> ValueId {
        let mut operands = vec![buffer];
        let has_offset = offset.is_some();
        operands.extend(offset);
        self.op(
            block,
            OpKind::MemRead { has_offset },
            &operands,
            &[Type::Tensor],
            &[],
        )
        .1[0]
    }

    pub fn mem_write(&mut self, block: BlockId, value: ValueId, buffer: ValueId) {
        self.op(block, OpKind::MemWrite, &[buffer, value], &[], &[]);
    }

    /// Copy `src` into `dst` through `dma`, gated on `signals`.
    /// Returns the done signal.
    pub fn mem_copy(
        &mut self,
        block: BlockId,
        src: ValueId,
        dst: ValueId,
        dma: ValueId,
        signals: &[ValueId],
    ) -> ValueId {
        let mut operands = vec![src, dst, dma];
        operands.extend_from_slice(signals);
        self.op(block, OpKind::MemCopy, &operands, &[Type::Signal], &[])
            .1[0]
    }

    /// Pure signal plumbing; produces `n_results` signals from `inputs`.
    pub fn control(&mut self, block: BlockId, inputs: &[ValueId], n_results: usize) -> Vec<ValueId> {
        let tys = vec![Type::Signal; n_results];
        self.op(block, OpKind::Control, inputs, &tys, &[]).1
    }

    pub fn await_signals(&mut self, block: BlockId, signals: &[ValueId]) {
        self.op(block, OpKind::Await, signals, &[], &[]);
    }

    pub fn compute(
        &mut self,
        block: BlockId,
        name: &str,
        operands: &[ValueId],
        result_ty: Type,
    ) -> ValueId {
        let kind = OpKind::Compute {
            name: name.to_string(),
        };
        self.op(block, kind, operands, &[result_ty], &[]).1[0]
    }

    /// Dispatch a region onto `device`, started by `start` and carrying
    /// `operands` into the body. `n_extra_results` results beyond the
    /// done signal are surfaced by the body's `ret`.
    pub fn launch(
        &mut self,
        block: BlockId,
        start: ValueId,
        device: ValueId,
        operands: &[ValueId],
        n_extra_results: usize,
    ) -> LaunchParts {
        let body = self.new_block(None);
        let mut block_args = Vec::with_capacity(operands.len());
        for (i, &operand) in operands.iter().enumerate() {
            let ty = self.graph.value(operand).ty;
            let arg = self.new_value(ty, ValueDef::BlockArg { block: body, index: i });
            self.graph.blocks[body.0 as usize].args.push(arg);
            block_args.push(arg);
        }

        let mut all_operands = vec![start, device];
        all_operands.extend_from_slice(operands);
        let result_tys = vec![Type::Signal; n_extra_results + 1];
        let (op, results) = self.op(block, OpKind::Launch, &all_operands, &result_tys, &[body]);
        self.graph.blocks[body.0 as usize].parent_op = Some(op);

        LaunchParts {
            op,
            body,
            done: results[0],
            results: results[1..].to_vec(),
            block_args,
        }
    }

    /// Terminate a launch body.
    pub fn ret(&mut self, block: BlockId, values: &[ValueId]) {
        self.op(block, OpKind::Return, values, &[], &[]);
    }

    /// Counted loop over `[lb, ub)` by `step`, threading `iters`.
    pub fn for_loop(
        &mut self,
        block: BlockId,
        lb: ValueId,
        ub: ValueId,
        step: ValueId,
        iters: &[ValueId],
    ) -> ForParts {
        let body = self.new_block(None);
        let induction = self.new_value(Type::Index, ValueDef::BlockArg { block: body, index: 0 });
        self.graph.blocks[body.0 as usize].args.push(induction);
        let mut iter_args = Vec::with_capacity(iters.len());
        for (i, &iter) in iters.iter().enumerate() {
            let ty = self.graph.value(iter).ty;
            let arg = self.new_value(
                ty,
                ValueDef::BlockArg {
                    block: body,
                    index: i + 1,
                },
            );
            self.graph.blocks[body.0 as usize].args.push(arg);
            iter_args.push(arg);
        }

        let mut operands = vec![lb, ub, step];
        operands.extend_from_slice(iters);
        let result_tys: Vec<Type> = iters.iter().map(|&v| self.graph.value(v).ty).collect();
        let (op, results) = self.op(block, OpKind::For, &operands, &result_tys, &[body]);
        self.graph.blocks[body.0 as usize].parent_op = Some(op);

        ForParts {
            op,
            body,
            induction,
            iter_args,
            results,
        }
    }

    /// Terminate a loop body, yielding the next iteration's values.
    pub fn loop_yield(&mut self, block: BlockId, values: &[ValueId]) {
        self.op(block, OpKind::Yield, values, &[], &[]);
    }

    /// Terminate a function body.
    pub fn func_return(&mut self, block: BlockId) {
        self.op(block, OpKind::FuncReturn, &[], &[], &[]);
    }

    pub fn finish(self) -> Graph {
        self.graph
    }

    fn new_block(&mut self, parent_op: Option<OpId>) -> BlockId {
        let id = BlockId(self.graph.blocks.len() as u32);
        self.graph.blocks.push(BlockData {
            args: Vec::new(),
            ops: Vec::new(),
            parent_op,
        });
        id
    }

    fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId(self.graph.values.len() as u32);
        self.graph.values.push(ValueData { ty, def });
        id
    }

    fn op(
        &mut self,
        block: BlockId,
        kind: OpKind,
        operands: &[ValueId],
        result_tys: &[Type],
        regions: &[BlockId],
    ) -> (OpId, Vec<ValueId>) {
        let id = OpId(self.graph.ops.len() as u32);
        let index_in_block = self.graph.blocks[block.0 as usize].ops.len();
        let results: Vec<ValueId> = result_tys
            .iter()
            .enumerate()
            .map(|(i, &ty)| self.new_value(ty, ValueDef::Result { op: id, index: i }))
            .collect();
        self.graph.ops.push(OpData {
            kind,
            operands: operands.to_vec(),
            results: results.clone(),
            regions: regions.to_vec(),
            parent: block,
            index_in_block,
        });
        self.graph.blocks[block.0 as usize].ops.push(id);
        (id, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_arg_types_follow_operands() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let go = b.control(body, &[], 1)[0];
        let mem = b.create_mem(body, "SRAM", &[4], DataType::F32);
        let buf = b.alloc(body, mem, &[4], DataType::F32);
        let proc = b.create_proc(body, "generic");
        let parts = b.launch(body, go, proc, &[go, buf], 0);
        b.ret(parts.body, &[]);
        b.func_return(body);
        let g = b.finish();

        assert_eq!(g.value(parts.block_args[0]).ty, Type::Signal);
        assert_eq!(g.value(parts.block_args[1]).ty, Type::Buffer);
    }

    #[test]
    fn test_op_index_in_block() {
        let mut b = GraphBuilder::new();
        let (_f, body) = b.func("graph", &[]);
        let lb = b.const_index(body, 0);
        let ub = b.const_index(body, 2);
        let step = b.const_index(body, 1);
        let parts = b.for_loop(body, lb, ub, step, &[]);
        b.loop_yield(parts.body, &[]);
        b.func_return(body);
        let g = b.finish();

        assert_eq!(g.op(parts.op).index_in_block, 3);
        let ret_op = *g.block(body).ops.last().unwrap();
        assert_eq!(g.op(ret_op).index_in_block, 4);
    }
}
