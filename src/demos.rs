//! Built-in demo graphs runnable from the CLI.
//!
//! Each demo builds a complete `graph` function exercising a different
//! corner of the engine: a single DMA transfer, a tiled copy loop, and
//! a two-processor launch chain.

use crate::ir::{DataType, Graph, GraphBuilder, Type};

/// Names accepted by [`build`].
pub fn list() -> &'static [&'static str] {
    &["memcopy", "tiled-loop", "launch-chain"]
}

/// Build a demo graph by name.
pub fn build(name: &str) -> Option<Graph> {
    match name {
        "memcopy" => Some(memcopy()),
        "tiled-loop" => Some(tiled_loop()),
        "launch-chain" => Some(launch_chain()),
        _ => None,
    }
}

/// One DRAM buffer staged into SRAM through a DMA.
fn memcopy() -> Graph {
    let mut b = GraphBuilder::new();
    let (_f, body) = b.func("graph", &[]);
    let dram = b.create_mem(body, "DRAM", &[64], DataType::F32);
    let sram = b.create_mem(body, "SRAM", &[64], DataType::F32);
    let dma = b.create_dma(body);
    let src = b.alloc(body, dram, &[64], DataType::F32);
    let dst = b.alloc(body, sram, &[64], DataType::F32);
    let done = b.mem_copy(body, src, dst, dma, &[]);
    b.await_signals(body, &[done]);
    b.func_return(body);
    b.finish()
}

/// Four tile copies chained through the loop's iteration signal.
fn tiled_loop() -> Graph {
    let mut b = GraphBuilder::new();
    let (_f, body) = b.func("graph", &[]);
    let dram = b.create_mem(body, "DRAM", &[16], DataType::F32);
    let sram = b.create_mem(body, "SRAM", &[16], DataType::F32);
    let dma = b.create_dma(body);
    let src = b.alloc(body, dram, &[16], DataType::F32);
    let dst = b.alloc(body, sram, &[16], DataType::F32);

    let go = b.control(body, &[], 1)[0];
    let lb = b.const_index(body, 0);
    let ub = b.const_index(body, 4);
    let step = b.const_index(body, 1);
    let tiles = b.for_loop(body, lb, ub, step, &[go]);
    let done = b.mem_copy(tiles.body, src, dst, dma, &[tiles.iter_args[0]]);
    b.loop_yield(tiles.body, &[done]);

    b.await_signals(body, &[tiles.results[0]]);
    b.func_return(body);
    b.finish()
}

/// Stage data in, compute on one processor, copy back from another
/// launch gated on the first one's done signal.
fn launch_chain() -> Graph {
    let mut b = GraphBuilder::new();
    let (_f, body) = b.func("graph", &[]);
    let dram = b.create_mem(body, "DRAM", &[32], DataType::F32);
    let sram = b.create_mem(body, "SRAM", &[32], DataType::F32);
    let dma = b.create_dma(body);
    let src = b.alloc(body, dram, &[32], DataType::F32);
    let dst = b.alloc(body, sram, &[32], DataType::F32);
    let proc_a = b.create_proc(body, "generic");
    let proc_b = b.create_proc(body, "generic");

    let staged = b.mem_copy(body, src, dst, dma, &[]);

    // Processor A reads the staged tile, computes, writes it back.
    let a = b.launch(body, staged, proc_a, &[dst], 0);
    let tile = a.block_args[0];
    let value = b.mem_read(a.body, tile, None);
    let result = b.compute(a.body, "crunch", &[value], Type::Tensor);
    b.mem_write(a.body, result, tile);
    b.ret(a.body, &[]);

    // Processor B drains the result once A is done.
    let bl = b.launch(body, a.done, proc_b, &[dst, src], 0);
    let back = b.mem_copy(bl.body, bl.block_args[0], bl.block_args[1], dma, &[]);
    b.await_signals(bl.body, &[back]);
    b.ret(bl.body, &[]);

    b.await_signals(body, &[bl.done]);
    b.func_return(body);
    b.finish()
}
