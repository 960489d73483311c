/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! SSA-based linear-scan register allocation.
//!
//! The pipeline runs in stages over an [`Env`](data::Env):
//!
//! - lifetime analysis: per-block liveness and lifetime intervals;
//! - the linear-scan walk: registers, splits, spills;
//! - resolution: operand allocations, split-connection moves, SSA
//!   data-flow reconciliation at block edges, move scheduling;
//! - redundant-move elimination and safepoint records.

pub(crate) mod data;
mod liveness;
mod resolve;
mod spill_elim;
mod stackmap;
mod verify;
mod walk;

#[cfg(test)]
mod tests;

pub use data::Stats;

use crate::cfg::CFGInfo;
use crate::ssa::validate_ssa;
use crate::{Function, MachineEnv, Output, RegAllocError, RegallocOptions};
use data::Env;

pub fn run<F: Function>(
    func: &F,
    mach_env: &MachineEnv,
    opts: &RegallocOptions,
) -> Result<Output, RegAllocError> {
    if opts.verbose_log {
        log::debug!(
            "allocating function: {} blocks, {} insts, {} vregs",
            func.num_blocks(),
            func.num_insts(),
            func.num_vregs()
        );
    }

    let cfginfo = CFGInfo::new(func)?;
    validate_ssa(func, &cfginfo)?;

    let mut env = Env::new(func, mach_env, cfginfo, *opts);

    env.compute_liveness()?;
    env.build_intervals();
    env.walk_intervals()?;
    env.assign_allocations();
    env.insert_split_moves();
    env.resolve_data_flow()?;
    env.schedule_inserted_moves()?;
    env.eliminate_spill_moves();
    env.compute_safepoints();

    if opts.verify {
        env.verify_allocation()?;
    }

    trace!("allocation stats: {:?}", env.stats);

    Ok(Output {
        num_spillslots: env.num_spillslots,
        edits: env.edits,
        edge_moves: env.edge_moves,
        allocs: env.allocs,
        inst_alloc_offsets: env.inst_alloc_offsets,
        safepoint_locations: env.safepoint_locations,
        stats: env.stats,
    })
}
