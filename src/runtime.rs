//! Drives a state graph on the current task, resolving each suspension by
//! awaiting the pending operation and firing the edge it names.

use futures::future::LocalBoxFuture;
use tracing::trace;

use crate::{
    error::Result,
    state::{Outcome, StateId, StateMachine},
};

/// A graph payload whose suspensions can be completed asynchronously.
pub trait Cooperative {
    type Pending;

    /// Awaits `pending` and returns the edge to fire once it has completed.
    fn complete(&mut self, pending: Self::Pending) -> LocalBoxFuture<'_, Result<&'static str>>;
}

/// Runs `machine` from its entry state until a callback halts, returning the
/// halting state.
pub async fn drive<C>(machine: &StateMachine<C, C::Pending>, ctx: &mut C) -> Result<StateId>
where
    C: Cooperative,
{
    let mut outcome = machine.run(machine.entry(), ctx)?;
    loop {
        match outcome {
            Outcome::Halted(state) => return Ok(state),
            Outcome::Suspended { state, pending } => {
                let edge = ctx.complete(pending).await?;
                trace!(state = machine.name(state), edge, "operation completed");
                outcome = machine.run_next(state, edge, ctx)?;
            }
        }
    }
}
