// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The assist engine: gating, staging and committing of each assist.

use crate::gate;
use crate::gate::Gate;
use crate::gate::VmAssistContext;
use crate::policy::AddressingPolicy;
use crate::policy::S370;
use crate::registers::CpuState;
use crate::registry::Assist;
use crate::registry::AssistClass;
use crate::registry::AssistRegistry;
use crate::staged::Staged;
use crate::AssistSupport;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// An error reported by the support callouts while an assist ran.
#[derive(Debug, Error)]
pub enum Error<E> {
    /// Real storage could not be read or written.
    #[error("storage access error - {1:?} @ {0:#x}")]
    MemoryAccess(u32, OperationKind, #[source] E),
    /// A storage key could not be read or set.
    #[error("storage key access error @ {0:#x}")]
    StorageKey(u32, #[source] E),
    /// Dynamic address translation failed outside the architected faults.
    #[error("address translation error @ {0:#x}")]
    Translate(u32, #[source] E),
}

/// Direction of a failed storage access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A fetch.
    Read,
    /// A store.
    Write,
}

pub(crate) enum InternalError<E> {
    /// Leave the instruction to software. Nothing staged is committed.
    Decline(&'static str),
    /// Report an error to the caller.
    Error(Box<Error<E>>),
}

impl<E> From<Error<E>> for InternalError<E> {
    fn from(err: Error<E>) -> Self {
        InternalError::Error(Box::new(err))
    }
}

pub(crate) fn decline<E>(reason: &'static str) -> InternalError<E> {
    InternalError::Decline(reason)
}

/// Result of one phase of an assist.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// State is committed and the continuation is set.
    Done,
    /// Nothing changes; software handles the operation.
    Decline,
    /// Proceed to the next phase. From the final phase, a virtual machine has
    /// been dispatched.
    Chain,
}

/// Result of an assist entry point.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The assist completed and its effects were committed.
    Completed,
    /// A virtual machine was dispatched. The caller must check for pending
    /// interruptions before resuming execution.
    Dispatched,
    /// The assist declined and nothing changed. The instruction is left to
    /// the control program's software path.
    Declined,
    /// The facility is not installed. The caller presents an operation
    /// exception.
    OperationException,
}

/// The coarse lock held while a CPU timer interruption is armed or disarmed.
/// Shared by every engine of a machine.
#[derive(Debug, Clone, Default)]
pub struct InterruptLock(Arc<Mutex<()>>);

impl InterruptLock {
    /// Creates an unshared lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}

/// The ECPS:VM assist engine for one real processor.
///
/// Each entry point takes the real engine's register state and the support
/// callouts, performs the assist against a staged copy of both, and commits
/// the result only when the assist completes.
#[derive(Debug)]
pub struct EcpsVm<P = S370> {
    registry: Arc<AssistRegistry>,
    interrupt_lock: InterruptLock,
    _policy: PhantomData<fn() -> P>,
}

impl<P: AddressingPolicy> EcpsVm<P> {
    /// Creates an engine that shares `registry` and `interrupt_lock` with the
    /// other engines of the machine.
    pub fn new(registry: Arc<AssistRegistry>, interrupt_lock: InterruptLock) -> Self {
        tracing::debug!(policy = P::NAME, "ECPS:VM engine created");
        Self {
            registry,
            interrupt_lock,
            _policy: PhantomData,
        }
    }

    /// The registry this engine counts its assists in.
    pub fn registry(&self) -> &AssistRegistry {
        &self.registry
    }

    /// Runs a CP assist body behind the CP assist gate.
    pub(crate) fn run_cp<T: AssistSupport>(
        &self,
        assist: Assist,
        state: &mut CpuState,
        support: T,
        body: impl FnOnce(&mut Staged<T, P>) -> Result<Disposition, InternalError<T::Error>>,
    ) -> Result<Outcome, Error<T::Error>> {
        match gate::cp_assist(&self.registry, assist, state) {
            Gate::Proceed(()) => {}
            Gate::Decline(reason) => {
                self.log_decline(assist, reason);
                return Ok(Outcome::Declined);
            }
            Gate::Fault => {
                tracing::debug!(%assist, "ECPS:VM not installed, operation exception");
                return Ok(Outcome::OperationException);
            }
        }
        let mut staged = Staged::new(support, state.clone());
        let result = body(&mut staged);
        self.settle(assist, state, staged, result)
    }

    /// Runs a VM assist body behind the VM assist gate.
    pub(crate) fn run_vm<T: AssistSupport>(
        &self,
        assist: Assist,
        state: &mut CpuState,
        support: T,
        body: impl FnOnce(
            &mut Staged<T, P>,
            &VmAssistContext,
        ) -> Result<Disposition, InternalError<T::Error>>,
    ) -> Result<Outcome, Error<T::Error>> {
        let mut staged = Staged::new(support, state.clone());
        let gate = gate::vm_assist(&self.registry, assist, &mut staged);
        // The virtual timer pointer is not journaled: it holds even when the
        // assist declines.
        state.vtimer_address = staged.regs.vtimer_address;
        let ctx = match gate? {
            Gate::Proceed(ctx) => ctx,
            Gate::Decline(reason) => {
                self.log_decline(assist, reason);
                return Ok(Outcome::Declined);
            }
            Gate::Fault => return Ok(Outcome::Declined),
        };
        if self.registry.is_debug(assist) {
            tracing::debug!(
                %assist,
                vpsw_addr = ctx.vpsw_addr,
                vpsw = ?ctx.vpsw,
                pending = ctx.pending(),
                "VM assist entry"
            );
        }
        let result = body(&mut staged, &ctx);
        self.settle(assist, state, staged, result)
    }

    fn settle<T: AssistSupport>(
        &self,
        assist: Assist,
        state: &mut CpuState,
        staged: Staged<T, P>,
        result: Result<Disposition, InternalError<T::Error>>,
    ) -> Result<Outcome, Error<T::Error>> {
        let disposition = match result {
            Ok(disposition) => disposition,
            Err(InternalError::Decline(reason)) => {
                self.log_decline(assist, reason);
                Disposition::Decline
            }
            Err(InternalError::Error(err)) => return Err(*err),
        };
        match disposition {
            Disposition::Decline => {
                for (reg, value) in staged.into_handoff() {
                    state.gps[reg] = value;
                }
                Ok(Outcome::Declined)
            }
            Disposition::Done | Disposition::Chain => {
                staged.commit(state, &self.interrupt_lock)?;
                self.registry.record_hit(assist);
                if self.registry.is_debug(assist) {
                    tracing::debug!(%assist, psw = ?state.psw, "assist completed");
                } else {
                    tracing::trace!(%assist, ia = state.psw.ia, "assist completed");
                }
                Ok(if disposition == Disposition::Chain {
                    Outcome::Dispatched
                } else {
                    Outcome::Completed
                })
            }
        }
    }

    fn log_decline(&self, assist: Assist, reason: &'static str) {
        if self.registry.is_debug(assist) {
            tracing::debug!(%assist, reason, "assist declined");
        } else {
            tracing::trace!(%assist, reason, "assist declined");
        }
    }

    /// STEVL: stores the supported level at `op1`.
    pub fn stevl<T: AssistSupport>(
        &self,
        state: &mut CpuState,
        support: T,
        op1: u32,
    ) -> Result<Outcome, Error<T::Error>> {
        let level = self.registry.level();
        self.run_cp(Assist::Stevl, state, support, |s| {
            s.store_u32(op1, level)?;
            Ok(Disposition::Done)
        })
    }

    /// An assist the engine declares but does not perform. It passes through
    /// the gate of its class, is counted, and declines.
    pub fn unassisted<T: AssistSupport>(
        &self,
        assist: Assist,
        state: &mut CpuState,
        support: T,
    ) -> Result<Outcome, Error<T::Error>> {
        match assist.class() {
            AssistClass::Cp => self.run_cp(assist, state, support, |_| {
                Err(decline("assist not supported"))
            }),
            AssistClass::Vm => self.run_vm(assist, state, support, |_, _| {
                Err(decline("assist not supported"))
            }),
        }
    }
}
