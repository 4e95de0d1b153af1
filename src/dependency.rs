//! Per-type read/write fences for concurrent chunk access.
//!
//! The store never schedules work itself.
//! Callers register the types a unit of work reads and writes together with a [`JobHandle`]
//! that completes when the work finishes,
//! and obtain combined handles to wait on before touching those types.
//!
//! Each type keeps one write fence and a bounded ring of read fences.
//! Writers of a type are totally ordered; readers may overlap each other but never a writer.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use xias::Xias;

use crate::tracer::Tracer;
use crate::types::TypeIndex;
use crate::{Error, Result};


/// The default capacity of the read-fence ring of each type.
pub const DEFAULT_READ_FENCE_CAPACITY: usize = 17;

#[derive(Default)]
struct Signal {
    done:    Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    fn is_set(&self) -> bool { *self.done.lock() }

    fn set(&self) {
        *self.done.lock() = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.condvar.wait(&mut done);
        }
    }
}

/// An opaque token that completes when some prior work finishes.
///
/// A handle may combine any number of signals; it completes when all of them do.
/// The default handle is already complete.
#[derive(Clone, Default)]
pub struct JobHandle {
    signals: Vec<Arc<Signal>>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("pending", &self.signals.iter().filter(|signal| !signal.is_set()).count())
            .finish()
    }
}

impl JobHandle {
    /// Creates a pending handle and the completer that resolves it.
    pub fn new() -> (Self, Completer) {
        let signal = Arc::new(Signal::default());
        (Self { signals: vec![Arc::clone(&signal)] }, Completer { signal })
    }

    /// A handle that is already complete.
    pub fn completed() -> Self { Self::default() }

    /// Combines handles into one that completes when all of them do.
    pub fn combine<'t>(handles: impl IntoIterator<Item = &'t JobHandle>) -> Self {
        let mut signals: Vec<Arc<Signal>> = Vec::new();
        for handle in handles {
            for signal in &handle.signals {
                if !signal.is_set() && !signals.iter().any(|known| Arc::ptr_eq(known, signal)) {
                    signals.push(Arc::clone(signal));
                }
            }
        }
        Self { signals }
    }

    /// Whether all prior work has finished.
    pub fn is_complete(&self) -> bool { self.signals.iter().all(|signal| signal.is_set()) }

    /// Blocks the calling thread until all prior work has finished.
    pub fn wait(&self) {
        for signal in &self.signals {
            signal.wait();
        }
    }
}

/// Resolves a [`JobHandle`]. Dropping a completer also resolves it.
pub struct Completer {
    signal: Arc<Signal>,
}

impl Completer {
    /// Marks the work as finished.
    pub fn complete(self) {}
}

impl Drop for Completer {
    fn drop(&mut self) { self.signal.set() }
}

#[derive(Default)]
struct Fences {
    write: JobHandle,
    reads: Vec<JobHandle>,
}

/// Tracks outstanding reads and writes per component type.
pub struct DependencyTracker {
    fences:        Vec<Fences>,
    read_capacity: usize,
    exclusive:     bool,
    tracer:        Arc<dyn Tracer>,
}

impl fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("types", &self.fences.len())
            .field("read_capacity", &self.read_capacity)
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

impl DependencyTracker {
    pub(crate) fn new(num_types: usize, read_capacity: usize, tracer: Arc<dyn Tracer>) -> Self {
        assert!(read_capacity > 0, "read fence capacity must be positive");
        Self {
            fences: (0..num_types).map(|_| Fences::default()).collect(),
            read_capacity,
            exclusive: false,
            tracer,
        }
    }

    fn fences(&self, ty: TypeIndex) -> &Fences {
        self.fences.get(ty.get()).unwrap_or_else(|| panic!("{ty:?} is not registered"))
    }

    fn fences_mut(&mut self, ty: TypeIndex) -> &mut Fences {
        self.fences.get_mut(ty.get()).unwrap_or_else(|| panic!("{ty:?} is not registered"))
    }

    /// Registers work that reads `reads` and writes `writes`, completing with `handle`.
    ///
    /// The handle must already depend on [`get_dependency`](Self::get_dependency)
    /// for the same types; writers replace the type's fences.
    pub fn add_dependency(
        &mut self,
        reads: &[TypeIndex],
        writes: &[TypeIndex],
        handle: &JobHandle,
    ) -> Result<()> {
        if self.exclusive {
            return Err(Error::InExclusiveTransaction);
        }

        for &ty in writes {
            let fences = self.fences_mut(ty);
            fences.write = handle.clone();
            fences.reads.clear();
        }

        let capacity = self.read_capacity;
        for &ty in reads {
            if writes.contains(&ty) {
                continue;
            }

            let fences = self.fences_mut(ty);
            if fences.reads.len() >= capacity {
                let combined = JobHandle::combine(&fences.reads);
                fences.reads.clear();
                fences.reads.push(combined);
                log::trace!("collapsed read fences of {ty:?}");
            }
            fences.reads.push(handle.clone());
        }

        Ok(())
    }

    /// Returns the work that must finish before reading `reads` and writing `writes`.
    pub fn get_dependency(&self, reads: &[TypeIndex], writes: &[TypeIndex]) -> JobHandle {
        let read_fences = reads.iter().map(|&ty| &self.fences(ty).write);
        let write_fences = writes.iter().flat_map(|&ty| {
            let fences = self.fences(ty);
            std::iter::once(&fences.write).chain(&fences.reads)
        });
        JobHandle::combine(read_fences.chain(write_fences))
    }

    /// Waits until no work writes `ty`, so it can be read.
    pub fn complete_write_dependency(&mut self, ty: TypeIndex) {
        let fences = self.fences_mut(ty);
        if fences.write.signals.is_empty() {
            return;
        }
        fences.write.wait();
        fences.write = JobHandle::completed();
        self.tracer.dependency_completed(ty);
    }

    /// Waits until no work reads or writes `ty`, so it can be written.
    pub fn complete_read_and_write_dependency(&mut self, ty: TypeIndex) {
        let fences = self.fences_mut(ty);
        if fences.write.signals.is_empty() && fences.reads.is_empty() {
            return;
        }
        fences.write.wait();
        for read in &fences.reads {
            read.wait();
        }
        fences.write = JobHandle::completed();
        fences.reads.clear();
        self.tracer.dependency_completed(ty);
    }

    /// Waits until no work writes `ty`, without clearing the fence.
    pub(crate) fn wait_for_write(&self, ty: TypeIndex) { self.fences(ty).write.wait() }

    /// Waits for all outstanding work on every type.
    pub fn complete_all(&mut self) {
        for index in 0..self.fences.len() {
            self.complete_read_and_write_dependency(TypeIndex(index.small_int()));
        }
    }

    /// The number of read fences currently held for `ty`.
    pub fn read_fence_count(&self, ty: TypeIndex) -> usize { self.fences(ty).reads.len() }

    /// Whether an exclusive transaction is in progress.
    pub fn is_exclusive(&self) -> bool { self.exclusive }

    pub(crate) fn begin_exclusive_transaction(&mut self) -> Result<()> {
        if self.exclusive {
            return Err(Error::InExclusiveTransaction);
        }
        self.complete_all();
        self.exclusive = true;
        self.tracer.begin_exclusive_transaction();
        Ok(())
    }

    pub(crate) fn end_exclusive_transaction(&mut self) -> Result<()> {
        if !self.exclusive {
            return Err(Error::NotInExclusiveTransaction);
        }
        self.exclusive = false;
        self.tracer.end_exclusive_transaction();
        Ok(())
    }
}
