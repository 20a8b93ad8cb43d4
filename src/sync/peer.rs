use std::{
    fmt::{self, Display},
    sync::{Arc, OnceLock, Weak},
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{BackgroundTask, BlockingQueue};
use crate::{
    device::{self, DeviceGuard, DeviceId},
    error::{Result, SyncErr},
    params::{DeviceBuffer, DeviceParameterSet, ParameterSet},
    solver::{ReplicaFactory, Solver, SolverCallback, Update},
    topology::Topology,
};

/// How the root combines the gradients of every replica before its optimizer step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// The element-wise sum of every replica's gradient.
    #[default]
    Sum,
    /// The sum divided by the amount of replicas.
    Mean,
}

/// A notification posted to a worker's handoff queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// A child left its combined gradient in its staging buffer.
    Gradients { from: DeviceId },
    /// The parent wrote the new parameters into this worker's buffer.
    Parameters { from: DeviceId },
}

impl Display for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gradients { from } => write!(f, "gradients from device {from}"),
            Self::Parameters { from } => write!(f, "parameters from device {from}"),
        }
    }
}

/// The synchronization worker of one device.
///
/// It owns the device's flat buffers, hooks into its replica's solver and, for every
/// device but the root, runs that solver on a background thread. Each iteration the
/// gradients flow up the tree, the root applies the update and the parameters flow back
/// down.
pub struct PeerSync {
    buffers: DeviceParameterSet,
    parent_device: Option<DeviceId>,
    parent: OnceLock<Weak<PeerSync>>,
    children: Vec<Arc<PeerSync>>,
    queue: BlockingQueue<Handoff>,
    parent_grads: Option<DeviceBuffer>,
    reduction: Reduction,
    replicas: usize,
    solver: Mutex<Option<Solver>>,
    task: Mutex<Option<BackgroundTask>>,
}

impl PeerSync {
    /// Builds the worker tree of `topology`, children before their parents.
    ///
    /// # Arguments
    /// * `topology` - The device tree.
    /// * `root` - The host replica every device copies its initial parameters from.
    /// * `factory` - Builds each device's net and optimizer.
    /// * `reduction` - How the root combines the gradients.
    ///
    /// # Returns
    /// The root worker, owning the whole tree.
    pub fn tree<F>(
        topology: &Topology,
        root: &ParameterSet,
        factory: &F,
        reduction: Reduction,
    ) -> Result<Arc<Self>>
    where
        F: ReplicaFactory + ?Sized,
    {
        Self::build(topology, topology.root(), root, factory, reduction)
    }

    fn build<F>(
        topology: &Topology,
        device: DeviceId,
        root: &ParameterSet,
        factory: &F,
        reduction: Reduction,
    ) -> Result<Arc<Self>>
    where
        F: ReplicaFactory + ?Sized,
    {
        let mut children = Vec::new();
        for child in topology.children_of(device) {
            match Self::build(topology, child, root, factory, reduction) {
                Ok(child) => children.push(child),
                Err(e) => return Err(Self::release(&children, e)),
            }
        }

        let parent_device = topology.parent_of(device);
        let (buffers, parent_grads, mut solver) =
            match Self::replica(device, parent_device, root, factory) {
                Ok(parts) => parts,
                Err(e) => return Err(Self::release(&children, e)),
            };

        let sync = Arc::new(Self {
            buffers,
            parent_device,
            parent: OnceLock::new(),
            children,
            queue: BlockingQueue::new(),
            parent_grads,
            reduction,
            replicas: topology.len(),
            solver: Mutex::new(None),
            task: Mutex::new(None),
        });

        for child in &sync.children {
            let linked = child.parent.set(Arc::downgrade(&sync));
            debug_assert!(linked.is_ok(), "device {} already has a parent", child.device());
        }

        solver.add_callback(Arc::clone(&sync) as Arc<dyn SolverCallback>);
        *sync.solver.lock() = Some(solver);

        debug!(device = device.index(), children = sync.children.len(); "built sync worker");
        Ok(sync)
    }

    fn replica<F>(
        device: DeviceId,
        parent_device: Option<DeviceId>,
        root: &ParameterSet,
        factory: &F,
    ) -> Result<(DeviceParameterSet, Option<DeviceBuffer>, Solver)>
    where
        F: ReplicaFactory + ?Sized,
    {
        let buffers = DeviceParameterSet::new(root, device)?;

        let parent_grads = match parent_device {
            Some(parent) => {
                let _guard = DeviceGuard::bind(parent);
                Some(DeviceBuffer::zeroed(buffers.size())?)
            }
            None => None,
        };

        let solver = {
            let _guard = DeviceGuard::bind(device);
            let net = factory.net(device)?;
            let optimizer = factory.optimizer(buffers.size());
            Solver::new(net, optimizer, buffers.shared())?
        };

        Ok((buffers, parent_grads, solver))
    }

    /// Breaks the worker/solver cycles of subtrees that won't be part of a tree.
    fn release(children: &[Arc<Self>], e: SyncErr) -> SyncErr {
        for worker in children.iter().flat_map(PeerSync::workers) {
            drop(worker.take_solver());
        }

        e
    }

    /// The device this worker synchronizes.
    pub fn device(&self) -> DeviceId {
        self.buffers.device()
    }

    /// This worker's flat buffers.
    pub fn buffers(&self) -> &ParameterSet {
        &self.buffers
    }

    /// The parent worker, `None` for the root or once the parent is gone.
    pub fn parent(&self) -> Option<Arc<PeerSync>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// The staging buffer on the parent's device this worker reports its gradient
    /// through, `None` for the root.
    pub fn staged_grads(&self) -> Option<&DeviceBuffer> {
        self.parent_grads.as_ref()
    }

    /// Posts a notification to this worker's handoff queue.
    ///
    /// Dropped if the queue is already closed, the worker is shutting down anyway.
    pub fn post(&self, handoff: Handoff) {
        if !self.queue.push(handoff) {
            debug!(device = self.device().index(); "dropped {handoff} on a closed queue");
        }
    }

    pub fn children(&self) -> &[Arc<PeerSync>] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent_device.is_none()
    }

    /// Every worker of the subtree rooted here, parents before children.
    pub fn workers(self: &Arc<Self>) -> Vec<Arc<PeerSync>> {
        let mut workers = vec![Arc::clone(self)];
        for child in &self.children {
            workers.extend(child.workers());
        }
        workers
    }

    /// Takes this worker's solver out, it can only be taken once.
    pub fn take_solver(&self) -> Option<Solver> {
        self.solver.lock().take()
    }

    /// Starts the background thread of every non-root worker below this one.
    ///
    /// # Arguments
    /// * `initial_iter` - The iteration every replica resumes from.
    /// * `iters` - The amount of iterations each replica runs.
    ///
    /// # Returns
    /// `ThreadStart` if a thread couldn't be spawned.
    pub fn start_children(&self, initial_iter: usize, iters: usize) -> Result<()> {
        for child in &self.children {
            child.start(initial_iter, iters)?;
            child.start_children(initial_iter, iters)?;
        }

        Ok(())
    }

    fn start(&self, initial_iter: usize, iters: usize) -> Result<()> {
        let device = self.device();

        let Some(mut solver) = self.take_solver() else {
            warn!("device {device} was already started");
            return Ok(());
        };

        let task = BackgroundTask::spawn(format!("p2p-sync-{device}"), move |stop| {
            device::set_current(device);
            solver.set_stop_signal(stop);
            solver.set_iter(initial_iter);

            let result = solver.step(iters);
            match &result {
                Ok(done) => info!("device {device} ran {done} iterations"),
                Err(e) => error!("device {device} failed: {e}"),
            }

            result.map(|_| ())
        })?;

        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Stops every background thread of this subtree and waits for them.
    ///
    /// Queues are closed first so that no worker stays blocked on a parent or a child
    /// that already left.
    ///
    /// # Returns
    /// The first error reported by any thread.
    pub fn stop_tree(&self) -> Result<()> {
        self.close_tree();
        self.join_tree()
    }

    fn close_tree(&self) {
        if let Some(task) = self.task.lock().as_ref() {
            task.request_stop();
        }

        self.queue.close();
        self.children.iter().for_each(|child| child.close_tree());
    }

    /// Waits for every background thread of this subtree to finish on its own.
    ///
    /// # Returns
    /// The first error reported by any thread.
    pub fn join_tree(&self) -> Result<()> {
        let mut result = Ok(());

        for child in &self.children {
            let joined = child.join_tree();
            if result.is_ok() {
                result = joined;
            }
        }

        if let Some(task) = self.task.lock().take() {
            let joined = task.join();
            if result.is_ok() {
                result = joined;
            }
        }

        result
    }

    fn wait(&self, expected: &'static str) -> Result<Handoff> {
        let device = self.device();

        self.queue
            .pop_logged(&format!("device {device} waiting for {expected}"))
            .ok_or(SyncErr::Stopped { device })
    }

    fn protocol_err(&self, expected: &'static str, got: Handoff) -> SyncErr {
        SyncErr::Protocol {
            device: self.device(),
            expected,
            got: got.to_string(),
        }
    }

    /// Adds the staged gradient of every child into this worker's gradient, popping
    /// exactly one notification per child.
    fn reduce_children(&self) -> Result<()> {
        let mut pending: Vec<&Arc<PeerSync>> = self.children.iter().collect();

        while !pending.is_empty() {
            let handoff = self.wait("child gradients")?;

            let Handoff::Gradients { from } = handoff else {
                return Err(self.protocol_err("child gradients", handoff));
            };

            let Some(idx) = pending.iter().position(|child| child.device() == from) else {
                return Err(self.protocol_err("gradients from a pending child", handoff));
            };

            let child = pending.swap_remove(idx);
            if let Some(staged) = &child.parent_grads {
                staged.add_to(self.buffers.grads())?;
            }

            debug!(device = self.device().index(), child = from.index(); "reduced child gradients");
        }

        Ok(())
    }
}

impl SolverCallback for PeerSync {
    fn before_iteration(&self) -> Result<Update> {
        self.reduce_children()?;

        let (Some(parent_device), Some(staged)) = (self.parent_device, &self.parent_grads) else {
            if self.reduction == Reduction::Mean {
                self.buffers.grads().scale(1. / self.replicas as f32);
            }

            return Ok(Update::Apply);
        };

        self.buffers.grads().copy_to(staged)?;

        let device = self.device();
        match self.parent() {
            Some(parent) => parent.post(Handoff::Gradients { from: device }),
            None => return Err(SyncErr::Stopped { device }),
        }

        match self.wait("parent parameters")? {
            Handoff::Parameters { from } if from == parent_device => {
                debug!(device = device.index(); "received parameters");
                Ok(Update::Skip)
            }
            other => Err(self.protocol_err("parameters from the parent", other)),
        }
    }

    fn finish_iteration(&self) -> Result<()> {
        let device = self.device();

        for child in &self.children {
            self.buffers.params().copy_to(child.buffers.params())?;
            child.post(Handoff::Parameters { from: device });
        }

        Ok(())
    }
}

impl Drop for PeerSync {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            self.queue.close();

            if let Err(e) = task.stop() {
                warn!("device {} stopped with an error: {e}", self.device());
            }
        }
    }
}
