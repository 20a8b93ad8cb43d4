use std::sync::Arc;

use log::{info, warn};

use super::{PeerSync, Reduction, StopSignal};
use crate::{
    device::{DeviceGuard, DeviceId, Interconnect},
    error::Result,
    initialization::ParamGen,
    params::ParameterSet,
    solver::{ReplicaFactory, Solver},
    topology::{self, Topology},
};

/// Knobs of a synchronized run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub reduction: Reduction,
    /// The iteration the run resumes from.
    pub initial_iter: usize,
    /// Log the root's loss every this many iterations, `0` disables it.
    pub display: usize,
}

/// The outcome of `P2pSync::run`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Iterations completed by the root during this run.
    pub iterations: usize,
    /// The root's loss on its last completed iteration.
    pub loss: Option<f32>,
    /// The final parameters of the root replica.
    pub params: Vec<f32>,
}

/// Drives a synchronous data-parallel run over a set of devices.
///
/// The root replica trains on the calling thread, every other device gets its own
/// background thread, and the worker tree keeps every replica on the same parameters.
pub struct P2pSync {
    topology: Topology,
    root: Arc<PeerSync>,
    solver: Option<Solver>,
    stop: StopSignal,
    options: SyncOptions,
}

impl P2pSync {
    /// Creates a new `P2pSync`.
    ///
    /// # Arguments
    /// * `factory` - Builds every device's net and optimizer.
    /// * `devices` - The devices to train on, the first one is the root.
    /// * `interconnect` - What the devices know about each other, drives the pairing.
    /// * `param_gen` - Initializes the host replica every device copies its parameters from.
    /// * `options` - The run's knobs.
    ///
    /// # Returns
    /// The ready to run driver, or the first error found building the worker tree.
    pub fn new<F, I>(
        factory: &F,
        devices: &[DeviceId],
        interconnect: &I,
        param_gen: &mut dyn ParamGen,
        options: SyncOptions,
    ) -> Result<Self>
    where
        F: ReplicaFactory + ?Sized,
        I: Interconnect + ?Sized,
    {
        let topology = topology::compute(devices, interconnect)?;

        let host = ParameterSet::from_sizes(&factory.param_sizes())?;
        host.initialize(param_gen)?;

        let root = PeerSync::tree(&topology, &host, factory, options.reduction)?;
        let solver = root.take_solver();

        info!(
            root = topology.root().index(),
            devices = topology.len(),
            size = host.size();
            "built synchronization tree"
        );

        Ok(Self {
            topology,
            root,
            solver,
            stop: StopSignal::new(),
            options,
        })
    }

    /// A handle for stopping the run early, checked by the root between iterations.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The root worker, through which every other worker can be reached.
    pub fn root(&self) -> &Arc<PeerSync> {
        &self.root
    }

    /// Trains every replica up to `max_iter`.
    ///
    /// # Arguments
    /// * `max_iter` - The iteration the run ends at, counting from zero regardless of
    ///   the initial iteration.
    ///
    /// # Returns
    /// The run's report, or the first error raised by the root or any background thread.
    pub fn run(mut self, max_iter: usize) -> Result<RunReport> {
        let iters = max_iter.saturating_sub(self.options.initial_iter);
        let root_device = self.topology.root();

        let Some(mut solver) = self.solver.take() else {
            warn!("device {root_device} has no solver left to run");
            return Ok(self.report(0, None));
        };

        let _guard = DeviceGuard::bind(root_device);
        solver.set_stop_signal(self.stop.clone());
        solver.set_iter(self.options.initial_iter);
        solver.set_display(self.options.display);

        if let Err(e) = self.root.start_children(self.options.initial_iter, iters) {
            self.shutdown();
            return Err(e);
        }

        info!("starting optimization from iteration {}", self.options.initial_iter);

        let completed = solver.step(iters);
        let loss = solver.loss();
        drop(solver);

        // On a clean finish every child is already on its way out, stopping them early
        // would cut the final broadcast short.
        let stopped = match &completed {
            Ok(done) if *done == iters => self.root.join_tree(),
            _ => self.root.stop_tree(),
        };

        let done = completed?;
        stopped?;

        info!("optimization done after {done} iterations");
        Ok(self.report(done, loss))
    }

    fn report(&self, iterations: usize, loss: Option<f32>) -> RunReport {
        RunReport {
            iterations,
            loss,
            params: self.root.buffers().params().to_vec(),
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.root.stop_tree() {
            warn!("failed to stop the synchronization tree: {e}");
        }
    }
}

impl Drop for P2pSync {
    fn drop(&mut self) {
        self.solver = None;

        // Solvers that never got to start still hold their own worker.
        for worker in self.root.workers() {
            drop(worker.take_solver());
        }

        self.shutdown();
    }
}
