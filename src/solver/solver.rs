use std::sync::Arc;

use log::{debug, info};

use super::{Net, SolverCallback, Update};
use crate::{
    error::{Result, SyncErr},
    optimization::Optimizer,
    params::ParameterSet,
    sync::StopSignal,
};

/// The training context of one replica: runs its net, calls back into the
/// synchronization hooks and applies the optimizer.
pub struct Solver {
    net: Box<dyn Net>,
    optimizer: Box<dyn Optimizer>,
    params: Arc<ParameterSet>,
    callbacks: Vec<Arc<dyn SolverCallback>>,
    stop: Option<StopSignal>,
    display: Option<usize>,
    iter: usize,
    loss: Option<f32>,
}

impl Solver {
    /// Creates a new `Solver` bound to `params`.
    ///
    /// # Arguments
    /// * `net` - The replica's model.
    /// * `optimizer` - The update rule.
    /// * `params` - The flat buffers the net computes into.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the net doesn't fit the buffers.
    pub fn new(
        net: Box<dyn Net>,
        optimizer: Box<dyn Optimizer>,
        params: Arc<ParameterSet>,
    ) -> Result<Self> {
        let mut solver = Self {
            net,
            optimizer,
            params: Arc::clone(&params),
            callbacks: Vec::new(),
            stop: None,
            display: None,
            iter: 0,
            loss: None,
        };

        solver.bind(params)?;
        Ok(solver)
    }

    /// Points the net at another set of flat buffers.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the net doesn't fit the buffers.
    pub fn bind(&mut self, params: Arc<ParameterSet>) -> Result<()> {
        let expected: usize = self.net.param_sizes().iter().sum();

        if params.size() != expected {
            return Err(SyncErr::SizeMismatch {
                what: "solver binding",
                got: params.size(),
                expected,
            });
        }

        self.params = params;
        Ok(())
    }

    pub fn add_callback(&mut self, callback: Arc<dyn SolverCallback>) {
        self.callbacks.push(callback);
    }

    /// Makes `step` return early once `stop` is requested, checked between iterations.
    pub fn set_stop_signal(&mut self, stop: StopSignal) {
        self.stop = Some(stop);
    }

    /// Logs the loss every `display` iterations.
    pub fn set_display(&mut self, display: usize) {
        self.display = (display > 0).then_some(display);
    }

    /// The buffers the solver is bound to.
    pub fn params(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    /// The amount of iterations run so far.
    pub fn iter(&self) -> usize {
        self.iter
    }

    pub fn set_iter(&mut self, iter: usize) {
        self.iter = iter;
    }

    /// The loss of the last completed iteration.
    pub fn loss(&self) -> Option<f32> {
        self.loss
    }

    /// Runs up to `iters` iterations.
    ///
    /// # Returns
    /// The amount of iterations actually completed, fewer than `iters` if the solver was
    /// stopped.
    pub fn step(&mut self, iters: usize) -> Result<usize> {
        let start = self.iter;
        let end = start + iters;

        while self.iter < end {
            if self.stop.as_ref().is_some_and(StopSignal::is_requested) {
                info!("stop requested at iteration {}", self.iter);
                break;
            }

            match self.iterate() {
                Ok(loss) => self.loss = Some(loss),
                Err(SyncErr::Stopped { device }) => {
                    info!("device {device} stopped at iteration {}", self.iter);
                    break;
                }
                Err(e) => return Err(e),
            }

            self.iter += 1;

            if let (Some(display), Some(loss)) = (self.display, self.loss) {
                if self.iter % display == 0 {
                    info!("iteration {}, loss = {loss}", self.iter);
                }
            }
        }

        Ok(self.iter - start)
    }

    /// Runs iterations until `max_iter` is reached.
    pub fn solve(&mut self, max_iter: usize) -> Result<usize> {
        self.step(max_iter.saturating_sub(self.iter))
    }

    fn iterate(&mut self) -> Result<f32> {
        let Self {
            net,
            optimizer,
            params,
            callbacks,
            ..
        } = self;

        params.zero_grads();
        let loss = params.with_tensors(|p, g| net.forward_backward(p, g))?;

        let mut update = Update::Apply;
        for callback in callbacks.iter() {
            if callback.before_iteration()? == Update::Skip {
                update = Update::Skip;
            }
        }

        if update == Update::Apply {
            params.with_update(|grad, p| optimizer.update_params(grad, p))?;
        }

        for callback in callbacks.iter() {
            callback.finish_iteration()?;
        }

        debug!(iter = self.iter, loss = loss; "iteration done");
        Ok(loss)
    }
}
