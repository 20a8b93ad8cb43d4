use std::{
    collections::HashMap,
    sync::Arc,
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use p2p_sync::{
    P2pSync, SyncErr, SyncOptions,
    device::{Adjacent, DeviceId, StaticInterconnect},
    error::Result,
    initialization::ConstParamGen,
    optimization::Optimizer,
    params::{Tensors, TensorsMut},
    params::ParameterSet,
    solver::{Net, ReplicaFactory, SolverCallback, Update},
    sync::{Handoff, PeerSync, Reduction},
    topology,
};

type Observed = Arc<Mutex<HashMap<(DeviceId, usize), Vec<f32>>>>;

/// Writes the same gradient value on every iteration and keeps the parameters each
/// iteration started from.
struct ConstGradNet {
    device: DeviceId,
    size: usize,
    value: f32,
    fail_at: Option<usize>,
    iter: usize,
    observed: Observed,
}

impl Net for ConstGradNet {
    fn param_sizes(&self) -> Vec<usize> {
        vec![self.size]
    }

    fn forward_backward(&mut self, params: Tensors<'_>, mut grads: TensorsMut<'_>) -> Result<f32> {
        if self.fail_at == Some(self.iter) {
            return Err(SyncErr::Data("net blew up".into()));
        }

        self.observed
            .lock()
            .insert((self.device, self.iter), params.flat().to_vec());

        self.iter += 1;
        grads.flat().fill(self.value);
        Ok(self.value)
    }
}

/// Plain gradient descent with a learning rate of 1 that records every gradient it
/// applies.
struct Recording {
    seen: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl Optimizer for Recording {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        self.seen.lock().push(grad.to_vec());
        params.iter_mut().zip(grad).for_each(|(p, g)| *p -= g);
        Ok(())
    }
}

#[derive(Default)]
struct Replicas {
    size: usize,
    grads: HashMap<DeviceId, f32>,
    fail_at: Option<(DeviceId, usize)>,
    seen: Arc<Mutex<Vec<Vec<f32>>>>,
    observed: Observed,
}

impl Replicas {
    fn new(size: usize, grads: &[(usize, f32)]) -> Self {
        Self {
            size,
            grads: grads
                .iter()
                .map(|&(device, value)| (DeviceId::new(device), value))
                .collect(),
            ..Default::default()
        }
    }

    fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self.grads.keys().copied().collect();
        devices.sort();
        devices
    }

    fn seen(&self) -> Vec<Vec<f32>> {
        self.seen.lock().clone()
    }
}

impl ReplicaFactory for Replicas {
    fn param_sizes(&self) -> Vec<usize> {
        vec![self.size]
    }

    fn net(&self, device: DeviceId) -> Result<Box<dyn Net>> {
        let fail_at = self
            .fail_at
            .and_then(|(failing, iter)| (failing == device).then_some(iter));

        Ok(Box::new(ConstGradNet {
            device,
            size: self.size,
            value: self.grads.get(&device).copied().unwrap_or_default(),
            fail_at,
            iter: 0,
            observed: Arc::clone(&self.observed),
        }))
    }

    fn optimizer(&self, _size: usize) -> Box<dyn Optimizer> {
        Box::new(Recording {
            seen: Arc::clone(&self.seen),
        })
    }
}

fn build(replicas: &Replicas, reduction: Reduction) -> P2pSync {
    let mut param_gen = ConstParamGen::new(0., replicas.size);
    let options = SyncOptions {
        reduction,
        ..Default::default()
    };

    P2pSync::new(
        replicas,
        &replicas.devices(),
        &Adjacent,
        &mut param_gen,
        options,
    )
    .unwrap()
}

/// Builds a tree by hand, with every solver taken out so the hooks can be driven
/// directly.
fn idle_tree(replicas: &Replicas) -> Arc<PeerSync> {
    let topology = topology::compute(&replicas.devices(), &Adjacent).unwrap();
    let host = ParameterSet::from_sizes(&[replicas.size]).unwrap();
    let root = PeerSync::tree(&topology, &host, replicas, Reduction::Sum).unwrap();

    root.workers().iter().for_each(|worker| drop(worker.take_solver()));
    root
}

/// Pairs devices far apart in the list, so the tree shape differs from the adjacent one.
fn scrambled(n: usize) -> StaticInterconnect {
    let boards: Vec<_> = (0..n / 2)
        .map(|i| vec![DeviceId::new(i), DeviceId::new(n - 1 - i)])
        .collect();

    let peers: Vec<_> = (0..n)
        .map(|i| (DeviceId::new(i), DeviceId::new((i + 3) % n)))
        .collect();

    StaticInterconnect::new(&boards, &peers)
}

fn assert_all_params_equal(root: &Arc<PeerSync>, expected: &[f32]) {
    for worker in root.workers() {
        assert_eq!(
            worker.buffers().params().to_vec(),
            expected,
            "device {} is out of sync",
            worker.device()
        );
    }
}

#[test]
fn root_applies_the_child_gradient() {
    let replicas = Replicas::new(10, &[(0, 0.), (1, 1.)]);
    let report = build(&replicas, Reduction::Sum).run(1).unwrap();

    assert_eq!(report.iterations, 1);
    assert_eq!(replicas.seen(), [vec![1.; 10]]);
    assert_eq!(report.params, [-1.; 10]);
}

#[test]
fn root_applies_the_exact_sum_every_iteration() {
    let grads: Vec<_> = (0..7).map(|d| (d, (d + 1) as f32)).collect();
    let replicas = Replicas::new(3, &grads);

    let sync = build(&replicas, Reduction::Sum);
    let root = Arc::clone(sync.root());
    let report = sync.run(5).unwrap();

    let seen = replicas.seen();
    assert_eq!(seen.len(), 5);
    assert!(seen.iter().all(|grad| grad == &[28.; 3]));

    assert_eq!(report.params, [-140.; 3]);
    assert_all_params_equal(&root, &report.params);
}

#[test]
fn mean_reduction_divides_by_the_device_count() {
    let replicas = Replicas::new(2, &[(0, 1.), (1, 2.), (2, 3.), (3, 4.)]);
    let report = build(&replicas, Reduction::Mean).run(2).unwrap();

    assert_eq!(replicas.seen(), [vec![2.5; 2], vec![2.5; 2]]);
    assert_eq!(report.params, [-5.; 2]);
}

#[test]
fn single_device_trains_alone() {
    let replicas = Replicas::new(4, &[(3, 0.5)]);
    let report = build(&replicas, Reduction::Sum).run(4).unwrap();

    assert_eq!(report.iterations, 4);
    assert_eq!(report.loss, Some(0.5));
    assert_eq!(report.params, [-2.; 4]);
}

#[test]
fn initial_iteration_shortens_the_run() {
    let replicas = Replicas::new(1, &[(0, 1.), (1, 1.)]);
    let mut param_gen = ConstParamGen::new(0., 1);
    let options = SyncOptions {
        initial_iter: 7,
        ..Default::default()
    };

    let sync = P2pSync::new(
        &replicas,
        &replicas.devices(),
        &Adjacent,
        &mut param_gen,
        options,
    )
    .unwrap();

    assert_eq!(sync.run(10).unwrap().iterations, 3);
    assert_eq!(replicas.seen().len(), 3);
}

#[test]
fn broadcast_reaches_every_leaf() {
    let replicas = Replicas::new(4, &[(0, 0.), (1, 0.), (2, 0.), (3, 0.)]);
    let topology = topology::compute(&replicas.devices(), &Adjacent).unwrap();

    let host = ParameterSet::from_sizes(&[4]).unwrap();
    let root = PeerSync::tree(&topology, &host, &replicas, Reduction::Sum).unwrap();
    let workers = root.workers();

    // Nothing is started here, so the hooks are driven by hand.
    workers.iter().for_each(|worker| drop(worker.take_solver()));

    let params = [1., 2., 3., 4.];
    root.buffers().params().copy_from_slice(&params).unwrap();

    for worker in &workers {
        worker.finish_iteration().unwrap();
    }

    assert_all_params_equal(&root, &params);
}

#[test]
fn closed_queue_stops_a_waiting_child() {
    let replicas = Replicas::new(1, &[(0, 0.), (1, 1.)]);
    let topology = topology::compute(&replicas.devices(), &Adjacent).unwrap();

    let host = ParameterSet::from_sizes(&[1]).unwrap();
    let root = PeerSync::tree(&topology, &host, &replicas, Reduction::Sum).unwrap();
    root.workers().iter().for_each(|worker| drop(worker.take_solver()));

    root.stop_tree().unwrap();

    let child = Arc::clone(&root.children()[0]);
    assert!(matches!(
        child.before_iteration(),
        Err(SyncErr::Stopped { device }) if device == DeviceId::new(1)
    ));
}

#[test]
fn stop_signal_ends_the_run_early() {
    let replicas = Replicas::new(1, &[(0, 1.), (1, 1.), (2, 1.)]);
    let sync = build(&replicas, Reduction::Sum);
    let root = Arc::clone(sync.root());
    let stop = sync.stop_signal();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        stop.request();
    });

    let report = sync.run(usize::MAX).unwrap();
    stopper.join().unwrap();

    assert!(report.iterations < usize::MAX);
    assert_eq!(replicas.seen().len(), report.iterations);
    assert_eq!(root.buffers().params().to_vec(), report.params);
}

#[test]
fn root_failure_tears_the_tree_down() {
    let mut replicas = Replicas::new(2, &[(0, 1.), (1, 1.), (2, 1.), (3, 1.)]);
    replicas.fail_at = Some((DeviceId::new(0), 3));

    let result = build(&replicas, Reduction::Sum).run(10);

    assert!(matches!(result, Err(SyncErr::Data(_))));
    assert_eq!(replicas.seen().len(), 3);
}

#[test]
fn every_device_starts_each_iteration_from_the_reduced_update() {
    const ITERS: usize = 50;

    for n in 1..=9 {
        let grads: Vec<_> = (0..n).map(|d| (d, (d + 1) as f32)).collect();
        let total: f32 = grads.iter().map(|&(_, g)| g).sum();
        let replicas = Replicas::new(3, &grads);

        let mut param_gen = ConstParamGen::new(0., replicas.size);
        let sync = P2pSync::new(
            &replicas,
            &replicas.devices(),
            &scrambled(n),
            &mut param_gen,
            SyncOptions::default(),
        )
        .unwrap();

        let report = sync.run(ITERS).unwrap();
        assert_eq!(report.iterations, ITERS);

        let observed = replicas.observed.lock();
        assert_eq!(observed.len(), n * ITERS, "{n} devices");

        for (&(device, iter), params) in observed.iter() {
            let expected = -(iter as f32) * total;
            assert!(
                params.iter().all(|&p| p == expected),
                "{n} devices: device {device} started iteration {iter} from {params:?}, \
                 expected {expected}"
            );
        }

        assert_eq!(report.params, [-(ITERS as f32) * total; 3]);
    }
}

#[test]
fn root_sums_children_reporting_in_any_order() {
    let grads: Vec<_> = (0..5).map(|d| (d, 0.)).collect();
    let replicas = Replicas::new(2, &grads);
    let root = idle_tree(&replicas);

    root.buffers().grads().copy_from_slice(&[0.5, 0.5]).unwrap();

    let mut expected = 0.5;
    for child in root.children() {
        let value = (child.device().index() + 1) as f32;
        expected += value;

        child
            .staged_grads()
            .unwrap()
            .copy_from_slice(&[value, value])
            .unwrap();
    }

    for child in root.children().iter().rev() {
        root.post(Handoff::Gradients {
            from: child.device(),
        });
    }

    assert!(root.children().len() > 2);
    assert_eq!(root.before_iteration().unwrap(), Update::Apply);
    assert_eq!(root.buffers().grads().to_vec(), [expected; 2]);
}

#[test]
fn duplicate_child_report_is_a_protocol_error() {
    let replicas = Replicas::new(1, &[(0, 0.), (1, 0.), (2, 0.), (3, 0.)]);
    let root = idle_tree(&replicas);
    let first = root.children()[0].device();

    root.post(Handoff::Gradients { from: first });
    root.post(Handoff::Gradients { from: first });

    assert!(matches!(
        root.before_iteration(),
        Err(SyncErr::Protocol { device, .. }) if device == DeviceId::new(0)
    ));
}

#[test]
fn parameters_sent_to_the_root_are_a_protocol_error() {
    let replicas = Replicas::new(1, &[(0, 0.), (1, 0.)]);
    let root = idle_tree(&replicas);

    root.post(Handoff::Parameters {
        from: DeviceId::new(1),
    });

    assert!(matches!(
        root.before_iteration(),
        Err(SyncErr::Protocol { .. })
    ));
}

#[test]
fn children_point_back_to_their_parent() {
    let replicas = Replicas::new(1, &(0..7).map(|d| (d, 0.)).collect::<Vec<_>>());
    let root = idle_tree(&replicas);

    assert!(root.parent().is_none());
    assert!(root.staged_grads().is_none());

    for worker in root.workers() {
        for child in worker.children() {
            let parent = child.parent().unwrap();
            assert!(Arc::ptr_eq(&parent, &worker), "device {}", child.device());
            assert_eq!(child.staged_grads().unwrap().device(), Some(worker.device()));
        }
    }
}
