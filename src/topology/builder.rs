use std::collections::HashSet;

use log::{debug, info};

use super::{DevicePair, Topology};
use crate::{
    device::{DeviceId, Interconnect},
    error::{Result, SyncErr},
};

/// Groups `devices` in parent/child pairs forming a binary tree.
///
/// The list is halved level by level: every device still in the list takes the first
/// later device close to it as a child, the child leaves the list and an odd device out
/// is carried to the next level. Devices sharing a board are paired first, then devices
/// with peer access and finally whatever is left by adjacency. The first device of the
/// list ends up as the root.
///
/// # Arguments
/// * `devices` - The ordered list of devices, adjacent entries are assumed to be close.
/// * `interconnect` - Proximity information about the devices.
///
/// # Returns
/// The resulting topology or `InvalidDevices` if the list is empty or has duplicates.
pub fn compute<I>(devices: &[DeviceId], interconnect: &I) -> Result<Topology>
where
    I: Interconnect + ?Sized,
{
    let Some(&first) = devices.first() else {
        return Err(SyncErr::InvalidDevices("no devices given".into()));
    };

    let mut seen = HashSet::with_capacity(devices.len());
    if let Some(dup) = devices.iter().find(|&&device| !seen.insert(device)) {
        return Err(SyncErr::InvalidDevices(format!("device {dup} is listed twice")));
    }

    let mut remaining = devices.to_vec();
    let mut pairs = Vec::with_capacity(devices.len() - 1);

    pair_level(&mut remaining, &mut pairs, |a, b| interconnect.same_board(a, b));
    pair_level(&mut remaining, &mut pairs, |a, b| interconnect.can_access_peer(a, b));
    pair_level(&mut remaining, &mut pairs, |_, _| true);

    debug_assert_eq!(remaining, [first]);

    for pair in &pairs {
        debug!(parent = pair.parent.index(), device = pair.device.index(); "paired devices");
    }

    info!("computed topology of {} devices rooted at {first}", devices.len());
    Ok(Topology::new(first, pairs))
}

/// The amount of halvings needed to bring `len` devices down to one, `ceil(log2(len))`.
fn levels(len: usize) -> usize {
    match len {
        0 | 1 => 0,
        n => (usize::BITS - (n - 1).leading_zeros()) as usize,
    }
}

fn pair_level<F>(remaining: &mut Vec<DeviceId>, pairs: &mut Vec<DevicePair>, close: F)
where
    F: Fn(DeviceId, DeviceId) -> bool,
{
    for _ in 0..levels(remaining.len()) {
        let mut i = 0;

        while i < remaining.len() {
            let parent = remaining[i];

            if let Some(j) = (i + 1..remaining.len()).find(|&j| close(parent, remaining[j])) {
                let child = remaining.remove(j);
                pairs.push(DevicePair::new(parent, child));
            }

            i += 1;
        }
    }
}
