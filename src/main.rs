use std::env;

use anyhow::{Context, bail};
use log::info;

use p2p_sync::{config::TrainingConfig, device::DeviceId};

const USAGE: &str = "usage: p2p_sync <config.json> [--devices 0,1,2,3]";

fn parse_devices(list: &str) -> anyhow::Result<Vec<DeviceId>> {
    list.split(',')
        .map(|device| {
            device
                .trim()
                .parse::<usize>()
                .map(DeviceId::new)
                .with_context(|| format!("invalid device id {device:?}"))
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let mut path = None;
    let mut devices = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--devices" => {
                let list = args.next().context(USAGE)?;
                devices = Some(parse_devices(&list)?);
            }
            _ if path.is_none() => path = Some(arg),
            _ => bail!("unexpected argument {arg:?}\n{USAGE}"),
        }
    }

    let path = path.context(USAGE)?;
    let mut config = TrainingConfig::from_path(&path)
        .with_context(|| format!("failed to load {path}"))?;

    if let Some(devices) = devices {
        config = config.with_devices(devices)?;
    }

    info!("training on devices {:?}", config.devices);

    let sync = config.build()?;
    let report = sync.run(config.max_iter)?;

    info!(
        "ran {} iterations, final loss {:?}",
        report.iterations, report.loss
    );
    println!("trained params: {:?}", report.params);

    Ok(())
}
