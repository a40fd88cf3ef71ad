//! Mock gateway: registers a handful of demo devices against a running
//! hearthd and keeps pushing synthetic state snapshots, so client apps
//! have something to look at during development.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use hearth_rpc::ChannelClient;
use log::info;
use rand::Rng;
use serde_json::{json, Value as JsonValue};

#[derive(Debug, Parser)]
#[command(name = "hearth-sim", about = "Mock gateway feeding a hearth daemon with demo devices")]
struct Args {
    /// Address of a running hearthd.
    #[arg(long, default_value = "127.0.0.1:6001")]
    addr: String,
    /// Seconds between state pushes.
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,
    /// Push one round of states and exit.
    #[arg(long)]
    once: bool,
}

struct DemoDevice {
    uid: &'static str,
    name: &'static str,
    model: &'static str,
    switchable: bool,
    keep_history_state: bool,
}

const DEMO_DEVICES: [DemoDevice; 4] = [
    DemoDevice {
        uid: "/box-1/led-1",
        name: "ceiling lamp",
        model: "10000",
        switchable: true,
        keep_history_state: false,
    },
    DemoDevice {
        uid: "/box-1/led-2",
        name: "bedside lamp",
        model: "10004",
        switchable: true,
        keep_history_state: false,
    },
    DemoDevice {
        uid: "/box-1/temp-1",
        name: "thermometer",
        model: "10001",
        switchable: false,
        keep_history_state: true,
    },
    DemoDevice {
        uid: "/box-1/smoke-alarm-1",
        name: "smoke alarm",
        model: "10003",
        switchable: false,
        keep_history_state: true,
    },
];

fn synthetic_state(uid: &str) -> JsonValue {
    let mut rng = rand::thread_rng();
    match uid {
        "/box-1/led-1" => json!({ "on": false }),
        "/box-1/led-2" => {
            let colors = ["red", "yellow", "blue"];
            json!({ "on": true, "color": colors[rng.gen_range(0..colors.len())] })
        }
        "/box-1/temp-1" => json!({
            "temperature": f64::from(rng.gen_range(100..300)) / 10.0,
            "humidity": rng.gen_range(10..90),
        }),
        "/box-1/smoke-alarm-1" => json!({ "alert": rng.gen_bool(1.0 / 3.0) }),
        _ => json!({}),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut client = ChannelClient::connect(&args.addr, "gateway").await?;
    for device in &DEMO_DEVICES {
        client
            .call(
                "register_device",
                json!({
                    "uid": device.uid,
                    "name": device.name,
                    "model": device.model,
                    "switchable": device.switchable,
                    "keep_history_state": device.keep_history_state,
                }),
            )
            .await?;
        info!("registered {}", device.uid);
    }

    loop {
        for device in &DEMO_DEVICES {
            let state = synthetic_state(device.uid);
            client
                .call(
                    "update_device_state",
                    json!({ "uid": device.uid, "state": state }),
                )
                .await?;
            info!("pushed state for {}", device.uid);
        }
        if args.once {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(args.interval_secs)).await;
    }
}
