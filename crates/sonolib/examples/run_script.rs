//! Run an automation script against a connected generator.
//!
//! Usage: `cargo run --example run_script -- /dev/ttyUSB0 sweep.script`

use std::sync::Arc;

use sonolib::{DeviceBuilder, Interpreter, Script};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let script_path = args.next().expect("usage: run_script <port> <script file>");

    let text = std::fs::read_to_string(&script_path)?;
    let script = Script::parse(&text)?;
    println!("{} instructions, {} loops", script.len(), script.loop_table().len());

    let device = Arc::new(DeviceBuilder::new().port(&port).connect().await?);

    let mut interpreter = Interpreter::new(script, device.clone())
        .with_observer(Box::new(|line, task| println!("[{line:>3}] {task}")));
    let control = interpreter.control();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        control.cancel();
    });

    let state = interpreter.run().await?;
    println!("script finished in state {state:?}");

    device.disconnect().await?;
    Ok(())
}
