//! The connected-device surface.
//!
//! A [`Device`] owns one negotiated connection: the command queue worker,
//! the resolved command set, the shared status snapshot, and the status
//! engine. It exists only after capability negotiation succeeded and is
//! destroyed on disconnect; reconnection builds a fresh one from scratch.
//!
//! All protocol activity funnels through the single-flight queue, so ad-hoc
//! commands, script execution, and status polling interleave safely on the
//! half-duplex wire.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;

use sonolib_core::error::{Error, Result};
use sonolib_core::events::DeviceEvent;
use sonolib_core::status::{DeviceStatus, MAX_FREQUENCY_HZ, MAX_GAIN_PERCENT};
use sonolib_core::types::DeviceInfo;
use sonolib_protocol::{
    validate, Answer, CommandArg, CommandQueue, Exchange, QueueHandle, Reply,
};
use sonolib_script::ScriptTarget;

use crate::capability::Capabilities;
use crate::commands::{names, raw_def, CommandDef};
use crate::status_engine::StatusEngineHandle;

/// A connected, negotiated ultrasonic generator.
///
/// Constructed via [`DeviceBuilder`](crate::builder::DeviceBuilder) or the
/// [`connect`](crate::connect) convenience function.
#[derive(Debug)]
pub struct Device {
    pub(crate) info: DeviceInfo,
    pub(crate) capabilities: Arc<Capabilities>,
    pub(crate) queue: Mutex<Option<CommandQueue>>,
    pub(crate) handle: QueueHandle,
    pub(crate) status: Arc<RwLock<DeviceStatus>>,
    pub(crate) event_tx: broadcast::Sender<DeviceEvent>,
    pub(crate) status_engine: Mutex<Option<StatusEngineHandle>>,
}

impl Device {
    /// Identity established by negotiation.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The negotiated command set, scaling, and module flags.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The latest telemetry snapshot.
    pub async fn status(&self) -> DeviceStatus {
        self.status.read().await.clone()
    }

    /// Subscribe to connection lifecycle and telemetry events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Execute a command by name with an argument (serial-monitor style).
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] when the negotiated command set lacks the
    /// name; [`Error::ConnectionLost`] when the connection is gone. A
    /// timeout or unparseable answer is NOT an error -- the returned
    /// [`Answer`] is simply invalid and the caller decides whether to retry.
    pub async fn execute(&self, name: &str, arg: CommandArg) -> Result<Answer> {
        let def = self.capabilities.commands.get(name).ok_or_else(|| {
            Error::Unsupported(format!("command {name:?} not available on this device"))
        })?;
        self.run_def(def, &arg).await
    }

    /// Set the output frequency in hertz.
    pub async fn set_frequency(&self, hz: u64) -> Result<Answer> {
        if hz > MAX_FREQUENCY_HZ {
            return Err(Error::InvalidParameter(format!(
                "frequency {hz} Hz exceeds {MAX_FREQUENCY_HZ} Hz"
            )));
        }
        self.execute(names::SET_FREQUENCY, CommandArg::Unsigned(hz)).await
    }

    /// Set the gain in percent.
    pub async fn set_gain(&self, percent: u64) -> Result<Answer> {
        if percent > MAX_GAIN_PERCENT {
            return Err(Error::InvalidParameter(format!(
                "gain {percent} % exceeds {MAX_GAIN_PERCENT} %"
            )));
        }
        self.execute(names::SET_GAIN, CommandArg::Unsigned(percent)).await
    }

    /// Switch the output signal on.
    pub async fn signal_on(&self) -> Result<Answer> {
        self.execute(names::SIGNAL_ON, CommandArg::None).await
    }

    /// Switch the output signal off.
    pub async fn signal_off(&self) -> Result<Answer> {
        self.execute(names::SIGNAL_OFF, CommandArg::None).await
    }

    /// Send a raw line to the device, bypassing the command set.
    ///
    /// Any non-blank echo counts as a valid answer. For use by the serial
    /// monitor and script pass-through lines.
    pub async fn send_raw(&self, line: &str) -> Result<Answer> {
        let def = raw_def();
        self.run_def(&def, &CommandArg::Text(line.to_string())).await
    }

    /// Close the connection: stops the status engine, releases the command
    /// queue, closes the transport. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(engine) = self.status_engine.lock().await.take() {
            engine.stop().await;
        }
        if let Some(queue) = self.queue.lock().await.take() {
            debug!("disconnecting device");
            let _ = queue.shutdown().await;
        }
        Ok(())
    }

    async fn run_def(&self, def: &CommandDef, arg: &CommandArg) -> Result<Answer> {
        let exchange = Exchange::encode(&def.spec, arg)?;
        match self.handle.submit(exchange).await {
            Reply::Data(text) => Ok(validate(&def.validators, &text)),
            Reply::NoData => Ok(Answer::invalid("")),
            Reply::ConnectionLost => Err(Error::ConnectionLost),
        }
    }
}

/// Scripts drive the device through the same public operations, with the
/// answers discarded: a command whose echo was lost to noise still took
/// effect, and the status engine picks the real state up on the next poll.
#[async_trait]
impl ScriptTarget for Device {
    async fn set_frequency(&self, hz: u64) -> Result<()> {
        Device::set_frequency(self, hz).await.map(drop)
    }

    async fn set_gain(&self, percent: u64) -> Result<()> {
        Device::set_gain(self, percent).await.map(drop)
    }

    async fn signal_on(&self) -> Result<()> {
        Device::signal_on(self).await.map(drop)
    }

    async fn signal_off(&self) -> Result<()> {
        Device::signal_off(self).await.map(drop)
    }

    async fn send_raw(&self, line: &str) -> Result<()> {
        Device::send_raw(self, line).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DeviceBuilder;
    use sonolib_core::types::{DeviceFamily, FirmwareVersion};
    use sonolib_script::{Interpreter, InterpreterState, Script};
    use sonolib_test_harness::MockTransport;
    use std::time::Duration;

    /// A catch 0.4 device whose telemetry and control commands are stubbed.
    fn catch_mock() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.stub(b"!SERIAL\n", b"soniccatch fw 0.4.1\n");
        mock.stub(b"-\n", b"0#0#0#0#0\n");
        mock.stub(b"?sens\n", b"100000 843200 12700 55100\n");
        mock.stub(b"!f=100000\n", b"f=100000\n");
        mock.stub(b"!g=80\n", b"g=80\n");
        mock.stub(b"!ON\n", b"ON\n");
        mock.stub(b"!OFF\n", b"OFF\n");
        mock
    }

    async fn connect_catch() -> Arc<Device> {
        let device = DeviceBuilder::new()
            .poll_interval(Duration::from_millis(20))
            .banner_window(Duration::from_millis(50))
            .connect_with_transport(Box::new(catch_mock()))
            .await
            .unwrap();
        Arc::new(device)
    }

    #[tokio::test]
    async fn connect_negotiates_and_reports_identity() {
        let device = connect_catch().await;
        assert_eq!(device.info().family, DeviceFamily::Catch);
        assert_eq!(device.info().firmware, FirmwareVersion::new(0, 4));
        assert!(device.capabilities().modules.has_sensing);
        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn execute_runs_ad_hoc_commands() {
        let device = connect_catch().await;

        let answer = device
            .execute(names::SET_FREQUENCY, CommandArg::Unsigned(100_000))
            .await
            .unwrap();
        assert!(answer.valid);
        assert_eq!(answer.field("frequency").unwrap().as_u64(), Some(100_000));

        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn execute_unknown_command_is_unsupported() {
        let device = connect_catch().await;
        let err = device
            .execute("do_a_flip", CommandArg::None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn parameter_ranges_are_enforced_locally() {
        let device = connect_catch().await;
        assert!(matches!(
            device.set_frequency(MAX_FREQUENCY_HZ + 1).await.unwrap_err(),
            Error::InvalidParameter(_)
        ));
        assert!(matches!(
            device.set_gain(MAX_GAIN_PERCENT + 1).await.unwrap_err(),
            Error::InvalidParameter(_)
        ));
        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn status_events_flow_while_connected() {
        let mut mock = MockTransport::new();
        mock.stub(b"!SERIAL\n", b"soniccatch fw 0.4.1\n");
        mock.stub(b"-\n", b"0#500000#50#0#0\n");

        let device = DeviceBuilder::new()
            .poll_interval(Duration::from_millis(10))
            .banner_window(Duration::from_millis(50))
            .connect_with_transport(Box::new(mock))
            .await
            .unwrap();
        let mut events = device.subscribe();

        let mut snapshot = None;
        for _ in 0..20 {
            match tokio::time::timeout(Duration::from_millis(300), events.recv()).await {
                Ok(Ok(DeviceEvent::StatusChanged(s))) => {
                    snapshot = Some(s);
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        let snapshot = snapshot.expect("a status change from the first poll");
        assert_eq!(snapshot.frequency, 500_000);
        assert_eq!(snapshot.gain, 50);
        assert_eq!(device.status().await.frequency, 500_000);

        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_fires_single_disconnected_event() {
        let device = connect_catch().await;
        let mut events = device.subscribe();

        device.disconnect().await.unwrap();

        let mut disconnects = 0;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(100), events.recv()).await
        {
            if matches!(event, DeviceEvent::Disconnected) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);

        // Idempotent.
        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn commands_after_disconnect_report_connection_lost() {
        let device = connect_catch().await;
        device.disconnect().await.unwrap();

        let err = device.signal_on().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost));
    }

    #[tokio::test]
    async fn script_drives_device_operations_in_order() {
        let device = connect_catch().await;

        let script = Script::parse("frequency 100000\non\nhold 50ms\noff").unwrap();
        let mut interp = Interpreter::new(script, device.clone());
        let state = interp.run().await.unwrap();
        assert_eq!(state, InterpreterState::Ready);
        assert!(interp.is_finished());

        device.disconnect().await.unwrap();
    }
}
