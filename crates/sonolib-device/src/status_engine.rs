//! The status polling engine.
//!
//! A cooperative loop that owns all writes to the shared [`DeviceStatus`]
//! snapshot. Each round it picks the richer sensor query while the signal
//! is on and the cheap status query while it is off, folds the validated
//! answer into a candidate snapshot, and -- only when a tracked field
//! actually changed -- replaces the snapshot atomically and fires exactly
//! one [`DeviceEvent::StatusChanged`].
//!
//! A fixed inter-poll delay provides backpressure so polling never
//! out-paces the single-flight command queue. Invalid answers are link
//! noise: the round is skipped and the next poll retries. The loop exits
//! for good once the connection is lost.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sonolib_core::events::DeviceEvent;
use sonolib_core::status::{
    DeviceStatus, RelayMode, MAX_FREQUENCY_HZ, MAX_GAIN_PERCENT, TEMPERATURE_PLAUSIBLE,
};
use sonolib_protocol::{validate, Answer, CommandArg, Exchange, FieldValue, QueueHandle, Reply};

use crate::capability::{Capabilities, TelemetryScaling};
use crate::commands::names;

/// Handle to a running status engine.
#[derive(Debug)]
pub struct StatusEngineHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StatusEngineHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Spawn the polling loop for a negotiated connection.
pub fn spawn_status_engine(
    queue: QueueHandle,
    capabilities: Arc<Capabilities>,
    status: Arc<RwLock<DeviceStatus>>,
    event_tx: broadcast::Sender<DeviceEvent>,
    poll_interval: Duration,
) -> StatusEngineHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(poll_loop(
        queue,
        capabilities,
        status,
        event_tx,
        poll_interval,
        cancel.clone(),
    ));
    StatusEngineHandle { cancel, task }
}

async fn poll_loop(
    queue: QueueHandle,
    capabilities: Arc<Capabilities>,
    status: Arc<RwLock<DeviceStatus>>,
    event_tx: broadcast::Sender<DeviceEvent>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("status engine cancelled");
                return;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        let signal_on = status.read().await.signal;
        let query = if signal_on && capabilities.modules.has_sensing {
            names::GET_SENSORS
        } else {
            names::GET_STATUS
        };
        let Some(def) = capabilities.commands.get(query) else {
            debug!(query, "command set lacks the poll query, stopping");
            return;
        };

        let exchange = match Exchange::encode(&def.spec, &CommandArg::None) {
            Ok(exchange) => exchange,
            Err(e) => {
                debug!(error = %e, "poll query failed to encode, stopping");
                return;
            }
        };

        match queue.submit(exchange).await {
            Reply::ConnectionLost => {
                debug!("connection lost, status engine stopping");
                return;
            }
            Reply::NoData => {
                // The next poll is the retry.
                debug!(query, "status poll timed out");
            }
            Reply::Data(text) => {
                let answer = validate(&def.validators, &text);
                if !answer.valid {
                    debug!(raw = %text, "discarding unparseable status answer");
                    continue;
                }
                let previous = status.read().await.clone();
                let mut next = fold_answer(&previous, &answer, capabilities.scaling);
                if next.differs_from(&previous) {
                    next.timestamp = SystemTime::now();
                    let snapshot = {
                        let mut guard = status.write().await;
                        *guard = next;
                        guard.clone()
                    };
                    let _ = event_tx.send(DeviceEvent::StatusChanged(snapshot));
                }
            }
        }
    }
}

/// Fold a validated answer into a candidate snapshot.
///
/// Pure: starts from the previous snapshot, applies every field the answer
/// carries, and enforces the per-field range rules (an implausible reading
/// keeps the previous value, or clears it for the temperature probe).
pub fn fold_answer(
    previous: &DeviceStatus,
    answer: &Answer,
    scaling: TelemetryScaling,
) -> DeviceStatus {
    let mut next = previous.clone();

    if let Some(v) = answer.field("frequency").and_then(FieldValue::as_u64) {
        if v <= MAX_FREQUENCY_HZ {
            next.frequency = v;
        }
    }
    if let Some(v) = answer.field("gain").and_then(FieldValue::as_u64) {
        if v <= MAX_GAIN_PERCENT {
            next.gain = v;
        }
    }
    if let Some(v) = answer.field("signal").and_then(FieldValue::as_flag) {
        next.signal = v;
    }
    if let Some(v) = answer.field("mode").and_then(FieldValue::as_u64) {
        next.relay_mode = if v == 1 { RelayMode::Mhz } else { RelayMode::Khz };
    }
    if let Some(v) = answer.field("error").and_then(FieldValue::as_u64) {
        next.error_code = v;
    }
    if let Some(v) = answer.field("urms").and_then(FieldValue::as_f64) {
        next.urms = scaling.urms(v);
    }
    if let Some(v) = answer.field("irms").and_then(FieldValue::as_f64) {
        next.irms = scaling.irms(v);
    }
    if let Some(v) = answer.field("phase").and_then(FieldValue::as_f64) {
        next.phase = scaling.phase(v);
    }
    if let Some(v) = answer.field("temperature").and_then(FieldValue::as_f64) {
        next.temperature = TEMPERATURE_PLAUSIBLE.contains(&v).then_some(v);
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::resolve;
    use sonolib_core::types::{DeviceFamily, FirmwareVersion};
    use sonolib_protocol::{spawn_queue, CommandQueue, LineIo};
    use sonolib_test_harness::MockTransport;

    fn catch_caps() -> Arc<Capabilities> {
        Arc::new(resolve(DeviceFamily::Catch, FirmwareVersion::new(0, 4)).unwrap())
    }

    fn start_engine(
        mock: MockTransport,
        initial: DeviceStatus,
    ) -> (
        CommandQueue,
        StatusEngineHandle,
        Arc<RwLock<DeviceStatus>>,
        broadcast::Receiver<DeviceEvent>,
    ) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let queue = spawn_queue(LineIo::new(Box::new(mock)), event_tx.clone());
        let status = Arc::new(RwLock::new(initial));
        let engine = spawn_status_engine(
            queue.handle(),
            catch_caps(),
            status.clone(),
            event_tx,
            Duration::from_millis(10),
        );
        (queue, engine, status, event_rx)
    }

    async fn next_status_event(
        rx: &mut broadcast::Receiver<DeviceEvent>,
    ) -> Option<DeviceStatus> {
        loop {
            match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Ok(DeviceEvent::StatusChanged(s))) => return Some(s),
                Ok(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn change_fires_single_notification() {
        let mut mock = MockTransport::new();
        mock.stub(b"-\n", b"0#1000000#80#1#0\n");

        let (queue, engine, status, mut events) =
            start_engine(mock, DeviceStatus::default());

        let snapshot = next_status_event(&mut events).await.expect("a change event");
        assert_eq!(snapshot.frequency, 1_000_000);
        assert_eq!(snapshot.gain, 80);
        assert_eq!(snapshot.relay_mode, RelayMode::Mhz);
        assert!(!snapshot.signal);

        // Identical answers keep arriving; no further notifications.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());

        // The shared snapshot was replaced.
        assert_eq!(status.read().await.frequency, 1_000_000);

        engine.stop().await;
        let _ = queue.shutdown().await;
    }

    #[tokio::test]
    async fn signal_on_switches_to_sensor_query() {
        let mut mock = MockTransport::new();
        // Only the sensor query is stubbed: a `-` poll would fail the
        // exchange and tear the queue down, so receiving a sensor-shaped
        // snapshot proves the engine picked `?sens`.
        mock.stub(b"?sens\n", b"1000000 843200 12700 55100\n");

        let initial = DeviceStatus {
            signal: true,
            ..DeviceStatus::default()
        };
        let (queue, engine, _status, mut events) = start_engine(mock, initial);

        let snapshot = next_status_event(&mut events).await.expect("a change event");
        assert_eq!(snapshot.urms, 843.2);
        assert_eq!(snapshot.irms, 12.7);
        assert_eq!(snapshot.phase, 55.1);
        assert!(snapshot.signal);

        engine.stop().await;
        let _ = queue.shutdown().await;
    }

    #[tokio::test]
    async fn engine_stops_after_connection_loss() {
        // No stubs at all: the first poll fails the exchange, the queue
        // marks the connection lost, and the engine must exit on its own.
        let mock = MockTransport::new();
        let (queue, engine, _status, mut events) =
            start_engine(mock, DeviceStatus::default());

        // Disconnected is published by the queue worker.
        let mut saw_disconnect = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
                Ok(Ok(DeviceEvent::Disconnected)) => {
                    saw_disconnect = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_disconnect);

        engine.stop().await;
        let _ = queue.shutdown().await;
    }

    // -----------------------------------------------------------------
    // fold_answer (pure)
    // -----------------------------------------------------------------

    fn status_answer(raw: &str) -> Answer {
        let def = crate::commands::catch_full_set();
        let def = def.get(names::GET_STATUS).unwrap().clone();
        validate(&def.validators, raw)
    }

    #[test]
    fn fold_applies_all_status_fields() {
        let prev = DeviceStatus::default();
        let answer = status_answer("7#2000000#120#1#1");
        let next = fold_answer(&prev, &answer, TelemetryScaling::Fullscale);
        assert_eq!(next.error_code, 7);
        assert_eq!(next.frequency, 2_000_000);
        assert_eq!(next.gain, 120);
        assert_eq!(next.relay_mode, RelayMode::Mhz);
        assert!(next.signal);
    }

    #[test]
    fn fold_rejects_out_of_range_values() {
        let mut prev = DeviceStatus::default();
        prev.frequency = 500_000;
        prev.gain = 40;

        // 99 GHz and 999 % are sensor noise; previous values survive.
        let answer = status_answer("0#99000000000#999#0#0");
        assert!(answer.valid);
        let next = fold_answer(&prev, &answer, TelemetryScaling::Fullscale);
        assert_eq!(next.frequency, 500_000);
        assert_eq!(next.gain, 40);
    }

    #[test]
    fn fold_treats_implausible_temperature_as_absent() {
        let def = crate::commands::catch_full_set();
        let temp_def = def.get(names::GET_TEMPERATURE).unwrap().clone();

        let mut prev = DeviceStatus::default();
        prev.temperature = Some(25.0);

        let answer = validate(&temp_def.validators, "t=-214.0");
        assert!(answer.valid);
        let next = fold_answer(&prev, &answer, TelemetryScaling::Fullscale);
        assert_eq!(next.temperature, None);

        let answer = validate(&temp_def.validators, "t=36.4");
        let next = fold_answer(&prev, &answer, TelemetryScaling::Fullscale);
        assert_eq!(next.temperature, Some(36.4));
    }

    #[test]
    fn fold_scales_telemetry_per_strategy() {
        let def = crate::commands::catch_full_set();
        let sens_def = def.get(names::GET_SENSORS).unwrap().clone();
        let answer = validate(&sens_def.validators, "1000000 1000 1000 8");

        let prev = DeviceStatus::default();
        let fullscale = fold_answer(&prev, &answer, TelemetryScaling::Fullscale);
        assert_eq!(fullscale.urms, 1.0);

        let factorised = fold_answer(&prev, &answer, TelemetryScaling::Factorised);
        assert_eq!(factorised.urms, 83.0);
        assert_eq!(factorised.irms, 6.0);
        assert_eq!(factorised.phase, 1.0);
    }

    #[test]
    fn fold_missing_fields_keep_previous_values() {
        let mut prev = DeviceStatus::default();
        prev.frequency = 123;
        prev.urms = 9.9;

        let answer = Answer::invalid("");
        let next = fold_answer(&prev, &answer, TelemetryScaling::Fullscale);
        assert_eq!(next.frequency, 123);
        assert_eq!(next.urms, 9.9);
    }
}
