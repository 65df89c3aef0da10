//! The single-flight command queue.
//!
//! One spawned worker task per connection exclusively owns the [`LineIo`]
//! and processes all command/answer exchanges in strict FIFO order. This is
//! the central discipline of the engine: the wire offers no request IDs, so
//! at most one command is ever awaiting an answer, and answers can never be
//! attributed to the wrong request.
//!
//! Per exchange the worker moves `Idle -> Sending -> AwaitingAnswer -> Idle`;
//! an unrecoverable I/O failure moves the whole queue to its terminal
//! `Closed` state: the transport is closed, the disconnect notification
//! fires exactly once, and every queued or later request resolves with the
//! connection-lost marker.
//!
//! There is no retry here. A timed-out exchange resolves with "no data" and
//! the worker proceeds; retry policy belongs to the callers (the status
//! engine retries by polling again, the negotiator retries identification
//! once).

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sonolib_core::error::{Error, Result};
use sonolib_core::events::DeviceEvent;
use sonolib_core::transport::Transport;

use crate::command::{CommandArg, CommandSpec};
use crate::line::LineIo;

use std::time::Duration;

/// One encoded command ready to go on the wire.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Encoded message bytes, terminator included.
    pub bytes: Vec<u8>,
    /// Whether to collect a burst instead of a single line.
    pub multiline: bool,
    /// Read timeout for the answer.
    pub budget: Duration,
}

impl Exchange {
    /// Encode a command spec and argument into an exchange.
    pub fn encode(spec: &CommandSpec, arg: &CommandArg) -> Result<Exchange> {
        Ok(Exchange {
            bytes: spec.encode(arg)?,
            multiline: spec.multiline,
            budget: spec.response_time,
        })
    }
}

/// What came back for one submitted exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Raw answer text (lines of a burst joined with `\n`).
    Data(String),
    /// Nothing arrived within the command's budget.
    NoData,
    /// The connection is gone; this and all later submissions fail the same
    /// way until a new connection is negotiated.
    ConnectionLost,
}

impl Reply {
    /// The raw answer text, if any data arrived.
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Data(text) => Some(text),
            _ => None,
        }
    }
}

/// A request sent from callers to the worker task.
enum Request {
    Exchange {
        exchange: Exchange,
        reply: oneshot::Sender<Reply>,
    },
    /// Graceful shutdown; closes and returns the transport.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Cloneable handle for submitting commands to the queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Request>,
}

impl QueueHandle {
    /// Submit an exchange and suspend until its reply.
    ///
    /// Every submission resolves: with data, with [`Reply::NoData`] after
    /// the command's budget, or with [`Reply::ConnectionLost`] when the
    /// connection is gone. Timeouts and noise are expected link behavior,
    /// not errors.
    pub async fn submit(&self, exchange: Exchange) -> Reply {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Request::Exchange {
                exchange,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return Reply::ConnectionLost;
        }
        // The worker resolves every dequeued request; a dropped sender means
        // the worker is gone.
        reply_rx.await.unwrap_or(Reply::ConnectionLost)
    }
}

/// The per-connection command queue: worker task plus its handle.
#[derive(Debug)]
pub struct CommandQueue {
    handle: QueueHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Spawn the worker task for a connection.
///
/// The worker exclusively owns `line`; lifecycle transitions are published
/// on `event_tx`.
pub fn spawn_queue(line: LineIo, event_tx: broadcast::Sender<DeviceEvent>) -> CommandQueue {
    let (tx, rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(queue_loop(line, rx, event_tx, cancel.clone()));
    CommandQueue {
        handle: QueueHandle { tx },
        cancel,
        task,
    }
}

impl CommandQueue {
    /// A cloneable submission handle (for the status engine and other
    /// long-lived producers).
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Submit an exchange through the queue's own handle.
    pub async fn submit(&self, exchange: Exchange) -> Reply {
        self.handle.submit(exchange).await
    }

    /// Shut the worker down and recover the (closed) transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .handle
            .tx
            .send(Request::Shutdown { reply: reply_tx })
            .await
            .is_err()
        {
            // Worker already exited.
            self.cancel.cancel();
            let _ = self.task.await;
            return Err(Error::NotConnected);
        }
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

/// The worker loop. Strictly serial: one exchange at a time.
async fn queue_loop(
    mut line: LineIo,
    mut rx: mpsc::Receiver<Request>,
    event_tx: broadcast::Sender<DeviceEvent>,
    cancel: CancellationToken,
) {
    let mut lost = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("command queue cancelled");
                break;
            }

            req = rx.recv() => {
                match req {
                    Some(Request::Shutdown { reply }) => {
                        debug!("command queue shutdown requested");
                        let mut transport = line.into_transport();
                        let _ = transport.close().await;
                        if !lost {
                            let _ = event_tx.send(DeviceEvent::Disconnected);
                        }
                        let _ = reply.send(transport);
                        return;
                    }
                    Some(Request::Exchange { exchange, reply }) => {
                        if lost {
                            let _ = reply.send(Reply::ConnectionLost);
                            continue;
                        }
                        match run_exchange(&mut line, &exchange).await {
                            Ok(result) => {
                                let _ = reply.send(result);
                            }
                            Err(e) => {
                                warn!(error = %e, "transport failure, closing connection");
                                let _ = line.close().await;
                                lost = true;
                                let _ = event_tx.send(DeviceEvent::Disconnected);
                                let _ = reply.send(Reply::ConnectionLost);
                            }
                        }
                    }
                    None => {
                        debug!("all queue handles dropped, exiting");
                        break;
                    }
                }
            }
        }
    }

    let _ = line.close().await;
    if !lost {
        let _ = event_tx.send(DeviceEvent::Disconnected);
    }
}

/// Run one exchange: write the command, read a line or a burst.
///
/// A timeout is resolved locally as [`Reply::NoData`]; only genuine
/// transport failures bubble up as errors.
async fn run_exchange(line: &mut LineIo, exchange: &Exchange) -> Result<Reply> {
    line.write_line(&exchange.bytes).await?;

    if exchange.multiline {
        let lines = line.read_burst(exchange.budget).await?;
        if lines.is_empty() {
            Ok(Reply::NoData)
        } else {
            Ok(Reply::Data(lines.join("\n")))
        }
    } else {
        match line.read_line(exchange.budget).await {
            Ok(text) => Ok(Reply::Data(text)),
            Err(Error::Timeout) => Ok(Reply::NoData),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ArgKind;
    use rand::Rng;
    use sonolib_test_harness::{BrokenTransport, MockTransport};
    use tokio::time::Instant;

    fn status_exchange() -> Exchange {
        let spec = CommandSpec::new("get_status", "-", ArgKind::None, Duration::from_millis(200));
        Exchange::encode(&spec, &CommandArg::None).unwrap()
    }

    fn spawn_with(mock: MockTransport) -> (CommandQueue, broadcast::Receiver<DeviceEvent>) {
        let (event_tx, event_rx) = broadcast::channel(16);
        let queue = spawn_queue(LineIo::new(Box::new(mock)), event_tx);
        (queue, event_rx)
    }

    #[tokio::test]
    async fn basic_exchange_returns_data() {
        let mut mock = MockTransport::new();
        mock.expect(b"-\n", b"0#1000000#100#1#1\n");

        let (queue, _events) = spawn_with(mock);
        let reply = queue.submit(status_exchange()).await;
        assert_eq!(reply, Reply::Data("0#1000000#100#1#1".into()));

        let _ = queue.shutdown().await;
    }

    #[tokio::test]
    async fn multiline_exchange_joins_burst() {
        let mut mock = MockTransport::new();
        mock.expect(b"?info\n", b"soniccatch MK2\nfw 0.4.1\n");

        let spec = CommandSpec::new(
            "get_info",
            "?info",
            ArgKind::None,
            Duration::from_millis(100),
        )
        .multiline();

        let (queue, _events) = spawn_with(mock);
        let reply = queue
            .submit(Exchange::encode(&spec, &CommandArg::None).unwrap())
            .await;
        assert_eq!(reply, Reply::Data("soniccatch MK2\nfw 0.4.1".into()));

        let _ = queue.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_resolves_no_data_and_queue_stays_alive() {
        let mut mock = MockTransport::new();
        // Silence for the first poll, then a real answer.
        mock.expect(b"-\n", b"");
        mock.expect(b"-\n", b"0#0#0#0#0\n");

        let (queue, _events) = spawn_with(mock);

        let started = Instant::now();
        let reply = queue.submit(status_exchange()).await;
        assert_eq!(reply, Reply::NoData);
        // Resolved within the budget plus scheduling slack, not hung.
        assert!(started.elapsed() < Duration::from_millis(500));

        // The queue immediately accepts the next submission.
        let reply = queue.submit(status_exchange()).await;
        assert_eq!(reply, Reply::Data("0#0#0#0#0".into()));

        let _ = queue.shutdown().await;
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let mut mock = MockTransport::new();
        mock.expect(b"!f=100\n", b"f=100\n");
        mock.expect(b"!f=200\n", b"f=200\n");
        mock.expect(b"!f=300\n", b"f=300\n");

        let spec = CommandSpec::new(
            "set_frequency",
            "!f=",
            ArgKind::Unsigned,
            Duration::from_millis(100),
        );

        let (queue, _events) = spawn_with(mock);
        for value in [100u64, 200, 300] {
            let reply = queue
                .submit(Exchange::encode(&spec, &CommandArg::Unsigned(value)).unwrap())
                .await;
            assert_eq!(reply, Reply::Data(format!("f={value}")));
        }

        let _ = queue.shutdown().await;
    }

    #[tokio::test]
    async fn transport_failure_closes_and_cancels_queued() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let queue = spawn_queue(LineIo::new(Box::new(BrokenTransport::new())), event_tx);

        let reply = queue.submit(status_exchange()).await;
        assert_eq!(reply, Reply::ConnectionLost);

        // Later submissions carry the connection-lost marker without
        // touching the wire.
        let reply = queue.submit(status_exchange()).await;
        assert_eq!(reply, Reply::ConnectionLost);

        // Disconnected fires exactly once.
        assert!(matches!(event_rx.recv().await, Ok(DeviceEvent::Disconnected)));
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_recovers_closed_transport() {
        let mock = MockTransport::new();
        let (queue, mut event_rx) = spawn_with(mock);

        let transport = queue.shutdown().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(event_rx.recv().await, Ok(DeviceEvent::Disconnected)));
    }

    /// Randomized concurrent submitters: the queue must keep the wire
    /// half-duplex no matter how submissions interleave. The mock transport
    /// errors out any request sent while a previous answer is unread, so a
    /// single non-`Data` reply here means the single-flight discipline broke.
    #[tokio::test]
    async fn single_flight_under_randomized_concurrent_submitters() {
        let mut mock = MockTransport::new();
        mock.stub(b"-\n", b"0#1000#50#0#0\n");
        mock.stub(b"?sens\n", b"1000 20.0 3.0 0.4\n");

        let (queue, _events) = spawn_with(mock);
        let handle = queue.handle();

        let sens_spec = CommandSpec::new(
            "get_sensors",
            "?sens",
            ArgKind::None,
            Duration::from_millis(200),
        );

        let mut tasks = Vec::new();
        for i in 0..40 {
            let handle = handle.clone();
            let exchange = if i % 2 == 0 {
                status_exchange()
            } else {
                Exchange::encode(&sens_spec, &CommandArg::None).unwrap()
            };
            tasks.push(tokio::spawn(async move {
                let jitter = rand::thread_rng().gen_range(0..5u64);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                handle.submit(exchange).await
            }));
        }

        for task in tasks {
            let reply = task.await.unwrap();
            assert!(
                matches!(reply, Reply::Data(_)),
                "single-flight violated: {reply:?}"
            );
        }

        let _ = queue.shutdown().await;
    }
}
