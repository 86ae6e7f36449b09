//! Gate client
//!
//! One client per serial port. A reader task feeds the frame parser and
//! hands every completed payload to the message sink; a keep-alive task
//! pings the gate once a second; outgoing frames go through a paced
//! writer lock that enforces the minimum inter-frame gap the gate
//! hardware requires.

use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_serial::SerialPortBuilderExt;

use crate::message::{self, FrameParser};
use crate::router::MessageSink;
use crate::types::Result;

/// Gate UART speed (8N1).
pub const BAUD_RATE: u32 = 1_000_000;

/// Minimum spacing between outgoing frames; closer writes are delayed.
const WRITE_SPACING: Duration = Duration::from_millis(1);

const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(1);

struct PacedWriter {
    io: Box<dyn AsyncWrite + Send + Unpin>,
    last_send: Option<Instant>,
}

/// Client for one gate over one serial port
pub struct GateClient {
    name: String,
    writer: Arc<Mutex<PacedWriter>>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl GateClient {
    /// Open a serial port and start the client on it.
    pub async fn open(port: &str, sink: Arc<dyn MessageSink>) -> Result<Self> {
        let mut stream = tokio_serial::new(port, BAUD_RATE).open_native_async()?;
        // keep competing opens (and their latency) off the gate's UART
        if let Err(err) = stream.set_exclusive(true) {
            warn!("{port}: could not claim exclusive access: {err}");
        }
        Self::start(port, stream, sink).await
    }

    /// Start the client on an already-open transport.
    ///
    /// Resolves once both background tasks are live.
    pub async fn start<T>(name: &str, transport: T, sink: Arc<dyn MessageSink>) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = io::split(transport);
        let writer = Arc::new(Mutex::new(PacedWriter {
            io: Box::new(write_half),
            last_send: None,
        }));
        let shutdown = Arc::new(watch::channel(false).0);

        let (reader_ready_tx, reader_ready) = oneshot::channel();
        let reader = tokio::spawn(reader_loop(
            name.to_owned(),
            read_half,
            sink,
            shutdown.clone(),
            shutdown.subscribe(),
            reader_ready_tx,
        ));

        let (keep_alive_ready_tx, keep_alive_ready) = oneshot::channel();
        let keep_alive = tokio::spawn(keep_alive_loop(
            name.to_owned(),
            writer.clone(),
            shutdown.subscribe(),
            keep_alive_ready_tx,
        ));

        let _ = reader_ready.await;
        let _ = keep_alive_ready.await;

        Ok(Self {
            name: name.to_owned(),
            writer,
            shutdown,
            tasks: vec![reader, keep_alive],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue one frame behind the writer lock.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        send_frame(&self.writer, frame).await?;
        Ok(())
    }

    /// Stop both tasks and release the port.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

async fn send_frame(writer: &Mutex<PacedWriter>, frame: &[u8]) -> io::Result<()> {
    let mut writer = writer.lock().await;
    if let Some(last) = writer.last_send {
        let elapsed = last.elapsed();
        if elapsed < WRITE_SPACING {
            time::sleep(WRITE_SPACING - elapsed).await;
        }
    }
    writer.io.write_all(frame).await?;
    writer.io.flush().await?;
    writer.last_send = Some(Instant::now());
    Ok(())
}

async fn reader_loop<R>(
    name: String,
    mut io: R,
    sink: Arc<dyn MessageSink>,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) where
    R: AsyncRead + Send + Unpin,
{
    let _ = ready.send(());
    let mut parser = FrameParser::new();
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            read = io.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("{name}: stream closed");
                    break;
                }
                Ok(n) => {
                    for payload in parser.push(&buf[..n]) {
                        if !sink.deliver(&name, &payload) {
                            // the gate is lost; take the whole client down
                            let _ = shutdown.send(true);
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!("{name}: read failed: {err}");
                    break;
                }
            }
        }
    }
}

async fn keep_alive_loop(
    name: String,
    writer: Arc<Mutex<PacedWriter>>,
    mut shutdown_rx: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) {
    let _ = ready.send(());
    let mut ticker = time::interval(KEEP_ALIVE_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = send_frame(&writer, &message::keep_alive()).await {
                    warn!("{name}: keep-alive failed: {err}");
                    break;
                }
            }
        }
    }
}
