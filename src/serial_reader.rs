use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt as _, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;

const CHUNK_SIZE: usize = 1024;

/// Channel between the reader and the telegram consumer. With room for a
/// single chunk the reader pauses whenever the consumer is busy.
pub fn chunk_channel() -> (Sender<Bytes>, Receiver<Bytes>) {
    mpsc::channel(1)
}

/// Opens the P1 port: 8N1 with XON/XOFF flow control
pub fn open_serial(port: &str, baud_rate: u32) -> Result<SerialStream> {
    info!(port, baud_rate, "Opening serial port");
    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::Software)
        .open_native_async()?;
    Ok(stream)
}

/// Forwards raw bytes from the meter to the consumer channel
pub struct SerialReader<R> {
    source: R,
    chunk_sender: Sender<Bytes>,
    cancel: CancellationToken,
}

impl<R> SerialReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(source: R, chunk_sender: Sender<Bytes>, cancel: CancellationToken) -> Self {
        Self {
            source,
            chunk_sender,
            cancel,
        }
    }

    /// Runs the reader on its own task. The source is dropped, closing the
    /// device, when the task ends.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Serial reader started");
        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            buffer.reserve(CHUNK_SIZE);
            let read = tokio::select! {
                _ = self.cancel.cancelled() => break,
                read = self.source.read_buf(&mut buffer) => read,
            };
            match read {
                Ok(0) => {
                    info!("Serial stream closed");
                    break;
                }
                Ok(n) => {
                    let chunk = buffer.split().freeze();
                    debug!(bytes = n, "Serial chunk");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        sent = self.chunk_sender.send(chunk) => {
                            if sent.is_err() {
                                info!("Telegram consumer gone, stopping serial reader");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Serial read failed");
                    break;
                }
            }
        }
        info!("Serial reader exiting");
    }
}
