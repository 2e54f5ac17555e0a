//! Channel client used by the CLI
//!
//! Connects to a running daemon, sends one command envelope, and streams
//! outbound status events back.

use tokio::io::{BufReader, ReadHalf, WriteHalf};

use crate::common::{Error, Result};

use super::protocol::{Inbound, Outbound};
use super::transport;

pub struct ChannelClient {
    reader: BufReader<ReadHalf<transport::Stream>>,
    writer: WriteHalf<transport::Stream>,
}

impl ChannelClient {
    /// Connect to the daemon's channel socket
    pub async fn connect(socket: &str) -> Result<Self> {
        let stream = transport::connect(socket)
            .await
            .map_err(Error::ChannelConnect)?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send a command envelope
    pub async fn send(&mut self, message: &Inbound) -> Result<()> {
        let json = serde_json::to_vec(message)?;
        transport::send_message(&mut self.writer, &json).await?;
        Ok(())
    }

    /// Wait for the next status event
    pub async fn next_event(&mut self) -> Result<Outbound> {
        let data = transport::recv_message(&mut self.reader).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}
