/*!
Vision sensor double: a TCP client writing raw status bytes
*/

use anyhow::{Context, Result};
use fallwatch_protocol::Posture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub struct MockSensor {
    stream: TcpStream,
}

impl MockSensor {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("sensor cannot connect to {}", addr))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub async fn send_posture(&mut self, posture: Posture) -> Result<()> {
        self.send_byte(posture.as_byte()).await
    }

    /// Any byte, including ones the relay does not understand
    pub async fn send_byte(&mut self, byte: u8) -> Result<()> {
        debug!("[MOCK] Sensor sends {:#04x}", byte);
        self.stream.write_all(&[byte]).await?;
        Ok(())
    }

    /// Send `bytes` one by one, `gap` apart
    pub async fn send_pattern(&mut self, bytes: &[u8], gap: Duration) -> Result<()> {
        for &byte in bytes {
            self.send_byte(byte).await?;
            tokio::time::sleep(gap).await;
        }
        Ok(())
    }

    /// Whether the relay closed the connection within `timeout`
    pub async fn closed_by_relay(&mut self, timeout: Duration) -> bool {
        let mut buf = [0u8; 16];
        loop {
            match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
                Err(_) => return false,
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
            }
        }
    }

    /// Close the connection from the sensor side
    pub async fn disconnect(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
