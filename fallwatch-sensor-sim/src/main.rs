//! Sensor simulator
//!
//! Plays a repeating posture pattern to a relay node, one status byte per
//! period, the way the vision sensor does:
//!
//! ```text
//! fallwatch-sensor-sim [HOST:PORT] [PATTERN] [PERIOD]
//! fallwatch-sensor-sim 192.168.137.211:8081 0,0,1,1,0 100ms
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use fallwatch_protocol::sensor::{STATUS_FALL, STATUS_NORMAL};
use fallwatch_protocol::DEFAULT_SENSOR_PORT;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const INITIAL_ATTEMPTS: u32 = 20;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug, PartialEq)]
#[command(name = "fallwatch-sensor-sim")]
#[command(about = "Stream posture status bytes to a FallWatch relay", long_about = None)]
#[command(version)]
struct SimArgs {
    /// Relay sensor port, HOST:PORT
    #[arg(default_value_t = format!("127.0.0.1:{}", DEFAULT_SENSOR_PORT))]
    target: String,

    /// Comma separated status bytes: 0, 1, normal, fall or hex like 0x7f
    #[arg(default_value = "normal", value_parser = parse_pattern)]
    pattern: Pattern,

    /// Delay between two status bytes, e.g. 100ms or 1s
    #[arg(default_value = "100ms", value_parser = humantime::parse_duration)]
    period: Duration,
}

/// Status bytes replayed in a loop
#[derive(Debug, Clone, PartialEq)]
struct Pattern(Vec<u8>);

/// `0,1,fall,normal,0x7f`: one status byte per entry
fn parse_pattern(text: &str) -> Result<Pattern> {
    let pattern = text
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry {
            "normal" => Ok(STATUS_NORMAL),
            "fall" => Ok(STATUS_FALL),
            byte => match byte.strip_prefix("0x") {
                Some(hex) => u8::from_str_radix(hex, 16),
                None => byte.parse::<u8>(),
            }
            .with_context(|| format!("invalid status byte '{}'", byte)),
        })
        .collect::<Result<Vec<u8>>>()?;

    if pattern.is_empty() {
        bail!("empty pattern");
    }
    Ok(Pattern(pattern))
}

async fn connect(target: &str) -> Result<TcpStream> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(target))
        .await
        .context("connect timed out")??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn connect_with_retry(target: &str, attempts: u32, delay: Duration) -> Result<TcpStream> {
    for attempt in 1..=attempts {
        match connect(target).await {
            Ok(stream) => {
                info!("✅ Connected to relay at {}", target);
                return Ok(stream);
            }
            Err(e) => {
                warn!("Connect to {} failed: {} (attempt {}/{})", target, e, attempt, attempts);
                if attempt < attempts {
                    sleep(delay).await;
                }
            }
        }
    }
    bail!("relay {} unreachable after {} attempts", target, attempts)
}

/// Reconnect until it works, pausing after every failure
async fn reconnect(target: &str, delay: Duration) -> TcpStream {
    loop {
        match connect(target).await {
            Ok(stream) => {
                info!("Reconnected to relay at {}", target);
                return stream;
            }
            Err(e) => {
                warn!("Reconnect to {} failed: {}", target, e);
                sleep(delay).await;
            }
        }
    }
}

/// Write one status byte, reconnecting until it goes through
async fn send_status(stream: &mut TcpStream, target: &str, status: u8, delay: Duration) {
    while let Err(e) = stream.write_all(&[status]).await {
        error!("Send of {:#04x} failed: {}, reconnecting...", status, e);
        *stream = reconnect(target, delay).await;
    }
    debug!("Sent status {:#04x}", status);
}

async fn stream_pattern(args: &SimArgs, mut stream: TcpStream) -> Result<()> {
    for &status in args.pattern.0.iter().cycle() {
        send_status(&mut stream, &args.target, status, RETRY_DELAY).await;
        sleep(args.period).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = SimArgs::parse();
    info!(
        "Sensor simulator: {} bytes every {} to {}",
        args.pattern.0.len(),
        humantime::format_duration(args.period),
        args.target
    );

    let stream = connect_with_retry(&args.target, INITIAL_ATTEMPTS, RETRY_DELAY).await?;

    tokio::select! {
        res = stream_pattern(&args, stream) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Sensor simulator stopped");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn parse(list: &[&str]) -> Result<SimArgs, clap::Error> {
        SimArgs::try_parse_from(std::iter::once("fallwatch-sensor-sim").chain(list.iter().copied()))
    }

    #[test]
    fn test_pattern_entries() {
        assert_eq!(parse_pattern("0,0,1,1,0").unwrap(), Pattern(vec![0, 0, 1, 1, 0]));
        assert_eq!(parse_pattern("fall, normal ,0x7f").unwrap(), Pattern(vec![1, 0, 0x7f]));
        assert!(parse_pattern("").is_err());
        assert!(parse_pattern("0,256").is_err());
        assert!(parse_pattern("sitting").is_err());
    }

    #[test]
    fn test_arguments() {
        let defaults = parse(&[]).unwrap();
        assert_eq!(defaults.target, format!("127.0.0.1:{}", DEFAULT_SENSOR_PORT));
        assert_eq!(defaults.pattern, Pattern(vec![STATUS_NORMAL]));
        assert_eq!(defaults.period, Duration::from_millis(100));

        let parsed = parse(&["10.0.0.5:9000", "1,0", "250ms"]).unwrap();
        assert_eq!(parsed.target, "10.0.0.5:9000");
        assert_eq!(parsed.pattern, Pattern(vec![1, 0]));
        assert_eq!(parsed.period, Duration::from_millis(250));

        assert!(parse(&["a:1", "0", "soon"]).is_err());
        assert!(parse(&["a:1", "sitting"]).is_err());
        assert!(parse(&["a:1", "0", "1s", "extra"]).is_err());
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect_with_retry(&target, 3, Duration::from_millis(10)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pattern_is_streamed_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sim = SimArgs {
            target: listener.local_addr().unwrap().to_string(),
            pattern: Pattern(vec![0, 1, 1]),
            period: Duration::from_millis(1),
        };
        let stream = connect_with_retry(&sim.target, 1, Duration::ZERO).await.unwrap();
        let (mut relay, _) = listener.accept().await.unwrap();
        tokio::spawn(async move { stream_pattern(&sim, stream).await });

        let mut buf = [0u8; 6];
        relay.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 1, 1, 0, 1, 1]);
    }

    #[tokio::test]
    async fn test_failed_status_is_resent_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let mut stream = connect(&target).await.unwrap();
        let (_first, _) = listener.accept().await.unwrap();
        // writes on this stream now fail locally
        stream.shutdown().await.unwrap();

        let sender = tokio::spawn(async move {
            send_status(&mut stream, &target, STATUS_FALL, Duration::from_millis(10)).await;
            stream
        });
        let (mut relay, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1];
        relay.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [STATUS_FALL]);
        sender.await.unwrap();
    }
}
