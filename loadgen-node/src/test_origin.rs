use anyhow::Result;
use rand::Rng;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Simple HTTP origin server for exercising the load generator locally.
///
/// Responds 200 to every request after an optional random delay so ramps
/// and latency percentiles have something realistic to measure.
pub struct TestOriginServer {
    listen_addr: SocketAddr,
    max_delay_ms: u64,
}

impl TestOriginServer {
    pub fn new(listen_addr: SocketAddr, max_delay_ms: u64) -> Self {
        Self {
            listen_addr,
            max_delay_ms,
        }
    }

    /// Start the test origin server
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(
            listen_addr = %self.listen_addr,
            max_delay_ms = self.max_delay_ms,
            "Test origin server started"
        );

        loop {
            match listener.accept().await {
                Ok((stream, client_addr)) => {
                    let max_delay_ms = self.max_delay_ms;
                    tokio::spawn(async move {
                        if let Err(e) = handle_http_request(stream, client_addr, max_delay_ms).await
                        {
                            error!(
                                client_addr = %client_addr,
                                error = %e,
                                "Origin: Failed to handle request"
                            );
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Origin: Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single HTTP request with a canned JSON response
async fn handle_http_request(
    mut stream: TcpStream,
    client_addr: SocketAddr,
    max_delay_ms: u64,
) -> Result<()> {
    let mut buffer = vec![0u8; 4096];

    match stream.read(&mut buffer).await {
        Ok(0) => {
            debug!(client_addr = %client_addr, "Origin: Connection closed by client");
            return Ok(());
        }
        Ok(bytes_read) => {
            let request = String::from_utf8_lossy(&buffer[..bytes_read]);
            if let Some(first_line) = request.lines().next() {
                debug!(client_addr = %client_addr, request_line = %first_line, "Origin: HTTP request");
            }
        }
        Err(e) => {
            error!(client_addr = %client_addr, error = %e, "Origin: Failed to read request");
            return Err(e.into());
        }
    }

    if max_delay_ms > 0 {
        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=max_delay_ms)
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
    }

    let body = r#"{"status":"ok","server":"test-origin/1.0"}"#;
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Server: TestOrigin/1.0\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;

    if let Err(e) = stream.shutdown().await {
        warn!(client_addr = %client_addr, error = %e, "Origin: Failed to shutdown connection");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "test_origin=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let origin_addr: SocketAddr = std::env::var("ORIGIN_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8081".to_string())
        .parse()?;
    let max_delay_ms: u64 = std::env::var("ORIGIN_MAX_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(50);

    let server = TestOriginServer::new(origin_addr, max_delay_ms);

    info!("Starting test origin server for load generation testing");
    server.run().await
}
