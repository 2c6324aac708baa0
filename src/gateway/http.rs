// Minimal HTTP front end
//
// GET /           -> control page
// GET /<command>  -> dispatch, 200 OK once the controller has applied it
// other paths     -> 404, other methods -> 405
//
// One request per connection; the response closes it.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{CommandGateway, GatewayError};
use crate::motor::PwmChannel;

const CONTROL_PAGE: &str = include_str!("../../static/control.html");

/// Largest request we read
const MAX_REQUEST_BYTES: usize = 4096;

/// Time a client gets to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP response sent back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: &'static str,
    pub body: &'static str,
}

impl Response {
    fn new(status: &'static str, body: &'static str) -> Self {
        Self { status, body }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// Extract the path of a `GET` request line, ignoring any query string
pub fn request_path(request: &str) -> Option<&str> {
    let rest = request.strip_prefix("GET /")?;
    let end = rest
        .find(|c: char| c == ' ' || c == '?' || c == '\r' || c == '\n')
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Build the response for one raw request, dispatching commands on the way
pub fn respond<P: PwmChannel>(gateway: &CommandGateway<P>, request: &str) -> Response {
    let Some(path) = request_path(request) else {
        warn!("Rejected request: {:?}", request.lines().next().unwrap_or(""));
        return Response::new("405 Method Not Allowed", "");
    };

    if path.is_empty() {
        return Response::new("200 OK", CONTROL_PAGE);
    }

    match gateway.handle_name(path) {
        Ok(command) => {
            debug!("HTTP command: {}", command);
            Response::new("200 OK", "")
        }
        Err(GatewayError::UnknownCommand(e)) => {
            debug!("{}", e);
            Response::new("404 Not Found", "")
        }
        Err(e) => {
            // The controller has already raised this on its fault channel
            error!("Command /{} failed: {}", path, e);
            Response::new("500 Internal Server Error", "")
        }
    }
}

async fn handle_connection<P: PwmChannel>(
    mut stream: TcpStream,
    gateway: &CommandGateway<P>,
) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let n = timeout(READ_TIMEOUT, stream.read(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request timed out"))??;

    let request = String::from_utf8_lossy(&buf[..n]);
    let response = respond(gateway, &request);
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

/// Accept connections until the listener fails
pub async fn serve<P: PwmChannel + 'static>(
    listener: TcpListener,
    gateway: CommandGateway<P>,
) -> io::Result<()> {
    info!("HTTP gateway listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Connection from {}", peer);

        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &gateway).await {
                warn!("Connection from {} failed: {}", peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RobotConfig;
    use crate::motion::{Direction, MotionController};
    use crate::motor::SimPwm;
    use crate::runtime::simulated_drivers;
    use std::sync::Arc;

    fn sim_gateway() -> CommandGateway<SimPwm> {
        let config = RobotConfig::default();
        let (left, right) = simulated_drivers(&config).unwrap();
        let controller = MotionController::new(left, right, config.watchdog_timing()).unwrap();
        CommandGateway::new(Arc::new(controller))
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path("GET /forward HTTP/1.1\r\n"), Some("forward"));
        assert_eq!(request_path("GET / HTTP/1.1\r\n"), Some(""));
        assert_eq!(request_path("GET /stop?t=12 HTTP/1.1"), Some("stop"));
        assert_eq!(request_path("GET /backward"), Some("backward"));
        assert_eq!(request_path("POST /forward HTTP/1.1"), None);
        assert_eq!(request_path(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_respond_routes() {
        let gateway = sim_gateway();

        let page = respond(&gateway, "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(page.status, "200 OK");
        assert!(page.body.contains("left_rotate"));

        let ok = respond(&gateway, "GET /right_rotate HTTP/1.1\r\n\r\n");
        assert_eq!(ok.status, "200 OK");
        assert_eq!(gateway.controller().direction(), Direction::RotateRight);

        let missing = respond(&gateway, "GET /dance HTTP/1.1\r\n\r\n");
        assert_eq!(missing.status, "404 Not Found");
        assert_eq!(gateway.controller().direction(), Direction::RotateRight);

        let method = respond(&gateway, "PUT /stop HTTP/1.1\r\n\r\n");
        assert_eq!(method.status, "405 Method Not Allowed");
        assert_eq!(gateway.controller().direction(), Direction::RotateRight);
    }

    #[test]
    fn test_response_bytes() {
        let text = String::from_utf8(Response::new("404 Not Found", "").to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
