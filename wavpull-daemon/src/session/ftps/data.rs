//! Passive-mode data connections

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::session::SessionError;

/// Buffer size for data channel copies
const BUFFER_SIZE: usize = 64 * 1024;

/// Parse the address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
///
/// Servers disagree on the exact wording and on the parentheses, so this
/// looks for the first run of six comma-separated numbers.
pub fn parse_pasv_reply(text: &str) -> Option<(Ipv4Addr, u16)> {
    text.split(|c: char| !(c.is_ascii_digit() || c == ','))
        .find_map(|run| {
            let fields: Vec<u8> = run
                .split(',')
                .map(|part| part.parse::<u8>().ok())
                .collect::<Option<Vec<_>>>()?;
            if fields.len() != 6 {
                return None;
            }
            let ip = Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]);
            let port = (u16::from(fields[4]) << 8) | u16::from(fields[5]);
            Some((ip, port))
        })
}

/// Address to open a passive data connection to
///
/// The IP advertised in the PASV reply is ignored in favour of the control
/// connection's peer: recorders behind NAT routinely advertise a private
/// address.
pub fn passive_address(control_peer: IpAddr, advertised_port: u16) -> SocketAddr {
    SocketAddr::new(control_peer, advertised_port)
}

/// Copy a data stream to `sink` until end of stream
///
/// Each read must make progress within `idle_timeout`; the transfer as a
/// whole is not time-bounded. A peer that closes the TLS connection without
/// `close_notify` is treated as end of stream; a truncated file is caught by
/// the caller's size check.
pub async fn copy_data<R>(
    reader: &mut R,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
    idle_timeout: Duration,
) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let bytes_read = match timeout(idle_timeout, reader.read(&mut buffer)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Ok(Err(e)) => return Err(SessionError::Transport(e.to_string())),
            Err(_) => return Err(SessionError::Timeout("data transfer")),
        };

        sink.write_all(&buffer[..bytes_read])
            .await
            .map_err(|e| SessionError::Transport(format!("local write failed: {}", e)))?;
        total += bytes_read as u64;
    }

    sink.flush()
        .await
        .map_err(|e| SessionError::Transport(format!("local write failed: {}", e)))?;
    Ok(total)
}

/// Split an `NLST` listing into names
pub fn parse_name_list(listing: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(listing)
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
