//! Syslog sink (spec Section 4.6, "Syslog").
//!
//! No syslog crate appears anywhere in the retrieval pack, so this is
//! a minimal RFC 3164 datagram writer over `UdpSocket` instead of a
//! fabricated dependency.

use crate::error::{Result, SchedulerError};
use crate::result::Record;
use std::net::UdpSocket;

const FACILITY_LOCAL0: u8 = 16;
const SEVERITY_INFO: u8 = 6;

pub fn send(host: &str, port: u16, records: &[&Record]) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|source| {
        SchedulerError::Engine(jube_core::EngineError::Filesystem {
            path: "udp socket bind".to_string(),
            source,
        })
    })?;
    let priority = FACILITY_LOCAL0 * 8 + SEVERITY_INFO;

    for record in records {
        let mut fields: Vec<String> = record.iter().map(|(k, v)| format!("{k}={v}")).collect();
        fields.sort();
        let message = format!("<{priority}>jube: {}", fields.join(" "));
        socket.send_to(message.as_bytes(), (host, port)).map_err(|source| {
            SchedulerError::Engine(jube_core::EngineError::Filesystem {
                path: format!("{host}:{port}"),
                source,
            })
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_to_loopback_succeeds() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut record = Record::new();
        record.insert("n".to_string(), "1".to_string());
        send("127.0.0.1", port, &[&record]).unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..len]);
        assert!(received.contains("n=1"));
    }
}
