//! Special-case raw payloads: the browser socket policy document and the
//! gateway (TGW) forwarding header.
//!
//! Both are written to the wire unframed, bypassing the payload pipeline.

use crate::error::NetError;

/// Cross-domain socket policy answered to browser plugin clients.
pub const POLICY_XML: &str = "<cross-domain-policy> <allow-access-from domain=\"*\" secure=\"false\" to-ports=\"*\"/> </cross-domain-policy> ";

/// First line of a gateway forwarding header.
pub const TGW_PREFIX: &[u8] = b"tgw_l7_forward\r\n";

/// Terminator of a gateway forwarding header.
pub const TGW_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Longest gateway header accepted in either direction.
pub const TGW_MAX_HEADER: usize = 1023;

/// The policy document followed by its NUL terminator.
pub fn policy_bytes() -> Vec<u8> {
    let mut out = Vec::with_capacity(POLICY_XML.len() + 1);
    out.extend_from_slice(POLICY_XML.as_bytes());
    out.push(0);
    out
}

/// Build `tgw_l7_forward\r\nHost: <domain>:<port>\r\n\r\n`.
pub fn tgw_header(domain: &str, port: u16) -> Result<String, NetError> {
    if domain.is_empty() || domain.contains(['\r', '\n']) {
        return Err(NetError::InvalidArgument(format!(
            "gateway domain {domain:?} is empty or spans lines"
        )));
    }
    let header = format!("tgw_l7_forward\r\nHost: {domain}:{port}\r\n\r\n");
    if header.len() > TGW_MAX_HEADER {
        return Err(NetError::InvalidArgument(format!(
            "gateway header of {} bytes exceeds {TGW_MAX_HEADER}",
            header.len()
        )));
    }
    Ok(header)
}

/// Locate a gateway header at the start of received data.
///
/// - `Ok(Some(n))`: the first `n` bytes are the header (`0` when the stream
///   does not start with one).
/// - `Ok(None)`: not enough data yet to decide.
/// - `Err(_)`: a header started but did not terminate within the size limit.
pub fn tgw_header_len(buf: &[u8]) -> Result<Option<usize>, NetError> {
    let probe = buf.len().min(TGW_PREFIX.len());
    if buf[..probe] != TGW_PREFIX[..probe] {
        return Ok(Some(0));
    }
    if buf.len() < TGW_PREFIX.len() {
        return Ok(None);
    }

    let window = &buf[..buf.len().min(TGW_MAX_HEADER)];
    if let Some(pos) = window
        .windows(TGW_TERMINATOR.len())
        .position(|w| w == TGW_TERMINATOR)
    {
        return Ok(Some(pos + TGW_TERMINATOR.len()));
    }
    if buf.len() >= TGW_MAX_HEADER {
        return Err(NetError::Protocol(format!(
            "gateway header not terminated within {TGW_MAX_HEADER} bytes"
        )));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_bytes_are_nul_terminated() {
        let bytes = policy_bytes();
        assert_eq!(bytes.len(), POLICY_XML.len() + 1);
        assert_eq!(bytes.last(), Some(&0));
        assert!(bytes.starts_with(b"<cross-domain-policy>"));
    }

    #[test]
    fn test_tgw_header_format() {
        let header = tgw_header("example.com", 80).unwrap();
        assert_eq!(header, "tgw_l7_forward\r\nHost: example.com:80\r\n\r\n");
    }

    #[test]
    fn test_tgw_header_rejects_bad_domains() {
        assert!(tgw_header("", 80).is_err());
        assert!(tgw_header("evil\r\nX: 1", 80).is_err());
        assert!(tgw_header(&"a".repeat(2000), 80).is_err());
    }

    #[test]
    fn test_header_len_found() {
        let mut data = tgw_header("example.com", 8080).unwrap().into_bytes();
        let header_len = data.len();
        data.extend_from_slice(&[6, 0, 0, 0, 1, 2]);

        assert_eq!(tgw_header_len(&data).unwrap(), Some(header_len));
    }

    #[test]
    fn test_header_len_without_header() {
        assert_eq!(tgw_header_len(&[6, 0, 0, 0, 1, 2]).unwrap(), Some(0));
    }

    #[test]
    fn test_header_len_waits_for_more_data() {
        assert_eq!(tgw_header_len(b"tgw_l7").unwrap(), None);
        assert_eq!(tgw_header_len(b"tgw_l7_forward\r\nHost: a").unwrap(), None);
    }

    #[test]
    fn test_header_len_unterminated_is_violation() {
        let mut data = TGW_PREFIX.to_vec();
        data.resize(TGW_MAX_HEADER + 10, b'x');
        assert!(matches!(tgw_header_len(&data), Err(NetError::Protocol(_))));
    }
}
