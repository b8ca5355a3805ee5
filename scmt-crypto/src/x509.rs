use crate::command::run_openssl;
use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, Utc};

/// The handful of fields the CA core needs out of a certificate, as parsed
/// from `openssl x509 -text -noout`. Any field this parser doesn't
/// recognize in the output is simply left `None` rather than failing the
/// whole parse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct X509Info {
    pub subject: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub ca_issuer_uri: Option<String>,
}

/// Parse the human-readable fields out of a PEM certificate by feeding it
/// through `openssl x509 -text -noout` and scanning the output.
///
/// Returns `None` if openssl rejects the input as malformed, rather than an
/// error: callers treat "not a valid certificate yet" as a normal state
/// while a private CA issuance is still in flight.
pub async fn x509_info(cert_pem: &[u8]) -> Result<Option<X509Info>> {
    let text = match run_openssl(&["x509", "-text", "-noout"], Some(cert_pem)).await {
        Ok(bytes) => bytes,
        Err(_) => return Ok(None),
    };
    let text = String::from_utf8_lossy(&text);

    let mut info = X509Info::default();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if let Some(rest) = line.strip_prefix("Subject:") {
            info.subject = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Not Before:") {
            info.not_before = parse_asn1_time(rest.trim());
        } else if let Some(rest) = line.strip_prefix("Not After :") {
            info.not_after = parse_asn1_time(rest.trim());
        } else if let Some(rest) = line.strip_prefix("CA Issuers - URI:") {
            info.ca_issuer_uri = Some(rest.trim().to_string());
        }
    }

    Ok(Some(info))
}

/// Parse openssl's `Mon DD HH:MM:SS YYYY TZ` certificate time format.
///
/// openssl always emits `GMT` here; anything else is treated as malformed
/// rather than guessed at.
fn parse_asn1_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.strip_suffix("GMT")?.trim();
    let naive = NaiveDateTime::parse_from_str(s, "%b %e %H:%M:%S %Y").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Convert a PEM certificate to DER, as needed by clients that want to load
/// a chain into a consumer expecting binary `outform=der` certificates.
pub async fn pem_to_der(cert_pem: &[u8]) -> Result<Vec<u8>> {
    run_openssl(&["x509", "-inform", "pem", "-outform", "der"], Some(cert_pem)).await
}

/// Wrap raw DER bytes as a PEM block, 64-column wrapped, matching the
/// formatting `openssl` itself produces.
pub fn der_to_pem(label: &str, der: &[u8]) -> String {
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);

    let mut out = String::new();
    out.push_str(&format!("-----BEGIN {label}-----\n"));
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_asn1_time() {
        let dt = parse_asn1_time("Jan  1 00:00:00 2024 GMT").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_non_gmt_time() {
        assert!(parse_asn1_time("Jan  1 00:00:00 2024 PST").is_none());
    }

    #[test]
    fn wraps_der_as_pem() {
        let pem = der_to_pem("CERTIFICATE", &[0u8; 100]);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.trim_end().ends_with("-----END CERTIFICATE-----"));
    }
}
