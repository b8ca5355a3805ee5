use crate::command::run_openssl;
use crate::error::{CryptoError, Result};
use base64::Engine as _;
use std::io::Write;

/// The `jwk` member of an ACME JWS header, RSA only (ACME v1 never asked
/// for anything else).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Jwk {
    pub e: String,
    pub kty: String,
    pub n: String,
}

/// base64url, no padding -- every ACME v1 JWS field uses this encoding.
pub fn b64url(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

/// Derive the account key's RSA JWK by parsing `openssl rsa -noout -text`.
///
/// The modulus/exponent regex this mirrors only matches RSA keys with a
/// leading `00` byte, which is what `openssl genrsa` always produces.
pub async fn rsa_account_jwk(account_key_pem: &[u8]) -> Result<Jwk> {
    let mut key_file = tempfile::NamedTempFile::new()?;
    key_file.write_all(account_key_pem)?;
    key_file.flush()?;

    let text = run_openssl(
        &[
            "rsa",
            "-in",
            key_file.path().to_str().expect("temp path is utf8"),
            "-noout",
            "-text",
        ],
        None,
    )
    .await?;
    let text = String::from_utf8_lossy(&text);

    let (modulus_hex, exponent_dec) = extract_modulus_and_exponent(&text)
        .ok_or_else(|| CryptoError::Parse("could not find modulus/publicExponent in openssl rsa -text output".to_string()))?;

    let exponent: u64 = exponent_dec
        .parse()
        .map_err(|_| CryptoError::Parse(format!("non-numeric publicExponent: {exponent_dec}")))?;
    let mut exponent_hex = format!("{exponent:x}");
    if exponent_hex.len() % 2 != 0 {
        exponent_hex.insert(0, '0');
    }

    let n = hex_to_bytes(&modulus_hex)?;
    let e = hex_to_bytes(&exponent_hex)?;

    Ok(Jwk {
        e: b64url(&e),
        kty: "RSA".to_string(),
        n: b64url(&n),
    })
}

fn extract_modulus_and_exponent(text: &str) -> Option<(String, String)> {
    let modulus_start = text.find("modulus:")? + "modulus:".len();
    let after_modulus = &text[modulus_start..];
    let exponent_marker = after_modulus.find("publicExponent:")?;
    let modulus_block = &after_modulus[..exponent_marker];

    let modulus_hex: String = modulus_block
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();
    // The leading byte openssl prints is always `00` (sign padding); ACME's
    // JWK encoding wants the modulus without it.
    let modulus_hex = modulus_hex.strip_prefix("00").unwrap_or(&modulus_hex).to_string();

    let rest = &after_modulus[exponent_marker + "publicExponent:".len()..];
    let exponent_dec: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if exponent_dec.is_empty() {
        return None;
    }

    Some((modulus_hex, exponent_dec))
}

fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(CryptoError::Parse(format!("odd-length hex string: {hex}")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| CryptoError::Parse(format!("invalid hex byte: {}", &hex[i..i + 2])))
        })
        .collect()
}

/// RSA-SHA256-sign `signing_input` (the `protected64.payload64` string) with
/// the account key, returning the raw signature bytes (to be base64url
/// encoded by the caller into the JWS envelope).
pub async fn sign_sha256(account_key_pem: &[u8], signing_input: &[u8]) -> Result<Vec<u8>> {
    let mut key_file = tempfile::NamedTempFile::new()?;
    key_file.write_all(account_key_pem)?;
    key_file.flush()?;

    run_openssl(
        &[
            "dgst",
            "-sha256",
            "-sign",
            key_file.path().to_str().expect("temp path is utf8"),
        ],
        Some(signing_input),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_modulus_and_exponent() {
        let text = "Private-Key: (2048 bit)\nmodulus:\n    00:ab:cd:ef:01:\n    23:45:67\npublicExponent: 65537 (0x10001)\nprivateExponent:\n";
        let (modulus, exponent) = extract_modulus_and_exponent(text).unwrap();
        assert_eq!(modulus, "abcdef012345 67".replace(' ', ""));
        assert_eq!(exponent, "65537");
    }

    #[test]
    fn b64url_strips_padding() {
        assert_eq!(b64url(b"a"), "YQ");
        assert!(!b64url(b"a").contains('='));
    }

    #[test]
    fn hex_to_bytes_roundtrip() {
        assert_eq!(hex_to_bytes("00ff10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert!(hex_to_bytes("abc").is_err());
    }
}
