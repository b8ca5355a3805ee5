use crate::command::run_openssl;
use crate::error::Result;
use std::io::Write;

/// Generate a plain RSA private key of the given bit length, PEM-encoded.
pub async fn generate_rsa_key(bits: u32) -> Result<Vec<u8>> {
    run_openssl(&["genrsa", "-out", "-", &bits.to_string()], None).await
}

/// Generate an EC private key on the secp384r1 curve, PEM-encoded.
pub async fn generate_ec_secp384r1_key() -> Result<Vec<u8>> {
    run_openssl(
        &["ecparam", "-name", "secp384r1", "-genkey", "-noout", "-out", "-"],
        None,
    )
    .await
}

/// Generate a PKCS#10 CSR against `key_pem`, subject `/CN=<subject_cn>`.
pub async fn generate_csr(key_pem: &[u8], subject_cn: &str) -> Result<Vec<u8>> {
    let mut key_file = tempfile::NamedTempFile::new()?;
    key_file.write_all(key_pem)?;
    key_file.flush()?;

    run_openssl(
        &[
            "req",
            "-key",
            key_file.path().to_str().expect("temp path is utf8"),
            "-new",
            "-out",
            "-",
            "-subj",
            &format!("/CN={subject_cn}"),
        ],
        None,
    )
    .await
}

/// Convert a PEM CSR to DER, as required by the ACME `new-cert` payload.
pub async fn csr_to_der(csr_pem: &[u8]) -> Result<Vec<u8>> {
    let mut csr_file = tempfile::NamedTempFile::new()?;
    csr_file.write_all(csr_pem)?;
    csr_file.flush()?;

    run_openssl(
        &[
            "req",
            "-in",
            csr_file.path().to_str().expect("temp path is utf8"),
            "-outform",
            "DER",
        ],
        None,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a local openssl(1) binary"]
    async fn generates_rsa_key_and_csr() {
        let key = generate_rsa_key(2048).await.unwrap();
        assert!(String::from_utf8_lossy(&key).contains("PRIVATE KEY"));

        let csr = generate_csr(&key, "a.local.test").await.unwrap();
        assert!(String::from_utf8_lossy(&csr).contains("CERTIFICATE REQUEST"));

        let der = csr_to_der(&csr).await.unwrap();
        assert!(!der.is_empty());
    }
}
