use crate::command::run_openssl;
use crate::error::Result;
use std::path::Path;

/// Parameters for one `openssl ca` invocation.
///
/// Every path here must already exist on disk: the scratch directory
/// (`outdir`, containing a freshly-written `index.txt`/`serial` and the
/// `openssl.cnf` with `%KEY_DIR%` substituted) is the caller's
/// responsibility, not this crate's. This function is a thin, literal
/// wrapper around the command line -- it owns no files.
pub struct CaSignRequest<'a> {
    pub csr_path: &'a Path,
    pub out_path: &'a Path,
    pub outdir: &'a Path,
    pub ca_key: &'a Path,
    pub ca_cert: &'a Path,
    pub openssl_config: &'a Path,
    pub days: u32,
}

/// Drive `openssl ca` to sign a CSR against a private CA key/cert, writing
/// the resulting certificate to `request.out_path`.
pub async fn ca_sign(request: &CaSignRequest<'_>) -> Result<()> {
    run_openssl(
        &[
            "ca",
            "-days",
            &request.days.to_string(),
            "-notext",
            "-md",
            "sha256",
            "-in",
            request.csr_path.to_str().expect("csr path is utf8"),
            "-out",
            request.out_path.to_str().expect("out path is utf8"),
            "-outdir",
            request.outdir.to_str().expect("outdir is utf8"),
            "-keyfile",
            request.ca_key.to_str().expect("key path is utf8"),
            "-cert",
            request.ca_cert.to_str().expect("cert path is utf8"),
            "-batch",
            "-config",
            request.openssl_config.to_str().expect("config path is utf8"),
        ],
        None,
    )
    .await?;

    Ok(())
}
