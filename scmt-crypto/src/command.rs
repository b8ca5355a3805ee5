use crate::error::{CryptoError, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `openssl <args>`, optionally feeding `stdin`, and return captured stdout.
///
/// Non-zero exit is mapped to [`CryptoError::CommandFailed`] with stderr+stdout
/// merged into `output`, mirroring the original implementation's
/// `subprocess.Popen(..., stderr=subprocess.STDOUT)` convention.
pub(crate) async fn run_openssl(args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
    tracing::debug!("running: openssl {}", args.join(" "));

    let mut cmd = Command::new("openssl");
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    let mut child = cmd.spawn()?;

    if let Some(data) = stdin {
        let mut pipe = child.stdin.take().expect("stdin was requested");
        pipe.write_all(data).await?;
        drop(pipe);
    }

    let output = child.wait_with_output().await?;

    if !output.status.success() {
        let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(CryptoError::CommandFailed {
            command: format!("openssl {}", args.join(" ")),
            status: output.status.code(),
            output: merged,
        });
    }

    Ok(output.stdout)
}
