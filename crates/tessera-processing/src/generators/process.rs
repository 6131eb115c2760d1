use super::GeneratorError;
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const STDERR_LIMIT: usize = 2048;

/// Run `program` to completion and return its stdout.
///
/// The child is killed when `cancel` fires or when the returned future is dropped (attempt
/// timeout).
pub(crate) async fn run<I, S>(
    program: &str,
    args: I,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, GeneratorError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        _ = cancel.cancelled() => {
            tracing::debug!(tool = %program, "Generator process cancelled");
            return Err(GeneratorError::Cancelled);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.chars().take(STDERR_LIMIT).collect();
        tracing::warn!(
            tool = %program,
            status = %output.status,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Generator process failed"
        );
        return Err(GeneratorError::ProcessFailed {
            tool: program.to_string(),
            message: format!("{}: {}", output.status, stderr.trim()),
        });
    }

    tracing::debug!(
        tool = %program,
        stdout_bytes = output.stdout.len(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Generator process finished"
    );

    Ok(output.stdout)
}

fn spawn_error(program: &str, err: std::io::Error) -> GeneratorError {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            GeneratorError::ExecutableUnavailable(format!("{}: {}", program, err))
        }
        _ => GeneratorError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_executable_is_unavailable() {
        let cancel = CancellationToken::new();
        let result = run(
            "/nonexistent/tessera-test-binary",
            ["--version"],
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(GeneratorError::ExecutableUnavailable(_))));
    }

    #[test]
    fn test_spawn_error_mapping() {
        let err = spawn_error(
            "ffmpeg",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert!(matches!(err, GeneratorError::Io(_)));
    }
}
