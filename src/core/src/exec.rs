//! Output of commands run inside build containers.

use serde::{Deserialize, Serialize};

/// Maximum output size kept per stream (stdout/stderr): 16 MiB.
pub const MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// Output from an executed step command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Captured stdout bytes.
    pub stdout: Vec<u8>,
    /// Captured stderr bytes.
    pub stderr: Vec<u8>,
    /// Process exit code (-1 when killed by a signal).
    pub exit_code: i32,
}

impl ExecOutput {
    /// Build an output, truncating each stream to [`MAX_OUTPUT_BYTES`].
    pub fn new(exit_code: i32, mut stdout: Vec<u8>, mut stderr: Vec<u8>) -> Self {
        stdout.truncate(MAX_OUTPUT_BYTES);
        stderr.truncate(MAX_OUTPUT_BYTES);
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr as lossy UTF-8, trimmed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        let output = ExecOutput::new(0, b"hello\n".to_vec(), vec![]);
        assert!(output.success());
        assert_eq!(output.stdout, b"hello\n");
    }

    #[test]
    fn test_exec_output_non_zero_exit() {
        let output = ExecOutput::new(127, vec![], b"not found\n".to_vec());
        assert!(!output.success());
        assert_eq!(output.stderr_text(), "not found");
    }

    #[test]
    fn test_exec_output_truncates() {
        let output = ExecOutput::new(0, vec![b'x'; MAX_OUTPUT_BYTES + 10], vec![]);
        assert_eq!(output.stdout.len(), MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_exec_output_serialization_roundtrip() {
        let output = ExecOutput::new(3, b"out".to_vec(), b"err".to_vec());
        let json = serde_json::to_string(&output).unwrap();
        let parsed: ExecOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, output);
    }
}
