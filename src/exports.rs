use std::time::Duration;

/// Outcome of one shell invocation.
///
/// `exit_status` stays at 0 when the child did not exit on its own (it was
/// killed or stopped by a signal); `signal` records that case instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub exit_status: i32,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl CommandResult {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Self::default()
        }
    }

    /// True only for a normal exit with code 0.
    pub fn success(&self) -> bool {
        self.exit_status == 0 && self.signal.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaled_child_is_not_success_despite_zero_status() {
        let mut result = CommandResult::new("sleep 10");
        assert!(result.success());
        result.signal = Some(9);
        assert_eq!(result.exit_status, 0);
        assert!(!result.success());
    }

    #[test]
    fn non_zero_exit_is_failure() {
        let result = CommandResult {
            exit_status: 2,
            ..CommandResult::new("false")
        };
        assert!(!result.success());
    }
}
