/// Policy deciding whether a process exit code counts as success.
pub trait ExitListener: Send + Sync {
    fn is_success(&self, exit_code: i32) -> bool;
}

/// Default policy: anything other than `0` is a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonZeroExitListener;

impl ExitListener for NonZeroExitListener {
    fn is_success(&self, exit_code: i32) -> bool {
        exit_code == 0
    }
}

/// Tolerant policy accepting `0` plus an explicit list of codes.
#[derive(Debug, Clone, Default)]
pub struct AllowedExitCodes {
    codes: Vec<i32>,
}

impl AllowedExitCodes {
    pub fn new(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }
}

impl ExitListener for AllowedExitCodes {
    fn is_success(&self, exit_code: i32) -> bool {
        exit_code == 0 || self.codes.contains(&exit_code)
    }
}
