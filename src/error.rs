use thiserror::Error;

/// Error returned by the `Result`-flavoured stack operations.
///
/// Contention between threads is retried internally and never surfaces
/// here; an empty stack is the only condition a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StackError {
    /// No item was on the stack when it was observed.
    #[error("stack is empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(StackError::Empty.to_string(), "stack is empty");
    }
}
