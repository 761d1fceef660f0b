//! Operator confirmation.

use std::io::{self, BufRead, Write};

/// Asks the operator a yes/no question.
pub trait Confirm {
    /// Returns `true` only when the operator agrees.
    fn confirm(&self, question: &str) -> bool;
}

impl<C: Confirm + ?Sized> Confirm for &C {
    fn confirm(&self, question: &str) -> bool {
        (**self).confirm(question)
    }
}

/// Prompts on standard error and reads the answer from standard input.
///
/// Anything other than `y` or `yes` (including a read failure or end of
/// input) counts as a refusal.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> bool {
        let mut stderr = io::stderr().lock();
        if write!(stderr, "{question} [y/N] ").is_err() || stderr.flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(_) => false,
        }
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::is_affirmative;

    #[rstest]
    #[case("y\n", true)]
    #[case(" YES ", true)]
    #[case("n", false)]
    #[case("", false)]
    #[case("yep", false)]
    fn only_yes_is_affirmative(#[case] answer: &str, #[case] expected: bool) {
        assert_eq!(is_affirmative(answer), expected);
    }
}
