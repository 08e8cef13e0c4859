//! Command safety gate
//!
//! Pure validation of a raw command string against a safety profile. The
//! gate is an accident-prevention heuristic over shell words, not an
//! enforcement boundary: it knows nothing about sessions, paths or flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shell operators forbidden under every profile
const SHELL_OPERATORS: &[&str] = &["&&", "||", ";", "|", "`", "$(", "<", ">"];

/// Destructive commands forbidden under the lenient profile
const LENIENT_COMMANDS: &[&str] = &["rm", "sudo"];

/// Destructive commands forbidden under the standard profile
const STANDARD_COMMANDS: &[&str] = &["rm", "sudo", "chmod", "chown", "mv", "cp"];

/// Extra commands forbidden under the strict profile
const STRICT_EXTRA_COMMANDS: &[&str] = &["chgrp", "dd"];

/// Named set of forbidden tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyProfile {
    #[default]
    Standard,
    Lenient,
    Strict,
}

impl SafetyProfile {
    /// All profiles, in display order
    pub fn all() -> &'static [SafetyProfile] {
        &[SafetyProfile::Standard, SafetyProfile::Lenient, SafetyProfile::Strict]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyProfile::Standard => "standard",
            SafetyProfile::Lenient => "lenient",
            SafetyProfile::Strict => "strict",
        }
    }

    /// The forbidden tokens for this profile, operators first
    pub fn forbidden_words(&self) -> Vec<&'static str> {
        let commands: Vec<&'static str> = match self {
            SafetyProfile::Lenient => LENIENT_COMMANDS.to_vec(),
            SafetyProfile::Standard => STANDARD_COMMANDS.to_vec(),
            SafetyProfile::Strict => STANDARD_COMMANDS
                .iter()
                .chain(STRICT_EXTRA_COMMANDS)
                .copied()
                .collect(),
        };
        SHELL_OPERATORS.iter().copied().chain(commands).collect()
    }
}

impl fmt::Display for SafetyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(SafetyProfile::Standard),
            "lenient" => Ok(SafetyProfile::Lenient),
            "strict" => Ok(SafetyProfile::Strict),
            other => Err(format!(
                "unknown safety profile '{}' (expected standard, lenient or strict)",
                other
            )),
        }
    }
}

/// Outcome of the safety check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Permitted,
    Rejected(String),
}

impl Verdict {
    pub fn is_permitted(&self) -> bool {
        matches!(self, Verdict::Permitted)
    }

    /// Rejection reason, empty when permitted
    pub fn reason(&self) -> &str {
        match self {
            Verdict::Permitted => "",
            Verdict::Rejected(reason) => reason,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Verdict::Rejected(reason.into())
    }
}

/// Classify a raw command as permitted or rejected under `profile`
pub fn check_command(command: &str, profile: SafetyProfile) -> Verdict {
    if command.trim().is_empty() {
        return Verdict::reject("empty command");
    }
    if command.contains('\n') || command.contains('\r') {
        return Verdict::reject("multiline commands are not allowed");
    }

    let tokens = match shell_words::split(command) {
        Ok(tokens) => tokens,
        Err(e) => return Verdict::reject(format!("unable to parse command: {}", e)),
    };
    let Some(first) = tokens.first() else {
        return Verdict::reject("empty command");
    };

    if first == "cd" {
        if tokens.len() > 2 {
            return Verdict::reject("cd supports at most one argument");
        }
        return Verdict::Permitted;
    }

    let forbidden = profile.forbidden_words();
    for token in &tokens {
        let lower = token.to_lowercase();
        for word in &forbidden {
            if lower == *word || lower.starts_with(&format!("{}-", word)) {
                tracing::debug!(command = %command, word = %word, profile = %profile, "Command rejected by safety gate");
                return Verdict::reject(format!("forbidden word: {}", word));
            }
        }
    }

    Verdict::Permitted
}

/// Tuple form of [`check_command`]: `(permitted, reason)`
pub fn is_safe(command: &str, profile: SafetyProfile) -> (bool, String) {
    let verdict = check_command(command, profile);
    (verdict.is_permitted(), verdict.reason().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_commands_are_permitted() {
        for profile in SafetyProfile::all() {
            assert!(check_command("ls -la", *profile).is_permitted());
            assert!(check_command("echo 'hello world'", *profile).is_permitted());
            assert!(check_command("cat README.md", *profile).is_permitted());
        }
    }

    #[test]
    fn test_empty_and_whitespace_rejected() {
        assert_eq!(check_command("", SafetyProfile::Standard).reason(), "empty command");
        assert_eq!(check_command("   \t", SafetyProfile::Strict).reason(), "empty command");
    }

    #[test]
    fn test_unbalanced_quotes_rejected() {
        let verdict = check_command("echo 'oops", SafetyProfile::Standard);
        assert!(!verdict.is_permitted());
        assert!(verdict.reason().contains("unable to parse"));
    }

    #[test]
    fn test_multiline_rejected() {
        let verdict = check_command("ls\nwhoami", SafetyProfile::Lenient);
        assert!(verdict.reason().contains("multiline"));
    }

    #[test]
    fn test_forbidden_words_in_every_profile_that_lists_them() {
        for profile in SafetyProfile::all() {
            for word in profile.forbidden_words() {
                let exact = format!("echo x {} y", word);
                let verdict = check_command(&exact, *profile);
                assert!(!verdict.is_permitted(), "{} should reject '{}'", profile, exact);
                assert!(verdict.reason().contains("forbidden word"));

                let fused = format!("{}-thing", word);
                let verdict = check_command(&fused, *profile);
                assert!(!verdict.is_permitted(), "{} should reject '{}'", profile, fused);
            }
        }
    }

    #[test]
    fn test_forbidden_match_is_case_insensitive() {
        let verdict = check_command("SUDO reboot", SafetyProfile::Lenient);
        assert_eq!(verdict.reason(), "forbidden word: sudo");
    }

    #[test]
    fn test_profiles_differ() {
        assert!(!check_command("mv a b", SafetyProfile::Standard).is_permitted());
        assert!(check_command("mv a b", SafetyProfile::Lenient).is_permitted());
        assert!(check_command("dd if=/dev/zero of=out", SafetyProfile::Standard).is_permitted());
        assert!(!check_command("dd if=/dev/zero of=out", SafetyProfile::Strict).is_permitted());
        assert!(!check_command("chgrp admin file", SafetyProfile::Strict).is_permitted());
    }

    #[test]
    fn test_operators_rejected() {
        let verdict = check_command("cat a | grep b", SafetyProfile::Lenient);
        assert_eq!(verdict.reason(), "forbidden word: |");
        assert!(!check_command("ls && pwd", SafetyProfile::Lenient).is_permitted());
        assert!(!check_command("echo hi > out.txt", SafetyProfile::Standard).is_permitted());
    }

    #[test]
    fn test_cd_argument_count() {
        for profile in SafetyProfile::all() {
            assert!(check_command("cd", *profile).is_permitted());
            assert!(check_command("cd /tmp", *profile).is_permitted());
            assert_eq!(
                check_command("cd a b c", *profile).reason(),
                "cd supports at most one argument"
            );
        }
    }

    #[test]
    fn test_cd_with_operator_is_rejected_by_argument_count() {
        assert!(!check_command("cd /tmp && ls", SafetyProfile::Standard).is_permitted());
    }

    #[test]
    fn test_is_safe_tuple() {
        let (ok, reason) = is_safe("rm -rf /", SafetyProfile::Standard);
        assert!(!ok);
        assert_eq!(reason, "forbidden word: rm");
        assert_eq!(is_safe("pwd", SafetyProfile::Standard), (true, String::new()));
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("Strict".parse::<SafetyProfile>(), Ok(SafetyProfile::Strict));
        assert_eq!(" lenient ".parse::<SafetyProfile>(), Ok(SafetyProfile::Lenient));
        assert!("paranoid".parse::<SafetyProfile>().is_err());
    }
}
