//! Normalization of AI-proposed shell commands
//!
//! Models wrap commands in fences, quotes and prompt glyphs. Each rule below
//! removes at most one layer; [`CommandCleaner::clean`] repeats the pass until
//! nothing changes, which makes cleaning idempotent.

/// Language tags accepted on the first line of a code fence
const FENCE_TAGS: &[&str] = &["bash", "sh", "shell", "zsh", "fish"];

/// Prompt glyphs stripped from the start of a command, longest first
const PROMPT_GLYPHS: &[&str] = &[">>> ", "... ", "\u{2026} ", "$ ", "# ", "> "];

pub struct CommandCleaner;

impl CommandCleaner {
    /// Clean a command until it reaches a fixed point
    pub fn clean(command: &str) -> String {
        // Every rule but the echo rewrite shortens the text, and that one
        // fires at most once, so this terminates.
        let mut current = command.trim().to_string();
        loop {
            let next = Self::clean_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn clean_once(command: &str) -> String {
        let command = command.trim();
        let command = strip_fence(command);
        let command = strip_wrapper(command);
        let command = strip_prompt_glyph(command);
        let command = strip_trailing_comment(command);
        rewrite_echo_var(&command)
    }
}

fn strip_fence(command: &str) -> &str {
    let Some(body) = command.strip_prefix("```") else {
        return command;
    };

    let body = match body.split_once('\n') {
        Some((first, rest)) => {
            let tag = first.trim();
            if tag.is_empty() || FENCE_TAGS.contains(&tag.to_ascii_lowercase().as_str()) {
                rest
            } else {
                body
            }
        }
        None => body,
    };

    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn strip_wrapper(command: &str) -> &str {
    for delimiter in ['`', '"', '\''] {
        if command.len() >= 2 && command.starts_with(delimiter) && command.ends_with(delimiter) {
            let inner = &command[1..command.len() - 1];
            if !inner.contains(delimiter) {
                return inner.trim();
            }
        }
    }
    command
}

fn strip_prompt_glyph(command: &str) -> &str {
    PROMPT_GLYPHS
        .iter()
        .find_map(|glyph| command.strip_prefix(glyph))
        .map(str::trim_start)
        .unwrap_or(command)
}

/// Drop an unquoted `#` comment from a single-line command
fn strip_trailing_comment(command: &str) -> String {
    if command.contains('\n') {
        return command.to_string();
    }

    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut at_word_start = true;

    for (idx, ch) in command.char_indices() {
        if escaped {
            escaped = false;
            at_word_start = false;
            continue;
        }
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\\' => escaped = true,
                '\'' | '"' => quote = Some(ch),
                '#' if at_word_start && idx > 0 => {
                    return command[..idx].trim_end().to_string();
                }
                _ => {}
            },
        }
        at_word_start = quote.is_none() && ch.is_whitespace();
    }

    command.to_string()
}

/// `echo $VAR`, `echo "$VAR"` and `echo ${VAR}` become `printenv VAR`
fn rewrite_echo_var(command: &str) -> String {
    if command.contains('\'') {
        return command.to_string();
    }
    let Ok(words) = shell_words::split(command) else {
        return command.to_string();
    };
    if words.len() != 2 || words[0] != "echo" {
        return command.to_string();
    }

    let Some(var) = words[1].strip_prefix('$') else {
        return command.to_string();
    };
    let var = var
        .strip_prefix('{')
        .and_then(|v| v.strip_suffix('}'))
        .unwrap_or(var);

    let valid = !var.is_empty()
        && !var.starts_with(|c: char| c.is_ascii_digit())
        && var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        format!("printenv {}", var)
    } else {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_with_tag() {
        assert_eq!(CommandCleaner::clean("```bash\nls -la\n```"), "ls -la");
        assert_eq!(CommandCleaner::clean("```zsh\npwd\n```"), "pwd");
        assert_eq!(CommandCleaner::clean("```\ndf -h\n```"), "df -h");
    }

    #[test]
    fn test_echo_var_becomes_printenv() {
        assert_eq!(CommandCleaner::clean("echo $HOME"), "printenv HOME");
        assert_eq!(CommandCleaner::clean("echo \"$PATH\""), "printenv PATH");
        assert_eq!(CommandCleaner::clean("echo ${USER}"), "printenv USER");
        assert_eq!(CommandCleaner::clean("echo $HOME $USER"), "echo $HOME $USER");
        assert_eq!(CommandCleaner::clean("echo '$HOME'"), "echo '$HOME'");
        assert_eq!(CommandCleaner::clean("echo $1"), "echo $1");
    }

    #[test]
    fn test_wrappers_and_prompts() {
        assert_eq!(CommandCleaner::clean("`git status`"), "git status");
        assert_eq!(CommandCleaner::clean("\"uname -a\""), "uname -a");
        assert_eq!(CommandCleaner::clean("$ ls"), "ls");
        assert_eq!(CommandCleaner::clean(">>> whoami"), "whoami");
        assert_eq!(CommandCleaner::clean("\u{2026} date"), "date");
        assert_eq!(CommandCleaner::clean("\"a\" b \"c\""), "\"a\" b \"c\"");
    }

    #[test]
    fn test_nested_layers() {
        assert_eq!(CommandCleaner::clean("```sh\n$ `echo $HOME`\n```"), "printenv HOME");
    }

    #[test]
    fn test_trailing_comment() {
        assert_eq!(CommandCleaner::clean("ls -la # list everything"), "ls -la");
        assert_eq!(CommandCleaner::clean("grep '#' notes.txt"), "grep '#' notes.txt");
        assert_eq!(CommandCleaner::clean("echo a#b"), "echo a#b");
        assert_eq!(CommandCleaner::clean("echo $HOME # where am i"), "printenv HOME");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let samples = [
            "```bash\nls -la\n```",
            "echo $HOME",
            "`\"pwd\"`",
            "$ $ ls",
            "> ```\ncat file\n```",
            "find . -name '*.rs' # rust files",
            "echo \"unterminated",
            "   ",
            "git log --oneline",
            "'''",
        ];
        for sample in samples {
            let once = CommandCleaner::clean(sample);
            assert_eq!(CommandCleaner::clean(&once), once, "input: {:?}", sample);
        }
    }

    #[test]
    fn test_deeply_layered_command_cleans_in_one_call() {
        let layered = format!("{}ls", "$ ".repeat(40));
        assert_eq!(CommandCleaner::clean(&layered), "ls");

        let mixed = format!("{}`echo $HOME`", "> ".repeat(30));
        let once = CommandCleaner::clean(&mixed);
        assert_eq!(once, "printenv HOME");
        assert_eq!(CommandCleaner::clean(&once), once);
    }
}
