//! Trailing instruction extraction
//!
//! Code prompts often end with a directive such as `# TODO: add type hints`.
//! Only the last few lines are searched so that markers inside code comments far
//! from the end are never mistaken for the directive.

/// Default number of trailing lines searched
pub const DEFAULT_SCAN_LINES: usize = 12;

const MARKERS: [&str; 4] = ["INSTRUCTION:", "REFACTOR:", "TODO:", "Task:"];

const COMMENT_LEADERS: [&str; 4] = ["#", "//", "--", ";"];

/// Whether a trimmed line opens an instruction
fn is_marker_line(line: &str) -> bool {
    let body = COMMENT_LEADERS
        .iter()
        .find_map(|leader| line.strip_prefix(leader))
        .map(str::trim_start)
        .unwrap_or(line);

    MARKERS.iter().any(|marker| body.starts_with(marker))
}

/// Split `prompt` into `(code, instruction)`
///
/// Scans at most `scan_lines` lines backward from the end. The first marker line
/// found starts the instruction, everything before it is code; both are trimmed.
/// Without a marker the prompt is returned untouched with an empty instruction.
pub fn split_with_limit(prompt: &str, scan_lines: usize) -> (String, String) {
    let lines: Vec<&str> = prompt.trim().lines().collect();
    let floor = lines.len().saturating_sub(scan_lines);

    for i in (floor..lines.len()).rev() {
        if is_marker_line(lines[i].trim()) {
            let code = lines[..i].join("\n");
            let instruction = lines[i..].join("\n");
            return (code.trim().to_string(), instruction.trim().to_string());
        }
    }

    (prompt.to_string(), String::new())
}

/// Split with the default scan window
pub fn split(prompt: &str) -> (String, String) {
    split_with_limit(prompt, DEFAULT_SCAN_LINES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_todo() {
        let prompt = "def add(a, b):\n    return a + b\n\n# TODO: add type hints\n";

        let (code, instruction) = split(prompt);

        assert_eq!(code, "def add(a, b):\n    return a + b");
        assert_eq!(instruction, "# TODO: add type hints");
    }

    #[test]
    fn test_instruction_keeps_following_lines() {
        let prompt = "fn main() {}\n// REFACTOR: split main\nkeep it small\n";

        let (code, instruction) = split(prompt);

        assert_eq!(code, "fn main() {}");
        assert_eq!(instruction, "// REFACTOR: split main\nkeep it small");
    }

    #[test]
    fn test_bare_and_prefixed_markers() {
        for line in [
            "INSTRUCTION: do it",
            "# INSTRUCTION: do it",
            "#INSTRUCTION: do it",
            "-- Task: do it",
            "; TODO: do it",
            "   Task: indented",
        ] {
            let (_, instruction) = split(&format!("x = 1\n{}", line));
            assert_eq!(instruction, line.trim(), "marker line {:?}", line);
        }
    }

    #[test]
    fn test_no_marker_returns_prompt_untouched() {
        let prompt = "  def f():\n    pass\n";

        let (code, instruction) = split(prompt);

        assert_eq!(code, prompt);
        assert!(instruction.is_empty());
    }

    #[test]
    fn test_marker_outside_scan_window_is_ignored() {
        let mut prompt = String::from("# TODO: stale comment near the top\n");
        for i in 0..12 {
            prompt.push_str(&format!("line_{} = {}\n", i, i));
        }

        let (code, instruction) = split(&prompt);

        assert_eq!(code, prompt);
        assert!(instruction.is_empty());

        let (_, instruction) = split_with_limit(&prompt, 13);
        assert_eq!(instruction.lines().count(), 13);
    }

    #[test]
    fn test_last_marker_wins() {
        let prompt = "code\n# TODO: first\nmore code\n# TODO: second";

        let (code, instruction) = split(prompt);

        assert_eq!(instruction, "# TODO: second");
        assert!(code.ends_with("more code"));
    }

    #[test]
    fn test_lowercase_marker_is_not_an_instruction() {
        let (_, instruction) = split("x = 1\n# todo: maybe later");
        assert!(instruction.is_empty());
    }
}
