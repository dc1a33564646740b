//! Turning raw feed text into one logical line per property.

/// Strategy for joining wrapped physical lines back into logical lines.
pub trait LineUnfolder: Send + Sync {
    fn unfold(&self, text: &str) -> Vec<String>;
}

/// Joins any line without a `:` (that is not a `BEGIN`/`END` marker) onto the
/// previous logical line, trimmed. Matches the quirks of the school feeds this
/// crate targets, but it will split a wrapped value whose tail contains a colon.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicUnfolder;

impl HeuristicUnfolder {
    fn is_continuation(line: &str) -> bool {
        !line.contains(':') && !line.starts_with("BEGIN") && !line.starts_with("END")
    }
}

impl LineUnfolder for HeuristicUnfolder {
    fn unfold(&self, text: &str) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        for raw in physical_lines(text) {
            if Self::is_continuation(raw) {
                let piece = raw.trim();
                match lines.last_mut() {
                    Some(prev) => prev.push_str(piece),
                    None if !piece.is_empty() => lines.push(piece.to_string()),
                    None => {}
                }
            } else {
                lines.push(raw.to_string());
            }
        }
        lines
    }
}

/// RFC 5545 folding: a line starting with SPACE or HTAB continues the previous
/// one, with that single whitespace character removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RfcUnfolder;

impl LineUnfolder for RfcUnfolder {
    fn unfold(&self, text: &str) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        for raw in physical_lines(text) {
            if raw.is_empty() {
                continue;
            }
            if raw.starts_with([' ', '\t']) {
                let continuation = &raw[1..];
                match lines.last_mut() {
                    Some(prev) => prev.push_str(continuation),
                    None => lines.push(continuation.to_string()),
                }
            } else {
                lines.push(raw.to_string());
            }
        }
        lines
    }
}

fn physical_lines(text: &str) -> impl Iterator<Item = &str> {
    text.trim_start_matches('\u{feff}')
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_joins_colonless_line_onto_previous() {
        assert_eq!(HeuristicUnfolder.unfold("SUMMARY:A\nB"), vec!["SUMMARY:AB"]);
    }

    #[test]
    fn heuristic_trims_continuations_and_keeps_markers() {
        let text = "BEGIN:VEVENT\r\nDESCRIPTION:Bring\r\n  your permission slip \r\nEND:VEVENT\r\n";
        assert_eq!(
            HeuristicUnfolder.unfold(text),
            vec![
                "BEGIN:VEVENT",
                "DESCRIPTION:Bringyour permission slip",
                "END:VEVENT",
            ]
        );
    }

    #[test]
    fn heuristic_treats_colon_bearing_wrap_as_new_line() {
        let text = "DESCRIPTION:See\n https://example.org/x";
        let lines = HeuristicUnfolder.unfold(text);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], " https://example.org/x");
    }

    #[test]
    fn rfc_unfolder_uses_leading_whitespace() {
        let text = "\u{feff}DESCRIPTION:See\r\n https://example.org/x\r\nSUMMARY:Plain\r\n";
        assert_eq!(
            RfcUnfolder.unfold(text),
            vec!["DESCRIPTION:Seehttps://example.org/x", "SUMMARY:Plain"]
        );
    }
}
