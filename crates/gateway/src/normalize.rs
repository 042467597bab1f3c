//! Voice-text normalization (§1: "treated as a pure function the
//! orchestrator calls"). Conservative: collapse whitespace, strip a closed
//! set of markdown emphasis markers, trim.

pub fn normalize_for_speech(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`'))
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(normalize_for_speech("hello   world\n\nfoo"), "hello world foo");
    }

    #[test]
    fn strips_markdown_emphasis_markers() {
        assert_eq!(normalize_for_speech("it's **very** `cold` today"), "it's very cold today");
    }

    #[test]
    fn trims_leading_and_trailing_whitespace() {
        assert_eq!(normalize_for_speech("   hi there   "), "hi there");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(normalize_for_speech(""), "");
    }
}
