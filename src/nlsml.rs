//! NLSML rendering of final transcripts

use crate::decoder::Transcript;
use quick_xml::escape::escape;

/// Render a transcript as an NLSML result document
///
/// The instance holds the joined text and one `<word>` per recognized
/// token with its start and end offsets (seconds) and confidence. An
/// early grammar match is reported as an `<earlyres>` element holding
/// the rule id, after the interpretation.
pub fn render(transcript: &Transcript, early_match: Option<&str>) -> String {
    let text = escape(transcript.text.trim());
    let mut doc = String::from("<?xml version=\"1.0\"?>\n<result>\n");

    if transcript.is_empty() {
        doc.push_str("<interpretation confidence=\"0.00\">\n");
        doc.push_str("<instance/>\n<input mode=\"speech\"><noinput/></input>\n");
    } else {
        doc.push_str(&format!(
            "<interpretation confidence=\"{:.2}\">\n",
            transcript.confidence()
        ));
        doc.push_str(&format!("<instance>\n<text>{}</text>\n", text));
        for w in &transcript.result {
            doc.push_str(&format!(
                "<word start=\"{:.2}\" end=\"{:.2}\" conf=\"{:.2}\">{}</word>\n",
                w.start,
                w.end,
                w.conf,
                escape(w.word.as_str())
            ));
        }
        doc.push_str("</instance>\n");
        doc.push_str(&format!("<input mode=\"speech\">{}</input>\n", text));
    }
    doc.push_str("</interpretation>\n");

    if let Some(rule) = early_match {
        doc.push_str(&format!("<earlyres>{}</earlyres>\n", escape(rule)));
    }
    doc.push_str("</result>\n");
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::WordResult;
    use crate::grammar::parse_document;

    fn transcript(words: &[(&str, f32)]) -> Transcript {
        Transcript::from_words(
            words
                .iter()
                .enumerate()
                .map(|(i, (w, conf))| WordResult {
                    word: w.to_string(),
                    start: i as f32 * 0.5,
                    end: i as f32 * 0.5 + 0.4,
                    conf: *conf,
                })
                .collect(),
        )
    }

    #[test]
    fn test_render_success() {
        let doc = render(&transcript(&[("yes", 0.9), ("please", 0.7)]), None);
        assert!(doc.contains("confidence=\"0.80\""));
        assert!(doc.contains("<text>yes please</text>"));
        assert!(!doc.contains("earlyres"));

        let root = parse_document(&doc).unwrap();
        assert_eq!(root.name, "result");
    }

    #[test]
    fn test_render_word_timings() {
        let t = Transcript::from_words(vec![
            WordResult {
                word: "hello".to_string(),
                start: 0.12,
                end: 0.48,
                conf: 0.91,
            },
            WordResult {
                word: "world".to_string(),
                start: 0.55,
                end: 0.97,
                conf: 0.66,
            },
        ]);
        let doc = render(&t, None);

        let root = parse_document(&doc).unwrap();
        let instance = &root.children[0].children[0];
        assert_eq!(instance.name, "instance");
        assert_eq!(instance.children[0].text, "hello world");

        let words: Vec<_> = instance
            .children
            .iter()
            .filter(|e| e.name == "word")
            .map(|e| {
                (
                    e.text.as_str(),
                    e.attr("start").unwrap(),
                    e.attr("end").unwrap(),
                    e.attr("conf").unwrap(),
                )
            })
            .collect();
        assert_eq!(
            words,
            vec![
                ("hello", "0.12", "0.48", "0.91"),
                ("world", "0.55", "0.97", "0.66"),
            ]
        );
    }

    #[test]
    fn test_render_early_match() {
        let doc = render(&transcript(&[("yes", 1.0)]), Some("R1"));
        let root = parse_document(&doc).unwrap();
        let early = root.children.iter().find(|e| e.name == "earlyres").unwrap();
        assert_eq!(early.text, "R1");
    }

    #[test]
    fn test_render_escapes_text() {
        let t = Transcript {
            result: Vec::new(),
            text: "a < b".to_string(),
        };
        assert!(render(&t, None).contains("a &lt; b"));
    }

    #[test]
    fn test_render_empty() {
        let doc = render(&Transcript::default(), None);
        assert!(doc.contains("<noinput/>"));
        assert!(parse_document(&doc).is_ok());
    }
}
