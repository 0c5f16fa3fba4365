mod common;

use common::ARTICLE_HTML;
use feed_pipeline::extractor::MAX_EXTRACTED_CHARS;
use feed_pipeline::{extract_or_strip, extract_readable_text, strip_to_plain_text};

#[test]
fn article_keeps_prose_and_drops_script() {
    let text = extract_readable_text(ARTICLE_HTML).expect("article has prose");
    assert_eq!(text, "T Paragraph one.");
    assert!(!text.contains("bad()"));
}

#[test]
fn boilerplate_subtrees_are_dropped_with_all_descendants() {
    let markup = r#"<html>
        <head><title>Headline</title><style>p { color: red }</style></head>
        <body>
          <header><a href="/">Home</a><span>Sections</span></header>
          <nav><ul><li>World</li><li><b>Markets</b></li></ul></nav>
          <main>
            <article><h2>Story</h2><p>First <em>real</em> sentence.</p></article>
            <aside><p>Related: something else</p></aside>
          </main>
          <footer><p>Copyright</p></footer>
          <script>track()</script>
        </body></html>"#;

    let text = extract_readable_text(markup).expect("article has prose");
    assert_eq!(text, "Headline Story First real sentence.");
    for noise in ["color: red", "Home", "Sections", "World", "Markets", "Related", "Copyright", "track()"] {
        assert!(!text.contains(noise), "{:?} leaked into {:?}", noise, text);
    }
}

#[test]
fn boilerplate_tag_names_match_case_insensitively() {
    let text = extract_readable_text("<body><NAV>menu</NAV><p>kept</p><Footer>foot</Footer></body>")
        .expect("paragraph survives");
    assert_eq!(text, "kept");
}

#[test]
fn extraction_is_deterministic() {
    let first = extract_readable_text(ARTICLE_HTML);
    for _ in 0..5 {
        assert_eq!(extract_readable_text(ARTICLE_HTML), first);
    }
}

#[test]
fn long_documents_are_capped_in_characters() {
    let paragraph = "<p>Zürich ünd Straße.</p>".repeat(2000);
    let text = extract_readable_text(&format!("<body>{}</body>", paragraph)).expect("prose");
    assert_eq!(text.chars().count(), MAX_EXTRACTED_CHARS);
    assert!(text.starts_with("Zürich ünd Straße."));
}

#[test]
fn nothing_but_boilerplate_yields_none() {
    assert_eq!(extract_readable_text("<body>   \n\t </body>"), None);
    assert_eq!(extract_readable_text("<script>only()</script>"), None);
    assert_eq!(extract_readable_text(""), None);
}

#[test]
fn fallback_strips_tags_when_nothing_readable_survives() {
    assert_eq!(extract_or_strip(b"<script>only()</script>"), "only()");
    assert_eq!(extract_or_strip(ARTICLE_HTML.as_bytes()), "T Paragraph one.");
}

#[test]
fn tag_stripper_collapses_whitespace() {
    assert_eq!(
        strip_to_plain_text("<div>\n  one <b>two</b>\n\n three </div>"),
        "one two three"
    );
    assert_eq!(strip_to_plain_text("no markup at all"), "no markup at all");
    assert_eq!(strip_to_plain_text("<br/><hr>"), "");
}

#[test]
fn arbitrary_bytes_never_panic() {
    // xorshift so the corpus is the same on every run
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for len in [0usize, 1, 7, 64, 512, 4096, 20_000] {
        let bytes: Vec<u8> = (0..len)
            .map(|_| match next() % 8 {
                0 => b'<',
                1 => b'>',
                2 => b'/',
                _ => (next() & 0xff) as u8,
            })
            .collect();
        let text = extract_or_strip(&bytes);
        assert!(text.chars().count() <= len.max(MAX_EXTRACTED_CHARS));
    }
}
