/// Fixed instruction prompt for summarizing one article.
pub fn build_summary_prompt(title: &str, url: &str, text: &str) -> String {
    format!(
        "Summarize the following news article in 2-3 sentences, focusing on the key facts. Title: {}; URL: {}; Content: {}",
        title, url, text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_all_parts_in_order() {
        let prompt = build_summary_prompt("Rates rise", "https://x/a", "The bank raised rates.");
        assert_eq!(
            prompt,
            "Summarize the following news article in 2-3 sentences, focusing on the key facts. \
             Title: Rates rise; URL: https://x/a; Content: The bank raised rates."
        );
    }

    #[test]
    fn empty_title_is_allowed() {
        let prompt = build_summary_prompt("", "https://x/a", "body");
        assert!(prompt.contains("Title: ; URL: https://x/a; Content: body"));
    }
}
