/// Clean article HTML using the ammonia library.
///
/// Whitelist-based: safe tags (<b>, <p>, <a>, …) are kept while <script>,
/// <iframe> and event-handler attributes are stripped, script bodies included.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Text content of an HTML fragment, tags removed. Used for word counts.
///
/// Every tag boundary becomes whitespace so `<p>a</p><p>b</p>` keeps two words.
pub fn strip_tags(input: &str) -> String {
    ammonia::Builder::empty()
        .clean(&input.replace('<', " <"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_scripts_but_keeps_markup() {
        let cleaned = clean_html("<p>Hi <b>there</b><script>alert(1)</script></p>");
        assert_eq!(cleaned, "<p>Hi <b>there</b></p>");
    }

    #[test]
    fn strips_all_tags_for_counting() {
        let text = strip_tags("<h1>Title</h1>\n<p>one two</p>");
        assert_eq!(text.split_whitespace().count(), 3);
    }

    #[test]
    fn adjacent_blocks_do_not_merge_words() {
        let text = strip_tags("<h1>A</h1><p>b</p><ul><li>c</li><li>d</li></ul>");
        assert_eq!(text.split_whitespace().collect::<Vec<_>>(), vec!["A", "b", "c", "d"]);
    }
}
