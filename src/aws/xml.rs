//! Tag extraction for the handful of fields read from query-protocol XML
//! responses. The responses are flat enough that a full parser is not
//! needed.

use regex::Regex;

fn tag_regex(tag: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?s)<{0}>(.*?)</{0}>", regex::escape(tag))).ok()
}

/// Decode the five predefined XML entities
pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// First occurrence of `<tag>…</tag>`, unescaped
pub fn first_tag(xml: &str, tag: &str) -> Option<String> {
    tag_regex(tag)?
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str().trim()))
}

/// Every occurrence of `<tag>…</tag>`, unescaped, in document order
pub fn all_tags(xml: &str, tag: &str) -> Vec<String> {
    let Some(re) = tag_regex(tag) else {
        return Vec::new();
    };
    re.captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_members() {
        let xml = "<ListUserPoliciesResult><PolicyNames><member>a</member><member>b&amp;c</member></PolicyNames><IsTruncated>false</IsTruncated></ListUserPoliciesResult>";
        assert_eq!(all_tags(xml, "member"), vec!["a", "b&c"]);
        assert_eq!(first_tag(xml, "IsTruncated").as_deref(), Some("false"));
        assert_eq!(first_tag(xml, "Marker"), None);
    }
}
