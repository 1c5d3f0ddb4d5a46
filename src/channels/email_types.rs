//! Email helpers shared by the normalizer, classifier and send path:
//! address extraction, sender pattern matching, HTML stripping.

/// A parsed mailbox: address plus display name (empty when absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub address: String,
    pub name: String,
}

/// Extract mailboxes from an optional mail_parser Address field.
///
/// Entries without an address are skipped. Returns an empty vec if the
/// field is None.
pub fn extract_mailboxes(addr: Option<&mail_parser::Address>) -> Vec<Mailbox> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let to_mailbox = |a: &mail_parser::Addr| {
        a.address.as_ref().map(|address| Mailbox {
            address: address.trim().to_string(),
            name: a
                .name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or_default(),
        })
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(to_mailbox).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(to_mailbox))
            .collect(),
    }
}

/// Extract bare email addresses from an optional mail_parser Address field.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    extract_mailboxes(addr)
        .into_iter()
        .map(|m| m.address)
        .collect()
}

/// Minimal syntactic check: one `@` with non-empty local and domain parts.
pub fn is_plausible_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Check whether a sender matches any pattern in a list.
///
/// - Empty list → no match
/// - `*` in list → match all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
/// - `noreply@` style local-part prefix (ends with `@`) → local-part match
pub fn sender_matches(patterns: &[String], email: &str) -> bool {
    if patterns.is_empty() {
        return false;
    }
    if patterns.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    patterns.iter().any(|a| {
        let a_lower = a.to_lowercase();
        if a_lower.starts_with('@') {
            // "@example.com" → domain match
            email_lower.ends_with(&a_lower)
        } else if a_lower.ends_with('@') {
            // "noreply@" → local-part match on any domain
            email_lower.starts_with(&a_lower)
        } else if a_lower.contains('@') {
            // "user@example.com" → exact email match
            a_lower == email_lower
        } else {
            // "example.com" → domain match
            email_lower.ends_with(&format!("@{a_lower}"))
        }
    })
}

/// Strip angle brackets and whitespace from a Message-ID style value.
pub fn normalize_message_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── sender_matches tests ────────────────────────────────────

    #[test]
    fn empty_pattern_list_matches_nothing() {
        assert!(!sender_matches(&[], "alice@example.com"));
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(sender_matches(&["*".into()], "anyone@anywhere.org"));
    }

    #[test]
    fn domain_patterns() {
        let patterns = vec!["@corp.com".to_string(), "partner.io".to_string()];
        assert!(sender_matches(&patterns, "ceo@corp.com"));
        assert!(sender_matches(&patterns, "Ops@Partner.IO"));
        assert!(!sender_matches(&patterns, "x@notpartner.io"));
    }

    #[test]
    fn exact_address_pattern_ignores_case() {
        let patterns = vec!["Boss@Example.com".to_string()];
        assert!(sender_matches(&patterns, "boss@example.com"));
        assert!(!sender_matches(&patterns, "boss2@example.com"));
    }

    #[test]
    fn local_part_pattern() {
        let patterns = vec!["noreply@".to_string()];
        assert!(sender_matches(&patterns, "NoReply@shop.com"));
        assert!(!sender_matches(&patterns, "reply@shop.com"));
    }

    // ── address helpers ─────────────────────────────────────────

    #[test]
    fn plausible_addresses() {
        assert!(is_plausible_address("a@b.c"));
        assert!(!is_plausible_address("not-an-address"));
        assert!(!is_plausible_address("@b.c"));
        assert!(!is_plausible_address("a@"));
        assert!(!is_plausible_address("a b@c.d"));
    }

    #[test]
    fn mailboxes_keep_display_name_or_empty() {
        let raw = b"From: Alice Smith <alice@example.com>\r\nTo: bob@example.com, Carol <carol@example.com>\r\nSubject: x\r\n\r\nhi";
        let parsed = mail_parser::MessageParser::default().parse(raw).unwrap();

        let from = extract_mailboxes(parsed.from());
        assert_eq!(
            from,
            vec![Mailbox {
                address: "alice@example.com".into(),
                name: "Alice Smith".into()
            }]
        );

        let to = extract_mailboxes(parsed.to());
        assert_eq!(to.len(), 2);
        assert_eq!(to[0].name, "");
        assert_eq!(to[1].name, "Carol");
        assert_eq!(
            extract_addresses(parsed.to()),
            vec!["bob@example.com", "carol@example.com"]
        );
    }

    #[test]
    fn missing_field_gives_empty_list() {
        assert!(extract_mailboxes(None).is_empty());
    }

    #[test]
    fn message_id_brackets_are_removed() {
        assert_eq!(normalize_message_id(" <abc@x.org> "), "abc@x.org");
        assert_eq!(normalize_message_id("abc@x.org"), "abc@x.org");
    }

    // ── strip_html tests ────────────────────────────────────────

    #[test]
    fn strip_html_removes_tags_and_collapses_whitespace() {
        assert_eq!(
            strip_html("<html><body><p>Hello</p>\n<p>World</p></body></html>"),
            "Hello World"
        );
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("no tags here"), "no tags here");
    }
}
