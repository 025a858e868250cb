//! SQL identifier quoting and sanitization.

/// Quote an identifier with ANSI double quotes.
///
/// Embedded double quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified identifier (`schema.table`).
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Strip everything except alphanumerics and underscores.
///
/// Used for alias generation, never for values.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn qualified_names_quote_each_part() {
        assert_eq!(quote_qualified("public.users"), "\"public\".\"users\"");
        assert_eq!(quote_qualified("users"), "\"users\"");
    }

    #[test]
    fn sanitize_strips_punctuation() {
        assert_eq!(sanitize_identifier("a-b.c d"), "abcd");
        assert_eq!(sanitize_identifier("snake_case1"), "snake_case1");
    }
}
