//! Per-driver SQL spelling: identifier quoting and placeholders.

use crate::models::DriverKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `"ident"`, `$1`
    Postgres,
    /// `` `ident` ``, `?`
    MySql,
    /// `"ident"`, `?`
    Sqlite,
}

impl Dialect {
    pub fn for_driver(driver: DriverKind) -> Self {
        match driver {
            DriverKind::PostgreSQL => Self::Postgres,
            DriverKind::MySQL => Self::MySql,
            DriverKind::SQLite => Self::Sqlite,
        }
    }

    fn quote_char(&self) -> char {
        match self {
            Self::MySql => '`',
            Self::Postgres | Self::Sqlite => '"',
        }
    }

    /// Append `ident` quoted, doubling any embedded quote character.
    pub fn quote_ident_into(&self, ident: &str, out: &mut String) {
        let quote = self.quote_char();
        out.reserve(ident.len() + 2);
        out.push(quote);
        for c in ident.chars() {
            if c == quote {
                out.push(quote);
            }
            out.push(c);
        }
        out.push(quote);
    }

    pub fn quote_ident(&self, ident: &str) -> String {
        let mut out = String::new();
        self.quote_ident_into(ident, &mut out);
        out
    }

    /// Append the placeholder for the `index`-th bound argument (1-based).
    pub fn placeholder_into(&self, index: usize, out: &mut String) {
        match self {
            Self::Postgres => {
                out.push('$');
                out.push_str(&index.to_string());
            }
            Self::MySql | Self::Sqlite => out.push('?'),
        }
    }

    /// Longest identifier, in bytes, the server keeps without truncating.
    /// PostgreSQL silently cuts longer names down to this length.
    pub fn max_identifier_len(&self) -> Option<usize> {
        match self {
            Self::Postgres => Some(63),
            Self::MySql | Self::Sqlite => None,
        }
    }

    /// LIMIT value meaning "all rows", for an OFFSET given without a LIMIT.
    /// PostgreSQL accepts a bare OFFSET.
    pub fn unbounded_limit(&self) -> Option<&'static str> {
        match self {
            Self::Postgres => None,
            Self::MySql => Some("18446744073709551615"),
            Self::Sqlite => Some("-1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(Dialect::Sqlite.quote_ident("users"), "\"users\"");
        assert_eq!(Dialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySql.quote_ident("a`b"), "`a``b`");
        assert_eq!(Dialect::MySql.quote_ident("x\"y"), "`x\"y`");
    }

    #[test]
    fn test_injection_attempt_stays_inside_quotes() {
        let quoted = Dialect::Sqlite.quote_ident("t\"; DROP TABLE users; --");
        assert_eq!(quoted, "\"t\"\"; DROP TABLE users; --\"");
    }

    #[test]
    fn test_placeholders() {
        let mut out = String::new();
        Dialect::Postgres.placeholder_into(3, &mut out);
        Dialect::Sqlite.placeholder_into(3, &mut out);
        Dialect::MySql.placeholder_into(3, &mut out);
        assert_eq!(out, "$3??");
    }

    #[test]
    fn test_for_driver() {
        assert_eq!(Dialect::for_driver(DriverKind::MySQL), Dialect::MySql);
        assert_eq!(Dialect::for_driver(DriverKind::SQLite), Dialect::Sqlite);
        assert_eq!(Dialect::for_driver(DriverKind::PostgreSQL), Dialect::Postgres);
    }
}
