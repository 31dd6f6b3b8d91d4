//! Tokens produced by the Agentfile lexer.

use std::fmt;

/// The kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `NAME` keyword.
    Name,
    /// `INPUT` keyword.
    Input,
    /// `DEFAULT` keyword.
    Default,
    /// `AGENT` keyword.
    Agent,
    /// `GOAL` keyword.
    Goal,
    /// `CONVERGE` keyword.
    Converge,
    /// `RUN` keyword.
    Run,
    /// `LOOP` keyword.
    Loop,
    /// `FROM` keyword. Switches the lexer into path mode for one token.
    From,
    /// `USING` keyword.
    Using,
    /// `WITHIN` keyword.
    Within,
    /// `REQUIRES` keyword.
    Requires,
    /// `SUPERVISED` keyword.
    Supervised,
    /// `UNSUPERVISED` keyword.
    Unsupervised,
    /// `HUMAN` keyword.
    Human,
    /// `SECURITY` keyword.
    Security,

    /// Identifier: `[A-Za-z_][A-Za-z0-9_-]*`.
    Ident,
    /// Integer literal: `[0-9]+`.
    Number,
    /// Quoted string (single-line with escapes, or triple-quoted).
    Str,
    /// Bare path following `FROM`, read greedily to whitespace.
    Path,
    /// Variable reference `$name`; the literal holds the name only.
    Var,
    /// `->`.
    Arrow,
    /// `,`.
    Comma,
    /// Significant end of line.
    Newline,
    /// A byte sequence the lexer could not classify. The parser decides
    /// whether it is fatal.
    Illegal,
    /// End of input.
    Eof,
}

impl TokenKind {
    /// Keyword lookup for a lexed identifier.
    #[must_use]
    pub fn keyword(ident: &str) -> Option<Self> {
        let kind = match ident {
            "NAME" => Self::Name,
            "INPUT" => Self::Input,
            "DEFAULT" => Self::Default,
            "AGENT" => Self::Agent,
            "GOAL" => Self::Goal,
            "CONVERGE" => Self::Converge,
            "RUN" => Self::Run,
            "LOOP" => Self::Loop,
            "FROM" => Self::From,
            "USING" => Self::Using,
            "WITHIN" => Self::Within,
            "REQUIRES" => Self::Requires,
            "SUPERVISED" => Self::Supervised,
            "UNSUPERVISED" => Self::Unsupervised,
            "HUMAN" => Self::Human,
            "SECURITY" => Self::Security,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether this kind terminates a declaration.
    #[must_use]
    pub const fn ends_line(&self) -> bool {
        matches!(self, Self::Newline | Self::Eof)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Name => "NAME",
            Self::Input => "INPUT",
            Self::Default => "DEFAULT",
            Self::Agent => "AGENT",
            Self::Goal => "GOAL",
            Self::Converge => "CONVERGE",
            Self::Run => "RUN",
            Self::Loop => "LOOP",
            Self::From => "FROM",
            Self::Using => "USING",
            Self::Within => "WITHIN",
            Self::Requires => "REQUIRES",
            Self::Supervised => "SUPERVISED",
            Self::Unsupervised => "UNSUPERVISED",
            Self::Human => "HUMAN",
            Self::Security => "SECURITY",
            Self::Ident => "identifier",
            Self::Number => "number",
            Self::Str => "string",
            Self::Path => "path",
            Self::Var => "variable",
            Self::Arrow => "'->'",
            Self::Comma => "','",
            Self::Newline => "end of line",
            Self::Illegal => "illegal token",
            Self::Eof => "end of input",
        };
        f.write_str(name)
    }
}

/// A lexed token with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// What the token is.
    pub kind: TokenKind,
    /// The token text. For [`TokenKind::Str`] the unescaped content; for
    /// [`TokenKind::Var`] the name without the `$`.
    pub literal: String,
    /// 1-based source line.
    pub line: usize,
    /// 1-based source column of the first character.
    pub column: usize,
}

impl Token {
    /// Create a token.
    #[must_use]
    pub fn new(kind: TokenKind, literal: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            literal: literal.into(),
            line,
            column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_lookup_is_exact() {
        assert_eq!(TokenKind::keyword("AGENT"), Some(TokenKind::Agent));
        assert_eq!(TokenKind::keyword("CONVERGE"), Some(TokenKind::Converge));
        assert_eq!(TokenKind::keyword("agent"), None);
        assert_eq!(TokenKind::keyword("critic"), None);
    }

    #[test]
    fn line_enders() {
        assert!(TokenKind::Newline.ends_line());
        assert!(TokenKind::Eof.ends_line());
        assert!(!TokenKind::Ident.ends_line());
    }

    #[test]
    fn display_names_keywords_verbatim() {
        assert_eq!(TokenKind::Within.to_string(), "WITHIN");
        assert_eq!(TokenKind::Ident.to_string(), "identifier");
    }
}
