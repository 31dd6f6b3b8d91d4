//! The Agentfile lexer.
//!
//! Consumes UTF-8 source and emits [`Token`]s on demand. Three rules give
//! the lexer its shape:
//!
//! - `\n` is significant only on lines that produced at least one token;
//!   blank and comment-only lines are collapsed silently.
//! - The single token following `FROM` is read in *path mode*: greedily,
//!   until whitespace, end of line, or a comment.
//! - Nothing here raises. Unterminated strings and unknown characters
//!   become [`TokenKind::Illegal`] tokens and the parser decides fatality.

use super::token::{Token, TokenKind};

/// Streaming lexer over an Agentfile source.
#[derive(Debug)]
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    path_mode: bool,
    emitted_on_line: bool,
}

impl Lexer {
    /// Create a lexer over the given source.
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            path_mode: false,
            emitted_on_line: false,
        }
    }

    /// Lex an entire source into a token vector, ending with `Eof`.
    #[must_use]
    pub fn tokenize(source: &str) -> Vec<Token> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Token {
        // Skip inter-token whitespace, comments, and insignificant newlines.
        loop {
            match self.peek_char() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('#') => {
                    while matches!(self.peek_char(), Some(c) if c != '\n') {
                        self.advance();
                    }
                }
                Some('\n') => {
                    let (line, column) = (self.line, self.column);
                    self.advance();
                    if self.emitted_on_line {
                        self.emitted_on_line = false;
                        // Path mode never crosses a line boundary.
                        self.path_mode = false;
                        return Token::new(TokenKind::Newline, "\n", line, column);
                    }
                }
                _ => break,
            }
        }

        let (line, column) = (self.line, self.column);

        let Some(c) = self.peek_char() else {
            return Token::new(TokenKind::Eof, "", line, column);
        };

        if self.path_mode {
            self.path_mode = false;
            let mut literal = String::new();
            while let Some(c) = self.peek_char() {
                if c.is_whitespace() || c == '#' {
                    break;
                }
                literal.push(c);
                self.advance();
            }
            self.emitted_on_line = true;
            return Token::new(TokenKind::Path, literal, line, column);
        }

        let token = match c {
            '"' => self.read_string(line, column),
            ',' => {
                self.advance();
                Token::new(TokenKind::Comma, ",", line, column)
            }
            '-' => {
                self.advance();
                if self.peek_char() == Some('>') {
                    self.advance();
                    Token::new(TokenKind::Arrow, "->", line, column)
                } else {
                    Token::new(TokenKind::Illegal, "-", line, column)
                }
            }
            '$' => {
                self.advance();
                match self.peek_char() {
                    Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                        let mut name = String::new();
                        while let Some(c) = self.peek_char() {
                            if c.is_ascii_alphanumeric() || c == '_' {
                                name.push(c);
                                self.advance();
                            } else {
                                break;
                            }
                        }
                        Token::new(TokenKind::Var, name, line, column)
                    }
                    _ => Token::new(TokenKind::Illegal, "$", line, column),
                }
            }
            c if c.is_ascii_digit() => {
                let mut literal = String::new();
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_digit() {
                        literal.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Token::new(TokenKind::Number, literal, line, column)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut literal = String::new();
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        literal.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
                let kind = TokenKind::keyword(&literal).unwrap_or(TokenKind::Ident);
                if kind == TokenKind::From {
                    self.path_mode = true;
                }
                Token::new(kind, literal, line, column)
            }
            other => {
                self.advance();
                Token::new(TokenKind::Illegal, other.to_string(), line, column)
            }
        };

        self.emitted_on_line = true;
        token
    }

    /// Read a quoted string at the current position. Handles both the
    /// single-line escaped form and the triple-quoted multi-line form.
    fn read_string(&mut self, line: usize, column: usize) -> Token {
        let triple = self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"');
        if triple {
            self.advance();
            self.advance();
            self.advance();
            let mut content = String::new();
            loop {
                if self.peek_char() == Some('"')
                    && self.peek_at(1) == Some('"')
                    && self.peek_at(2) == Some('"')
                {
                    self.advance();
                    self.advance();
                    self.advance();
                    return Token::new(TokenKind::Str, content, line, column);
                }
                match self.advance() {
                    Some(c) => content.push(c),
                    None => return Token::new(TokenKind::Illegal, content, line, column),
                }
            }
        }

        self.advance();
        let mut content = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    // Unterminated: leave the newline for the collapse logic.
                    return Token::new(TokenKind::Illegal, content, line, column);
                }
                Some('"') => {
                    self.advance();
                    return Token::new(TokenKind::Str, content, line, column);
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => content.push('\n'),
                        Some('t') => content.push('\t'),
                        Some('r') => content.push('\r'),
                        Some('\\') => content.push('\\'),
                        Some('"') => content.push('"'),
                        Some(other) => {
                            content.push('\\');
                            content.push(other);
                        }
                        None => return Token::new(TokenKind::Illegal, content, line, column),
                    }
                }
                Some(_) => {
                    if let Some(c) = self.advance() {
                        content.push(c);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_agent_declaration_with_path() {
        let tokens = Lexer::tokenize(r#"AGENT critic FROM agents/critic.md REQUIRES "rh""#);
        let expected = [
            (TokenKind::Agent, "AGENT"),
            (TokenKind::Ident, "critic"),
            (TokenKind::From, "FROM"),
            (TokenKind::Path, "agents/critic.md"),
            (TokenKind::Requires, "REQUIRES"),
            (TokenKind::Str, "rh"),
            (TokenKind::Eof, ""),
        ];
        assert_eq!(tokens.len(), expected.len());
        for (token, (kind, literal)) in tokens.iter().zip(expected) {
            assert_eq!(token.kind, kind);
            assert_eq!(token.literal, literal);
        }
    }

    #[test]
    fn path_mode_lasts_one_token() {
        let tokens = Lexer::tokenize("AGENT a FROM dir/sub SUPERVISED");
        assert_eq!(tokens[3].kind, TokenKind::Path);
        assert_eq!(tokens[3].literal, "dir/sub");
        assert_eq!(tokens[4].kind, TokenKind::Supervised);
    }

    #[test]
    fn path_mode_does_not_cross_lines() {
        let tokens = Lexer::tokenize("AGENT a FROM\nNAME t");
        // FROM at end of line: newline terminates path mode, NAME lexes
        // as a keyword on the next line.
        assert_eq!(tokens[3].kind, TokenKind::Newline);
        assert_eq!(tokens[4].kind, TokenKind::Name);
    }

    #[test]
    fn path_stops_at_comment() {
        let tokens = Lexer::tokenize("AGENT a FROM agents/x.md# trailing");
        assert_eq!(tokens[3].kind, TokenKind::Path);
        assert_eq!(tokens[3].literal, "agents/x.md");
        assert_eq!(tokens[4].kind, TokenKind::Eof);
    }

    #[test]
    fn blank_and_comment_lines_collapse() {
        let source = "NAME t\n\n# a comment\n   # another\nRUN s USING g\n";
        let got = kinds(source);
        assert_eq!(
            got,
            vec![
                TokenKind::Name,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Run,
                TokenKind::Ident,
                TokenKind::Using,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_are_unescaped() {
        let tokens = Lexer::tokenize(r#"GOAL g "line\none\ttab \"q\" \\end""#);
        assert_eq!(tokens[2].kind, TokenKind::Str);
        assert_eq!(tokens[2].literal, "line\none\ttab \"q\" \\end");
    }

    #[test]
    fn unknown_escape_kept_verbatim() {
        let tokens = Lexer::tokenize(r#"GOAL g "a\qb""#);
        assert_eq!(tokens[2].literal, "a\\qb");
    }

    #[test]
    fn triple_quoted_preserves_newlines() {
        let source = "GOAL g \"\"\"first\nsecond\n\"\"\"";
        let tokens = Lexer::tokenize(source);
        assert_eq!(tokens[2].kind, TokenKind::Str);
        assert_eq!(tokens[2].literal, "first\nsecond\n");
    }

    #[test]
    fn unterminated_string_is_illegal_not_fatal() {
        let tokens = Lexer::tokenize("GOAL g \"oops\nNAME t");
        assert_eq!(tokens[2].kind, TokenKind::Illegal);
        // Lexing continues on the next line.
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Name));
    }

    #[test]
    fn unknown_character_is_illegal() {
        let tokens = Lexer::tokenize("NAME t @");
        assert_eq!(tokens[2].kind, TokenKind::Illegal);
        assert_eq!(tokens[2].literal, "@");
    }

    #[test]
    fn variable_token_drops_sigil() {
        let tokens = Lexer::tokenize("LOOP impl USING refine WITHIN $max_iterations");
        let var = tokens.iter().find(|t| t.kind == TokenKind::Var).unwrap();
        assert_eq!(var.literal, "max_iterations");
    }

    #[test]
    fn lone_dollar_is_illegal() {
        let tokens = Lexer::tokenize("NAME $");
        assert_eq!(tokens[1].kind, TokenKind::Illegal);
    }

    #[test]
    fn arrow_and_lone_dash() {
        assert_eq!(kinds("-> ,")[0], TokenKind::Arrow);
        assert_eq!(kinds("- x")[0], TokenKind::Illegal);
    }

    #[test]
    fn hyphenated_identifier() {
        let tokens = Lexer::tokenize("NAME implement-feature");
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].literal, "implement-feature");
    }

    #[test]
    fn numbers_lex_greedily() {
        let tokens = Lexer::tokenize("LOOP impl USING refine WITHIN 42");
        let number = tokens.iter().find(|t| t.kind == TokenKind::Number).unwrap();
        assert_eq!(number.literal, "42");
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = Lexer::tokenize("NAME t\nGOAL g \"do\"");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        let goal = tokens.iter().find(|t| t.kind == TokenKind::Goal).unwrap();
        assert_eq!((goal.line, goal.column), (2, 1));
    }

    #[test]
    fn crlf_line_endings_collapse_cr() {
        let got = kinds("NAME t\r\nRUN s USING g\r\n");
        assert_eq!(
            got,
            vec![
                TokenKind::Name,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Run,
                TokenKind::Ident,
                TokenKind::Using,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }
}
