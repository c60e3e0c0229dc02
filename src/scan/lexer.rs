// Purpose: Just enough of a Python tokenizer to find import statements without executing anything.
// Inputs/Outputs: Source text in, flat token stream with logical-line breaks out.
// Invariants: Strings, comments and bracketed newlines never produce statement boundaries.
// Gotchas: Only the statement shape matters here; numbers and operators collapse into `Other`.

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Dot,
    Comma,
    Star,
    LParen,
    RParen,
    /// `;` or a top-level `:`; both can precede a statement on the same line.
    StmtSep,
    Newline,
    Other,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

pub struct Lexer<'a> {
    src: &'a str,
    idx: usize,
    line: usize,
    brackets: Vec<(char, usize)>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.strip_prefix('\u{feff}').unwrap_or(src),
            idx: 0,
            line: 1,
            brackets: Vec::new(),
        }
    }

    pub fn lex_all(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.next_token()? {
            tokens.push(tok);
        }
        if let Some(&(open, line)) = self.brackets.last() {
            return Err(LexError {
                line,
                message: format!("unclosed `{}`", open),
            });
        }
        tokens.push(Token {
            kind: TokenKind::Newline,
            line: self.line,
        });
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        loop {
            let Some(ch) = self.peek_char() else {
                return Ok(None);
            };
            match ch {
                ' ' | '\t' | '\r' | '\x0c' => self.advance(),
                '#' => {
                    while let Some(c) = self.peek_char()
                        && c != '\n'
                    {
                        self.advance();
                    }
                }
                '\\' if matches!(self.peek_next_char(), Some('\n')) => {
                    self.advance();
                    self.advance();
                }
                '\\' if self.peek_next_char() == Some('\r') => {
                    self.advance();
                    self.advance();
                    if self.peek_char() == Some('\n') {
                        self.advance();
                    }
                }
                '\n' => {
                    let line = self.line;
                    self.advance();
                    if self.brackets.is_empty() {
                        return Ok(Some(Token {
                            kind: TokenKind::Newline,
                            line,
                        }));
                    }
                }
                _ => break,
            }
        }

        let line = self.line;
        let Some(ch) = self.peek_char() else {
            return Ok(None);
        };
        let kind = if is_ident_start(ch) {
            let ident = self.read_while(is_ident_continue);
            if is_string_prefix(&ident) && matches!(self.peek_char(), Some('"' | '\'')) {
                self.read_string()?;
                TokenKind::Other
            } else {
                TokenKind::Ident(ident)
            }
        } else if ch.is_ascii_digit() {
            self.read_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            TokenKind::Other
        } else {
            match ch {
                '"' | '\'' => {
                    self.read_string()?;
                    TokenKind::Other
                }
                '(' | '[' | '{' => {
                    self.brackets.push((ch, line));
                    self.advance();
                    if ch == '(' {
                        TokenKind::LParen
                    } else {
                        TokenKind::Other
                    }
                }
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match self.brackets.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            return Err(LexError {
                                line,
                                message: format!(
                                    "`{}` does not match `{}` opened on line {}",
                                    ch, open, open_line
                                ),
                            });
                        }
                        None => {
                            return Err(LexError {
                                line,
                                message: format!("unmatched `{}`", ch),
                            });
                        }
                    }
                    self.advance();
                    if ch == ')' {
                        TokenKind::RParen
                    } else {
                        TokenKind::Other
                    }
                }
                '.' => {
                    self.advance();
                    TokenKind::Dot
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                '*' => {
                    self.advance();
                    TokenKind::Star
                }
                ';' => {
                    self.advance();
                    TokenKind::StmtSep
                }
                ':' => {
                    self.advance();
                    // `:=` and slices stay inside the statement.
                    if self.peek_char() == Some('=') {
                        self.advance();
                        TokenKind::Other
                    } else if self.brackets.is_empty() {
                        TokenKind::StmtSep
                    } else {
                        TokenKind::Other
                    }
                }
                _ => {
                    self.advance();
                    TokenKind::Other
                }
            }
        };
        Ok(Some(Token { kind, line }))
    }

    fn read_string(&mut self) -> Result<(), LexError> {
        let start_line = self.line;
        let Some(quote) = self.peek_char() else {
            return Ok(());
        };
        let triple = self.src[self.idx..].starts_with(if quote == '"' { "\"\"\"" } else { "'''" });
        let quote_len = if triple { 3 } else { 1 };
        for _ in 0..quote_len {
            self.advance();
        }
        loop {
            let Some(ch) = self.peek_char() else {
                return Err(LexError {
                    line: start_line,
                    message: "unterminated string literal".to_string(),
                });
            };
            match ch {
                '\\' => {
                    self.advance();
                    self.advance();
                }
                '\n' if !triple => {
                    return Err(LexError {
                        line: start_line,
                        message: "unterminated string literal".to_string(),
                    });
                }
                c if c == quote => {
                    if !triple {
                        self.advance();
                        return Ok(());
                    }
                    let close = if quote == '"' { "\"\"\"" } else { "'''" };
                    if self.src[self.idx..].starts_with(close) {
                        for _ in 0..3 {
                            self.advance();
                        }
                        return Ok(());
                    }
                    self.advance();
                }
                _ => self.advance(),
            }
        }
    }

    fn read_while<F>(&mut self, f: F) -> String
    where
        F: Fn(char) -> bool,
    {
        let start = self.idx;
        while let Some(ch) = self.peek_char()
            && f(ch)
        {
            self.advance();
        }
        self.src[start..self.idx].to_string()
    }

    fn advance(&mut self) {
        let Some(ch) = self.peek_char() else {
            return;
        };
        self.idx += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.idx..].chars().next()
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut it = self.src[self.idx..].chars();
        it.next();
        it.next()
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn is_string_prefix(ident: &str) -> bool {
    matches!(
        ident.to_ascii_lowercase().as_str(),
        "r" | "b" | "u" | "f" | "rb" | "br" | "fr" | "rf" | "t" | "rt" | "tr"
    )
}
