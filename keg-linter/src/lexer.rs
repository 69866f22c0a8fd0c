use crate::error::{FormulaError, Result};

/// A piece of a string literal. Interpolations are kept by name and
/// resolved later against the install layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrPart {
    Lit(String),
    Interp(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Const(String),
    Str(Vec<StrPart>),
    Dot,
    Comma,
    Arrow,
    Lt,
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub line: usize,
    pub text: String,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    pub comments: Vec<Comment>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.char_indices().peekable(),
            line: 1,
            comments: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<(Vec<Token>, Vec<Comment>)> {
        let mut tokens = Vec::new();

        while let Some(&(_, c)) = self.chars.peek() {
            let line = self.line;
            match c {
                '\n' => {
                    self.chars.next();
                    self.line += 1;
                    // collapse blank lines
                    if !matches!(
                        tokens.last(),
                        Some(Token {
                            kind: TokenKind::Newline,
                            ..
                        }) | None
                    ) {
                        tokens.push(Token {
                            kind: TokenKind::Newline,
                            line,
                        });
                    }
                }
                ';' => {
                    self.chars.next();
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        line,
                    });
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '#' => {
                    let text = self.take_while(|c| c != '\n');
                    self.comments.push(Comment { line, text });
                }
                '"' => {
                    self.chars.next();
                    let parts = self.double_quoted()?;
                    tokens.push(Token {
                        kind: TokenKind::Str(parts),
                        line,
                    });
                }
                '\'' => {
                    self.chars.next();
                    let lit = self.single_quoted()?;
                    tokens.push(Token {
                        kind: TokenKind::Str(vec![StrPart::Lit(lit)]),
                        line,
                    });
                }
                '.' => {
                    self.chars.next();
                    tokens.push(Token {
                        kind: TokenKind::Dot,
                        line,
                    });
                }
                ',' => {
                    self.chars.next();
                    tokens.push(Token {
                        kind: TokenKind::Comma,
                        line,
                    });
                }
                '<' => {
                    self.chars.next();
                    tokens.push(Token {
                        kind: TokenKind::Lt,
                        line,
                    });
                }
                '=' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some((_, '>')) => tokens.push(Token {
                            kind: TokenKind::Arrow,
                            line,
                        }),
                        _ => {
                            return Err(FormulaError::Syntax {
                                line,
                                message: "expected '=>'".to_string(),
                            })
                        }
                    }
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let word = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                    let kind = if word.starts_with(|c: char| c.is_ascii_uppercase()) {
                        TokenKind::Const(word)
                    } else {
                        TokenKind::Ident(word)
                    };
                    tokens.push(Token { kind, line });
                }
                c if c.is_ascii_digit() => {
                    // bare numbers only appear in `revision 1` style fields
                    let word = self.take_while(|c| c.is_ascii_alphanumeric() || c == '.');
                    tokens.push(Token {
                        kind: TokenKind::Str(vec![StrPart::Lit(word)]),
                        line,
                    });
                }
                other => {
                    return Err(FormulaError::Syntax {
                        line,
                        message: format!("unexpected character '{}'", other),
                    });
                }
            }
        }

        if !matches!(
            tokens.last(),
            Some(Token {
                kind: TokenKind::Newline,
                ..
            }) | None
        ) {
            tokens.push(Token {
                kind: TokenKind::Newline,
                line: self.line,
            });
        }

        Ok((tokens, self.comments))
    }

    fn take_while<F: Fn(char) -> bool>(&mut self, pred: F) -> String {
        let mut out = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        out
    }

    fn double_quoted(&mut self) -> Result<Vec<StrPart>> {
        let start = self.line;
        let mut parts = Vec::new();
        let mut lit = String::new();

        loop {
            let Some((_, c)) = self.chars.next() else {
                return Err(FormulaError::Syntax {
                    line: start,
                    message: "unterminated string".to_string(),
                });
            };
            match c {
                '"' => break,
                '\n' => {
                    return Err(FormulaError::Syntax {
                        line: start,
                        message: "unterminated string".to_string(),
                    })
                }
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => lit.push('\n'),
                    Some((_, 't')) => lit.push('\t'),
                    Some((_, e @ ('\\' | '"' | '#'))) => lit.push(e),
                    Some((_, other)) => {
                        return Err(FormulaError::Syntax {
                            line: start,
                            message: format!("unsupported escape '\\{}'", other),
                        })
                    }
                    None => continue,
                },
                '#' if matches!(self.chars.peek(), Some((_, '{'))) => {
                    self.chars.next();
                    let name = self.take_while(|c| c != '}' && c != '"' && c != '\n');
                    if !matches!(self.chars.next(), Some((_, '}'))) {
                        return Err(FormulaError::Syntax {
                            line: start,
                            message: "unterminated interpolation".to_string(),
                        });
                    }
                    let name = name.trim();
                    if name.is_empty()
                        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        return Err(FormulaError::Syntax {
                            line: start,
                            message: format!("unsupported interpolation '#{{{}}}'", name),
                        });
                    }
                    if !lit.is_empty() {
                        parts.push(StrPart::Lit(std::mem::take(&mut lit)));
                    }
                    parts.push(StrPart::Interp(name.to_string()));
                }
                c => lit.push(c),
            }
        }

        if !lit.is_empty() || parts.is_empty() {
            parts.push(StrPart::Lit(lit));
        }
        Ok(parts)
    }

    fn single_quoted(&mut self) -> Result<String> {
        let start = self.line;
        let mut lit = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\'')) => return Ok(lit),
                Some((_, '\\')) => match self.chars.peek() {
                    Some(&(_, e @ ('\\' | '\''))) => {
                        self.chars.next();
                        lit.push(e);
                    }
                    _ => lit.push('\\'),
                },
                Some((_, '\n')) | None => {
                    return Err(FormulaError::Syntax {
                        line: start,
                        message: "unterminated string".to_string(),
                    })
                }
                Some((_, c)) => lit.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, _) = Lexer::new(src).tokenize().unwrap();
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_class_header() {
        assert_eq!(
            kinds("class Mrgitclean < Formula\n"),
            vec![
                TokenKind::Ident("class".into()),
                TokenKind::Const("Mrgitclean".into()),
                TokenKind::Lt,
                TokenKind::Const("Formula".into()),
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn test_interpolation() {
        let tokens = kinds(r##"system "#{bin}/mrgitclean", "--help""##);
        assert_eq!(
            tokens[1],
            TokenKind::Str(vec![
                StrPart::Interp("bin".into()),
                StrPart::Lit("/mrgitclean".into()),
            ])
        );
        assert_eq!(tokens[2], TokenKind::Comma);
        assert_eq!(tokens[3], TokenKind::Str(vec![StrPart::Lit("--help".into())]));
    }

    #[test]
    fn test_comments_are_collected() {
        let (tokens, comments) = Lexer::new("  # man1.install \"x\"\nend\n")
            .tokenize()
            .unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].line, 1);
        assert_eq!(comments[0].text, "# man1.install \"x\"");
        assert_eq!(tokens[0].kind, TokenKind::Ident("end".into()));
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn test_hash_inside_string_is_not_comment() {
        let tokens = kinds(r#"desc "issue #42""#);
        assert_eq!(tokens[1], TokenKind::Str(vec![StrPart::Lit("issue #42".into())]));
    }

    #[test]
    fn test_escapes_and_single_quotes() {
        let tokens = kinds(r#"desc "a \"b\" \#{c}" 'd\'e'"#);
        assert_eq!(
            tokens[1],
            TokenKind::Str(vec![StrPart::Lit("a \"b\" #{c}".into())])
        );
        assert_eq!(tokens[2], TokenKind::Str(vec![StrPart::Lit("d'e".into())]));
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("url \"https://x\n").tokenize().unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_arrow() {
        assert!(kinds(r#"bin.install "a" => "b""#).contains(&TokenKind::Arrow));
    }
}
