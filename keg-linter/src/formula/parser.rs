use crate::{
    error::{FormulaError, Result},
    lexer::{StrPart, Token, TokenKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(Vec<StrPart>),
    Pair(Vec<StrPart>, Vec<StrPart>),
}

/// A top-level field call such as `desc "..."`.
#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub args: Vec<Arg>,
    pub line: usize,
}

/// A statement inside `def install` or `test do`, e.g. `bin.install "x"`.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub receiver: Option<String>,
    pub method: String,
    pub args: Vec<Arg>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub class_name: String,
    pub parent: String,
    pub class_line: usize,
    pub end_line: usize,
    pub fields: Vec<Call>,
    pub install: Option<Block>,
    pub test: Option<Block>,
}

impl Document {
    /// Lines that comments may attach to, keyed the way `Comments` stores them.
    pub fn anchors(&self) -> Vec<(usize, String)> {
        let mut anchors = vec![(self.class_line, "class".to_string())];
        for field in &self.fields {
            anchors.push((field.line, field.name.clone()));
        }
        for (name, block) in [("install", &self.install), ("test", &self.test)] {
            if let Some(block) = block {
                anchors.push((block.line, name.to_string()));
                for (idx, stmt) in block.stmts.iter().enumerate() {
                    anchors.push((stmt.line, format!("{}:{}", name, idx)));
                }
                anchors.push((block.end_line, format!("{}:end", name)));
            }
        }
        anchors.push((self.end_line, "end".to_string()));
        anchors.sort_by_key(|(line, _)| *line);
        anchors
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn current_line(&self) -> usize {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(FormulaError::Syntax {
            line: self.current_line(),
            message: message.into(),
        })
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Newline)) {
            self.pos += 1;
        }
    }

    fn expect_newline(&mut self) -> Result<()> {
        match self.next().map(|t| t.kind) {
            Some(TokenKind::Newline) | None => Ok(()),
            Some(other) => {
                self.pos -= 1;
                self.error(format!("unexpected {} at end of statement", describe(&other)))
            }
        }
    }

    fn expect_ident(&mut self, word: &str) -> Result<usize> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Ident(ref w),
                line,
            }) if w == word => Ok(line),
            Some(token) => {
                self.pos -= 1;
                self.error(format!("expected '{}', found {}", word, describe(&token.kind)))
            }
            None => self.error(format!("expected '{}', found end of file", word)),
        }
    }

    pub fn parse(mut self) -> Result<Document> {
        self.skip_newlines();
        let class_line = self.expect_ident("class")?;

        let class_name = match self.next().map(|t| t.kind) {
            Some(TokenKind::Const(name)) => name,
            _ => return self.error("expected a capitalized class name after 'class'"),
        };
        if !matches!(self.next().map(|t| t.kind), Some(TokenKind::Lt)) {
            return self.error("expected '<' after class name");
        }
        let parent = match self.next().map(|t| t.kind) {
            Some(TokenKind::Const(name)) => name,
            _ => return self.error("expected parent class after '<'"),
        };
        self.expect_newline()?;

        let mut fields = Vec::new();
        let mut install = None;
        let mut test = None;

        let end_line = loop {
            self.skip_newlines();
            let Some(token) = self.next() else {
                return self.error(format!("missing 'end' for class {}", class_name));
            };
            let line = token.line;

            match token.kind {
                TokenKind::Ident(ref word) if word == "end" => {
                    self.expect_newline()?;
                    break line;
                }
                TokenKind::Ident(ref word) if word == "def" => {
                    let name = match self.next().map(|t| t.kind) {
                        Some(TokenKind::Ident(name)) => name,
                        _ => return self.error("expected method name after 'def'"),
                    };
                    if name != "install" {
                        return Err(FormulaError::Syntax {
                            line,
                            message: format!("unsupported method 'def {}'", name),
                        });
                    }
                    if install.is_some() {
                        return Err(FormulaError::Syntax {
                            line,
                            message: "'def install' is defined twice".to_string(),
                        });
                    }
                    self.expect_newline()?;
                    install = Some(self.parse_block(line)?);
                }
                TokenKind::Ident(ref word) if word == "test" => {
                    self.expect_ident("do")?;
                    self.expect_newline()?;
                    if test.is_some() {
                        return Err(FormulaError::Syntax {
                            line,
                            message: "'test do' block is defined twice".to_string(),
                        });
                    }
                    test = Some(self.parse_block(line)?);
                }
                TokenKind::Ident(name) => {
                    if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Ident(w)) if w == "do")
                    {
                        return Err(FormulaError::Syntax {
                            line,
                            message: format!("unsupported block '{} do'", name),
                        });
                    }
                    let args = self.parse_args()?;
                    self.expect_newline()?;
                    fields.push(Call { name, args, line });
                }
                other => {
                    return Err(FormulaError::Syntax {
                        line,
                        message: format!("unexpected {} in class body", describe(&other)),
                    })
                }
            }
        };

        self.skip_newlines();
        if let Some(token) = self.peek() {
            return Err(FormulaError::Syntax {
                line: token.line,
                message: "unexpected content after closing 'end'".to_string(),
            });
        }

        Ok(Document {
            class_name,
            parent,
            class_line,
            end_line,
            fields,
            install,
            test,
        })
    }

    fn parse_block(&mut self, line: usize) -> Result<Block> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            let Some(token) = self.next() else {
                return Err(FormulaError::Syntax {
                    line,
                    message: "block is missing 'end'".to_string(),
                });
            };
            let stmt_line = token.line;
            let first = match token.kind {
                TokenKind::Ident(word) if word == "end" => {
                    self.expect_newline()?;
                    return Ok(Block {
                        stmts,
                        line,
                        end_line: stmt_line,
                    });
                }
                TokenKind::Ident(word) => word,
                other => {
                    return Err(FormulaError::Syntax {
                        line: stmt_line,
                        message: format!("unexpected {} in block", describe(&other)),
                    })
                }
            };

            let (receiver, method) =
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Dot)) {
                    self.pos += 1;
                    match self.next().map(|t| t.kind) {
                        Some(TokenKind::Ident(method)) => (Some(first), method),
                        _ => return self.error("expected method name after '.'"),
                    }
                } else {
                    (None, first)
                };

            let args = self.parse_args()?;
            self.expect_newline()?;
            stmts.push(Stmt {
                receiver,
                method,
                args,
                line: stmt_line,
            });
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>> {
        let mut args = Vec::new();
        loop {
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::Str(parts)) => {
                    self.pos += 1;
                    if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Arrow)) {
                        self.pos += 1;
                        match self.next().map(|t| t.kind) {
                            Some(TokenKind::Str(target)) => args.push(Arg::Pair(parts, target)),
                            _ => return self.error("expected string after '=>'"),
                        }
                    } else {
                        args.push(Arg::Str(parts));
                    }
                }
                Some(TokenKind::Newline) | None if args.is_empty() => return Ok(args),
                Some(other) => {
                    return self.error(format!("expected string argument, found {}", describe(&other)))
                }
                None => return self.error("expected string argument, found end of file"),
            }

            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Comma) => {
                    self.pos += 1;
                    // a trailing comma may continue the argument list on the next line
                    self.skip_newlines();
                }
                _ => return Ok(args),
            }
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(w) => format!("'{}'", w),
        TokenKind::Const(w) => format!("'{}'", w),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Arrow => "'=>'".to_string(),
        TokenKind::Lt => "'<'".to_string(),
        TokenKind::Newline => "end of line".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> Result<Document> {
        let (tokens, _) = Lexer::new(src).tokenize()?;
        Parser::new(tokens).parse()
    }

    #[test]
    fn test_parse_document() {
        let doc = parse(
            r##"
class Mrgitclean < Formula
  desc "Clean merged branches"
  url "https://example.com/v1.0.0.tar.gz"

  def install
    bin.install "bin/mrgitclean"
    man1.install "man/a.1" => "b.1"
  end

  test do
    system "#{bin}/mrgitclean", "--help"
  end
end
"##,
        )
        .unwrap();

        assert_eq!(doc.class_name, "Mrgitclean");
        assert_eq!(doc.parent, "Formula");
        assert_eq!(doc.class_line, 2);
        assert_eq!(doc.fields.len(), 2);
        assert_eq!(doc.fields[1].name, "url");
        assert_eq!(doc.fields[1].line, 4);

        let install = doc.install.unwrap();
        assert_eq!(install.stmts.len(), 2);
        assert_eq!(install.stmts[0].receiver.as_deref(), Some("bin"));
        assert_eq!(install.stmts[0].method, "install");
        assert!(matches!(install.stmts[1].args[0], Arg::Pair(_, _)));
        assert_eq!(install.end_line, 9);

        let test = doc.test.unwrap();
        assert_eq!(test.stmts[0].receiver, None);
        assert_eq!(test.stmts[0].method, "system");
        assert_eq!(test.stmts[0].args.len(), 2);
        assert_eq!(doc.end_line, 14);
    }

    #[test]
    fn test_missing_end() {
        let err = parse("class Foo < Formula\n  desc \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("missing 'end'"));
    }

    #[test]
    fn test_unsupported_method() {
        let err = parse("class Foo < Formula\n  def caveats\n  end\nend\n").unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_unsupported_block() {
        let err = parse("class Foo < Formula\n  livecheck do\n  end\nend\n").unwrap_err();
        assert!(err.to_string().contains("unsupported block 'livecheck do'"));
    }

    #[test]
    fn test_multiline_args() {
        let doc = parse(
            "class Foo < Formula\n  test do\n    system \"a\",\n      \"b\"\n  end\nend\n",
        )
        .unwrap();
        assert_eq!(doc.test.unwrap().stmts[0].args.len(), 2);
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse("class Foo < Formula\nend\ndesc \"x\"\n").unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_anchors_sorted() {
        let doc = parse("class Foo < Formula\n  desc \"x\"\n  def install\n    bin.install \"a\"\n  end\nend\n").unwrap();
        let keys: Vec<String> = doc.anchors().into_iter().map(|(_, k)| k).collect();
        assert_eq!(
            keys,
            vec!["class", "desc", "install", "install:0", "install:end", "end"]
        );
    }
}
