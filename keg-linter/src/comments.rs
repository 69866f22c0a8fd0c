use std::io::{self, Write};

use indexmap::IndexMap;

use crate::{
    error::Result,
    formula::parser::Parser,
    lexer::Lexer,
};

/// Comments of a formula file, keyed by the statement they precede so a
/// canonical rewrite can put them back.
#[derive(Default, Debug)]
pub struct Comments {
    pub field_comments: IndexMap<String, Vec<String>>,
    pub inline_comments: IndexMap<String, String>,
    pub footer_comments: Vec<String>,
}

impl Comments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_comments(&mut self, formula_str: &str) -> Result<()> {
        let (tokens, comments) = Lexer::new(formula_str).tokenize()?;
        let anchors = Parser::new(tokens).parse()?.anchors();

        for comment in comments {
            match anchors.iter().find(|(line, _)| *line >= comment.line) {
                Some((line, key)) if *line == comment.line => {
                    self.inline_comments.insert(key.clone(), comment.text);
                }
                Some((_, key)) => {
                    self.field_comments
                        .entry(key.clone())
                        .or_default()
                        .push(comment.text);
                }
                None => self.footer_comments.push(comment.text),
            }
        }

        Ok(())
    }

    pub fn has(&self, key: &str) -> bool {
        self.field_comments.contains_key(key) || self.inline_comments.contains_key(key)
    }

    pub fn write_for<W: Write>(&self, writer: &mut W, key: &str, indent: &str) -> io::Result<()> {
        if let Some(lines) = self.field_comments.get(key) {
            for line in lines {
                writeln!(writer, "{}{}", indent, line)?;
            }
        }
        Ok(())
    }

    pub fn write_inline<W: Write>(&self, writer: &mut W, key: &str) -> io::Result<()> {
        if let Some(text) = self.inline_comments.get(key) {
            write!(writer, " {}", text)?;
        }
        Ok(())
    }

    pub fn write_footer<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for line in &self.footer_comments {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }
}
