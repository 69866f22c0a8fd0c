use std::{
    env,
    fmt::Display,
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use colored::Colorize;
use comments::Comments;
use error::{highlight_error_line, FormulaError, Severity};
use formula::{parser::Parser, visitor::FormulaVisitor, Formula};
use lexer::Lexer;
use logger::TaskLogger;

pub mod comments;
pub mod error;
pub mod formula;
pub mod hash;
pub mod lexer;
pub mod license;
pub mod logger;
pub mod validator;

pub const VALID_LICENSES: &str = include_str!("licenses");

/// Names usable as `#{...}` inside test commands.
pub const KNOWN_INTERPOLATIONS: [&str; 8] = [
    "bin", "doc", "libexec", "name", "prefix", "sbin", "share", "version",
];

pub struct Linter {
    logger: TaskLogger,
}

impl Linter {
    pub fn new(logger: TaskLogger) -> Self {
        Linter { logger }
    }

    /// Lints a formula file. With `inplace`, a valid formula is rewritten
    /// in canonical form, keeping its comments.
    pub fn lint(&self, file_path: &str, inplace: bool) -> Option<Formula> {
        let logger = &self.logger;
        let formula_str = match self.read_formula(file_path) {
            Ok(s) => s,
            Err(err) => {
                logger.error(err.to_string());
                return None;
            }
        };

        let path = Path::new(&file_path);
        let real_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()
                .map(|dir| dir.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        logger.info(format!("Linting {} ({})", file_path, real_path.display()));

        let formula = self.lint_str(&formula_str)?;

        if inplace {
            if let Err(err) = self.rewrite(file_path, &formula_str, &formula) {
                logger.error(format!("Failed to rewrite {}: {}", file_path, err));
                return None;
            }
        }

        logger.success(format!(
            "{} {} validated",
            formula.name.bright_cyan(),
            formula.version
        ));
        Some(formula)
    }

    pub fn lint_str(&self, formula_str: &str) -> Option<Formula> {
        let logger = &self.logger;

        let document = Lexer::new(formula_str)
            .tokenize()
            .and_then(|(tokens, _)| Parser::new(tokens).parse());
        let document = match document {
            Ok(document) => document,
            Err(FormulaError::Syntax { line, message }) => {
                logger.error(format!("{} -> {}", "syntax".bold(), message.red()));
                highlight_error_line(formula_str, line, true, logger);
                logger.error("Formula validation failed.");
                return None;
            }
            Err(err) => {
                logger.error(err.to_string());
                return None;
            }
        };

        let mut visitor = FormulaVisitor::new(formula_str);
        let formula = visitor.visit(&document);
        visitor.print_errors(logger);

        let warnings = visitor
            .errors
            .iter()
            .filter(|e| e.severity == Severity::Warn)
            .count();
        match formula {
            Some(formula) => {
                if warnings > 0 {
                    logger.warn(format!("Formula has {} warning(s)", warnings));
                }
                Some(formula)
            }
            None => {
                logger.error("Formula validation failed.");
                None
            }
        }
    }

    fn rewrite(&self, file_path: &str, formula_str: &str, formula: &Formula) -> std::io::Result<()> {
        let mut comments = Comments::new();
        comments
            .parse_comments(formula_str)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;

        let mut canonical = Vec::new();
        formula.write_formula(&mut canonical, &comments)?;
        if canonical == formula_str.as_bytes() {
            self.logger.info("Formula is already in canonical form");
            return Ok(());
        }

        let tmp_path = format!("{}.tmp", file_path);
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&canonical)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, file_path)?;
        self.logger
            .info(format!("Canonical formula has been written to {}", file_path));
        Ok(())
    }

    fn read_formula(&self, file_path: &str) -> Result<String, FileError> {
        let path = Path::new(file_path);
        if !path.exists() {
            return Err(FileError::NotFound(file_path.into()));
        }
        let content =
            fs::read_to_string(path).map_err(|_| FileError::InvalidFile(file_path.into()))?;
        if content.trim().is_empty() {
            return Err(FileError::InvalidFile(file_path.into()));
        }
        Ok(content)
    }
}

enum FileError {
    InvalidFile(String),
    NotFound(String),
}

impl Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileError::InvalidFile(fp) => {
                write!(f, "Invalid file {}. Please provide a valid formula.", fp)
            }
            FileError::NotFound(fp) => write!(f, "File {} not found.", fp),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::logger::{LogManager, LogMessage};

    const SCRAMBLED: &str = r##"class Mrgitclean < Formula
  license "MIT"
  sha256 "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
  url "https://github.com/yourusername/mrgitclean/archive/v1.0.0.tar.gz"
  homepage "https://github.com/yourusername/mrgitclean"
  # what it does
  desc "Friendly tool to clean up merged Git branches"
  def install
    bin.install "bin/mrgitclean"
  end
  test do
    system "#{bin}/mrgitclean", "--help"
  end
end
"##;

    #[test]
    fn test_lint_inplace_rewrites_canonically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mrgitclean.formula");
        fs::write(&path, SCRAMBLED).unwrap();

        let (tx, rx) = mpsc::channel();
        let linter = Linter::new(LogManager::new(tx).create_logger(None));
        let formula = linter.lint(path.to_str().unwrap(), true).unwrap();
        assert_eq!(formula.name, "mrgitclean");

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.starts_with("class Mrgitclean < Formula\n  # what it does\n  desc "));
        assert!(rewritten.contains("\n\n  def install\n"));
        drop(linter);
        assert!(rx
            .try_iter()
            .any(|m| matches!(m, LogMessage::Success(_))));
    }

    #[test]
    fn test_lint_reports_syntax_error() {
        let (tx, rx) = mpsc::channel();
        let linter = Linter::new(LogManager::new(tx).create_logger(None));
        assert!(linter.lint_str("class Foo < Formula\n  desc \"x\n").is_none());
        drop(linter);
        let highlighted: Vec<String> = rx
            .try_iter()
            .filter_map(|m| match m {
                LogMessage::CustomError(s) => Some(s),
                _ => None,
            })
            .collect();
        assert!(highlighted.iter().any(|line| line.contains("--> 2:")));
    }

    #[test]
    fn test_shipped_formula_needs_checksum() {
        let shipped = include_str!("../../formulae/mrgitclean.formula");
        let (tx, _rx) = mpsc::channel();
        let linter = Linter::new(LogManager::new(tx).create_logger(None));
        assert!(linter.lint_str(shipped).is_none());

        let filled = shipped.replace(
            "<SHA256_OF_TARBALL>",
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
        );
        let formula = linter.lint_str(&filled).unwrap();
        assert_eq!(formula.name, "mrgitclean");
        assert_eq!(formula.version, "1.0.0");
        assert_eq!(formula.test.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let (tx, rx) = mpsc::channel();
        let linter = Linter::new(LogManager::new(tx).create_logger(None));
        assert!(linter.lint("/nonexistent/foo.formula", false).is_none());
        drop(linter);
        assert!(rx
            .try_iter()
            .any(|m| matches!(m, LogMessage::Error(s) if s.contains("not found"))));
    }
}
