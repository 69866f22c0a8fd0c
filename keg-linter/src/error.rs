use colored::Colorize;
use thiserror::Error;

use crate::logger::TaskLogger;

#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("{0} error(s) found in formula")]
    Invalid(usize),

    #[error("unknown interpolation '#{{{0}}}'")]
    UnknownInterpolation(String),
}

pub type Result<T> = std::result::Result<T, FormulaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

#[derive(Debug)]
pub struct ErrorDetails {
    pub field: String,
    pub message: String,
    pub line_number: usize,
    pub severity: Severity,
}

pub fn highlight_error_line(
    formula_str: &str,
    line_number: usize,
    is_fatal: bool,
    logger: &TaskLogger,
) {
    let context_range = 3;
    let total = formula_str.lines().count();
    let start_line = line_number.saturating_sub(context_range + 1);
    let end_line = (line_number + context_range).min(total);

    let lines: Vec<&str> = formula_str
        .lines()
        .skip(start_line)
        .take(end_line.saturating_sub(start_line))
        .collect();

    for (index, line) in lines.iter().enumerate() {
        let current_line_number = start_line + index + 1;
        if current_line_number == line_number {
            let msg = format!("--> {}: {}", current_line_number, line);
            logger.custom_error(format!(
                "{}",
                if is_fatal {
                    msg.red().bold()
                } else {
                    msg.yellow().bold()
                }
            ));
        } else {
            logger.custom_error(format!("    {}: {}", current_line_number, line));
        }
    }
    logger.custom_error("");
}
