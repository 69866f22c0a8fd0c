use std::collections::{HashMap, HashSet};

use colored::Colorize;

use crate::{
    error::{highlight_error_line, ErrorDetails, Severity},
    logger::TaskLogger,
    validator::{audit_desc, FIELD_VALIDATORS},
    KNOWN_INTERPOLATIONS,
};

use super::{
    name_from_class,
    parser::{Arg, Block, Document},
    version_from_url, ExtraField, Formula, InstallDir, InstallStep, Template, TestCommand,
};

/// Semantic pass over a parsed formula document. Collects every finding
/// instead of stopping at the first one.
pub struct FormulaVisitor {
    pub formula_str: String,
    pub visited: HashSet<String>,
    pub errors: Vec<ErrorDetails>,
}

impl FormulaVisitor {
    pub fn new(formula_str: &str) -> Self {
        Self {
            formula_str: formula_str.to_string(),
            visited: HashSet::new(),
            errors: Vec::new(),
        }
    }

    pub fn record_error(
        &mut self,
        field: String,
        message: String,
        line_number: usize,
        severity: Severity,
    ) {
        self.errors.push(ErrorDetails {
            field,
            message,
            line_number,
            severity,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Error)
    }

    pub fn print_errors(&self, logger: &TaskLogger) {
        for error in &self.errors {
            let is_fatal = error.severity == Severity::Error;
            let msg = format!(
                "{} -> {}",
                error.field.bold(),
                if is_fatal {
                    error.message.red()
                } else {
                    error.message.yellow()
                }
            );
            if is_fatal {
                logger.error(msg);
            } else {
                logger.warn(msg);
            }
            if error.line_number != 0 {
                highlight_error_line(&self.formula_str, error.line_number, is_fatal, logger);
            }
        }
    }

    pub fn visit(&mut self, document: &Document) -> Option<Formula> {
        if document.parent != "Formula" {
            self.record_error(
                "class".to_string(),
                format!("'{}' must inherit from Formula", document.class_name),
                document.class_line,
                Severity::Error,
            );
        }

        let name = name_from_class(&document.class_name);
        let mut values: HashMap<&'static str, (String, usize)> = HashMap::new();
        let mut extra = Vec::new();

        for call in &document.fields {
            if let Some(validator) = FIELD_VALIDATORS.iter().find(|v| v.name == call.name) {
                if !self.visited.insert(call.name.clone()) {
                    self.record_error(
                        call.name.clone(),
                        format!("'{}' field is duplicated", call.name),
                        call.line,
                        Severity::Error,
                    );
                    continue;
                }
                if let Some(value) = validator.validate(&call.args, self, call.line) {
                    values.insert(validator.name, (value, call.line));
                }
            } else {
                self.record_error(
                    call.name.clone(),
                    format!("'{}' is not supported and will be ignored", call.name),
                    call.line,
                    Severity::Warn,
                );
                extra.push(ExtraField {
                    name: call.name.clone(),
                    args: call.args.clone(),
                });
            }
        }

        for validator in FIELD_VALIDATORS {
            if validator.required && !self.visited.contains(validator.name) {
                self.record_error(
                    validator.name.to_string(),
                    format!("Missing required field: {}", validator.name),
                    document.class_line,
                    Severity::Error,
                );
            }
        }

        if let Some((desc, line)) = values.get("desc") {
            for finding in audit_desc(&name, desc) {
                self.record_error("desc".to_string(), finding, *line, Severity::Warn);
            }
        }

        let version = match (values.get("version"), values.get("url")) {
            (Some((version, _)), _) => Some((version.clone(), true)),
            (None, Some((url, line))) => match version_from_url(url) {
                Some(version) => Some((version, false)),
                None => {
                    self.record_error(
                        "version".to_string(),
                        "Unable to derive a version from 'url'. Add a 'version' field."
                            .to_string(),
                        *line,
                        Severity::Error,
                    );
                    None
                }
            },
            (None, None) => None,
        };

        let install = match document.install {
            Some(ref block) => self.visit_install(block, &name),
            None => {
                self.record_error(
                    "install".to_string(),
                    "Missing 'def install' block".to_string(),
                    document.class_line,
                    Severity::Error,
                );
                Vec::new()
            }
        };

        let test = match document.test {
            Some(ref block) => self.visit_test(block),
            None => {
                self.record_error(
                    "test".to_string(),
                    "No 'test do' block. The install can't be verified.".to_string(),
                    document.end_line,
                    Severity::Warn,
                );
                Vec::new()
            }
        };

        if self.has_errors() {
            return None;
        }

        let (version, version_explicit) = version?;
        let mut take = |key: &str| values.remove(key).map(|(value, _)| value);

        Some(Formula {
            class_name: document.class_name.clone(),
            name,
            desc: take("desc")?,
            homepage: take("homepage")?,
            url: take("url")?,
            sha256: take("sha256")?,
            license: take("license"),
            version,
            version_explicit,
            install,
            test,
            extra,
        })
    }

    fn visit_install(&mut self, block: &Block, pkg_name: &str) -> Vec<InstallStep> {
        let mut steps = Vec::new();

        for stmt in &block.stmts {
            let dir = stmt
                .receiver
                .as_deref()
                .filter(|_| stmt.method == "install")
                .and_then(InstallDir::from_ident);
            let Some(dir) = dir else {
                self.record_error(
                    "install".to_string(),
                    format!(
                        "Unsupported install statement '{}'. Expected '<dir>.install \"path\"'",
                        match stmt.receiver {
                            Some(ref r) => format!("{}.{}", r, stmt.method),
                            None => stmt.method.clone(),
                        }
                    ),
                    stmt.line,
                    Severity::Error,
                );
                continue;
            };

            let (source, target) = match stmt.args.as_slice() {
                [Arg::Str(source)] => (Template(source.clone()), None),
                [Arg::Pair(source, target)] => {
                    (Template(source.clone()), Some(Template(target.clone())))
                }
                _ => {
                    self.record_error(
                        "install".to_string(),
                        format!("'{}.install' takes exactly one path", dir),
                        stmt.line,
                        Severity::Error,
                    );
                    continue;
                }
            };

            let Some(source) = source.as_literal() else {
                self.record_error(
                    "install".to_string(),
                    "Install paths cannot use interpolation".to_string(),
                    stmt.line,
                    Severity::Error,
                );
                continue;
            };
            if !is_relative_inside(&source) {
                self.record_error(
                    "install".to_string(),
                    format!(
                        "'{}' must be a relative path inside the source tree",
                        source
                    ),
                    stmt.line,
                    Severity::Error,
                );
                continue;
            }

            let target = match target.map(|t| t.as_literal()) {
                None => None,
                Some(Some(t)) if !t.is_empty() && !t.contains('/') && t != "." && t != ".." => {
                    Some(t)
                }
                Some(_) => {
                    self.record_error(
                        "install".to_string(),
                        "Install target must be a plain file name".to_string(),
                        stmt.line,
                        Severity::Error,
                    );
                    continue;
                }
            };

            let step = InstallStep {
                dir,
                source,
                target,
                line: stmt.line,
            };
            if step.target.is_some() && step.has_glob() {
                self.record_error(
                    "install".to_string(),
                    "A glob source can't be renamed".to_string(),
                    stmt.line,
                    Severity::Error,
                );
                continue;
            }
            steps.push(step);
        }

        if block.stmts.is_empty() {
            self.record_error(
                "install".to_string(),
                format!("'def install' for {} installs nothing", pkg_name),
                block.line,
                Severity::Error,
            );
        }
        steps
    }

    fn visit_test(&mut self, block: &Block) -> Vec<TestCommand> {
        let mut commands = Vec::new();

        for stmt in &block.stmts {
            if stmt.receiver.is_some() || stmt.method != "system" {
                self.record_error(
                    "test".to_string(),
                    format!(
                        "Unsupported test statement '{}'. Only 'system' is allowed",
                        stmt.method
                    ),
                    stmt.line,
                    Severity::Error,
                );
                continue;
            }

            let mut templates = Vec::new();
            for arg in &stmt.args {
                match arg {
                    Arg::Str(parts) => templates.push(Template(parts.clone())),
                    Arg::Pair(_, _) => {
                        self.record_error(
                            "test".to_string(),
                            "'system' doesn't take '=>' arguments".to_string(),
                            stmt.line,
                            Severity::Error,
                        );
                    }
                }
            }

            for name in templates.iter().flat_map(|t| t.interpolations()) {
                if !KNOWN_INTERPOLATIONS.contains(&name) {
                    self.record_error(
                        "test".to_string(),
                        format!(
                            "Unknown interpolation '#{{{}}}'. Valid values are: {:?}",
                            name, KNOWN_INTERPOLATIONS
                        ),
                        stmt.line,
                        Severity::Error,
                    );
                }
            }

            if templates.is_empty() {
                self.record_error(
                    "test".to_string(),
                    "'system' needs a program to run".to_string(),
                    stmt.line,
                    Severity::Error,
                );
                continue;
            }

            let program = templates.remove(0);
            commands.push(TestCommand {
                program,
                args: templates,
                line: stmt.line,
            });
        }

        if block.stmts.is_empty() {
            self.record_error(
                "test".to_string(),
                "'test do' block is empty".to_string(),
                block.line,
                Severity::Warn,
            );
        }
        commands
    }
}

fn is_relative_inside(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.split('/').any(|segment| segment == "..")
}
