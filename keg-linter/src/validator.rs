use crate::{
    error::Severity,
    formula::{archive_name, is_unsupported_archive, parser::Arg, visitor::FormulaVisitor},
    lexer::StrPart,
    license::unknown_licenses,
};

pub enum FieldType {
    String,
    Url,
    Sha256,
    License,
    Version,
}

pub struct FieldValidator {
    pub name: &'static str,
    field_type: FieldType,
    pub required: bool,
}

impl FieldValidator {
    const fn new(name: &'static str, field_type: FieldType, required: bool) -> Self {
        Self {
            name,
            field_type,
            required,
        }
    }

    pub fn validate(
        &self,
        args: &[Arg],
        visitor: &mut FormulaVisitor,
        line_number: usize,
    ) -> Option<String> {
        let value = self.validate_string(args, visitor, line_number)?;
        match &self.field_type {
            FieldType::String => Some(value),
            FieldType::Url => self.validate_url(value, visitor, line_number),
            FieldType::Sha256 => self.validate_sha256(value, visitor, line_number),
            FieldType::License => self.validate_license(value, visitor, line_number),
            FieldType::Version => self.validate_version(value, visitor, line_number),
        }
    }

    fn validate_string(
        &self,
        args: &[Arg],
        visitor: &mut FormulaVisitor,
        line_number: usize,
    ) -> Option<String> {
        let [Arg::Str(parts)] = args else {
            visitor.record_error(
                self.name.to_string(),
                format!("'{}' takes exactly one string", self.name),
                line_number,
                Severity::Error,
            );
            return None;
        };

        let mut value = String::new();
        for part in parts {
            match part {
                StrPart::Lit(s) => value.push_str(s),
                StrPart::Interp(name) => {
                    visitor.record_error(
                        self.name.to_string(),
                        format!("'{}' cannot interpolate '#{{{}}}'", self.name, name),
                        line_number,
                        Severity::Error,
                    );
                    return None;
                }
            }
        }

        if value.trim().is_empty() {
            visitor.record_error(
                self.name.to_string(),
                format!("'{}' field cannot be empty", self.name),
                line_number,
                Severity::Error,
            );
            return None;
        }
        Some(value)
    }

    fn validate_url(
        &self,
        value: String,
        visitor: &mut FormulaVisitor,
        line_number: usize,
    ) -> Option<String> {
        match url::Url::parse(&value) {
            Ok(parsed) if is_valid_url(&value) => {
                if self.name == "url" && is_unsupported_archive(&value) {
                    visitor.record_error(
                        self.name.to_string(),
                        format!("Unsupported archive format: {}", archive_name(&value)),
                        line_number,
                        Severity::Error,
                    );
                    return None;
                }
                if parsed.scheme() == "http" {
                    visitor.record_error(
                        self.name.to_string(),
                        format!("'{}' should use https: {}", self.name, value),
                        line_number,
                        Severity::Warn,
                    );
                }
                Some(value)
            }
            _ => {
                visitor.record_error(
                    self.name.to_string(),
                    format!("'{}' field must be a valid URL, got '{}'", self.name, value),
                    line_number,
                    Severity::Error,
                );
                None
            }
        }
    }

    fn validate_sha256(
        &self,
        value: String,
        visitor: &mut FormulaVisitor,
        line_number: usize,
    ) -> Option<String> {
        if is_placeholder(&value) {
            visitor.record_error(
                self.name.to_string(),
                format!("'{}' is a placeholder, not a checksum", value),
                line_number,
                Severity::Error,
            );
            return None;
        }
        if !is_valid_sha256(&value) {
            visitor.record_error(
                self.name.to_string(),
                "'sha256' must be 64 hexadecimal characters".to_string(),
                line_number,
                Severity::Error,
            );
            return None;
        }
        Some(value.to_lowercase())
    }

    fn validate_license(
        &self,
        value: String,
        visitor: &mut FormulaVisitor,
        line_number: usize,
    ) -> Option<String> {
        for id in unknown_licenses(&value) {
            visitor.record_error(
                self.name.to_string(),
                format!("'{}' is not a known SPDX license identifier", id),
                line_number,
                Severity::Warn,
            );
        }
        Some(value)
    }

    fn validate_version(
        &self,
        value: String,
        visitor: &mut FormulaVisitor,
        line_number: usize,
    ) -> Option<String> {
        if !is_valid_version(&value) {
            visitor.record_error(
                self.name.to_string(),
                format!("Invalid version '{}'", value),
                line_number,
                Severity::Error,
            );
            return None;
        }
        Some(value)
    }
}

pub const FIELD_VALIDATORS: &[FieldValidator] = &[
    FieldValidator::new("desc", FieldType::String, true),
    FieldValidator::new("homepage", FieldType::Url, true),
    FieldValidator::new("url", FieldType::Url, true),
    FieldValidator::new("sha256", FieldType::Sha256, true),
    FieldValidator::new("license", FieldType::License, false),
    FieldValidator::new("version", FieldType::Version, false),
];

/// A version names the keg directory, so it must be one plain path component.
pub fn is_valid_version(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('.')
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\' || c.is_control())
}

pub fn is_valid_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => match url.scheme() {
            "http" | "https" => url.host_str().is_some_and(|h| !h.is_empty()),
            "file" => !url.path().is_empty(),
            _ => false,
        },
        Err(_) => false,
    }
}

pub fn is_valid_sha256(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    (trimmed.starts_with('<') && trimmed.ends_with('>'))
        || trimmed.eq_ignore_ascii_case("TODO")
        || trimmed.chars().all(|c| c == '0' || c == 'x' || c == 'X')
}

/// Style findings for `desc`. These never block installation.
pub fn audit_desc(pkg_name: &str, desc: &str) -> Vec<String> {
    let mut findings = Vec::new();
    let first_word = desc.split_whitespace().next().unwrap_or_default();

    if ["a", "an", "the"].contains(&first_word.to_lowercase().as_str()) {
        findings.push(format!("Description shouldn't start with an article ('{}')", first_word));
    }
    if first_word.eq_ignore_ascii_case(pkg_name) {
        findings.push("Description shouldn't start with the formula name".to_string());
    }
    if desc.trim_end().ends_with('.') {
        findings.push("Description shouldn't end with a full stop".to_string());
    }
    if desc.chars().count() > 80 {
        findings.push(format!(
            "Description is {} characters long, keep it under 80",
            desc.chars().count()
        ));
    }
    findings
}
