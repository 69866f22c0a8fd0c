use std::{
    fmt::{self, Display},
    io::{self, Write},
    path::PathBuf,
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;

use crate::{
    comments::Comments,
    error::{FormulaError, Result},
    lexer::{Lexer, StrPart},
};

pub mod parser;
pub mod visitor;

use parser::{Arg, Parser};
use visitor::FormulaVisitor;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:.*?[-_])?v?(\d+(?:\.\d+)*(?:[-.]?(?:alpha|beta|rc|pre)\.?\d*)?)\.(?:tar\.gz|tgz|tar)$",
    )
    .expect("version regex is valid")
});

/// Directory a file is installed into, relative to the keg root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallDir {
    Bin,
    Sbin,
    Libexec,
    Man(u8),
    Doc,
    Share,
}

impl InstallDir {
    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "bin" => Some(InstallDir::Bin),
            "sbin" => Some(InstallDir::Sbin),
            "libexec" => Some(InstallDir::Libexec),
            "doc" => Some(InstallDir::Doc),
            "share" => Some(InstallDir::Share),
            _ => ident
                .strip_prefix("man")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=8).contains(n))
                .map(InstallDir::Man),
        }
    }

    pub fn relative_path(&self, pkg_name: &str) -> PathBuf {
        match self {
            InstallDir::Bin => PathBuf::from("bin"),
            InstallDir::Sbin => PathBuf::from("sbin"),
            InstallDir::Libexec => PathBuf::from("libexec"),
            InstallDir::Man(n) => PathBuf::from(format!("share/man/man{}", n)),
            InstallDir::Doc => PathBuf::from(format!("share/doc/{}", pkg_name)),
            InstallDir::Share => PathBuf::from("share"),
        }
    }

    /// Files placed here must be runnable.
    pub fn is_executable(&self) -> bool {
        matches!(self, InstallDir::Bin | InstallDir::Sbin | InstallDir::Libexec)
    }

    /// Whether installed files get linked into the prefix.
    pub fn is_linked(&self) -> bool {
        !matches!(self, InstallDir::Libexec)
    }
}

impl Display for InstallDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallDir::Bin => write!(f, "bin"),
            InstallDir::Sbin => write!(f, "sbin"),
            InstallDir::Libexec => write!(f, "libexec"),
            InstallDir::Man(n) => write!(f, "man{}", n),
            InstallDir::Doc => write!(f, "doc"),
            InstallDir::Share => write!(f, "share"),
        }
    }
}

/// A string with `#{name}` interpolations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(pub Vec<StrPart>);

impl Template {
    pub fn literal(value: impl Into<String>) -> Self {
        Template(vec![StrPart::Lit(value.into())])
    }

    pub fn interpolations(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|part| match part {
            StrPart::Interp(name) => Some(name.as_str()),
            StrPart::Lit(_) => None,
        })
    }

    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.0 {
            match part {
                StrPart::Lit(s) => out.push_str(s),
                StrPart::Interp(_) => return None,
            }
        }
        Some(out)
    }

    pub fn render<F>(&self, resolve: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::new();
        for part in &self.0 {
            match part {
                StrPart::Lit(s) => out.push_str(s),
                StrPart::Interp(name) => match resolve(name) {
                    Some(value) => out.push_str(&value),
                    None => return Err(FormulaError::UnknownInterpolation(name.clone())),
                },
            }
        }
        Ok(out)
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for part in &self.0 {
            match part {
                StrPart::Lit(s) => {
                    let mut chars = s.chars().peekable();
                    while let Some(c) = chars.next() {
                        match c {
                            '\\' => write!(f, "\\\\")?,
                            '"' => write!(f, "\\\"")?,
                            '\n' => write!(f, "\\n")?,
                            '\t' => write!(f, "\\t")?,
                            '#' if chars.peek() == Some(&'{') => write!(f, "\\#")?,
                            c => write!(f, "{}", c)?,
                        }
                    }
                }
                StrPart::Interp(name) => write!(f, "#{{{}}}", name)?,
            }
        }
        write!(f, "\"")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub dir: InstallDir,
    pub source: String,
    pub target: Option<String>,
    pub line: usize,
}

impl InstallStep {
    pub fn has_glob(&self) -> bool {
        self.source.contains(['*', '?', '['])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub program: Template,
    pub args: Vec<Template>,
    pub line: usize,
}

/// A field the installer does not act on, kept so rewrites don't lose it.
#[derive(Debug, Clone)]
pub struct ExtraField {
    pub name: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone)]
pub struct Formula {
    pub class_name: String,
    pub name: String,
    pub desc: String,
    pub homepage: String,
    pub url: String,
    pub sha256: String,
    pub license: Option<String>,
    pub version: String,
    pub version_explicit: bool,
    pub install: Vec<InstallStep>,
    pub test: Vec<TestCommand>,
    pub extra: Vec<ExtraField>,
}

impl Formula {
    /// Parses and validates formula text without printing diagnostics.
    /// Any error-severity finding fails the parse; warnings are returned.
    pub fn parse_str(src: &str) -> Result<(Formula, Vec<crate::error::ErrorDetails>)> {
        let (tokens, _) = Lexer::new(src).tokenize()?;
        let document = Parser::new(tokens).parse()?;
        let mut visitor = FormulaVisitor::new(src);
        let formula = visitor.visit(&document);
        let (errors, warnings): (Vec<_>, Vec<_>) = visitor
            .errors
            .into_iter()
            .partition(|e| e.severity == crate::error::Severity::Error);
        match formula {
            Some(formula) if errors.is_empty() => Ok((formula, warnings)),
            _ => Err(FormulaError::Invalid(errors.len().max(1))),
        }
    }

    /// File name of the source archive, taken from the last URL path segment.
    pub fn archive_name(&self) -> String {
        archive_name(&self.url)
    }

    pub fn write_formula<W: Write>(&self, writer: &mut W, comments: &Comments) -> io::Result<()> {
        comments.write_for(writer, "class", "")?;
        writeln!(writer, "class {} < Formula", self.class_name)?;

        let mut field = |writer: &mut W, name: &str, value: &str| -> io::Result<()> {
            comments.write_for(writer, name, "  ")?;
            write!(writer, "  {} {}", name, Template::literal(value))?;
            comments.write_inline(writer, name)?;
            writeln!(writer)
        };

        field(writer, "desc", &self.desc)?;
        field(writer, "homepage", &self.homepage)?;
        field(writer, "url", &self.url)?;
        if self.version_explicit {
            field(writer, "version", &self.version)?;
        }
        field(writer, "sha256", &self.sha256)?;
        if let Some(ref license) = self.license {
            field(writer, "license", license)?;
        }

        for extra in &self.extra {
            comments.write_for(writer, &extra.name, "  ")?;
            write!(writer, "  {}", extra.name)?;
            write_args(writer, &extra.args)?;
            comments.write_inline(writer, &extra.name)?;
            writeln!(writer)?;
        }

        writeln!(writer)?;
        comments.write_for(writer, "install", "  ")?;
        writeln!(writer, "  def install")?;
        for (idx, step) in self.install.iter().enumerate() {
            let key = format!("install:{}", idx);
            comments.write_for(writer, &key, "    ")?;
            write!(
                writer,
                "    {}.install {}",
                step.dir,
                Template::literal(step.source.as_str())
            )?;
            if let Some(ref target) = step.target {
                write!(writer, " => {}", Template::literal(target.as_str()))?;
            }
            comments.write_inline(writer, &key)?;
            writeln!(writer)?;
        }
        comments.write_for(writer, "install:end", "    ")?;
        writeln!(writer, "  end")?;

        if !self.test.is_empty() || comments.has("test") {
            writeln!(writer)?;
            comments.write_for(writer, "test", "  ")?;
            writeln!(writer, "  test do")?;
            for (idx, cmd) in self.test.iter().enumerate() {
                let key = format!("test:{}", idx);
                comments.write_for(writer, &key, "    ")?;
                write!(writer, "    system {}", cmd.program)?;
                for arg in &cmd.args {
                    write!(writer, ", {}", arg)?;
                }
                comments.write_inline(writer, &key)?;
                writeln!(writer)?;
            }
            comments.write_for(writer, "test:end", "    ")?;
            writeln!(writer, "  end")?;
        }

        comments.write_for(writer, "end", "  ")?;
        writeln!(writer, "end")?;
        comments.write_footer(writer)?;
        Ok(())
    }
}

fn write_args<W: Write>(writer: &mut W, args: &[Arg]) -> io::Result<()> {
    for (idx, arg) in args.iter().enumerate() {
        let sep = if idx == 0 { " " } else { ", " };
        match arg {
            Arg::Str(parts) => write!(writer, "{}{}", sep, Template(parts.clone()))?,
            Arg::Pair(key, value) => write!(
                writer,
                "{}{} => {}",
                sep,
                Template(key.clone()),
                Template(value.clone())
            )?,
        }
    }
    Ok(())
}

pub fn archive_name(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("source")
        .to_string()
}

/// Archive formats that are recognised but cannot be unpacked.
const UNSUPPORTED_ARCHIVES: [&str; 7] = [
    ".zip", ".tar.xz", ".txz", ".tar.bz2", ".tbz", ".tbz2", ".7z",
];

/// Whether the URL points at an archive format keg cannot unpack.
pub fn is_unsupported_archive(url: &str) -> bool {
    let name = archive_name(url).to_ascii_lowercase();
    UNSUPPORTED_ARCHIVES.iter().any(|ext| name.ends_with(ext))
}

/// Derives a version from the archive name, e.g. `v1.0.0.tar.gz` -> `1.0.0`.
pub fn version_from_url(url: &str) -> Option<String> {
    let name = archive_name(url);
    VERSION_RE
        .captures(&name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `GitClean` -> `git-clean`, `Mrgitclean` -> `mrgitclean`.
pub fn name_from_class(class_name: &str) -> String {
    let mut name = String::with_capacity(class_name.len() + 4);
    let mut prev: Option<char> = None;
    for c in class_name.chars() {
        if c.is_ascii_uppercase() {
            if prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                name.push('-');
            }
            name.push(c.to_ascii_lowercase());
        } else {
            name.push(c);
        }
        prev = Some(c);
    }
    name
}
