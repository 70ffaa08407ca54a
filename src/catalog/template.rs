// src/catalog/template.rs

//! Typed command templates.
//!
//! Tool command lines are written as argument vectors with `{placeholder}`
//! markers, e.g.
//!
//! ```text
//! ["{exe}", "-f", "{triage}/Windows/AppCompat/Programs/Amcache.hve",
//!  "--csv", "{output}", "--csvf", "jumplist_{user}_parsed.csv"]
//! ```
//!
//! Each argument is parsed once, at catalog load, into an [`ArgTemplate`]:
//! either plain text or a *rooted path* (`{exe}`, `{tool_dir}`, `{triage}`,
//! `{memory}`, `{output}`, `{python}`) followed by `/`-separated segments.
//! Rendering joins segments with `Path::join` and hands every argument to the
//! OS as a single argv element, so no shell quoting is involved anywhere.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("empty command")]
    EmptyCommand,

    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder in '{0}'")]
    Unterminated(String),

    #[error("'{0}': path placeholders must start the argument and be followed by '/'")]
    MisplacedRoot(String),

    #[error("'{0}': path segments may not be '..'")]
    PathEscape(String),

    #[error("'{0}': stdout capture must be a plain file name")]
    InvalidStdout(String),

    #[error("a command cannot repeat over both {{user}} and {{module}}")]
    MixedRepeat,

    #[error("no value available for {0}")]
    Unbound(&'static str),
}

/// Placeholder that anchors an argument to a directory or file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Root {
    Executable,
    ToolDir,
    Triage,
    Memory,
    Output,
    Python,
}

impl Root {
    fn from_name(name: &str) -> Option<Root> {
        match name {
            "exe" => Some(Root::Executable),
            "tool_dir" => Some(Root::ToolDir),
            "triage" => Some(Root::Triage),
            "memory" => Some(Root::Memory),
            "output" => Some(Root::Output),
            "python" => Some(Root::Python),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Root::Executable => "exe",
            Root::ToolDir => "tool_dir",
            Root::Triage => "triage",
            Root::Memory => "memory",
            Root::Output => "output",
            Root::Python => "python",
        }
    }
}

/// Inline piece of a text template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Lit(String),
    User,
    Module,
    Timestamp,
}

impl Part {
    fn from_name(name: &str) -> Option<Part> {
        match name {
            "user" => Some(Part::User),
            "module" => Some(Part::Module),
            "timestamp" => Some(Part::Timestamp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextTemplate {
    parts: Vec<Part>,
}

impl TextTemplate {
    fn push_lit(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        match self.parts.last_mut() {
            Some(Part::Lit(prev)) => prev.push_str(s),
            _ => self.parts.push(Part::Lit(s.to_string())),
        }
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn is_parent_ref(&self) -> bool {
        matches!(self.parts.as_slice(), [Part::Lit(s)] if s == "..")
    }

    fn uses(&self, wanted: &Part) -> bool {
        self.parts.iter().any(|p| std::mem::discriminant(p) == std::mem::discriminant(wanted))
    }

    fn render(&self, ctx: &RenderContext<'_>, binding: Binding<'_>) -> Result<String, TemplateError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Lit(s) => out.push_str(s),
                Part::User => out.push_str(binding.user.ok_or(TemplateError::Unbound("{user}"))?),
                Part::Module => out.push_str(binding.module.ok_or(TemplateError::Unbound("{module}"))?),
                Part::Timestamp => out.push_str(ctx.timestamp),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for TextTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                Part::Lit(s) => f.write_str(s)?,
                Part::User => f.write_str("{user}")?,
                Part::Module => f.write_str("{module}")?,
                Part::Timestamp => f.write_str("{timestamp}")?,
            }
        }
        Ok(())
    }
}

/// One parsed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgTemplate {
    Text(TextTemplate),
    Path { root: Root, segments: Vec<TextTemplate> },
}

impl ArgTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let tokens = tokenize(raw)?;
        let mut iter = tokens.into_iter().peekable();

        let root = match iter.peek() {
            Some(Token::Placeholder(name)) => Root::from_name(name),
            _ => None,
        };
        if root.is_some() {
            iter.next();
        }

        let mut segments = Vec::new();
        let mut current = TextTemplate::default();
        let mut right_after_root = true;

        for token in iter {
            match token {
                Token::Lit(text) => {
                    if root.is_some() {
                        for (i, piece) in text.split('/').enumerate() {
                            if i > 0 {
                                if !current.is_empty() {
                                    segments.push(std::mem::take(&mut current));
                                }
                            } else if right_after_root && !piece.is_empty() {
                                return Err(TemplateError::MisplacedRoot(raw.to_string()));
                            }
                            current.push_lit(piece);
                        }
                    } else {
                        current.push_lit(&text);
                    }
                }
                Token::Placeholder(name) => {
                    if Root::from_name(&name).is_some() || (root.is_some() && right_after_root) {
                        return Err(TemplateError::MisplacedRoot(raw.to_string()));
                    }
                    let part = Part::from_name(&name).ok_or(TemplateError::UnknownPlaceholder(name))?;
                    current.parts.push(part);
                }
            }
            right_after_root = false;
        }

        match root {
            Some(root) => {
                if !current.is_empty() {
                    segments.push(current);
                }
                if segments.iter().any(TextTemplate::is_parent_ref) {
                    return Err(TemplateError::PathEscape(raw.to_string()));
                }
                Ok(ArgTemplate::Path { root, segments })
            }
            None => Ok(ArgTemplate::Text(current)),
        }
    }

    pub fn root(&self) -> Option<Root> {
        match self {
            ArgTemplate::Text(_) => None,
            ArgTemplate::Path { root, .. } => Some(*root),
        }
    }

    fn uses(&self, part: &Part) -> bool {
        match self {
            ArgTemplate::Text(t) => t.uses(part),
            ArgTemplate::Path { segments, .. } => segments.iter().any(|s| s.uses(part)),
        }
    }

    fn render(&self, ctx: &RenderContext<'_>, binding: Binding<'_>) -> Result<OsString, TemplateError> {
        match self {
            ArgTemplate::Text(t) => Ok(OsString::from(t.render(ctx, binding)?)),
            ArgTemplate::Path { root, segments } => {
                let mut path = ctx.root_path(*root)?;
                for segment in segments {
                    path.push(segment.render(ctx, binding)?);
                }
                Ok(path.into_os_string())
            }
        }
    }
}

impl fmt::Display for ArgTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgTemplate::Text(t) => write!(f, "{t}"),
            ArgTemplate::Path { root, segments } => {
                write!(f, "{{{}}}", root.name())?;
                for s in segments {
                    write!(f, "/{s}")?;
                }
                Ok(())
            }
        }
    }
}

enum Token {
    Lit(String),
    Placeholder(String),
}

fn tokenize(raw: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find('{') {
        if start > 0 {
            tokens.push(Token::Lit(rest[..start].to_string()));
        }
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| TemplateError::Unterminated(raw.to_string()))?;
        tokens.push(Token::Placeholder(after[..end].trim().to_string()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Lit(rest.to_string()));
    }

    Ok(tokens)
}

/// How many times a command runs within one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    /// Once per user profile found under `<triage>/Users`.
    PerUser,
    /// Once per selected module.
    PerModule,
}

/// One external command of a tool: program, arguments and optional stdout
/// capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: ArgTemplate,
    args: Vec<ArgTemplate>,
    stdout: Option<TextTemplate>,
    repeat: Repeat,
}

impl CommandTemplate {
    pub fn parse(argv: &[String], stdout: Option<&str>) -> Result<Self, TemplateError> {
        let (program, args) = argv.split_first().ok_or(TemplateError::EmptyCommand)?;
        let program = ArgTemplate::parse(program)?;
        let args = args
            .iter()
            .map(|a| ArgTemplate::parse(a))
            .collect::<Result<Vec<_>, _>>()?;

        let stdout = match stdout {
            Some(raw) => match ArgTemplate::parse(raw)? {
                ArgTemplate::Text(t) if !t.is_empty() && !raw.contains(['/', '\\']) && raw != ".." => Some(t),
                _ => return Err(TemplateError::InvalidStdout(raw.to_string())),
            },
            None => None,
        };

        let uses = |part: &Part| {
            program.uses(part)
                || args.iter().any(|a| a.uses(part))
                || stdout.as_ref().is_some_and(|t| t.uses(part))
        };
        let repeat = match (uses(&Part::User), uses(&Part::Module)) {
            (true, true) => return Err(TemplateError::MixedRepeat),
            (true, false) => Repeat::PerUser,
            (false, true) => Repeat::PerModule,
            (false, false) => Repeat::Once,
        };

        Ok(Self {
            program,
            args,
            stdout,
            repeat,
        })
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    pub fn captures_stdout(&self) -> bool {
        self.stdout.is_some()
    }

    /// All root placeholders referenced by this command.
    pub fn roots(&self) -> impl Iterator<Item = Root> + '_ {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .filter_map(ArgTemplate::root)
    }

    /// Render every concrete invocation of this command.
    pub fn expand(
        &self,
        ctx: &RenderContext<'_>,
        users: &[String],
        modules: &[String],
    ) -> Result<Vec<Invocation>, TemplateError> {
        let bindings: Vec<Binding<'_>> = match self.repeat {
            Repeat::Once => vec![Binding::default()],
            Repeat::PerUser => users
                .iter()
                .map(|u| Binding {
                    user: Some(u.as_str()),
                    module: None,
                })
                .collect(),
            Repeat::PerModule => modules
                .iter()
                .map(|m| Binding {
                    user: None,
                    module: Some(m.as_str()),
                })
                .collect(),
        };

        bindings
            .into_iter()
            .map(|binding| self.render(ctx, binding))
            .collect()
    }

    fn render(&self, ctx: &RenderContext<'_>, binding: Binding<'_>) -> Result<Invocation, TemplateError> {
        let program = self.program.render(ctx, binding)?;
        let args = self
            .args
            .iter()
            .map(|a| a.render(ctx, binding))
            .collect::<Result<Vec<_>, _>>()?;
        let stdout = match &self.stdout {
            Some(t) => Some(ctx.output_dir.join(t.render(ctx, binding)?)),
            None => None,
        };
        Ok(Invocation {
            program,
            args,
            stdout,
        })
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        if let Some(stdout) = &self.stdout {
            write!(f, " > {stdout}")?;
        }
        Ok(())
    }
}

/// Values substituted into root placeholders.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub executable: &'a Path,
    pub triage_root: Option<&'a Path>,
    pub memory_image: Option<&'a Path>,
    pub output_dir: &'a Path,
    pub python: &'a str,
    pub timestamp: &'a str,
}

impl RenderContext<'_> {
    fn root_path(&self, root: Root) -> Result<PathBuf, TemplateError> {
        match root {
            Root::Executable => Ok(self.executable.to_path_buf()),
            Root::ToolDir => Ok(self
                .executable
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()),
            Root::Triage => self
                .triage_root
                .map(Path::to_path_buf)
                .ok_or(TemplateError::Unbound("{triage}")),
            Root::Memory => self
                .memory_image
                .map(Path::to_path_buf)
                .ok_or(TemplateError::Unbound("{memory}")),
            Root::Output => Ok(self.output_dir.to_path_buf()),
            Root::Python => Ok(PathBuf::from(self.python)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Binding<'a> {
    user: Option<&'a str>,
    module: Option<&'a str>,
}

/// A fully rendered process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// When set, stdout is written to this file instead of the log.
    pub stdout: Option<PathBuf>,
}

impl Invocation {
    /// Human-readable command line for logs. Not meant to be re-parsed.
    pub fn display(&self) -> String {
        let mut s = self.program.to_string_lossy().into_owned();
        for a in &self.args {
            s.push(' ');
            let a = a.to_string_lossy();
            if a.contains(' ') {
                s.push('"');
                s.push_str(&a);
                s.push('"');
            } else {
                s.push_str(&a);
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn ctx<'a>(exe: &'a Path, triage: &'a Path, out: &'a Path) -> RenderContext<'a> {
        RenderContext {
            executable: exe,
            triage_root: Some(triage),
            memory_image: None,
            output_dir: out,
            python: "python",
            timestamp: "20250101120000",
        }
    }

    #[test]
    fn rooted_paths_are_joined_per_segment() {
        let cmd = CommandTemplate::parse(
            &argv(&["{exe}", "-f", "{triage}/Windows/AppCompat/Programs/Amcache.hve", "--csv", "{output}"]),
            None,
        )
        .unwrap();
        assert_eq!(cmd.repeat(), Repeat::Once);

        let exe = Path::new("/tools/AmcacheParser.exe");
        let triage = Path::new("/evidence/C");
        let out = Path::new("/out/artifact-collection/AmcacheParser");
        let inv = cmd.expand(&ctx(exe, triage, out), &[], &[]).unwrap();

        assert_eq!(inv.len(), 1);
        assert_eq!(inv[0].program, OsString::from("/tools/AmcacheParser.exe"));
        let expected = triage.join("Windows").join("AppCompat").join("Programs").join("Amcache.hve");
        assert_eq!(inv[0].args[1], expected.into_os_string());
        assert_eq!(inv[0].args[3], out.as_os_str().to_os_string());
    }

    #[test]
    fn user_placeholder_repeats_per_user() {
        let cmd = CommandTemplate::parse(
            &argv(&["{exe}", "-d", "{triage}/Users/{user}/NTUSER.DAT", "--csvf", "userassist_{user}.csv"]),
            None,
        )
        .unwrap();
        assert_eq!(cmd.repeat(), Repeat::PerUser);

        let exe = Path::new("/t/RECmd.exe");
        let triage = Path::new("/c");
        let out = Path::new("/o");
        let users = vec!["alice".to_string(), "bob".to_string()];
        let inv = cmd.expand(&ctx(exe, triage, out), &users, &[]).unwrap();

        assert_eq!(inv.len(), 2);
        assert_eq!(inv[1].args[1], triage.join("Users").join("bob").join("NTUSER.DAT").into_os_string());
        assert_eq!(inv[1].args[3], OsString::from("userassist_bob.csv"));
    }

    #[test]
    fn spaces_and_quotes_stay_inside_one_argument() {
        let cmd = CommandTemplate::parse(&argv(&["{exe}", "{triage}/Users/{user}"]), None).unwrap();
        let exe = Path::new("/t/x");
        let triage = Path::new("/c");
        let out = Path::new("/o");
        let users = vec!["John \"Doe\"; rm -rf".to_string()];
        let inv = cmd.expand(&ctx(exe, triage, out), &users, &[]).unwrap();

        assert_eq!(inv[0].args.len(), 1);
        assert_eq!(inv[0].args[0], triage.join("Users").join("John \"Doe\"; rm -rf").into_os_string());
    }

    #[test]
    fn module_placeholder_drives_stdout_capture() {
        let cmd = CommandTemplate::parse(
            &argv(&["{python}", "{exe}", "-f", "{memory}", "windows.{module}"]),
            Some("{module}.csv"),
        )
        .unwrap();
        assert_eq!(cmd.repeat(), Repeat::PerModule);

        let exe = Path::new("/cache/vol/vol.py");
        let mem = Path::new("/mem.raw");
        let out = Path::new("/o");
        let render = RenderContext {
            executable: exe,
            triage_root: None,
            memory_image: Some(mem),
            output_dir: out,
            python: "python3",
            timestamp: "t",
        };
        let modules = vec!["pslist".to_string(), "netscan".to_string()];
        let inv = cmd.expand(&render, &[], &modules).unwrap();

        assert_eq!(inv.len(), 2);
        assert_eq!(inv[0].program, OsString::from("python3"));
        assert_eq!(inv[1].args[3], OsString::from("windows.netscan"));
        assert_eq!(inv[1].stdout.as_deref(), Some(out.join("netscan.csv").as_path()));
    }

    #[test]
    fn rejects_malformed_templates() {
        assert_eq!(
            ArgTemplate::parse("{nope}"),
            Err(TemplateError::UnknownPlaceholder("nope".to_string()))
        );
        assert!(matches!(ArgTemplate::parse("x{triage}"), Err(TemplateError::MisplacedRoot(_))));
        assert!(matches!(ArgTemplate::parse("{output}x"), Err(TemplateError::MisplacedRoot(_))));
        assert!(matches!(ArgTemplate::parse("{output}{user}"), Err(TemplateError::MisplacedRoot(_))));
        assert!(matches!(ArgTemplate::parse("{triage}/../etc"), Err(TemplateError::PathEscape(_))));
        assert!(matches!(ArgTemplate::parse("{exe"), Err(TemplateError::Unterminated(_))));
        assert_eq!(
            CommandTemplate::parse(&argv(&["{exe}", "{user}", "{module}"]), None),
            Err(TemplateError::MixedRepeat)
        );
        assert!(matches!(
            CommandTemplate::parse(&argv(&["{exe}"]), Some("../x.csv")),
            Err(TemplateError::InvalidStdout(_))
        ));
        assert_eq!(CommandTemplate::parse(&[], None), Err(TemplateError::EmptyCommand));
    }

    #[test]
    fn display_round_trips_the_source_form() {
        let cmd = CommandTemplate::parse(&argv(&["{exe}", "-o", "{output}/hayabusa_{timestamp}.csv"]), None).unwrap();
        assert_eq!(cmd.to_string(), "{exe} -o {output}/hayabusa_{timestamp}.csv");
    }
}
