//! Argument handling: flags, ovspecs and the `// redo:` replay line.

use std::io::BufRead;

pub const USAGE: &str = "\
Usage: ovmerge [options] <file>[(,|:)<param>[=<value>]...] ...
  -b <branch>  read files from a git branch instead of the working tree
  -c           prefix the output with a '// redo: ovmerge ...' comment
  -h           show this help
  -i           print the include hierarchy and exit
  -p           add Pi-style i2c/i2c_arm aliases to the base tree
  -r           re-run the command found on the first line of stdin
  -s           sort properties, children and labels in the output
  -t           trace parsing to stderr
  -w           report warnings";

#[derive(Debug)]
pub enum CliError {
    Help,
    Bad(String),
}

/// One positional argument: a file plus its parameter bindings. `bake` is
/// set when parameters were given (or a bare trailing comma asked for it),
/// meaning the overlay's `__overrides__` node must be dropped before
/// composition.
#[derive(Debug, PartialEq, Eq)]
pub struct OvSpec {
    pub file: String,
    pub params: Vec<(String, Option<String>)>,
    pub bake: bool,
}

#[derive(Debug, Default)]
pub struct Options {
    pub branch: Option<String>,
    pub redo_comment: bool,
    pub show_includes: bool,
    pub pi_extras: bool,
    pub sort: bool,
    pub trace: bool,
    pub warn: bool,
    pub ovspecs: Vec<OvSpec>,
}

pub fn parse_args(args: &[String]) -> Result<Options, CliError> {
    let mut options = Options::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-b" => {
                let branch = iter
                    .next()
                    .ok_or_else(|| CliError::Bad("-b requires a branch name".to_string()))?;
                options.branch = Some(branch.clone());
            }
            "-c" => options.redo_comment = true,
            "-h" => return Err(CliError::Help),
            "-i" => options.show_includes = true,
            "-p" => options.pi_extras = true,
            "-r" => {
                // Replay is resolved before parsing; seeing it here means it
                // appeared inside a replayed command line.
                return Err(CliError::Bad("-r cannot be replayed".to_string()));
            }
            "-s" => options.sort = true,
            "-t" => options.trace = true,
            "-w" => options.warn = true,
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(CliError::Bad(format!("unknown option `{flag}`")));
            }
            spec => options.ovspecs.push(parse_ovspec(spec)),
        }
    }
    if options.ovspecs.is_empty() {
        return Err(CliError::Bad("no input files".to_string()));
    }
    Ok(options)
}

/// `NAME(,PARAM(=VAL)?)*`, with `:` also accepted as the first separator.
fn parse_ovspec(spec: &str) -> OvSpec {
    let Some(split) = spec.find([',', ':']) else {
        return OvSpec {
            file: spec.to_string(),
            params: Vec::new(),
            bake: false,
        };
    };
    let file = spec[..split].to_string();
    let mut params = Vec::new();
    let mut bake = false;
    for part in spec[split + 1..].split(',') {
        if part.is_empty() {
            bake = true;
            continue;
        }
        match part.split_once('=') {
            Some((name, value)) => params.push((name.to_string(), Some(value.to_string()))),
            None => params.push((part.to_string(), None)),
        }
    }
    if !params.is_empty() {
        bake = true;
    }
    OvSpec { file, params, bake }
}

/// Read the first line of `input` and turn a `// redo: ovmerge ...` comment
/// back into an argument list.
pub fn replay_args(input: &mut impl BufRead) -> Result<Vec<String>, CliError> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|err| CliError::Bad(err.to_string()))?;
    let rest = line
        .trim_end()
        .strip_prefix("// redo: ovmerge")
        .ok_or_else(|| CliError::Bad("stdin does not start with a redo comment".to_string()))?;
    Ok(split_quoted(rest.trim_start()))
}

/// Split on whitespace, keeping single-quoted stretches together.
pub fn split_quoted(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    for c in text.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending || !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending || !current.is_empty() {
        out.push(current);
    }
    out
}

/// Render arguments back into a replayable command line, quoting anything
/// containing whitespace with single quotes.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.chars().any(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
