//! Line-oriented tokenizer.
//!
//! Reads a source file through a [`FileOpener`], strips comments, follows
//! `/include/` and `#include` directives into `.dts`/`.dtsi` files (splicing
//! their tokens in place), skips `#if`/`#ifdef` regions, and produces a flat
//! token stream. [`Token::File`] markers record which file the following
//! tokens came from, so later stages can point diagnostics at the right
//! source.

use std::path::Path;

use crate::error::{DtsError, Result};
use crate::lexer::{scan_token, Token};
use crate::source::FileOpener;

struct Tokenizer<'a> {
    opener: &'a dyn FileOpener,
    tokens: Vec<Token>,
    visited: Vec<(usize, String)>,
}

/// Tokenize `path` and everything it includes.
pub fn tokenize(opener: &dyn FileOpener, path: &str) -> Result<Vec<Token>> {
    let mut tokenizer = Tokenizer {
        opener,
        tokens: Vec::new(),
        visited: Vec::new(),
    };
    tokenizer.read_file(path, 0)?;
    Ok(tokenizer.tokens)
}

/// The files visited while following includes, with their include depth.
/// The top-level file is at depth 0.
pub fn include_tree(opener: &dyn FileOpener, path: &str) -> Result<Vec<(usize, String)>> {
    let mut tokenizer = Tokenizer {
        opener,
        tokens: Vec::new(),
        visited: Vec::new(),
    };
    tokenizer.read_file(path, 0)?;
    Ok(tokenizer.visited)
}

impl<'a> Tokenizer<'a> {
    fn read_file(&mut self, path: &str, depth: usize) -> Result<()> {
        let text = self.opener.open(path)?;
        self.visited.push((depth, path.to_string()));
        self.tokens.push(Token::File(path.to_string()));

        let mut in_comment = false;
        let mut skip_depth = 0usize;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;

            // #if/#ifdef regions are skipped wholesale, tracking nesting.
            if skip_depth > 0 {
                if raw.starts_with("#if") {
                    skip_depth += 1;
                } else if raw.starts_with("#endif") {
                    skip_depth -= 1;
                }
                continue;
            }

            // Preprocessor-style directives are only recognized at column 0;
            // an indented `#address-cells` is an ordinary property name.
            if !in_comment {
                if let Some(directive) = raw.strip_prefix('#') {
                    if let Some(arg) = directive.strip_prefix("include") {
                        self.include(path, line, arg.trim(), depth)?;
                    } else if directive.starts_with("if") {
                        skip_depth = 1;
                    } else if directive.starts_with("endif") {
                        // stray #endif, nothing to close
                    } else {
                        return Err(DtsError::UnknownDirective {
                            file: path.to_string(),
                            line,
                            directive: format!("#{}", directive.trim()),
                        });
                    }
                    continue;
                }
                if let Some(arg) = raw.strip_prefix("/include/") {
                    self.include(path, line, arg.trim(), depth)?;
                    continue;
                }
            }

            let mut rest = raw;
            loop {
                rest = rest.trim_start();
                if in_comment {
                    match rest.find("*/") {
                        Some(end) => {
                            in_comment = false;
                            rest = &rest[end + 2..];
                            continue;
                        }
                        None => break, // comment continues on the next line
                    }
                }
                if rest.is_empty() || rest.starts_with("//") {
                    break;
                }
                if rest.starts_with("/*") {
                    in_comment = true;
                    rest = &rest[2..];
                    continue;
                }
                match scan_token(rest) {
                    Ok((tail, token)) => {
                        self.tokens.push(token);
                        rest = tail;
                    }
                    Err(_) if rest.starts_with('"') || rest.starts_with('\'') => {
                        return Err(DtsError::UnterminatedString {
                            file: path.to_string(),
                            line,
                        });
                    }
                    Err(_) => {
                        return Err(DtsError::BadToken {
                            file: path.to_string(),
                            line,
                            residue: rest.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one include directive. Headers are passed through as tokens;
    /// DTS sources are tokenized in place.
    fn include(&mut self, from: &str, line: usize, arg: &str, depth: usize) -> Result<()> {
        let (inner, raw) = if let Some(body) = arg.strip_prefix('"') {
            let inner = body
                .strip_suffix('"')
                .ok_or_else(|| bad_include(from, line, arg))?;
            (inner, format!("\"{inner}\""))
        } else if let Some(body) = arg.strip_prefix('<') {
            let inner = body
                .strip_suffix('>')
                .ok_or_else(|| bad_include(from, line, arg))?;
            (inner, format!("<{inner}>"))
        } else {
            return Err(bad_include(from, line, arg));
        };

        let extension = Path::new(inner).extension().and_then(|e| e.to_str());
        match extension {
            Some(ext) if ext.starts_with('h') => {
                self.tokens.push(Token::Include);
                self.tokens.push(Token::IncludePath(raw));
                Ok(())
            }
            Some(ext) if ext.starts_with("dts") => {
                let target = self.resolve(from, inner);
                self.read_file(&target, depth + 1)?;
                self.tokens.push(Token::File(from.to_string()));
                Ok(())
            }
            _ => Err(bad_include(from, line, arg)),
        }
    }

    /// An include is looked up next to the including file first, then as
    /// given.
    fn resolve(&self, from: &str, include: &str) -> String {
        if let Some(dir) = Path::new(from).parent() {
            let candidate = dir.join(include).to_string_lossy().into_owned();
            if self.opener.exists(&candidate) {
                return candidate;
            }
        }
        include.to_string()
    }
}

fn bad_include(file: &str, line: usize, path: &str) -> DtsError {
    DtsError::BadInclude {
        file: file.to_string(),
        line,
        path: path.to_string(),
    }
}
